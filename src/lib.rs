// Host runtime for a two-motor Pybricks hub
//
// Provides:
// - A model of the hub-side driver (two DC motors, move / stop_all)
// - The Pybricks command/event protocol and transports to reach a hub
// - A host service that uploads the driver and sends motor commands
// - A zenoh-fed runtime loop with a command watchdog

pub mod config;
pub mod hub;
pub mod link;
pub mod messages;
pub mod protocol;
pub mod runtime;
pub mod service;
