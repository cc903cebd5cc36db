// Transports between the host and the hub
//
// Provides:
// - HubLink trait speaking the Pybricks command/event protocol
// - SerialLink for a hub REPL on a USB serial port
// - SimLink, an in-process simulated hub

mod serial;
mod sim;

use crate::protocol::{Command, Event, HubCapabilities, ProtocolError};

pub use serial::SerialLink;
pub use sim::SimLink;

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("{link} does not support {command}")]
    Unsupported { link: String, command: String },

    #[error("Link disconnected")]
    Disconnected,
}

pub type Result<T> = std::result::Result<T, LinkError>;

/// A connection to a hub
pub trait HubLink {
    /// Device name shown to the user
    fn name(&self) -> &str;

    /// Hub capabilities, when the transport can report them
    fn capabilities(&self) -> Option<HubCapabilities>;

    /// Send one command to the hub
    fn send(&mut self, command: &Command) -> Result<()>;

    /// Next pending event, if any. Never blocks for long.
    fn poll_event(&mut self) -> Result<Option<Event>>;
}

impl<L: HubLink + ?Sized> HubLink for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capabilities(&self) -> Option<HubCapabilities> {
        (**self).capabilities()
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        (**self).send(command)
    }

    fn poll_event(&mut self) -> Result<Option<Event>> {
        (**self).poll_event()
    }
}
