// Timeouts, topics, hub and motor configuration
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(250);

// Zenoh topics
pub const TOPIC_CMD_MOVE: &str = "plotter/cmd/move"; // commands
pub const TOPIC_MOTORS: &str = "plotter/state/motors"; // applied motor speeds
pub const TOPIC_HEALTH: &str = "plotter/state/health"; // watchdog health
pub const TOPIC_HUB: &str = "plotter/state/hub"; // hub status

// Motor configuration
// Speeds sent to the hub are clamped to +/- this duty cycle
pub const MAX_SPEED: f32 = 50.0;

// Hub REPL limits and pacing
// Longest single line the hub REPL accepts from us
pub const REPL_MAX_COMMAND_LEN: usize = 160;
// Gap between consecutive commands sent to the hub
pub const COMMAND_GAP: Duration = Duration::from_millis(200);
// Time the hub needs to run a REPL line
pub const REPL_SETTLE: Duration = Duration::from_millis(100);
// Pause between driver upload blocks
pub const DRIVER_BLOCK_PAUSE: Duration = Duration::from_millis(300);
// Wait after entering the REPL before uploading the driver
pub const REPL_STARTUP: Duration = Duration::from_millis(1000);

// Serial link for a hub exposing its REPL over USB
pub const HUB_PORT: &str = "/dev/ttyACM0";
pub const HUB_BAUDRATE: u32 = 115_200;
pub const HUB_TIMEOUT_MS: u64 = 10;

// Driver script uploaded into the hub REPL on connect
pub const DRIVER_SCRIPT: &str = include_str!("../hub/driver.py");

/// Command line options for the runtime binary
#[derive(Debug, Clone, Parser)]
#[command(name = "plotter-zenoh-runtime", about = "Drives a two-motor hub from zenoh move commands")]
pub struct Cli {
    /// Serial port of the hub
    #[arg(long, default_value = HUB_PORT)]
    pub port: String,

    /// Serial baudrate
    #[arg(long, default_value_t = HUB_BAUDRATE)]
    pub baud: u32,

    /// Run against an in-process simulated hub instead of hardware
    #[arg(long)]
    pub simulate: bool,

    /// Upload this driver script instead of the bundled one
    #[arg(long)]
    pub driver: Option<PathBuf>,
}

impl Cli {
    /// Driver source to upload, either the bundled script or the one given on the command line
    pub fn driver_script(&self) -> std::io::Result<String> {
        match &self.driver {
            Some(path) => std::fs::read_to_string(path),
            None => Ok(DRIVER_SCRIPT.to_string()),
        }
    }
}

/// Log filter for both binaries: `RUST_LOG` when set and valid, `info` otherwise
pub fn log_filter() -> EnvFilter {
    log_filter_from(std::env::var("RUST_LOG").ok().as_deref())
}

fn log_filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}
