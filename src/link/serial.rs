// Hub REPL over a USB serial port
//
// The serial REPL has no framing: stdin bytes go out as-is and whatever the
// hub prints comes back as stdout. Program control maps onto control keys.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::{HubLink, LinkError, Result};
use crate::config::{HUB_BAUDRATE, HUB_TIMEOUT_MS};
use crate::protocol::{Command, Event, HubCapabilities};

/// Ctrl-C, interrupts the running program
const KEY_INTERRUPT: u8 = 0x03;

/// Read buffer size for stdout polling
const READ_CHUNK: usize = 256;

pub struct SerialLink {
    name: String,
    port: Box<dyn SerialPort>,
}

impl SerialLink {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, HUB_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(HUB_TIMEOUT_MS))
            .open()?;

        Ok(Self {
            name: port_name.to_string(),
            port,
        })
    }

    fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("Serial write {} bytes", bytes.len());
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Raw bytes a command becomes on the serial REPL, if it has a serial form
fn serial_bytes(command: &Command) -> Option<Vec<u8>> {
    match command {
        Command::WriteStdin(data) => Some(data.clone()),
        Command::StopUserProgram => Some(vec![KEY_INTERRUPT]),
        // The REPL is already running; a newline brings up a fresh prompt
        Command::StartRepl => Some(b"\r\n".to_vec()),
        _ => None,
    }
}

impl HubLink for SerialLink {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Option<HubCapabilities> {
        None
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        match serial_bytes(command) {
            Some(bytes) => self.write_raw(&bytes),
            None => Err(LinkError::Unsupported {
                link: self.name.clone(),
                command: format!("{:?}", command),
            }),
        }
    }

    fn poll_event(&mut self) -> Result<Option<Event>> {
        let mut buf = [0u8; READ_CHUNK];
        match self.port.read(&mut buf) {
            Ok(0) => Err(LinkError::Disconnected),
            Ok(n) => Ok(Some(Event::WriteStdout(buf[..n].to_vec()))),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(LinkError::Io(e)),
        }
    }
}
