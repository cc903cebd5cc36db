// In-process simulated hub
//
// Commands are encoded and decoded exactly as they would cross the control
// characteristic; the hub side runs the REPL emulation over two SimMotors.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use super::{HubLink, LinkError, Result};
use crate::hub::{Hub, Repl, SimMotor};
use crate::protocol::{
    CAP_HAS_REPL, CAP_USER_PROGRAM_MULTI_MPY6, Command, Event, HubCapabilities, ProtocolError,
    Status, StatusFlags,
};

/// Write limit of the simulated control characteristic (BLE default MTU minus ATT header)
pub const SIM_MAX_WRITE_SIZE: u16 = 20;
const SIM_MAX_PROGRAM_SIZE: u32 = 256 * 1024;
const SIM_NAME: &str = "Pybricks Hub (simulated)";

pub struct SimLink {
    repl: Repl<SimMotor, SimMotor>,
    capabilities: [u8; HubCapabilities::ENCODED_LEN],
    running: bool,
    events: VecDeque<Vec<u8>>,
    frames_received: usize,
}

impl SimLink {
    pub fn new() -> Self {
        let capabilities = HubCapabilities {
            max_write_size: SIM_MAX_WRITE_SIZE,
            flags: CAP_HAS_REPL | CAP_USER_PROGRAM_MULTI_MPY6,
            max_user_program_size: SIM_MAX_PROGRAM_SIZE,
        };

        let mut link = Self {
            repl: Repl::new(Hub::simulated()),
            capabilities: capabilities.encode(),
            running: false,
            events: VecDeque::new(),
            frames_received: 0,
        };
        link.report_status();
        link
    }

    /// The simulated hub behind the link
    pub fn repl(&self) -> &Repl<SimMotor, SimMotor> {
        &self.repl
    }

    pub fn repl_mut(&mut self) -> &mut Repl<SimMotor, SimMotor> {
        &mut self.repl
    }

    pub fn is_program_running(&self) -> bool {
        self.running
    }

    /// Number of command frames the hub has received
    pub fn frames_received(&self) -> usize {
        self.frames_received
    }

    fn report_status(&mut self) {
        let mut flags = StatusFlags::default();
        if self.running {
            flags = flags.with(Status::UserProgramRunning);
        }
        self.events.push_back(Event::StatusReport(flags).encode());
    }

    fn flush_stdout(&mut self) {
        let output = self.repl.take_output();
        if !output.is_empty() {
            self.events.push_back(Event::WriteStdout(output).encode());
        }
    }

    fn handle(&mut self, command: Command) -> Result<()> {
        match command {
            Command::StartRepl => {
                info!("Simulated hub: REPL started");
                self.repl.reset();
                self.running = true;
                self.report_status();
            }
            Command::StopUserProgram => {
                info!("Simulated hub: program stopped");
                self.repl.reset();
                self.running = false;
                self.report_status();
            }
            Command::WriteStdin(data) => {
                if self.running {
                    self.repl.feed(&data);
                    self.flush_stdout();
                } else {
                    warn!("Simulated hub: dropping {} stdin bytes, no program running", data.len());
                }
            }
            other => {
                return Err(LinkError::Unsupported {
                    link: SIM_NAME.to_string(),
                    command: format!("{:?}", other),
                });
            }
        }
        Ok(())
    }
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl HubLink for SimLink {
    fn name(&self) -> &str {
        SIM_NAME
    }

    fn capabilities(&self) -> Option<HubCapabilities> {
        HubCapabilities::decode(&self.capabilities).ok()
    }

    fn send(&mut self, command: &Command) -> Result<()> {
        let frame = command.encode();
        let max = SIM_MAX_WRITE_SIZE as usize;
        if frame.len() > max {
            return Err(ProtocolError::FrameTooLong {
                len: frame.len(),
                max,
            }
            .into());
        }

        self.frames_received += 1;
        let command = Command::decode(&frame)?;
        debug!("Simulated hub received {:?}", command);
        self.handle(command)
    }

    fn poll_event(&mut self) -> Result<Option<Event>> {
        match self.events.pop_front() {
            Some(frame) => Ok(Some(Event::decode(&frame)?)),
            None => Ok(None),
        }
    }
}
