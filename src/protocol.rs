// Pybricks BLE profile: commands written to and events notified from the
// control/event characteristic.
//
// Frame format: [type, payload...], multi-byte integers little-endian.

/// Pybricks service, used to discover hubs running Pybricks firmware
pub const PYBRICKS_SERVICE_UUID: &str = "c5f50001-8280-46da-89f4-6d8051e4aeef";
/// Characteristic that takes commands and notifies events
pub const PYBRICKS_CONTROL_EVENT_UUID: &str = "c5f50002-8280-46da-89f4-6d8051e4aeef";
/// Characteristic describing what the hub supports
pub const PYBRICKS_HUB_CAPABILITIES_UUID: &str = "c5f50003-8280-46da-89f4-6d8051e4aeef";

/// Command type bytes
const CMD_STOP_USER_PROGRAM: u8 = 0;
const CMD_START_USER_PROGRAM: u8 = 1;
const CMD_START_REPL: u8 = 2;
const CMD_WRITE_USER_PROGRAM_META: u8 = 3;
const CMD_WRITE_USER_RAM: u8 = 4;
const CMD_RESET_IN_UPDATE_MODE: u8 = 5;
const CMD_WRITE_STDIN: u8 = 6;

/// Event type bytes
const EVT_STATUS_REPORT: u8 = 0;
const EVT_WRITE_STDOUT: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,

    #[error("Unknown command type {0}")]
    UnknownCommand(u8),

    #[error("Unknown event type {0}")]
    UnknownEvent(u8),

    #[error("Frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("Frame of {len} bytes exceeds the {max} byte write limit")]
    FrameTooLong { len: usize, max: usize },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Commands sent from the host to the hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    StopUserProgram,
    StartUserProgram,
    StartRepl,
    WriteUserProgramMeta { size: u32 },
    WriteUserRam { offset: u32, data: Vec<u8> },
    ResetInUpdateMode,
    WriteStdin(Vec<u8>),
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::StopUserProgram => vec![CMD_STOP_USER_PROGRAM],
            Command::StartUserProgram => vec![CMD_START_USER_PROGRAM],
            Command::StartRepl => vec![CMD_START_REPL],
            Command::WriteUserProgramMeta { size } => {
                let mut frame = vec![CMD_WRITE_USER_PROGRAM_META];
                frame.extend_from_slice(&size.to_le_bytes());
                frame
            }
            Command::WriteUserRam { offset, data } => {
                let mut frame = Vec::with_capacity(5 + data.len());
                frame.push(CMD_WRITE_USER_RAM);
                frame.extend_from_slice(&offset.to_le_bytes());
                frame.extend_from_slice(data);
                frame
            }
            Command::ResetInUpdateMode => vec![CMD_RESET_IN_UPDATE_MODE],
            Command::WriteStdin(data) => {
                let mut frame = Vec::with_capacity(1 + data.len());
                frame.push(CMD_WRITE_STDIN);
                frame.extend_from_slice(data);
                frame
            }
        }
    }

    /// Parse a command frame, as the hub side does
    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (&kind, payload) = frame.split_first().ok_or(ProtocolError::Empty)?;
        match kind {
            CMD_STOP_USER_PROGRAM => Ok(Command::StopUserProgram),
            CMD_START_USER_PROGRAM => Ok(Command::StartUserProgram),
            CMD_START_REPL => Ok(Command::StartRepl),
            CMD_WRITE_USER_PROGRAM_META => Ok(Command::WriteUserProgramMeta {
                size: read_u32(frame, 1)?,
            }),
            CMD_WRITE_USER_RAM => Ok(Command::WriteUserRam {
                offset: read_u32(frame, 1)?,
                data: payload[4..].to_vec(),
            }),
            CMD_RESET_IN_UPDATE_MODE => Ok(Command::ResetInUpdateMode),
            CMD_WRITE_STDIN => Ok(Command::WriteStdin(payload.to_vec())),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// Status flags reported by the hub
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    BatteryLowWarning = 0,
    BatteryCriticalShutdown = 1,
    BatteryHighCurrent = 2,
    BleAdvertising = 3,
    BleLowSignal = 4,
    PowerButtonPressed = 5,
    UserProgramRunning = 6,
    Shutdown = 7,
}

/// Bit set of `Status` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusFlags(pub u32);

impl StatusFlags {
    pub fn contains(&self, status: Status) -> bool {
        self.0 & (1 << status as u8) != 0
    }

    pub fn with(self, status: Status) -> Self {
        Self(self.0 | (1 << status as u8))
    }
}

/// Events sent from the hub to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    StatusReport(StatusFlags),
    WriteStdout(Vec<u8>),
}

impl Event {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Event::StatusReport(flags) => {
                let mut frame = vec![EVT_STATUS_REPORT];
                frame.extend_from_slice(&flags.0.to_le_bytes());
                frame
            }
            Event::WriteStdout(data) => {
                let mut frame = Vec::with_capacity(1 + data.len());
                frame.push(EVT_WRITE_STDOUT);
                frame.extend_from_slice(data);
                frame
            }
        }
    }

    pub fn decode(frame: &[u8]) -> Result<Self> {
        let (&kind, payload) = frame.split_first().ok_or(ProtocolError::Empty)?;
        match kind {
            EVT_STATUS_REPORT => Ok(Event::StatusReport(StatusFlags(read_u32(frame, 1)?))),
            EVT_WRITE_STDOUT => Ok(Event::WriteStdout(payload.to_vec())),
            other => Err(ProtocolError::UnknownEvent(other)),
        }
    }
}

/// Capability flag: hub has an interactive REPL
pub const CAP_HAS_REPL: u32 = 1 << 0;
/// Capability flag: MultiMpy6 programs without native modules
pub const CAP_USER_PROGRAM_MULTI_MPY6: u32 = 1 << 1;
/// Capability flag: MultiMpy6 programs with native modules (MPY ABI v6.1)
pub const CAP_USER_PROGRAM_MULTI_MPY6_NATIVE: u32 = 1 << 2;

/// Contents of the hub capabilities characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubCapabilities {
    /// Largest frame the control characteristic accepts, command byte included
    pub max_write_size: u16,
    pub flags: u32,
    pub max_user_program_size: u32,
}

impl HubCapabilities {
    pub const ENCODED_LEN: usize = 10;

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < Self::ENCODED_LEN {
            return Err(ProtocolError::TooShort {
                expected: Self::ENCODED_LEN,
                actual: data.len(),
            });
        }
        Ok(Self {
            max_write_size: u16::from_le_bytes([data[0], data[1]]),
            flags: read_u32(data, 2)?,
            max_user_program_size: read_u32(data, 6)?,
        })
    }

    pub fn encode(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..2].copy_from_slice(&self.max_write_size.to_le_bytes());
        out[2..6].copy_from_slice(&self.flags.to_le_bytes());
        out[6..].copy_from_slice(&self.max_user_program_size.to_le_bytes());
        out
    }

    pub fn has_repl(&self) -> bool {
        self.flags & CAP_HAS_REPL != 0
    }

    /// Largest stdin payload that fits in one frame
    pub fn max_stdin_chunk(&self) -> usize {
        (self.max_write_size as usize).saturating_sub(1).max(1)
    }
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32> {
    let bytes = data
        .get(offset..offset + 4)
        .ok_or(ProtocolError::TooShort {
            expected: offset + 4,
            actual: data.len(),
        })?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
