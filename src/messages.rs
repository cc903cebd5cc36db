// Define message types shared by the runtime, the host service and the hub model

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Printed by the hub after a successful `move`
pub const TOKEN_OK_MOVE: &str = "OK:MOVE";
/// Printed by the hub after a successful `stop_all`
pub const TOKEN_OK_STOP_ALL: &str = "OK:STOP_ALL";

const PREFIX_OK: &str = "OK:";
const PREFIX_ERROR: &str = "ERROR:";
const PREFIX_READY: &str = "READY";

// Command from teleop/scripts -> runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct MoveCommand {
    pub x_speed: f32,
    pub y_speed: f32,
}

/// Motor speeds last sent to the hub, published by the runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct MotorMoveData {
    pub x_speed: f32,
    pub y_speed: f32,
    pub timestamp_ms: u64,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
}

/// What the host last learned about the hub
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HubStatus {
    #[default]
    Disconnected,
    Connected,
    Ready,
    CommandSuccessful,
    CommandFailed,
}

/// A call into one of the driver functions defined on the hub
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplCall {
    Move { x_speed: f32, y_speed: f32 },
    StopAll,
}

impl ReplCall {
    pub const MOVE: &'static str = "move";
    pub const STOP_ALL: &'static str = "stop_all";

    pub fn name(&self) -> &'static str {
        match self {
            ReplCall::Move { .. } => Self::MOVE,
            ReplCall::StopAll => Self::STOP_ALL,
        }
    }
}

impl fmt::Display for ReplCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplCall::Move { x_speed, y_speed } => write!(f, "move({}, {})", x_speed, y_speed),
            ReplCall::StopAll => write!(f, "stop_all()"),
        }
    }
}

/// Why a line could not be read as a driver call
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("not a function call")]
    NotACall,

    #[error("name '{0}' isn't defined")]
    UnknownFunction(String),

    #[error("function takes {expected} positional arguments but {given} were given")]
    ArgumentCount { expected: usize, given: usize },

    #[error("can't convert '{0}' to float")]
    InvalidNumber(String),
}

impl FromStr for ReplCall {
    type Err = CallError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (name, args) = split_call(line).ok_or(CallError::NotACall)?;
        let expect = |expected: usize| {
            if args.len() == expected {
                Ok(())
            } else {
                Err(CallError::ArgumentCount {
                    expected,
                    given: args.len(),
                })
            }
        };

        match name {
            Self::MOVE => {
                expect(2)?;
                Ok(ReplCall::Move {
                    x_speed: parse_number(args[0])?,
                    y_speed: parse_number(args[1])?,
                })
            }
            Self::STOP_ALL => {
                expect(0)?;
                Ok(ReplCall::StopAll)
            }
            other => Err(CallError::UnknownFunction(other.to_string())),
        }
    }
}

fn parse_number(arg: &str) -> Result<f32, CallError> {
    arg.parse::<f32>()
        .map_err(|_| CallError::InvalidNumber(arg.to_string()))
}

/// Split `name(a, b, ...)` into its name and trimmed arguments.
///
/// Commas inside quoted strings do not split. Returns `None` for anything
/// that is not a plain call expression (assignments, statements).
pub fn split_call(line: &str) -> Option<(&str, Vec<&str>)> {
    let line = line.trim();
    let open = line.find('(')?;
    if !line.ends_with(')') {
        return None;
    }

    let name = line[..open].trim();
    let valid_name = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid_name {
        return None;
    }

    Some((name, split_args(&line[open + 1..line.len() - 1])))
}

fn split_args(inner: &str) -> Vec<&str> {
    if inner.trim().is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in inner.char_indices() {
        match (quote, c) {
            (None, '\'' | '"') => quote = Some(c),
            (Some(q), _) if c == q => quote = None,
            (None, ',') => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(inner[start..].trim());
    args
}

/// A line printed by the hub, classified by its status token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubResponse {
    Ready,
    Ok(String),
    Error { command: String, message: String },
    Other(String),
}

impl HubResponse {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if line.starts_with(PREFIX_READY) {
            HubResponse::Ready
        } else if let Some(rest) = line.strip_prefix(PREFIX_OK) {
            let command = rest.split(':').next().unwrap_or_default();
            HubResponse::Ok(command.to_string())
        } else if let Some(rest) = line.strip_prefix(PREFIX_ERROR) {
            let (command, message) = rest.split_once(':').unwrap_or((rest, ""));
            HubResponse::Error {
                command: command.to_string(),
                message: message.to_string(),
            }
        } else {
            HubResponse::Other(line.to_string())
        }
    }

    /// Status the hub moves to after printing this line, if any
    pub fn status(&self) -> Option<HubStatus> {
        match self {
            HubResponse::Ready => Some(HubStatus::Ready),
            HubResponse::Ok(_) => Some(HubStatus::CommandSuccessful),
            HubResponse::Error { .. } => Some(HubStatus::CommandFailed),
            HubResponse::Other(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repl_call_display() {
        let call = ReplCall::Move {
            x_speed: 30.0,
            y_speed: -20.0,
        };
        assert_eq!(call.to_string(), "move(30, -20)");
        assert_eq!(ReplCall::StopAll.to_string(), "stop_all()");

        let fractional = ReplCall::Move {
            x_speed: 12.5,
            y_speed: 0.0,
        };
        assert_eq!(fractional.to_string(), "move(12.5, 0)");
    }

    #[test]
    fn test_repl_call_parse() {
        assert_eq!(
            "move(30, -20)".parse::<ReplCall>(),
            Ok(ReplCall::Move {
                x_speed: 30.0,
                y_speed: -20.0
            })
        );
        assert_eq!("  stop_all( ) ".parse::<ReplCall>(), Ok(ReplCall::StopAll));
    }

    #[test]
    fn test_repl_call_parse_errors() {
        assert_eq!(
            "move(1)".parse::<ReplCall>(),
            Err(CallError::ArgumentCount {
                expected: 2,
                given: 1
            })
        );
        assert_eq!(
            "move(fast, 1)".parse::<ReplCall>(),
            Err(CallError::InvalidNumber("fast".to_string()))
        );
        assert_eq!(
            "pen_up()".parse::<ReplCall>(),
            Err(CallError::UnknownFunction("pen_up".to_string()))
        );
        assert_eq!(
            "hub = TechnicHub()".parse::<ReplCall>(),
            Err(CallError::NotACall)
        );
    }

    #[test]
    fn test_split_call_respects_quotes() {
        let (name, args) = split_call("print('a, b', 'move' in globals())").unwrap();
        assert_eq!(name, "print");
        assert_eq!(args, vec!["'a, b'", "'move' in globals()"]);
    }

    #[test]
    fn test_hub_response_parse() {
        assert_eq!(
            HubResponse::parse("READY - Driver loaded successfully"),
            HubResponse::Ready
        );
        assert_eq!(
            HubResponse::parse("OK:MOVE\r"),
            HubResponse::Ok("MOVE".to_string())
        );
        assert_eq!(
            HubResponse::parse("ERROR:MOVE:Motor on Port.A failed: stalled"),
            HubResponse::Error {
                command: "MOVE".to_string(),
                message: "Motor on Port.A failed: stalled".to_string()
            }
        );
        assert_eq!(
            HubResponse::parse(">>> "),
            HubResponse::Other(">>>".to_string())
        );
    }

    #[test]
    fn test_response_status() {
        assert_eq!(
            HubResponse::parse(TOKEN_OK_STOP_ALL).status(),
            Some(HubStatus::CommandSuccessful)
        );
        assert_eq!(HubResponse::parse("hello").status(), None);
    }

    #[test]
    fn test_serde_payloads() {
        let cmd: MoveCommand = serde_json::from_str(r#"{"x_speed":25.0,"y_speed":-5.0}"#).unwrap();
        assert_eq!(
            cmd,
            MoveCommand {
                x_speed: 25.0,
                y_speed: -5.0
            }
        );
        assert_eq!(
            serde_json::to_string(&HubStatus::CommandFailed).unwrap(),
            "\"command_failed\""
        );
        assert_eq!(
            serde_json::to_string(&RuntimeHealth::CmdStale).unwrap(),
            "\"cmd_stale\""
        );
    }
}
