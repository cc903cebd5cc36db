// Host-side hub service
//
// Connects to a hub, uploads the driver script into its REPL, sends motor
// commands as REPL calls and tracks what the hub prints back.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::config::{
    COMMAND_GAP, DRIVER_BLOCK_PAUSE, MAX_SPEED, REPL_MAX_COMMAND_LEN, REPL_SETTLE, REPL_STARTUP,
};
use crate::link::{HubLink, LinkError};
use crate::messages::{HubResponse, HubStatus, MotorMoveData, ReplCall};
use crate::protocol::{Command, Event, Status};

/// Verification line run after the driver upload
const VERIFY_DRIVER: &str =
    "print('VERIFICATION: Functions loaded -', 'move' in globals(), 'stop_all' in globals())";
/// Printed once the driver is in place
const SIGNAL_READY: &str = "print('READY - Driver loaded successfully')";

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not connected to a hub")]
    NotConnected,

    #[error("Command too long: {len} bytes (max {max})")]
    CommandTooLong { len: usize, max: usize },

    #[error("Link error: {0}")]
    Link(#[from] LinkError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Timing and limits used when talking to the hub
#[derive(Debug, Clone, Copy)]
pub struct ServiceConfig {
    pub repl_startup: Duration,
    pub repl_settle: Duration,
    pub block_pause: Duration,
    pub command_gap: Duration,
    pub max_speed: f32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            repl_startup: REPL_STARTUP,
            repl_settle: REPL_SETTLE,
            block_pause: DRIVER_BLOCK_PAUSE,
            command_gap: COMMAND_GAP,
            max_speed: MAX_SPEED,
        }
    }
}

impl ServiceConfig {
    /// No pauses at all, for simulated hubs
    pub fn immediate() -> Self {
        Self {
            repl_startup: Duration::ZERO,
            repl_settle: Duration::ZERO,
            block_pause: Duration::ZERO,
            command_gap: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Connection state as seen by the host
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionState {
    pub connected: bool,
    pub device_name: Option<String>,
    pub error: Option<String>,
}

/// Motor speeds last requested from the hub
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MotorState {
    pub x_speed: f32,
    pub y_speed: f32,
    pub is_active: bool,
}

pub struct HubService<L> {
    link: L,
    config: ServiceConfig,
    state: ConnectionState,
    status: HubStatus,
    last_message: Option<String>,
    driver_loading: bool,
    functions_ready: bool,
    motors: MotorState,
    stdout: Vec<u8>,
}

impl<L: HubLink> HubService<L> {
    pub fn new(link: L, config: ServiceConfig) -> Self {
        Self {
            link,
            config,
            state: ConnectionState::default(),
            status: HubStatus::Disconnected,
            last_message: None,
            driver_loading: false,
            functions_ready: false,
            motors: MotorState::default(),
            stdout: Vec::new(),
        }
    }

    /// Connect, start the REPL and upload the driver
    pub fn connect(&mut self, driver: &str) -> Result<()> {
        info!("Connecting to {}", self.link.name());
        self.state.connected = true;
        self.state.device_name = Some(self.link.name().to_string());
        self.state.error = None;
        self.status = HubStatus::Connected;

        if let Err(e) = self.start_repl(driver) {
            self.state.error = Some(format!("Connection failed: {}", e));
            self.reset_state();
            return Err(e);
        }

        info!("Connected to {}", self.link.name());
        Ok(())
    }

    fn start_repl(&mut self, driver: &str) -> Result<()> {
        self.link.send(&Command::StartRepl)?;
        info!("REPL mode started");
        pause(self.config.repl_startup);

        self.driver_loading = true;
        let result = self.load_driver(driver);
        self.driver_loading = false;
        result
    }

    /// Upload driver source into the REPL block by block, then verify it
    pub fn load_driver(&mut self, script: &str) -> Result<()> {
        let blocks = driver_blocks(script, REPL_MAX_COMMAND_LEN);
        info!("Sending driver in {} blocks", blocks.len());

        for (i, block) in blocks.iter().enumerate() {
            debug!("Sending block {}/{} ({} bytes)", i + 1, blocks.len(), block.len());
            self.send_repl_command(block)?;
            pause(self.config.block_pause);
        }

        self.send_repl_command(VERIFY_DRIVER)?;
        self.send_repl_command(SIGNAL_READY)?;
        self.functions_ready = true;
        self.poll()?;

        info!("Driver loaded and initialized");
        Ok(())
    }

    /// Type one line into the hub REPL and run it
    pub fn send_repl_command(&mut self, command: &str) -> Result<()> {
        if !self.state.connected {
            return Err(ServiceError::NotConnected);
        }
        if command.len() > REPL_MAX_COMMAND_LEN {
            return Err(ServiceError::CommandTooLong {
                len: command.len(),
                max: REPL_MAX_COMMAND_LEN,
            });
        }

        debug!("Sending REPL command ({} bytes): {:?}", command.len(), command);
        self.write_stdin(command.as_bytes())?;
        self.write_stdin(b"\r\n")?;
        pause(self.config.repl_settle);
        Ok(())
    }

    fn write_stdin(&mut self, data: &[u8]) -> Result<()> {
        let chunk_size = self
            .link
            .capabilities()
            .map(|caps| caps.max_stdin_chunk())
            .unwrap_or(data.len().max(1));

        for chunk in data.chunks(chunk_size) {
            if let Err(e) = self.link.send(&Command::WriteStdin(chunk.to_vec())) {
                self.state.error = Some(format!("Failed to send command: {}", e));
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Clamp and send both motor speeds. Failures are logged, the requested
    /// speeds are kept either way.
    pub fn set_motor_speeds(&mut self, x_speed: f32, y_speed: f32) {
        if self.driver_loading {
            warn!("Cannot control motors while driver is loading");
            return;
        }

        let max = self.config.max_speed;
        let x_speed = x_speed.clamp(-max, max);
        let y_speed = y_speed.clamp(-max, max);

        self.motors = MotorState {
            x_speed,
            y_speed,
            is_active: x_speed != 0.0 || y_speed != 0.0,
        };

        let call = ReplCall::Move { x_speed, y_speed };
        if let Err(e) = self.send_repl_command(&call.to_string()) {
            error!("Failed to set motor speeds: {}", e);
        }
    }

    /// Change the X speed, keeping Y
    pub fn set_x_speed(&mut self, speed: f32) {
        self.set_motor_speeds(speed, self.motors.y_speed);
    }

    /// Change the Y speed, keeping X
    pub fn set_y_speed(&mut self, speed: f32) {
        self.set_motor_speeds(self.motors.x_speed, speed);
    }

    pub fn stop_all_motors(&mut self) {
        if self.driver_loading {
            warn!("Cannot control motors while driver is loading");
            return;
        }

        self.motors = MotorState::default();
        if let Err(e) = self.send_repl_command(&ReplCall::StopAll.to_string()) {
            error!("Failed to stop motors: {}", e);
        }
    }

    /// Drain pending hub events and return the complete lines printed since last time
    pub fn poll(&mut self) -> Result<Vec<HubResponse>> {
        let mut responses = Vec::new();

        loop {
            let event = match self.link.poll_event() {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(LinkError::Disconnected) => {
                    warn!("Hub disconnected");
                    self.reset_state();
                    return Err(LinkError::Disconnected.into());
                }
                Err(e) => return Err(e.into()),
            };

            match event {
                Event::WriteStdout(data) => {
                    self.stdout.extend_from_slice(&data);
                    while let Some(pos) = self.stdout.iter().position(|&b| b == b'\n') {
                        let raw: Vec<u8> = self.stdout.drain(..=pos).collect();
                        let line = String::from_utf8_lossy(&raw).trim().to_string();
                        if line.is_empty() {
                            continue;
                        }
                        debug!("Hub stdout: {}", line);
                        let response = HubResponse::parse(&line);
                        self.apply_response(&response);
                        self.last_message = Some(line);
                        responses.push(response);
                    }
                }
                Event::StatusReport(flags) => {
                    debug!("Hub status report: {:#010x}", flags.0);
                    if flags.contains(Status::BatteryLowWarning) {
                        warn!("Hub battery low");
                    }
                    if flags.contains(Status::Shutdown) {
                        warn!("Hub is shutting down");
                    }
                }
            }
        }

        Ok(responses)
    }

    fn apply_response(&mut self, response: &HubResponse) {
        match response {
            HubResponse::Ready => {
                info!("Hub is ready to accept commands");
                self.functions_ready = true;
            }
            HubResponse::Ok(command) => info!("Command {} executed successfully", command),
            HubResponse::Error { command, message } => {
                error!("Error executing {}: {}", command, message);
                self.state.error = Some(format!("Command error: {}", message));
            }
            HubResponse::Other(_) => {}
        }

        if let Some(status) = response.status() {
            self.status = status;
        }
    }

    /// Stop the program on the hub and forget the connection
    pub fn disconnect(&mut self) {
        if self.state.connected {
            if let Err(e) = self.link.send(&Command::StopUserProgram) {
                warn!("Failed to stop user program: {}", e);
            }
        }
        self.reset_state();
        info!("Disconnected");
    }

    fn reset_state(&mut self) {
        self.state.connected = false;
        self.state.device_name = None;
        self.status = HubStatus::Disconnected;
        self.functions_ready = false;
        self.driver_loading = false;
        self.stdout.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state.connected
    }

    pub fn connection(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> HubStatus {
        self.status
    }

    pub fn last_message(&self) -> Option<&str> {
        self.last_message.as_deref()
    }

    pub fn is_driver_loading(&self) -> bool {
        self.driver_loading
    }

    pub fn functions_ready(&self) -> bool {
        self.functions_ready
    }

    pub fn motors(&self) -> MotorState {
        self.motors
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn move_data(&self) -> MotorMoveData {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        MotorMoveData {
            x_speed: self.motors.x_speed,
            y_speed: self.motors.y_speed,
            timestamp_ms,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

/// Split driver source into REPL-sized blocks.
///
/// Blank lines and comments are dropped. Each top-level compound statement
/// (`def`, `class`, or any unindented line ending in `:`) becomes its own block
/// together with its indented body, ending in a newline so the REPL closes it.
/// Other lines are packed together up to `max_len` characters.
pub fn driver_blocks(script: &str, max_len: usize) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut in_block = false;

    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indented = line.starts_with(char::is_whitespace);
        let keyword = trimmed
            .split(|c: char| c == ':' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        let continues = matches!(keyword, "else" | "elif" | "except" | "finally");
        if in_block && (indented || continues) {
            current.push('\n');
            current.push_str(line);
        } else if !indented && (line.starts_with("def ") || trimmed.ends_with(':')) {
            if !current.is_empty() {
                if in_block {
                    current.push('\n');
                }
                blocks.push(std::mem::take(&mut current));
            }
            current.push_str(line);
            in_block = true;
        } else if in_block {
            current.push('\n');
            blocks.push(std::mem::take(&mut current));
            current.push_str(line);
            in_block = false;
        } else {
            let separator = usize::from(!current.is_empty());
            if current.len() + separator + line.len() > max_len {
                if !current.is_empty() {
                    blocks.push(std::mem::take(&mut current));
                }
            } else if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
        }
    }

    if !current.is_empty() {
        if in_block {
            current.push('\n');
        }
        blocks.push(current);
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DRIVER_SCRIPT;
    use crate::hub::MotorCommand;
    use crate::link::SimLink;

    fn connected() -> HubService<SimLink> {
        let mut service = HubService::new(SimLink::new(), ServiceConfig::immediate());
        service.connect(DRIVER_SCRIPT).unwrap();
        service
    }

    #[test]
    fn test_driver_blocks() {
        let blocks = driver_blocks(DRIVER_SCRIPT, REPL_MAX_COMMAND_LEN);
        assert_eq!(blocks.len(), 4);
        assert_eq!(blocks[0].lines().count(), 4);
        assert!(blocks[0].starts_with("from pybricks.hubs import TechnicHub"));
        assert!(blocks[1].starts_with("hub = TechnicHub()"));
        assert!(blocks[2].starts_with("def move(x_speed, y_speed):"));
        assert!(blocks[2].ends_with("print(\"OK:MOVE\")\n"));
        assert!(blocks[3].starts_with("def stop_all():"));
        assert!(blocks[3].ends_with('\n'));
        assert!(blocks.iter().all(|b| b.len() <= REPL_MAX_COMMAND_LEN));
    }

    #[test]
    fn test_driver_blocks_skip_comments() {
        let script = "# setup\n\nx = 1\n   # indented comment\ny = 2\n";
        assert_eq!(driver_blocks(script, 160), vec!["x = 1\ny = 2".to_string()]);
    }

    #[test]
    fn test_driver_blocks_keep_nested_defs_with_header() {
        let script = "class Pen:\n    def up(self):\n        pass\nx = 1\n";
        assert_eq!(
            driver_blocks(script, 160),
            vec![
                "class Pen:\n    def up(self):\n        pass\n".to_string(),
                "x = 1".to_string()
            ]
        );
    }

    #[test]
    fn test_driver_blocks_keep_else_with_if() {
        let script = "if DEBUG:\n    x = 1\nelse:\n    x = 2\ny = 3\n";
        assert_eq!(
            driver_blocks(script, 160),
            vec![
                "if DEBUG:\n    x = 1\nelse:\n    x = 2\n".to_string(),
                "y = 3".to_string()
            ]
        );
    }

    #[test]
    fn test_driver_blocks_pack_to_limit() {
        let script = "aaaa = 1\nbbbb = 2\ncccc = 3\n";
        assert_eq!(
            driver_blocks(script, 17),
            vec!["aaaa = 1\nbbbb = 2".to_string(), "cccc = 3".to_string()]
        );
    }

    #[test]
    fn test_connect_loads_driver() {
        let service = connected();
        assert!(service.is_connected());
        assert!(service.functions_ready());
        assert!(!service.is_driver_loading());
        assert_eq!(service.status(), HubStatus::Ready);
        assert_eq!(
            service.last_message(),
            Some("READY - Driver loaded successfully")
        );
        assert_eq!(
            service.connection().device_name.as_deref(),
            Some("Pybricks Hub (simulated)")
        );
        assert!(service.link().repl().is_defined("move"));
    }

    #[test]
    fn test_set_motor_speeds_clamps() {
        let mut service = connected();
        service.set_motor_speeds(80.0, -20.0);

        assert_eq!(
            service.motors(),
            MotorState {
                x_speed: 50.0,
                y_speed: -20.0,
                is_active: true
            }
        );
        let responses = service.poll().unwrap();
        assert_eq!(responses, vec![HubResponse::Ok("MOVE".to_string())]);
        assert_eq!(service.status(), HubStatus::CommandSuccessful);

        let hub = service.link().repl().hub();
        assert_eq!(hub.motor_x().commands().last(), Some(&MotorCommand::Dc(50.0)));
        assert_eq!(hub.motor_y().commands().last(), Some(&MotorCommand::Dc(-20.0)));
    }

    #[test]
    fn test_single_axis_updates() {
        let mut service = connected();
        service.set_x_speed(10.0);
        service.set_y_speed(-15.0);
        assert_eq!(service.motors().x_speed, 10.0);
        assert_eq!(service.motors().y_speed, -15.0);
        assert_eq!(service.poll().unwrap().len(), 2);
    }

    #[test]
    fn test_stop_all_motors() {
        let mut service = connected();
        service.set_motor_speeds(30.0, 30.0);
        service.stop_all_motors();

        assert_eq!(service.motors(), MotorState::default());
        let responses = service.poll().unwrap();
        assert_eq!(responses.last(), Some(&HubResponse::Ok("STOP_ALL".to_string())));
        assert!(!service.link().repl().hub().motor_x().is_running());
    }

    #[test]
    fn test_hub_error_recorded() {
        let mut service = connected();
        service
            .link_mut()
            .repl_mut()
            .hub_mut()
            .motor_y_mut()
            .fail_next("cable unplugged");
        service.set_motor_speeds(10.0, 10.0);

        let responses = service.poll().unwrap();
        assert!(matches!(responses[0], HubResponse::Error { .. }));
        assert_eq!(service.status(), HubStatus::CommandFailed);
        assert_eq!(
            service.connection().error.as_deref(),
            Some("Command error: Motor on Port.B failed: cable unplugged")
        );
    }

    #[test]
    fn test_command_too_long() {
        let mut service = connected();
        let long = "x".repeat(REPL_MAX_COMMAND_LEN + 1);
        assert!(matches!(
            service.send_repl_command(&long),
            Err(ServiceError::CommandTooLong { len: 161, max: 160 })
        ));
    }

    #[test]
    fn test_not_connected() {
        let mut service = HubService::new(SimLink::new(), ServiceConfig::immediate());
        assert!(matches!(
            service.send_repl_command("stop_all()"),
            Err(ServiceError::NotConnected)
        ));

        // State is still recorded even though nothing reached the hub
        service.set_motor_speeds(5.0, 0.0);
        assert!(service.motors().is_active);
        assert!(service.link().repl().hub().motor_x().commands().is_empty());
    }

    #[test]
    fn test_stdin_is_chunked_to_write_limit() {
        let mut service = connected();
        let before = service.link().frames_received();
        service.send_repl_command("move(12.5, -33.25)").unwrap();
        // 18 bytes split into 19-byte chunks is one frame, plus the newline
        assert_eq!(service.link().frames_received() - before, 2);

        let before = service.link().frames_received();
        service
            .send_repl_command("print('a fairly long line of output')")
            .unwrap();
        assert_eq!(service.link().frames_received() - before, 3);
    }

    #[test]
    fn test_disconnect_stops_program() {
        let mut service = connected();
        service.set_motor_speeds(20.0, 20.0);
        service.disconnect();

        assert!(!service.is_connected());
        assert_eq!(service.status(), HubStatus::Disconnected);
        assert!(!service.functions_ready());
        assert!(!service.link().is_program_running());
        assert!(!service.link().repl().hub().motor_y().is_running());
    }

    #[test]
    fn test_connect_failure_resets_state() {
        let mut service = HubService::new(SimLink::new(), ServiceConfig::immediate());
        let script = format!("x = '{}'", "y".repeat(REPL_MAX_COMMAND_LEN));
        assert!(service.connect(&script).is_err());
        assert!(!service.is_connected());
        assert!(
            service
                .connection()
                .error
                .as_deref()
                .unwrap()
                .starts_with("Connection failed")
        );
    }
}
