// Minimal hub REPL emulation
//
// Understands just enough of the MicroPython REPL for the host to upload the
// driver script and call it: definitions, imports, assignments, `print` of
// literals and `'name' in globals()`, and calls to `move` / `stop_all`.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::{DcMotor, Hub};
use crate::messages::{split_call, CallError, ReplCall};

pub struct Repl<X, Y> {
    hub: Hub<X, Y, Vec<u8>>,
    globals: HashSet<String>,
    pending: Vec<u8>,
}

impl<X: DcMotor, Y: DcMotor> Repl<X, Y> {
    pub fn new(hub: Hub<X, Y, Vec<u8>>) -> Self {
        Self {
            hub,
            globals: HashSet::new(),
            pending: Vec::new(),
        }
    }

    /// Feed raw stdin bytes; every complete line is executed
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\r' || byte == b'\n' {
                let line = std::mem::take(&mut self.pending);
                self.execute_line(&String::from_utf8_lossy(&line));
            } else {
                self.pending.push(byte);
            }
        }
    }

    /// Everything printed since the last call
    pub fn take_output(&mut self) -> Vec<u8> {
        std::mem::take(self.hub.output_mut())
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.globals.contains(name)
    }

    pub fn hub(&self) -> &Hub<X, Y, Vec<u8>> {
        &self.hub
    }

    pub fn hub_mut(&mut self) -> &mut Hub<X, Y, Vec<u8>> {
        &mut self.hub
    }

    /// Forget all definitions and stop the motors, as stopping the user program does
    pub fn reset(&mut self) {
        if let Err(e) = self.hub.motor_x_mut().stop() {
            warn!("Failed to stop motor X on reset: {}", e);
        }
        if let Err(e) = self.hub.motor_y_mut().stop() {
            warn!("Failed to stop motor Y on reset: {}", e);
        }
        self.globals.clear();
        self.pending.clear();
    }

    /// Execute one REPL line
    pub fn execute_line(&mut self, line: &str) {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            return;
        }

        // Function bodies; only the definition itself matters here
        if line.starts_with(' ') || line.starts_with('\t') {
            return;
        }

        if let Some(rest) = trimmed.strip_prefix("def ") {
            let name = rest.split('(').next().unwrap_or_default().trim();
            debug!("Defined function {}", name);
            self.globals.insert(name.to_string());
            return;
        }

        match split_call(trimmed) {
            Some(("print", args)) => self.print(&args),
            Some((name, _)) if name == ReplCall::MOVE || name == ReplCall::STOP_ALL => {
                self.call_driver(name, trimmed)
            }
            Some((name, _)) if !name.contains('.') && !self.is_defined(name) => {
                self.print_error(name, &CallError::UnknownFunction(name.to_string()).to_string())
            }
            Some((name, _)) => debug!("Ignoring call to {}", name),
            None => self.statement(trimmed),
        }
    }

    fn call_driver(&mut self, name: &str, line: &str) {
        if !self.is_defined(name) {
            self.print_error(name, &CallError::UnknownFunction(name.to_string()).to_string());
            return;
        }

        let result = match line.parse::<ReplCall>() {
            Ok(ReplCall::Move { x_speed, y_speed }) => self.hub.move_xy(x_speed, y_speed),
            Ok(ReplCall::StopAll) => self.hub.stop_all(),
            Err(e) => {
                self.print_error(name, &e.to_string());
                return;
            }
        };

        if let Err(e) = result {
            warn!("{} failed: {}", name, e);
            self.print_error(name, &e.to_string());
        }
    }

    /// Imports and assignments bind names; anything else is accepted silently
    fn statement(&mut self, line: &str) {
        if let Some(rest) = line.strip_prefix("from ") {
            if let Some((_, names)) = rest.split_once(" import ") {
                for name in names.split(',') {
                    self.globals.insert(name.trim().to_string());
                }
            }
        } else if let Some(rest) = line.strip_prefix("import ") {
            self.globals.insert(rest.trim().to_string());
        } else if let Some((target, _)) = line.split_once('=') {
            let target = target.trim();
            if !target.is_empty() && target.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                self.globals.insert(target.to_string());
            }
        }
        debug!("Statement: {}", line);
    }

    fn print(&mut self, args: &[&str]) {
        let values: Vec<String> = args.iter().map(|arg| self.evaluate(arg)).collect();
        self.write_line(&values.join(" "));
    }

    fn evaluate(&self, expr: &str) -> String {
        if let Some(name) = expr
            .strip_suffix("in globals()")
            .and_then(|quoted| unquote(quoted.trim()))
        {
            return if self.is_defined(name) { "True" } else { "False" }.to_string();
        }
        unquote(expr).unwrap_or(expr).to_string()
    }

    fn print_error(&mut self, name: &str, message: &str) {
        self.write_line(&format!("ERROR:{}:{}", name.to_uppercase(), message));
    }

    fn write_line(&mut self, line: &str) {
        let out = self.hub.output_mut();
        out.extend_from_slice(line.as_bytes());
        out.push(b'\n');
    }
}

fn unquote(expr: &str) -> Option<&str> {
    ['\'', '"'].iter().find_map(|&q| {
        expr.strip_prefix(q)
            .and_then(|rest| rest.strip_suffix(q))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DRIVER_SCRIPT;
    use crate::hub::MotorCommand;

    fn loaded_repl() -> Repl<crate::hub::SimMotor, crate::hub::SimMotor> {
        let mut repl = Repl::new(Hub::simulated());
        repl.feed(DRIVER_SCRIPT.as_bytes());
        repl.feed(b"\r\n");
        repl
    }

    fn output(repl: &mut Repl<crate::hub::SimMotor, crate::hub::SimMotor>) -> String {
        String::from_utf8(repl.take_output()).unwrap()
    }

    #[test]
    fn test_driver_script_defines_functions_silently() {
        let mut repl = loaded_repl();
        assert!(repl.is_defined("move"));
        assert!(repl.is_defined("stop_all"));
        assert!(repl.is_defined("motor_x"));
        assert!(repl.is_defined("TechnicHub"));
        assert_eq!(output(&mut repl), "");
        assert!(repl.hub().motor_x().commands().is_empty());
    }

    #[test]
    fn test_move_and_stop_through_repl() {
        let mut repl = loaded_repl();
        repl.feed(b"move(30, -20)\r\n");
        repl.feed(b"stop_all()\r\n");

        assert_eq!(output(&mut repl), "OK:MOVE\nOK:STOP_ALL\n");
        assert_eq!(
            repl.hub().motor_x().commands(),
            &[MotorCommand::Dc(30.0), MotorCommand::Stop]
        );
        assert_eq!(
            repl.hub().motor_y().commands(),
            &[MotorCommand::Dc(-20.0), MotorCommand::Stop]
        );
    }

    #[test]
    fn test_call_before_driver_loaded() {
        let mut repl = Repl::new(Hub::simulated());
        repl.feed(b"move(10, 10)\r\n");
        assert_eq!(output(&mut repl), "ERROR:MOVE:name 'move' isn't defined\n");
        assert!(repl.hub().motor_x().commands().is_empty());
    }

    #[test]
    fn test_bad_arguments_reported() {
        let mut repl = loaded_repl();
        repl.feed(b"move(10)\r\n");
        assert_eq!(
            output(&mut repl),
            "ERROR:MOVE:function takes 2 positional arguments but 1 were given\n"
        );
    }

    #[test]
    fn test_motor_fault_reported() {
        let mut repl = loaded_repl();
        repl.hub_mut().motor_x_mut().fail_next("stalled");
        repl.feed(b"move(10, 10)\r\n");
        assert_eq!(
            output(&mut repl),
            "ERROR:MOVE:Motor on Port.A failed: stalled\n"
        );
    }

    #[test]
    fn test_unknown_function() {
        let mut repl = loaded_repl();
        repl.feed(b"pen_up()\r\n");
        assert_eq!(output(&mut repl), "ERROR:PEN_UP:name 'pen_up' isn't defined\n");
    }

    #[test]
    fn test_print_verification_line() {
        let mut repl = loaded_repl();
        repl.feed(
            b"print('VERIFICATION: Functions loaded -', 'move' in globals(), 'pen_up' in globals())\r\n",
        );
        assert_eq!(
            output(&mut repl),
            "VERIFICATION: Functions loaded - True False\n"
        );
    }

    #[test]
    fn test_partial_lines_are_buffered() {
        let mut repl = loaded_repl();
        repl.feed(b"stop_");
        assert_eq!(output(&mut repl), "");
        repl.feed(b"all()\r\n");
        assert_eq!(output(&mut repl), "OK:STOP_ALL\n");
    }

    #[test]
    fn test_reset_forgets_driver() {
        let mut repl = loaded_repl();
        repl.feed(b"move(20, 20)\r\n");
        repl.reset();
        assert!(!repl.hub().motor_x().is_running());
        assert!(!repl.is_defined("move"));
    }
}
