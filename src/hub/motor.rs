// In-memory DC motor used by the simulated hub and tests

use tracing::{trace, warn};

use super::{DcMotor, HubError, Port, Result};

/// Commands kept per motor; older ones are dropped first
const COMMAND_LOG_LEN: usize = 1024;

/// A command received by a motor
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    Dc(f32),
    Stop,
}

/// Simulated motor: remembers its recent commands and its present duty cycle
#[derive(Debug)]
pub struct SimMotor {
    port: Port,
    duty: f32,
    commands: Vec<MotorCommand>,
    pending_fault: Option<String>,
}

impl SimMotor {
    pub fn new(port: Port) -> Self {
        Self {
            port,
            duty: 0.0,
            commands: Vec::new(),
            pending_fault: None,
        }
    }

    /// Present duty cycle (0 when stopped)
    pub fn duty(&self) -> f32 {
        self.duty
    }

    pub fn is_running(&self) -> bool {
        self.duty != 0.0
    }

    /// Most recent commands received, oldest first
    pub fn commands(&self) -> &[MotorCommand] {
        &self.commands
    }

    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }

    /// Make the next command fail with the given reason
    pub fn fail_next(&mut self, reason: &str) {
        self.pending_fault = Some(reason.to_string());
    }

    fn record(&mut self, command: MotorCommand) {
        if self.commands.len() == COMMAND_LOG_LEN {
            self.commands.remove(0);
        }
        self.commands.push(command);
    }

    fn check_fault(&mut self) -> Result<()> {
        match self.pending_fault.take() {
            Some(reason) => {
                warn!("Simulated fault on {}: {}", self.port, reason);
                Err(HubError::MotorFault {
                    port: self.port,
                    reason,
                })
            }
            None => Ok(()),
        }
    }
}

impl DcMotor for SimMotor {
    fn port(&self) -> Port {
        self.port
    }

    fn dc(&mut self, duty: f32) -> Result<()> {
        self.check_fault()?;
        trace!("{} dc({})", self.port, duty);
        self.duty = duty;
        self.record(MotorCommand::Dc(duty));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.check_fault()?;
        trace!("{} stop()", self.port);
        self.duty = 0.0;
        self.record(MotorCommand::Stop);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_then_stop() {
        let mut motor = SimMotor::new(Port::C);
        motor.dc(40.0).unwrap();
        assert!(motor.is_running());
        motor.stop().unwrap();
        assert!(!motor.is_running());
        assert_eq!(motor.commands(), &[MotorCommand::Dc(40.0), MotorCommand::Stop]);
    }

    #[test]
    fn test_fault_is_one_shot() {
        let mut motor = SimMotor::new(Port::B);
        motor.fail_next("overload");
        assert!(motor.dc(10.0).is_err());
        assert!(motor.commands().is_empty());
        assert_eq!(motor.duty(), 0.0);

        motor.dc(10.0).unwrap();
        assert_eq!(motor.duty(), 10.0);
    }

    #[test]
    fn test_command_log_keeps_most_recent() {
        let mut motor = SimMotor::new(Port::A);
        for i in 0..COMMAND_LOG_LEN + 5 {
            motor.dc(i as f32).unwrap();
        }
        assert_eq!(motor.commands().len(), COMMAND_LOG_LEN);
        assert_eq!(motor.commands()[0], MotorCommand::Dc(5.0));
        assert_eq!(
            motor.commands().last(),
            Some(&MotorCommand::Dc((COMMAND_LOG_LEN + 4) as f32))
        );
    }
}
