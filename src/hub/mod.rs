// Hub-side motor model
//
// Mirrors what runs on the hub: one hub, motor X bound to port A and
// motor Y bound to port B, and the two control functions the host calls.
//
// Provides:
// - Port and DcMotor abstractions
// - Hub with move/stop_all and their status tokens
// - An in-memory SimMotor
// - A small REPL emulation used by the simulated link

mod motor;
pub mod repl;

use std::fmt;
use std::io::Write;

use tracing::debug;

use crate::messages::{TOKEN_OK_MOVE, TOKEN_OK_STOP_ALL};

pub use motor::{MotorCommand, SimMotor};
pub use repl::Repl;

/// Physical motor ports on the hub
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Port {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Port::A => "A",
            Port::B => "B",
            Port::C => "C",
            Port::D => "D",
            Port::E => "E",
            Port::F => "F",
        };
        write!(f, "Port.{}", name)
    }
}

/// Errors raised by the hub or its motors
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("{0} is already in use")]
    PortInUse(Port),

    #[error("Motor on {port} failed: {reason}")]
    MotorFault { port: Port, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HubError>;

/// A DC motor driven by duty cycle
///
/// The duty range belongs to the implementation; callers pass it through unchecked.
pub trait DcMotor {
    /// Port this motor is bound to
    fn port(&self) -> Port;

    /// Spin at the given duty cycle
    fn dc(&mut self, duty: f32) -> Result<()>;

    /// Stop the motor
    fn stop(&mut self) -> Result<()>;
}

/// The hub with its two motors and the stream status tokens are printed to
pub struct Hub<X, Y, W> {
    motor_x: X,
    motor_y: Y,
    out: W,
}

impl<X: DcMotor, Y: DcMotor, W: Write> Hub<X, Y, W> {
    /// Bind the two motors to the hub. Both must sit on different ports.
    pub fn new(motor_x: X, motor_y: Y, out: W) -> Result<Self> {
        if motor_x.port() == motor_y.port() {
            return Err(HubError::PortInUse(motor_y.port()));
        }
        Ok(Self {
            motor_x,
            motor_y,
            out,
        })
    }

    /// Drive motor X and motor Y at the given duty cycles, then print `OK:MOVE`.
    ///
    /// A fault on motor X leaves motor Y untouched and prints nothing.
    pub fn move_xy(&mut self, x_speed: f32, y_speed: f32) -> Result<()> {
        debug!("move: x={}, y={}", x_speed, y_speed);
        self.motor_x.dc(x_speed)?;
        self.motor_y.dc(y_speed)?;
        writeln!(self.out, "{}", TOKEN_OK_MOVE)?;
        Ok(())
    }

    /// Stop both motors, then print `OK:STOP_ALL`.
    pub fn stop_all(&mut self) -> Result<()> {
        debug!("stop_all");
        self.motor_x.stop()?;
        self.motor_y.stop()?;
        writeln!(self.out, "{}", TOKEN_OK_STOP_ALL)?;
        Ok(())
    }

    pub fn motor_x(&self) -> &X {
        &self.motor_x
    }

    pub fn motor_y(&self) -> &Y {
        &self.motor_y
    }

    pub fn motor_x_mut(&mut self) -> &mut X {
        &mut self.motor_x
    }

    pub fn motor_y_mut(&mut self) -> &mut Y {
        &mut self.motor_y
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn output_mut(&mut self) -> &mut W {
        &mut self.out
    }
}

impl Hub<SimMotor, SimMotor, Vec<u8>> {
    /// Simulated hub wired like the plotter: motor X on port A, motor Y on port B
    pub fn simulated() -> Self {
        Self {
            motor_x: SimMotor::new(Port::A),
            motor_y: SimMotor::new(Port::B),
            out: Vec::new(),
        }
    }
}
