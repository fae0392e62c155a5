//! Line protocol of the motor controller.
//!
//! Commands are fire-and-forget ASCII lines terminated by `\n`; the controller never
//! answers. Joint angles go out in degrees with 5 decimals, after the sign convention
//! of the controller wiring has been applied (see [`dispatch_angles`]).

use crate::kinematic_traits::Joints;
use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;
#[cfg(feature = "serial")]
use std::io::Write;

#[derive(Debug, Clone, PartialEq)]
pub enum ArmCommand {
    Home,
    Shutdown,
    ResetJoints,
    OpenGripper,
    CloseGripper,
    /// Dispatch-ready angles in degrees.
    Move([f64; 6]),
}

impl fmt::Display for ArmCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArmCommand::Home => write!(f, "H"),
            ArmCommand::Shutdown => write!(f, "S"),
            ArmCommand::ResetJoints => write!(f, "R"),
            ArmCommand::OpenGripper => write!(f, "OPEN"),
            ArmCommand::CloseGripper => write!(f, "CLOSE"),
            ArmCommand::Move(angles) => {
                let list = angles.iter().map(|a| format!("{:.5}", a)).collect::<Vec<_>>().join(",");
                write!(f, "M{}", list)
            }
        }
    }
}

impl ArmCommand {
    /// The full line as sent, newline included.
    pub fn to_line(&self) -> String {
        format!("{}\n", self)
    }
}

/// Converts IK output (radians) to the angles the controller expects (degrees).
/// J1, J3, J4 and J5 turn the other way round, J2 passes through and J6 is driven
/// opposite to the (already inverted) J1.
pub fn dispatch_angles(joints: &Joints) -> [f64; 6] {
    let mut angles = joints.map(f64::to_degrees);
    for i in [0, 2, 3, 4] {
        angles[i] = -angles[i];
    }
    angles[5] = -angles[0];
    angles
}

pub trait HardwareLink: Send {
    /// Write one command. Errors are transient: the caller logs them and carries on.
    fn send(&mut self, command: &ArmCommand) -> Result<()>;
}

/// Serial port of the controller. The port is opened lazily and reopened on the next
/// command after a failed write.
#[cfg(feature = "serial")]
pub struct SerialLink {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

#[cfg(feature = "serial")]
impl SerialLink {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        SerialLink { port_name: port_name.to_string(), baud_rate, port: None }
    }

    fn open(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        if self.port.is_none() {
            tracing::info!("Opening serial port {} at {} baud", self.port_name, self.baud_rate);
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(std::time::Duration::from_millis(100))
                .open()
                .with_context(|| format!("Failed to open serial port {}", self.port_name))?;
            self.port = Some(port);
        }
        self.port.as_mut().context("serial port not open")
    }
}

#[cfg(feature = "serial")]
impl HardwareLink for SerialLink {
    fn send(&mut self, command: &ArmCommand) -> Result<()> {
        let line = command.to_line();
        let port = self.open()?;
        let written = port.write_all(line.as_bytes()).and_then(|_| port.flush());
        if let Err(e) = written {
            self.port = None;
            return Err(e).with_context(|| format!("Failed to write {:?} to {}", line.trim_end(), self.port_name));
        }
        tracing::debug!("sent {}", line.trim_end());
        Ok(())
    }
}

/// Keeps every line sent, for tests and dry runs. Clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingLink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl RecordingLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines sent so far, without the trailing newline.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().iter().map(|l| l.trim_end().to_string()).collect()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }
}

impl HardwareLink for RecordingLink {
    fn send(&mut self, command: &ArmCommand) -> Result<()> {
        self.lines.lock().push(command.to_line());
        Ok(())
    }
}

/// Only logs the commands, when no controller is attached.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLink;

impl HardwareLink for LogLink {
    fn send(&mut self, command: &ArmCommand) -> Result<()> {
        tracing::info!("(no controller) {}", command);
        Ok(())
    }
}

impl HardwareLink for Box<dyn HardwareLink> {
    fn send(&mut self, command: &ArmCommand) -> Result<()> {
        (**self).send(command)
    }
}
