//! Commands of the control surface, parsed from free-form text.

use nalgebra::Vector3;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    Home,
    Shutdown,
    Reset,
    OpenGripper,
    CloseGripper,
    /// Move to millimeters in the work cell.
    MoveTo(Vector3<f64>),
    DetectAndMove,
    InitializeVision,
    Status,
    Quit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputError {
    NotANumber { field: &'static str, text: String },
    NotFinite { field: &'static str },
    UnknownCommand(String),
    MissingArgument(&'static str),
}

impl fmt::Display for InputError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputError::NotANumber { field, text } => write!(f, "Invalid {} coordinate: {:?} is not a number", field, text),
            InputError::NotFinite { field } => write!(f, "Invalid {} coordinate: must be finite", field),
            InputError::UnknownCommand(text) => write!(f, "Unknown command {:?}", text),
            InputError::MissingArgument(field) => write!(f, "Missing {} coordinate", field),
        }
    }
}

impl std::error::Error for InputError {}

fn parse_field(field: &'static str, text: &str) -> Result<f64, InputError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(InputError::MissingArgument(field));
    }
    let value: f64 = text
        .parse()
        .map_err(|_| InputError::NotANumber { field, text: text.to_string() })?;
    if !value.is_finite() {
        return Err(InputError::NotFinite { field });
    }
    Ok(value)
}

/// X, Y and Z as typed into the three coordinate fields.
pub fn parse_coordinates(x: &str, y: &str, z: &str) -> Result<Vector3<f64>, InputError> {
    Ok(Vector3::new(parse_field("X", x)?, parse_field("Y", y)?, parse_field("Z", z)?))
}

impl FromStr for ControlCommand {
    type Err = InputError;

    /// One command per line, e.g. `move 200 -100 40` or `move 200,-100,40`.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split(|c: char| c.is_whitespace() || c == ',').filter(|w| !w.is_empty());
        let Some(verb) = words.next() else {
            return Err(InputError::UnknownCommand(String::new()));
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "home" | "h" => ControlCommand::Home,
            "shutdown" | "s" => ControlCommand::Shutdown,
            "reset" | "r" => ControlCommand::Reset,
            "open" => ControlCommand::OpenGripper,
            "close" => ControlCommand::CloseGripper,
            "move" | "m" => {
                let x = words.next().unwrap_or("");
                let y = words.next().unwrap_or("");
                let z = words.next().unwrap_or("");
                ControlCommand::MoveTo(parse_coordinates(x, y, z)?)
            }
            "detect" | "pick" => ControlCommand::DetectAndMove,
            "init" | "initialize" => ControlCommand::InitializeVision,
            "status" => ControlCommand::Status,
            "quit" | "exit" | "q" => ControlCommand::Quit,
            _ => return Err(InputError::UnknownCommand(verb.to_string())),
        };
        Ok(command)
    }
}
