//! Error handling for configuration loading and validation

use std::io;

/// Unified error to report failures while reading or validating the cell configuration.
#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    ParseError(String),
    InvalidLength { field: &'static str, expected: usize, found: usize },
    InvalidValue(String),
    DegenerateFit(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            ConfigError::IoError(ref err) =>
                write!(f, "IO Error: {}", err),
            ConfigError::ParseError(ref msg) =>
                write!(f, "Parse Error: {}", msg),
            ConfigError::InvalidLength { field, expected, found } =>
                write!(f, "Invalid Length of {}: expected {}, found {}", field, expected, found),
            ConfigError::InvalidValue(ref msg) =>
                write!(f, "Invalid Value: {}", msg),
            ConfigError::DegenerateFit(ref msg) =>
                write!(f, "Degenerate Fit: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(err: io::Error) -> Self {
        ConfigError::IoError(err)
    }
}
