use servo_link::LinkError;
use thiserror::Error;

pub type Result<T, E = ControllerError> = core::result::Result<T, E>;

/// Which constraint a command broke.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("angle {angle} out of range (0-180)")]
    AngleOutOfRange { angle: i64 },
    #[error("invalid servo address {address}, must be between {min} and {max}")]
    InvalidAddress { address: i64, min: u8, max: u8 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("servo board not connected after {attempts} attempt(s)")]
    LinkUnavailable { attempts: u32 },
    #[error("link error: {0}")]
    Io(#[from] LinkError),
}

impl ControllerError {
    /// HTTP-style status code for the request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            ControllerError::Configuration(_) | ControllerError::Validation(_) => 400,
            ControllerError::LinkUnavailable { .. } | ControllerError::Io(_) => 500,
        }
    }
}
