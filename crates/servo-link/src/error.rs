use thiserror::Error;

pub type Result<T, E = LinkError> = core::result::Result<T, E>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link is not open")]
    NotOpen,
    #[error("port not found: {0}")]
    PortNotFound(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("timeout")]
    Timeout,
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
}
