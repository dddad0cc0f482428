use core::fmt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Baud rate the servo firmware boots with.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Per-read timeout applied to a freshly opened port.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// Where and how to open the serial link.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LinkConfig {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl LinkConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }

    /// True when a port has been configured at all.
    pub fn has_port(&self) -> bool {
        !self.port.trim().is_empty()
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl fmt::Display for LinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let port = if self.has_port() { &self.port } else { "<unset>" };
        write!(f, "{port}@{baud}", baud = self.baud_rate)
    }
}

/// A serial device visible on the host.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct PortInfo {
    pub device: String,
    pub description: String,
    pub hardware_id: String,
}

/// A value read back from the link, or the reason it could not be read.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Probe<T> {
    Value(T),
    Unavailable { unavailable: String },
}

impl<T> Probe<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Probe::Unavailable {
            unavailable: reason.into(),
        }
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Probe::Value(v) => Some(v),
            Probe::Unavailable { .. } => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Probe::Value(_))
    }
}

impl<T, E: fmt::Display> From<Result<T, E>> for Probe<T> {
    fn from(res: Result<T, E>) -> Self {
        match res {
            Ok(v) => Probe::Value(v),
            Err(e) => Probe::unavailable(e.to_string()),
        }
    }
}

/// Settings reported by the open handle itself.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct LinkMetadata {
    pub port_name: Probe<String>,
    pub baud_rate: Probe<u32>,
    pub data_bits: Probe<String>,
    pub parity: Probe<String>,
    pub stop_bits: Probe<String>,
    pub flow_control: Probe<String>,
    pub bytes_to_read: Probe<u32>,
    pub bytes_to_write: Probe<u32>,
}

impl LinkMetadata {
    /// Every field marked unavailable for the same reason.
    pub fn unavailable(reason: &str) -> Self {
        Self {
            port_name: Probe::unavailable(reason),
            baud_rate: Probe::unavailable(reason),
            data_bits: Probe::unavailable(reason),
            parity: Probe::unavailable(reason),
            stop_bits: Probe::unavailable(reason),
            flow_control: Probe::unavailable(reason),
            bytes_to_read: Probe::unavailable(reason),
            bytes_to_write: Probe::unavailable(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_no_port() {
        let cfg = LinkConfig::default();
        assert!(!cfg.has_port());
        assert_eq!(cfg.baud_rate, 9600);
        assert_eq!(cfg.read_timeout, Duration::from_secs(1));
        assert_eq!(cfg.to_string(), "<unset>@9600");
    }

    #[test]
    fn whitespace_port_counts_as_missing() {
        assert!(!LinkConfig::new("  ").has_port());
        assert!(LinkConfig::new("/dev/ttyACM0").has_port());
    }

    #[test]
    fn probe_serializes_as_value_or_marker() {
        let ok: Probe<u32> = Probe::Value(9600);
        let missing: Probe<u32> = Probe::unavailable("not open");
        assert_eq!(serde_json::to_string(&ok).unwrap(), "9600");
        assert_eq!(
            serde_json::to_string(&missing).unwrap(),
            r#"{"unavailable":"not open"}"#
        );
    }

    #[test]
    fn probe_from_result() {
        let p: Probe<u8> = Err::<u8, _>("boom").into();
        assert!(!p.is_available());
        let p: Probe<u8> = Ok::<u8, String>(3).into();
        assert_eq!(p.value(), Some(&3));
    }
}
