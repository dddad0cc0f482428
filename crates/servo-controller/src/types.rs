use crate::ValidationError;
use core::fmt;
use serde::{Deserialize, Serialize};
use servo_link::{LinkMetadata, PortInfo};

pub const MIN_ANGLE: u16 = 0;
pub const MAX_ANGLE: u16 = 180;

/// Pin of a servo on the controlled board.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActuatorAddress(u8);

impl ActuatorAddress {
    pub fn get(self) -> u8 {
        self.0
    }
}

impl fmt::Display for ActuatorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Contiguous range of pins that carry servos (2..=31 on an Arduino Mega).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActuatorSet {
    min: u8,
    max: u8,
}

impl ActuatorSet {
    pub const STANDARD: ActuatorSet = ActuatorSet { min: 2, max: 31 };

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn len(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn first(&self) -> ActuatorAddress {
        ActuatorAddress(self.min)
    }

    pub fn contains(&self, address: i64) -> bool {
        (i64::from(self.min)..=i64::from(self.max)).contains(&address)
    }

    pub fn validate(&self, address: i64) -> Result<ActuatorAddress, ValidationError> {
        if self.contains(address) {
            // contains() bounds the value to u8 range
            Ok(ActuatorAddress(address as u8))
        } else {
            Err(ValidationError::InvalidAddress {
                address,
                min: self.min,
                max: self.max,
            })
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ActuatorAddress> {
        (self.min..=self.max).map(ActuatorAddress)
    }
}

impl Default for ActuatorSet {
    fn default() -> Self {
        Self::STANDARD
    }
}

/// One positioning request, already checked against the board's limits.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ActuatorCommand {
    pub address: ActuatorAddress,
    pub angle: u16,
}

impl ActuatorCommand {
    /// Angle is checked before the address.
    pub fn new(set: &ActuatorSet, address: i64, angle: i64) -> Result<Self, ValidationError> {
        let angle = validate_angle(angle)?;
        let address = set.validate(address)?;
        Ok(Self { address, angle })
    }

    pub fn encode(&self) -> Vec<u8> {
        servo_link::encode_command(self.address.get(), self.angle)
    }
}

pub fn validate_angle(angle: i64) -> Result<u16, ValidationError> {
    if (i64::from(MIN_ANGLE)..=i64::from(MAX_ANGLE)).contains(&angle) {
        Ok(angle as u16)
    } else {
        Err(ValidationError::AngleOutOfRange { angle })
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum LinkState {
    Disconnected,
    Connecting,
    Connected,
    Failed(String),
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResetEntry {
    pub address: ActuatorAddress,
    pub ok: bool,
    pub message: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    AllSucceeded,
    PartialFailure,
    AllFailed,
}

/// Per-address outcome of a batch reset.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct ResetReport {
    pub entries: Vec<ResetEntry>,
}

impl ResetReport {
    pub fn ok(&self) -> bool {
        self.entries.iter().all(|e| e.ok)
    }

    pub fn failed(&self) -> Vec<ActuatorAddress> {
        self.entries
            .iter()
            .filter(|e| !e.ok)
            .map(|e| e.address)
            .collect()
    }

    pub fn status(&self) -> BatchStatus {
        let failed = self.entries.iter().filter(|e| !e.ok).count();
        if failed == 0 {
            BatchStatus::AllSucceeded
        } else if failed == self.entries.len() {
            BatchStatus::AllFailed
        } else {
            BatchStatus::PartialFailure
        }
    }
}

/// Snapshot of controller and host state, computed on request.
#[derive(Clone, Debug, Serialize)]
pub struct Diagnostics {
    pub port: String,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
    pub state: LinkState,
    pub connected: bool,
    pub connected_since: Option<String>,
    pub last_error: Option<String>,
    pub valid_addresses: (u8, u8),
    pub ports: Vec<PortInfo>,
    pub link: LinkMetadata,
    pub counters: Counters,
    pub taken_at: String,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Counters {
    pub commands_sent: u64,
    pub command_failures: u64,
    pub connect_attempts: u64,
}
