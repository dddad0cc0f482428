//! servo-controller: thread-safe control of a serial servo board
//!
//! [`DeviceController`] owns the single link to the board and serializes every
//! operation on it behind one lock:
//! - connection lifecycle with bounded retries and a handshake
//! - validated servo moves with reconnect-on-demand
//! - batch reset with per-address outcomes
//! - diagnostics that degrade field by field instead of failing

mod error;
pub use error::{ControllerError, Result, ValidationError};

mod types;
pub use types::{
    validate_angle, ActuatorAddress, ActuatorCommand, ActuatorSet, BatchStatus, Counters,
    Diagnostics, LinkState, ResetEntry, ResetReport, MAX_ANGLE, MIN_ANGLE,
};

mod config;
pub use config::{load_config_file, ControllerConfig, LinkSection};

mod metrics;
pub use metrics::{LinkMetrics, MetricsHub};

mod controller;
pub use controller::{
    DeviceController, Sleeper, HANDSHAKE_TIMEOUT, RESPONSE_WAIT, SETTLE_DELAY,
};

pub mod api;
pub mod global;

pub use servo_link::{LinkConfig, LinkError, PortInfo, ServoLink};
