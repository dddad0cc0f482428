//! servo-link: serial link abstractions for servo controller boards
//!
//! This crate provides the blocking [`ServoLink`] interface used to talk to a
//! microcontroller that drives an array of hobby servos, together with
//! feature-gated backends. The default build enables a `mock` backend so that
//! binaries and tests run on any host without hardware attached.

mod types;
pub use types::{
    LinkConfig, LinkMetadata, PortInfo, Probe, DEFAULT_BAUD_RATE, DEFAULT_READ_TIMEOUT,
};

mod error;
pub use error::{LinkError, Result};

mod traits;
pub use traits::ServoLink;

pub mod wire;
pub use wire::{decode_command, encode_command};

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockLink};

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialLink;
