use crate::{LinkConfig, LinkMetadata, PortInfo, Result};
use std::time::Duration;

/// A minimal blocking link to a servo controller board.
///
/// A link value owns at most one open handle. `open` replaces whatever handle
/// was there before, so callers never hold two open ports to the same board.
pub trait ServoLink: Send {
    /// Enumerate serial devices visible to this backend.
    fn list_ports() -> Result<Vec<PortInfo>>
    where
        Self: Sized;

    /// Open (or reopen) the link with the given settings.
    fn open(&mut self, config: &LinkConfig) -> Result<()>;

    /// Drop the handle. Closing a closed link does nothing.
    fn close(&mut self);

    /// Whether the handle is currently open.
    fn is_open(&self) -> bool;

    /// Discard anything buffered in either direction.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Write the whole buffer in one go.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Collect whatever arrives within `wait`. An empty vector means nothing came.
    fn read_available(&mut self, wait: Duration) -> Result<Vec<u8>>;

    /// Settings reported by the handle; fields that cannot be read are marked.
    fn metadata(&self) -> LinkMetadata;
}
