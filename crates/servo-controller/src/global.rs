//! One controller per process, created the first time it is asked for.

use servo_link::ServoLink;
use std::sync::OnceLock;
use tracing::info;

use crate::DeviceController;
#[cfg(feature = "serial")]
use crate::ControllerConfig;

/// Lazily initialised, process-lifetime controller slot.
pub struct GlobalController<L: ServoLink> {
    cell: OnceLock<DeviceController<L>>,
}

impl<L: ServoLink> GlobalController<L> {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Return the controller, building it with `make` on first use only.
    pub fn get_or_init(&self, make: impl FnOnce() -> DeviceController<L>) -> &DeviceController<L> {
        self.cell.get_or_init(|| {
            let ctl = make();
            info!(link = %ctl.link_config(), "servo controller created");
            ctl
        })
    }

    pub fn get(&self) -> Option<&DeviceController<L>> {
        self.cell.get()
    }

    /// Close the link at process shutdown. The controller itself stays allocated.
    pub fn shutdown(&self) {
        if let Some(ctl) = self.cell.get() {
            let _ = ctl.disconnect();
        }
    }
}

impl<L: ServoLink> Default for GlobalController<L> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "serial")]
pub static SERIAL: GlobalController<servo_link::SerialLink> = GlobalController::new();

/// The process-wide serial controller.
#[cfg(feature = "serial")]
pub fn serial(config: &ControllerConfig) -> &'static DeviceController<servo_link::SerialLink> {
    SERIAL.get_or_init(|| DeviceController::new(servo_link::SerialLink::new(), config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ControllerConfig;
    use servo_link::MockLink;

    static MOCK: GlobalController<MockLink> = GlobalController::new();

    #[test]
    fn built_once_and_shared() {
        assert!(MOCK.get().is_none());
        let mut cfg = ControllerConfig::default();
        cfg.link.port = Some("mock0".into());
        let first =
            MOCK.get_or_init(|| DeviceController::new(MockLink::new(), &cfg).with_sleeper(|_| {}));
        let second = MOCK.get_or_init(|| panic!("must not rebuild"));
        assert!(std::ptr::eq(first, second));
        assert_eq!(second.link_config().port, "mock0");

        first.connect_with(1, std::time::Duration::ZERO).unwrap();
        MOCK.shutdown();
        assert!(!second.is_connected());
    }
}
