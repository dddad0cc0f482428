use servo_link::{LinkConfig, LinkError, PortInfo, ServoLink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::metrics::MetricsHub;
use crate::types::{
    validate_angle, ActuatorCommand, ActuatorSet, Diagnostics, LinkState, ResetEntry, ResetReport,
};
use crate::{ControllerError, Result};

/// Time the board needs to finish booting after the port is opened (opening resets it).
pub const SETTLE_DELAY: Duration = Duration::from_secs(2);
/// How long the handshake waits for any reply.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long a command waits for the board's optional reply.
pub const RESPONSE_WAIT: Duration = Duration::from_millis(50);

/// Blocking delay used for the settle interval and retry backoff.
pub type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

struct Inner<L> {
    link: L,
    config: LinkConfig,
    state: LinkState,
    connected_since: Option<String>,
    last_error: Option<String>,
}

/// Owns the link to one servo board and serializes every operation on it.
///
/// All methods take `&self`; share the controller between request threads
/// behind an `Arc` (or use [`crate::global`]).
pub struct DeviceController<L: ServoLink> {
    inner: Mutex<Inner<L>>,
    addresses: ActuatorSet,
    connect_retries: u32,
    retry_delay: Duration,
    reconnect_attempts: u32,
    neutral_angle: u16,
    sleeper: Sleeper,
    metrics: Option<MetricsHub>,
}

fn now_rfc3339() -> Option<String> {
    OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

impl<L: ServoLink> DeviceController<L> {
    pub fn new(link: L, config: &ControllerConfig) -> Self {
        let metrics = match MetricsHub::new() {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("metrics disabled: {e}");
                None
            }
        };
        Self {
            inner: Mutex::new(Inner {
                link,
                config: config.link_config(),
                state: LinkState::Disconnected,
                connected_since: None,
                last_error: None,
            }),
            addresses: ActuatorSet::STANDARD,
            connect_retries: config.connect_retries,
            retry_delay: config.retry_delay(),
            // A command on a down link always gets one connect cycle.
            reconnect_attempts: config.reconnect_attempts.max(1),
            neutral_angle: config.neutral_angle,
            sleeper: Arc::new(std::thread::sleep),
            metrics,
        }
    }

    /// Replace the delay function (tests pass a no-op).
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner<L>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metrics(&self) -> Option<&MetricsHub> {
        self.metrics.as_ref()
    }

    pub fn link_config(&self) -> LinkConfig {
        self.lock().config.clone()
    }

    pub fn state(&self) -> LinkState {
        self.lock().state.clone()
    }

    /// Change port settings; they take effect on the next connect.
    pub fn reconfigure(
        &self,
        port: Option<String>,
        baud_rate: Option<u32>,
        read_timeout: Option<Duration>,
    ) -> Result<()> {
        if let Some(p) = &port {
            if p.trim().is_empty() {
                return Err(ControllerError::Configuration("serial port must not be empty".into()));
            }
        }
        if baud_rate == Some(0) {
            return Err(ControllerError::Configuration("baud rate must be positive".into()));
        }
        let mut inner = self.lock();
        if let Some(p) = port {
            inner.config.port = p;
        }
        if let Some(b) = baud_rate {
            inner.config.baud_rate = b;
        }
        if let Some(t) = read_timeout {
            inner.config.read_timeout = t;
        }
        if matches!(inner.state, LinkState::Failed(_)) {
            inner.state = LinkState::Disconnected;
        }
        info!(link = %inner.config, "link reconfigured");
        Ok(())
    }

    /// Connect with the configured attempt count and backoff.
    ///
    /// Returns the settings the link was opened with.
    pub fn connect(&self) -> Result<LinkConfig> {
        self.connect_with(self.connect_retries, self.retry_delay)
    }

    /// Open the link and handshake, trying at most `retries` times.
    pub fn connect_with(&self, retries: u32, retry_delay: Duration) -> Result<LinkConfig> {
        let mut inner = self.lock();
        self.connect_locked(&mut inner, retries, retry_delay)
    }

    fn connect_locked(
        &self,
        inner: &mut Inner<L>,
        retries: u32,
        retry_delay: Duration,
    ) -> Result<LinkConfig> {
        if !inner.config.has_port() {
            let reason = "no serial port configured".to_string();
            inner.state = LinkState::Failed(reason.clone());
            inner.last_error = Some(reason.clone());
            return Err(ControllerError::Configuration(reason));
        }
        inner.state = LinkState::Connecting;
        for attempt in 1..=retries {
            if let Some(m) = &self.metrics {
                m.link.connect_attempts.inc();
            }
            match self.attempt(inner) {
                Ok(()) => {
                    inner.state = LinkState::Connected;
                    inner.connected_since = now_rfc3339();
                    inner.last_error = None;
                    self.set_gauge(true);
                    info!(link = %inner.config, attempt, "connected to servo board");
                    return Ok(inner.config.clone());
                }
                Err(e) => {
                    warn!(link = %inner.config, attempt, retries, error = %e, "connect attempt failed");
                    inner.link.close();
                    inner.last_error = Some(e.to_string());
                    if attempt < retries {
                        (self.sleeper)(retry_delay);
                    }
                }
            }
        }
        inner.state = LinkState::Disconnected;
        inner.connected_since = None;
        self.set_gauge(false);
        error!(link = %inner.config, attempts = retries, "could not connect to servo board");
        Err(ControllerError::LinkUnavailable { attempts: retries })
    }

    fn attempt(&self, inner: &mut Inner<L>) -> Result<(), LinkError> {
        inner.link.close();
        inner.link.open(&inner.config)?;
        (self.sleeper)(SETTLE_DELAY);
        inner.link.clear_buffers()?;
        let handshake = ActuatorCommand {
            address: self.addresses.first(),
            angle: self.neutral_angle,
        };
        inner.link.write_all(&handshake.encode())?;
        // Any reply counts; the content is not checked.
        let reply = inner.link.read_available(HANDSHAKE_TIMEOUT)?;
        if reply.is_empty() {
            return Err(LinkError::Timeout);
        }
        debug!(reply = %String::from_utf8_lossy(&reply).trim_end(), "handshake reply");
        Ok(())
    }

    /// Close the link. Calling it again is a no-op.
    pub fn disconnect(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.link.is_open() {
            inner.link.close();
            info!(link = %inner.config, "disconnected from servo board");
        }
        inner.state = LinkState::Disconnected;
        inner.connected_since = None;
        self.set_gauge(false);
        Ok(())
    }

    /// Live check: the state says connected and the handle is still open.
    pub fn is_connected(&self) -> bool {
        let mut inner = self.lock();
        self.refresh_locked(&mut inner)
    }

    fn refresh_locked(&self, inner: &mut Inner<L>) -> bool {
        if inner.state != LinkState::Connected {
            return false;
        }
        if inner.link.is_open() {
            return true;
        }
        warn!(link = %inner.config, "servo board dropped the link");
        inner.link.close();
        inner.state = LinkState::Disconnected;
        inner.connected_since = None;
        inner.last_error = Some("link dropped".to_string());
        self.set_gauge(false);
        false
    }

    fn mark_down(&self, inner: &mut Inner<L>, cause: &LinkError) {
        inner.link.close();
        inner.state = LinkState::Disconnected;
        inner.connected_since = None;
        inner.last_error = Some(cause.to_string());
        self.set_gauge(false);
    }

    fn set_gauge(&self, up: bool) {
        if let Some(m) = &self.metrics {
            m.link.link_connected.set(i64::from(up));
        }
    }

    fn count_failure(&self) {
        if let Some(m) = &self.metrics {
            m.link.command_failures.inc();
        }
    }

    /// Move one servo. Bad input is rejected before the link is touched.
    pub fn move_actuator(&self, address: i64, angle: i64) -> Result<String> {
        let cmd = ActuatorCommand::new(&self.addresses, address, angle)?;
        self.dispatch(cmd)
    }

    fn dispatch(&self, cmd: ActuatorCommand) -> Result<String> {
        let mut inner = self.lock();
        if !self.refresh_locked(&mut inner) {
            info!(servo = %cmd.address, "link down, reconnecting before command");
            if let Err(e) =
                self.connect_locked(&mut inner, self.reconnect_attempts, self.retry_delay)
            {
                debug!(error = %e, "reconnect on demand failed");
                self.count_failure();
                return Err(ControllerError::LinkUnavailable {
                    attempts: self.reconnect_attempts,
                });
            }
        }

        let line = cmd.encode();
        debug!(command = %String::from_utf8_lossy(&line).trim_end(), "sending");
        if let Err(e) = inner.link.write_all(&line) {
            error!(servo = %cmd.address, angle = cmd.angle, error = %e, "error sending command");
            self.mark_down(&mut inner, &e);
            self.count_failure();
            return Err(ControllerError::Io(e));
        }
        if let Some(m) = &self.metrics {
            m.link.commands_sent.inc();
        }

        match inner.link.read_available(RESPONSE_WAIT) {
            Ok(reply) if !reply.is_empty() => {
                debug!(reply = %String::from_utf8_lossy(&reply).trim_end(), "board replied");
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "no reply read"),
        }
        Ok(format!("Servo {} moved to position {}", cmd.address, cmd.angle))
    }

    /// Drive every servo to the configured neutral angle.
    pub fn reset_all(&self) -> ResetReport {
        self.reset_each(i64::from(self.neutral_angle))
    }

    /// Drive every servo to `angle`; the angle is checked once up front.
    pub fn reset_all_to(&self, angle: i64) -> Result<ResetReport> {
        validate_angle(angle)?;
        Ok(self.reset_each(angle))
    }

    fn reset_each(&self, angle: i64) -> ResetReport {
        let mut report = ResetReport::default();
        for address in self.addresses.iter() {
            let (ok, message) = match self.move_actuator(i64::from(address.get()), angle) {
                Ok(msg) => (true, msg),
                Err(e) => (false, e.to_string()),
            };
            report.entries.push(ResetEntry {
                address,
                ok,
                message,
            });
        }
        if !report.ok() {
            warn!(failed = ?report.failed(), "reset finished with failures");
        }
        report
    }

    /// Serial devices on the host. Errors degrade to an empty list.
    pub fn enumerate_ports(&self) -> Vec<PortInfo> {
        match L::list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                error!(error = %e, "listing serial ports failed");
                Vec::new()
            }
        }
    }

    pub fn get_diagnostics(&self) -> Diagnostics {
        let ports = self.enumerate_ports();
        let mut inner = self.lock();
        let connected = self.refresh_locked(&mut inner);
        Diagnostics {
            port: inner.config.port.clone(),
            baud_rate: inner.config.baud_rate,
            read_timeout_ms: u64::try_from(inner.config.read_timeout.as_millis())
                .unwrap_or(u64::MAX),
            state: inner.state.clone(),
            connected,
            connected_since: inner.connected_since.clone(),
            last_error: inner.last_error.clone(),
            valid_addresses: (self.addresses.min(), self.addresses.max()),
            ports,
            link: inner.link.metadata(),
            counters: self.metrics.as_ref().map(|m| m.counters()).unwrap_or_default(),
            taken_at: now_rfc3339().unwrap_or_else(|| "unavailable".to_string()),
        }
    }
}

impl<L: ServoLink> Drop for DeviceController<L> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if inner.link.is_open() {
            inner.link.close();
        }
    }
}
