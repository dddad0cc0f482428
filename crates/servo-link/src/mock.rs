use crate::{LinkConfig, LinkError, LinkMetadata, PortInfo, Probe, Result, ServoLink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug)]
struct MockState {
    open: bool,
    config: Option<LinkConfig>,
    open_calls: u32,
    close_calls: u32,
    clear_calls: u32,
    fail_opens: u32,
    silent_reads: u32,
    fail_write_on: Option<Vec<u8>>,
    fail_all_writes: bool,
    echo: bool,
    rx: Vec<u8>,
    writes: Vec<Vec<u8>>,
    wire: Vec<u8>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            open: false,
            config: None,
            open_calls: 0,
            close_calls: 0,
            clear_calls: 0,
            fail_opens: 0,
            silent_reads: 0,
            fail_write_on: None,
            fail_all_writes: false,
            echo: true,
            rx: Vec::new(),
            writes: Vec::new(),
            wire: Vec::new(),
        }
    }
}

/// Shared view into a [`MockLink`] used to script failures and inspect traffic.
#[derive(Clone, Debug, Default)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockHandle {
    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `n` calls to `open` fail.
    pub fn fail_next_opens(&self, n: u32) {
        self.lock().fail_opens = n;
    }

    /// Make the next `n` reads return nothing, as if the board never answered.
    pub fn silence_next_reads(&self, n: u32) {
        self.lock().silent_reads = n;
    }

    /// Fail any write whose payload equals `payload`.
    pub fn fail_writes_of(&self, payload: &[u8]) {
        self.lock().fail_write_on = Some(payload.to_vec());
    }

    pub fn fail_all_writes(&self, fail: bool) {
        self.lock().fail_all_writes = fail;
    }

    /// Whether written bytes are queued back as the board's reply.
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    pub fn push_response(&self, bytes: &[u8]) {
        self.lock().rx.extend_from_slice(bytes);
    }

    /// Simulate the board vanishing while the handle is held.
    pub fn unplug(&self) {
        self.lock().open = false;
    }

    pub fn is_open(&self) -> bool {
        self.lock().open
    }

    pub fn open_calls(&self) -> u32 {
        self.lock().open_calls
    }

    pub fn close_calls(&self) -> u32 {
        self.lock().close_calls
    }

    pub fn clear_calls(&self) -> u32 {
        self.lock().clear_calls
    }

    pub fn last_config(&self) -> Option<LinkConfig> {
        self.lock().config.clone()
    }

    /// Every successful `write_all` payload, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock().writes.clone()
    }

    /// Raw byte stream as it reached the board.
    pub fn wire(&self) -> Vec<u8> {
        self.lock().wire.clone()
    }

    pub fn clear_traffic(&self) {
        let mut st = self.lock();
        st.writes.clear();
        st.wire.clear();
    }
}

/// An in-process stand-in for a servo board.
#[derive(Debug, Default)]
pub struct MockLink {
    handle: MockHandle,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock together with the handle that observes it.
    pub fn with_handle() -> (Self, MockHandle) {
        let link = Self::new();
        let handle = link.handle.clone();
        (link, handle)
    }
}

impl ServoLink for MockLink {
    fn list_ports() -> Result<Vec<PortInfo>> {
        Ok(vec![PortInfo {
            device: "mock0".to_string(),
            description: "Mock servo board".to_string(),
            hardware_id: "MOCK".to_string(),
        }])
    }

    fn open(&mut self, config: &LinkConfig) -> Result<()> {
        let mut st = self.handle.lock();
        st.open_calls += 1;
        st.open = false;
        if st.fail_opens > 0 {
            st.fail_opens -= 1;
            return Err(LinkError::Io(format!("mock: cannot open {}", config.port)));
        }
        st.open = true;
        st.config = Some(config.clone());
        st.rx.clear();
        Ok(())
    }

    fn close(&mut self) {
        let mut st = self.handle.lock();
        if st.open {
            st.close_calls += 1;
            st.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.handle.lock().open
    }

    fn clear_buffers(&mut self) -> Result<()> {
        let mut st = self.handle.lock();
        if !st.open {
            return Err(LinkError::NotOpen);
        }
        st.clear_calls += 1;
        st.rx.clear();
        Ok(())
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        {
            let mut st = self.handle.lock();
            if !st.open {
                return Err(LinkError::NotOpen);
            }
            let scripted = st.fail_write_on.as_deref() == Some(bytes);
            if st.fail_all_writes || scripted {
                return Err(LinkError::Io("mock: write failed".to_string()));
            }
            st.writes.push(bytes.to_vec());
        }
        // One byte at a time so unserialized writers would visibly interleave.
        for b in bytes {
            self.handle.lock().wire.push(*b);
            std::thread::yield_now();
        }
        let mut st = self.handle.lock();
        if st.echo {
            st.rx.extend_from_slice(bytes);
        }
        Ok(())
    }

    fn read_available(&mut self, _wait: Duration) -> Result<Vec<u8>> {
        let mut st = self.handle.lock();
        if !st.open {
            return Err(LinkError::NotOpen);
        }
        if st.silent_reads > 0 {
            st.silent_reads -= 1;
            st.rx.clear();
            return Ok(Vec::new());
        }
        Ok(std::mem::take(&mut st.rx))
    }

    fn metadata(&self) -> LinkMetadata {
        let st = self.handle.lock();
        match (&st.config, st.open) {
            (Some(cfg), true) => LinkMetadata {
                port_name: Probe::Value(cfg.port.clone()),
                baud_rate: Probe::Value(cfg.baud_rate),
                data_bits: Probe::Value("8".to_string()),
                parity: Probe::Value("none".to_string()),
                stop_bits: Probe::Value("1".to_string()),
                flow_control: Probe::Value("none".to_string()),
                bytes_to_read: u32::try_from(st.rx.len()).into(),
                bytes_to_write: Probe::Value(0),
            },
            _ => LinkMetadata::unavailable("link is not open"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> LinkConfig {
        LinkConfig::new("mock0")
    }

    #[test]
    fn echoes_writes_back() -> anyhow::Result<()> {
        let (mut link, handle) = MockLink::with_handle();
        link.open(&cfg())?;
        link.write_all(b"2,90\n")?;
        assert_eq!(link.metadata().bytes_to_read.value(), Some(&5));
        assert_eq!(link.read_available(Duration::ZERO)?, b"2,90\n".to_vec());
        assert_eq!(link.metadata().bytes_to_read.value(), Some(&0));
        assert!(link.read_available(Duration::ZERO)?.is_empty());
        assert_eq!(handle.writes(), vec![b"2,90\n".to_vec()]);
        assert_eq!(handle.wire(), b"2,90\n".to_vec());
        Ok(())
    }

    #[test]
    fn scripted_open_failures_are_consumed() -> anyhow::Result<()> {
        let (mut link, handle) = MockLink::with_handle();
        handle.fail_next_opens(2);
        assert!(link.open(&cfg()).is_err());
        assert!(link.open(&cfg()).is_err());
        link.open(&cfg())?;
        assert!(link.is_open());
        assert_eq!(handle.open_calls(), 3);
        Ok(())
    }

    #[test]
    fn scripted_write_failure_only_hits_matching_payload() -> anyhow::Result<()> {
        let (mut link, handle) = MockLink::with_handle();
        handle.fail_writes_of(b"5,90\n");
        link.open(&cfg())?;
        link.write_all(b"4,90\n")?;
        assert!(link.write_all(b"5,90\n").is_err());
        link.write_all(b"6,90\n")?;
        assert_eq!(handle.writes().len(), 2);
        Ok(())
    }

    #[test]
    fn silent_reads_swallow_the_reply() -> anyhow::Result<()> {
        let (mut link, handle) = MockLink::with_handle();
        handle.silence_next_reads(1);
        link.open(&cfg())?;
        link.write_all(b"2,90\n")?;
        assert!(link.read_available(Duration::ZERO)?.is_empty());
        Ok(())
    }

    #[test]
    fn close_is_idempotent() -> anyhow::Result<()> {
        let (mut link, handle) = MockLink::with_handle();
        link.open(&cfg())?;
        link.close();
        link.close();
        assert_eq!(handle.close_calls(), 1);
        assert!(!link.metadata().port_name.is_available());
        Ok(())
    }

    #[test]
    fn closed_link_refuses_io() {
        let mut link = MockLink::new();
        assert_eq!(link.write_all(b"2,90\n"), Err(LinkError::NotOpen));
        assert_eq!(link.clear_buffers(), Err(LinkError::NotOpen));
    }
}
