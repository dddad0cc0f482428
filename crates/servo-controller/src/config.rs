use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use servo_link::{LinkConfig, DEFAULT_BAUD_RATE};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::types::{MAX_ANGLE, MIN_ANGLE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub read_timeout_ms: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 1000,
        }
    }
}

/// Controller settings as read from a YAML or JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub link: LinkSection,
    /// Attempts made by an explicit connect.
    pub connect_retries: u32,
    pub retry_delay_ms: u64,
    /// Attempts made when a command finds the link down.
    pub reconnect_attempts: u32,
    pub neutral_angle: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            link: LinkSection::default(),
            connect_retries: 3,
            retry_delay_ms: 1000,
            reconnect_attempts: 1,
            neutral_angle: 90,
        }
    }
}

impl ControllerConfig {
    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            port: self.link.port.clone().unwrap_or_default(),
            baud_rate: self.link.baud_rate,
            read_timeout: Duration::from_millis(self.link.read_timeout_ms),
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.link.baud_rate == 0 {
            bail!("baud_rate must be positive");
        }
        if self.connect_retries == 0 {
            bail!("connect_retries must be at least 1");
        }
        if self.reconnect_attempts == 0 {
            bail!("reconnect_attempts must be at least 1");
        }
        if !(MIN_ANGLE..=MAX_ANGLE).contains(&self.neutral_angle) {
            bail!(
                "neutral_angle {} outside {MIN_ANGLE}-{MAX_ANGLE}",
                self.neutral_angle
            );
        }
        Ok(())
    }

    /// Apply `SERVO_PORT` / `SERVO_BAUD` style overrides.
    pub fn apply_overrides(&mut self, port: Option<String>, baud: Option<u32>) {
        if let Some(p) = port {
            self.link.port = Some(p);
        }
        if let Some(b) = baud {
            self.link.baud_rate = b;
        }
    }
}

pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<ControllerConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    let is_json = path.extension().is_some_and(|ext| ext == "json");
    let cfg: ControllerConfig = if is_json {
        serde_json::from_str(&raw).with_context(|| format!("parsing json: {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?
    };
    cfg.validate()
        .with_context(|| format!("validating config: {}", path.display()))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let cfg: ControllerConfig = serde_yaml::from_str("link:\n  port: /dev/ttyACM0\n").unwrap();
        assert_eq!(cfg.link.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(cfg.link.baud_rate, 9600);
        assert_eq!(cfg.connect_retries, 3);
        assert_eq!(cfg.neutral_angle, 90);
        assert_eq!(cfg.link_config().read_timeout, Duration::from_secs(1));
    }

    #[test]
    fn rejects_bad_values() {
        let mut cfg = ControllerConfig::default();
        cfg.neutral_angle = 200;
        assert!(cfg.validate().is_err());
        let mut cfg = ControllerConfig::default();
        cfg.link.baud_rate = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = ControllerConfig::default();
        cfg.connect_retries = 0;
        assert!(cfg.validate().is_err());
        let mut cfg = ControllerConfig::default();
        cfg.reconnect_attempts = 0;
        assert!(cfg.validate().is_err());
        assert!(ControllerConfig::default().validate().is_ok());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut cfg = ControllerConfig::default();
        cfg.apply_overrides(Some("COM4".into()), Some(115_200));
        assert_eq!(cfg.link_config().port, "COM4");
        assert_eq!(cfg.link_config().baud_rate, 115_200);
        cfg.apply_overrides(None, None);
        assert_eq!(cfg.link_config().port, "COM4");
    }

    #[test]
    fn loads_json_and_yaml_files() -> anyhow::Result<()> {
        let dir = std::env::temp_dir().join(format!("servo-cfg-{}", std::process::id()));
        fs::create_dir_all(&dir)?;
        let yaml = dir.join("rig.yaml");
        fs::write(&yaml, "link:\n  port: /dev/ttyUSB0\n  baud_rate: 57600\nretry_delay_ms: 10\n")?;
        let cfg = load_config_file(&yaml)?;
        assert_eq!(cfg.link.baud_rate, 57_600);
        assert_eq!(cfg.retry_delay(), Duration::from_millis(10));

        let json = dir.join("rig.json");
        fs::write(&json, r#"{"link": {"port": "COM3"}, "neutral_angle": 45}"#)?;
        let cfg = load_config_file(&json)?;
        assert_eq!(cfg.neutral_angle, 45);

        let bad = dir.join("bad.yaml");
        fs::write(&bad, "neutral_angle: 999\n")?;
        assert!(load_config_file(&bad).is_err());
        fs::remove_dir_all(&dir)?;
        Ok(())
    }
}
