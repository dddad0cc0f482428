use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

use crate::types::Counters;

#[derive(Clone)]
pub struct LinkMetrics {
    pub commands_sent: IntCounter,
    pub command_failures: IntCounter,
    pub connect_attempts: IntCounter,
    pub link_connected: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub link: LinkMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let commands_sent =
            IntCounter::new("servo_commands_sent", "Total servo commands written to the link")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let command_failures =
            IntCounter::new("servo_command_failures", "Servo commands that failed")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let connect_attempts =
            IntCounter::new("servo_connect_attempts", "Link open/handshake attempts")
                .map_err(|e| format!("metrics init error: {e}"))?;
        let link_connected = IntGauge::new("servo_link_connected", "1 while the link is up")
            .map_err(|e| format!("metrics init error: {e}"))?;
        let link = LinkMetrics {
            commands_sent,
            command_failures,
            connect_attempts,
            link_connected,
        };
        let _ = registry.register(Box::new(link.commands_sent.clone()));
        let _ = registry.register(Box::new(link.command_failures.clone()));
        let _ = registry.register(Box::new(link.connect_attempts.clone()));
        let _ = registry.register(Box::new(link.link_connected.clone()));
        Ok(Self { registry, link })
    }

    pub fn counters(&self) -> Counters {
        Counters {
            commands_sent: self.link.commands_sent.get(),
            command_failures: self.link.command_failures.get(),
            connect_attempts: self.link.connect_attempts.get(),
        }
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_export_names_every_series() {
        let hub = MetricsHub::new().unwrap();
        hub.link.commands_sent.inc();
        hub.link.link_connected.set(1);
        let text = hub.encode_text();
        assert!(text.contains("servo_commands_sent 1"));
        assert!(text.contains("servo_link_connected 1"));
        assert!(text.contains("servo_connect_attempts 0"));
        assert_eq!(hub.counters().commands_sent, 1);
    }
}
