use crate::{LinkConfig, LinkError, LinkMetadata, PortInfo, Result, ServoLink};
use serialport::{
    ClearBuffer, DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits,
};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::debug;

/// Servo board attached over a USB/UART serial port.
#[derive(Default)]
pub struct SerialLink {
    port: Option<Box<dyn SerialPort>>,
    read_timeout: Duration,
}

impl SerialLink {
    pub fn new() -> Self {
        Self::default()
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(LinkError::NotOpen)
    }
}

fn io_err(e: impl ToString) -> LinkError {
    LinkError::Io(e.to_string())
}

fn describe(port_type: &SerialPortType) -> (String, String) {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let description = usb
                .product
                .clone()
                .or_else(|| usb.manufacturer.clone())
                .unwrap_or_else(|| "USB serial device".to_string());
            let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
            if let Some(sn) = &usb.serial_number {
                hwid.push_str(&format!(" SER={sn}"));
            }
            (description, hwid)
        }
        SerialPortType::PciPort => ("PCI serial port".to_string(), "PCI".to_string()),
        SerialPortType::BluetoothPort => {
            ("Bluetooth serial port".to_string(), "Bluetooth".to_string())
        }
        SerialPortType::Unknown => ("n/a".to_string(), "n/a".to_string()),
    }
}

fn data_bits_str(bits: DataBits) -> String {
    match bits {
        DataBits::Five => "5",
        DataBits::Six => "6",
        DataBits::Seven => "7",
        DataBits::Eight => "8",
    }
    .to_string()
}

fn parity_str(parity: Parity) -> String {
    match parity {
        Parity::None => "none",
        Parity::Odd => "odd",
        Parity::Even => "even",
    }
    .to_string()
}

fn stop_bits_str(bits: StopBits) -> String {
    match bits {
        StopBits::One => "1",
        StopBits::Two => "2",
    }
    .to_string()
}

fn flow_control_str(flow: FlowControl) -> String {
    match flow {
        FlowControl::None => "none",
        FlowControl::Software => "software",
        FlowControl::Hardware => "hardware",
    }
    .to_string()
}

impl ServoLink for SerialLink {
    fn list_ports() -> Result<Vec<PortInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(io_err)? {
            let (description, hardware_id) = describe(&p.port_type);
            out.push(PortInfo {
                device: p.port_name,
                description,
                hardware_id,
            });
        }
        out.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(out)
    }

    fn open(&mut self, config: &LinkConfig) -> Result<()> {
        self.close();
        let port = serialport::new(&config.port, config.baud_rate)
            .timeout(config.read_timeout)
            .open()
            .map_err(|e| match e.kind() {
                serialport::ErrorKind::NoDevice => LinkError::PortNotFound(config.port.clone()),
                _ => io_err(e),
            })?;
        debug!(port = %config.port, baud = config.baud_rate, "serial port opened");
        self.port = Some(port);
        self.read_timeout = config.read_timeout;
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("serial port closed");
        }
    }

    fn is_open(&self) -> bool {
        // A device that was unplugged fails this query even though we still hold the fd.
        self.port
            .as_ref()
            .map(|p| p.bytes_to_read().is_ok())
            .unwrap_or(false)
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.port_mut()?.clear(ClearBuffer::All).map_err(io_err)
    }

    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(bytes).map_err(io_err)?;
        port.flush().map_err(io_err)
    }

    fn read_available(&mut self, wait: Duration) -> Result<Vec<u8>> {
        let restore = self.read_timeout;
        let port = self.port_mut()?;
        let deadline = Instant::now() + wait;
        let mut acc: Vec<u8> = Vec::with_capacity(64);
        let mut buf = [0u8; 128];
        let outcome = loop {
            let now = Instant::now();
            if now >= deadline {
                break Ok(());
            }
            if let Err(e) = port.set_timeout(deadline - now) {
                break Err(io_err(e));
            }
            match port.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(n) => {
                    acc.extend_from_slice(&buf[..n]);
                    if port.bytes_to_read().unwrap_or(0) == 0 {
                        break Ok(());
                    }
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => break Ok(()),
                Err(e) => break Err(io_err(e)),
            }
        };
        port.set_timeout(restore).ok();
        outcome.map(|()| acc)
    }

    fn metadata(&self) -> LinkMetadata {
        let Some(port) = self.port.as_ref() else {
            return LinkMetadata::unavailable("link is not open");
        };
        LinkMetadata {
            port_name: port.name().ok_or("port name not reported").into(),
            baud_rate: port.baud_rate().into(),
            data_bits: port.data_bits().map(data_bits_str).into(),
            parity: port.parity().map(parity_str).into(),
            stop_bits: port.stop_bits().map(stop_bits_str).into(),
            flow_control: port.flow_control().map(flow_control_str).into(),
            bytes_to_read: port.bytes_to_read().into(),
            bytes_to_write: port.bytes_to_write().into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn usb_ports_report_vid_pid_and_serial() {
        let usb = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x2341,
            pid: 0x0042,
            serial_number: Some("95530343".to_string()),
            manufacturer: Some("Arduino".to_string()),
            product: Some("Mega 2560".to_string()),
        });
        let (desc, hwid) = describe(&usb);
        assert_eq!(desc, "Mega 2560");
        assert_eq!(hwid, "USB VID:PID=2341:0042 SER=95530343");
    }

    #[test]
    fn non_usb_ports_report_kind() {
        assert_eq!(describe(&SerialPortType::PciPort).1, "PCI");
        assert_eq!(describe(&SerialPortType::Unknown).0, "n/a");
    }

    #[test]
    fn closed_link_reports_unavailable_metadata() {
        let link = SerialLink::new();
        assert!(!link.is_open());
        assert!(!link.metadata().baud_rate.is_available());
    }

    #[test]
    fn io_on_closed_link_is_rejected() {
        let mut link = SerialLink::new();
        assert_eq!(link.write_all(b"2,90\n"), Err(LinkError::NotOpen));
        assert_eq!(
            link.read_available(Duration::from_millis(1)),
            Err(LinkError::NotOpen)
        );
    }
}
