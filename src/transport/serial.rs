//! Serial transport for USB CDC / UART panels
//!
//! The read half uses the endpoint's read timeout so the reader thread can
//! observe shutdown; the write half gets a longer timeout so a full DCS-BIOS
//! frame at 250000 baud never trips it.

use super::EndpointIo;
use crate::config::EndpointConfig;
use crate::error::{BridgeError, Result};
use serialport::{SerialPortInfo, SerialPortType};
use std::time::Duration;

/// Write timeout for serial endpoints
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Serial endpoint transport
pub struct SerialTransport;

impl SerialTransport {
    /// Open a serial port as an endpoint
    pub fn open(config: &EndpointConfig) -> Result<EndpointIo> {
        let map_err = |e: serialport::Error| BridgeError::EndpointOpen {
            name: config.name.clone(),
            source: std::io::Error::other(format!("{}: {}", config.path, e)),
        };

        let reader = serialport::new(&config.path, config.baud_rate)
            .timeout(config.read_timeout())
            .open()
            .map_err(map_err)?;
        let mut writer = reader.try_clone().map_err(map_err)?;
        writer.set_timeout(WRITE_TIMEOUT).map_err(map_err)?;

        Ok(EndpointIo {
            reader: Box::new(reader),
            writer: Box::new(writer),
        })
    }

    /// List serial ports present on this machine
    pub fn available() -> Vec<SerialPortInfo> {
        serialport::available_ports().unwrap_or_default()
    }
}

/// One-line description of a port for `list` output
pub fn describe(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(usb) => format!(
            "{}  usb {:04x}:{:04x} {}",
            port.port_name,
            usb.vid,
            usb.pid,
            usb.product.as_deref().unwrap_or("")
        )
        .trim_end()
        .to_string(),
        SerialPortType::PciPort => format!("{}  pci", port.port_name),
        SerialPortType::BluetoothPort => format!("{}  bluetooth", port.port_name),
        SerialPortType::Unknown => port.port_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::UsbPortInfo;

    #[test]
    fn test_describe_usb_port() {
        let port = SerialPortInfo {
            port_name: "/dev/ttyACM0".into(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: None,
                manufacturer: None,
                product: Some("Arduino Uno".into()),
            }),
        };
        assert_eq!(describe(&port), "/dev/ttyACM0  usb 2341:0043 Arduino Uno");
    }

    #[test]
    fn test_describe_unknown_port() {
        let port = SerialPortInfo {
            port_name: "/dev/ttyS0".into(),
            port_type: SerialPortType::Unknown,
        };
        assert_eq!(describe(&port), "/dev/ttyS0");
    }
}
