//! Native UART receive source using the `serialport` crate.
//!
//! Lets the console line assembler run against a real USB-UART adapter
//! on Linux, macOS and Windows.

use {
    crate::{
        error::{Error, Result},
        sio::{PortInfo, RxSource, SerialConfig},
    },
    log::trace,
    serialport::ClearBuffer,
    std::io::Read,
};

/// Native serial receive source.
pub struct NativeRx {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl NativeRx {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()?;
        trace!("Opened {} at {} baud", config.port_name, config.baud_rate);

        Ok(Self {
            port,
            name: config
                .port_name
                .clone(),
        })
    }

    /// Open a serial port with default settings.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name, baud_rate))
    }

    /// Port name/path.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl RxSource for NativeRx {
    fn clear_rx(&mut self) -> Result<()> {
        self.port
            .clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn rx_available(&mut self) -> Result<usize> {
        Ok(self
            .port
            .bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.port
            .read_exact(&mut buf)
            .map_err(Error::Io)?;
        Ok(buf[0])
    }
}

/// List the serial ports present on this machine.
pub fn list_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports().map_err(Error::Serial)?;

    Ok(ports
        .into_iter()
        .map(|p| {
            let (vid, pid, product) = match &p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    Some(info.vid),
                    Some(info.pid),
                    info.product
                        .clone(),
                ),
                _ => (None, None, None),
            };

            PortInfo {
                name: p.port_name,
                vid,
                pid,
                product,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listed_ports_are_named() {
        let Ok(ports) = list_ports() else {
            return;
        };
        for port in &ports {
            assert!(!port.name.is_empty());
            assert_eq!(port.vid.is_some(), port.pid.is_some(), "{}", port.name);
        }
    }

    #[test]
    fn test_open_missing_port_fails() {
        assert!(NativeRx::open_simple("/dev/sdoboot-does-not-exist", 115200).is_err());
    }
}
