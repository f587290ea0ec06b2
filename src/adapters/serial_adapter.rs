//! Serial transport for RS-232/USB-serial analysers
//!
//! Wraps the `serialport` crate. The port is opened with a short internal poll
//! interval; the overall response timeout is enforced by the protocol layer,
//! which keeps retrying reads that time out until its own deadline passes.

use super::Transport;
use std::io::{self, Read, Write};
use std::time::Duration;
use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

/// Internal read timeout of the port; reads shorter than this are retried
/// by the caller until [`SerialTransport::timeout`] elapses.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Serial port transport.
pub struct SerialTransport {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Overall response timeout
    timeout: Duration,

    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open a serial port.
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (9600 or 115200 for the TE300x)
    /// * `timeout` - Overall time a response may take
    pub fn open(port_name: &str, baud_rate: u32, timeout: Duration) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(POLL_INTERVAL.min(timeout))
            .open()?;

        debug!("Serial port '{}' opened at {} baud", port_name, baud_rate);

        Ok(Self {
            port_name: port_name.to_string(),
            timeout,
            port,
        })
    }

    /// Name the port was opened with.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

fn to_io(err: serialport::Error) -> io::Error {
    match err.kind() {
        serialport::ErrorKind::NoDevice => io::Error::new(io::ErrorKind::NotConnected, err),
        serialport::ErrorKind::Io(kind) => io::Error::new(kind, err),
        _ => io::Error::new(io::ErrorKind::Other, err),
    }
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.port
            .bytes_to_read()
            .map(|n| n as usize)
            .map_err(to_io)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(to_io)
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        debug!("Serial port '{}' switching to {} baud", self.port_name, baud_rate);
        self.port.set_baud_rate(baud_rate).map_err(to_io)
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        debug!("Serial port '{}' closed", self.port_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_missing_port_fails() {
        let result = SerialTransport::open(
            "/dev/te300x-does-not-exist",
            115200,
            Duration::from_millis(200),
        );
        assert!(result.is_err());
    }

    #[test]
    fn maps_no_device_to_not_connected() {
        let err = serialport::Error::new(serialport::ErrorKind::NoDevice, "unplugged");
        assert_eq!(to_io(err).kind(), io::ErrorKind::NotConnected);
    }
}
