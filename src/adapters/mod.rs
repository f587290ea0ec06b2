//! Transport adapters
//!
//! This module contains the byte-level duplex channel the driver talks through.
//! The protocol and session code depend only on the [`Transport`] contract:
//! blocking, timeout-bounded reads, whole-buffer writes, and input buffer control.

use std::io;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::SerialTransport;

pub mod mock_adapter;
pub use mock_adapter::MockTransport;

/// Blocking, timeout-bounded byte channel to an instrument.
///
/// `read` blocks until at least one byte is available or the port's poll interval
/// elapses, in which case it returns an error of kind [`io::ErrorKind::TimedOut`].
/// A zero-length read means the other end is gone.
pub trait Transport: Send {
    /// Read available bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write the whole buffer.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush buffered output to the device.
    fn flush(&mut self) -> io::Result<()>;

    /// Overall time a response may take before it counts as missing.
    fn timeout(&self) -> Duration;

    /// Number of bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Discard everything waiting in the input buffer.
    fn clear_input(&mut self) -> io::Result<()>;

    /// Change the local line speed.
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        (**self).set_baud_rate(baud_rate)
    }
}

/// Whether an I/O error means the link itself is gone rather than a single failed exchange.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
