//! Mock transport for testing
//!
//! This transport stands in for a serial port so the protocol, session and sweep
//! code can be exercised without hardware. It provides:
//! - A responder closure that turns every write into the bytes the "device" sends back
//! - Chunked reads, to reproduce responses that arrive across several partial reads
//! - Link-loss injection
//! - A write log for test verification

use super::Transport;
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Turns the bytes written by the driver into the bytes the device replies with.
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<u8> + Send>;

/// In-memory transport driven by a [`Responder`].
///
/// # Example
///
/// ```
/// use te300x_daq::adapters::{MockTransport, Transport};
///
/// let mut transport = MockTransport::scripted(vec![b"V1.2\r".to_vec()]);
/// let probe = transport.probe();
/// transport.write_all(b"V").unwrap();
/// assert_eq!(probe.written(), vec![b"V".to_vec()]);
/// assert_eq!(transport.bytes_available().unwrap(), 5);
/// ```
pub struct MockTransport {
    responder: Responder,
    pending: VecDeque<u8>,
    chunk_size: usize,
    timeout: Duration,
    probe: MockProbe,
}

/// Shared view into a [`MockTransport`] that stays usable after the transport
/// has been moved into a session.
#[derive(Clone, Debug)]
pub struct MockProbe {
    written: Arc<Mutex<Vec<Vec<u8>>>>,
    link_up: Arc<AtomicBool>,
    baud_rate: Arc<AtomicU32>,
}

impl MockProbe {
    /// Every buffer written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Written buffers decoded lossily as text, for readable assertions.
    pub fn written_text(&self) -> Vec<String> {
        self.written()
            .iter()
            .map(|w| String::from_utf8_lossy(w).into_owned())
            .collect()
    }

    /// Clear the write log.
    pub fn clear_log(&self) {
        self.written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }

    /// Simulate unplugging the cable: all further I/O fails with `BrokenPipe`.
    pub fn disconnect(&self) {
        self.link_up.store(false, Ordering::SeqCst);
    }

    /// Whether the simulated link is still up.
    pub fn is_link_up(&self) -> bool {
        self.link_up.load(Ordering::SeqCst)
    }

    /// Line speed last set through the transport.
    pub fn baud_rate(&self) -> u32 {
        self.baud_rate.load(Ordering::SeqCst)
    }
}

impl MockTransport {
    /// Create a mock transport around a responder.
    pub fn new<F>(responder: F) -> Self
    where
        F: FnMut(&[u8]) -> Vec<u8> + Send + 'static,
    {
        Self {
            responder: Box::new(responder),
            pending: VecDeque::new(),
            chunk_size: usize::MAX,
            timeout: Duration::from_millis(20),
            probe: MockProbe {
                written: Arc::new(Mutex::new(Vec::new())),
                link_up: Arc::new(AtomicBool::new(true)),
                baud_rate: Arc::new(AtomicU32::new(115_200)),
            },
        }
    }

    /// Reply to the n-th write with the n-th buffer; silence once the script runs out.
    pub fn scripted(replies: Vec<Vec<u8>>) -> Self {
        let mut replies = VecDeque::from(replies);
        Self::new(move |_| replies.pop_front().unwrap_or_default())
    }

    /// A transport whose input already holds `bytes` and which never replies.
    pub fn with_input(bytes: &[u8]) -> Self {
        let mut transport = Self::new(|_| Vec::new());
        transport.pending.extend(bytes);
        transport
    }

    /// Deliver at most `chunk_size` bytes per read.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set the overall response timeout reported to the protocol layer.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Shared probe for inspecting the transport after it has been moved.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    fn check_link(&self) -> io::Result<()> {
        if self.probe.is_link_up() {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock link down"))
        }
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_link()?;
        if self.pending.is_empty() {
            // Stand-in for the port's poll interval.
            std::thread::sleep(Duration::from_millis(1));
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf.len().min(self.chunk_size).min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.check_link()?;
        self.probe
            .written
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(data.to_vec());
        let reply = (self.responder)(data);
        self.pending.extend(reply);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.check_link()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        self.check_link()?;
        Ok(self.pending.len())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.check_link()?;
        self.pending.clear();
        Ok(())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        self.check_link()?;
        self.probe.baud_rate.store(baud_rate, Ordering::SeqCst);
        Ok(())
    }
}
