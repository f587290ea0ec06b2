//! Sweep acquisition engine
//!
//! Both strategies start with the single-byte trigger `N`; the device answers
//! with a header line, one `freq,mag,phase` line per point and the `END` sentinel.
//!
//! - **Bulk**: buffer the whole stream (ignoring line boundaries) until the
//!   sentinel arrived and the device went quiet, then parse it in one go.
//!   A parse failure discards the whole block.
//! - **Incremental**: read line by line, hand every new point to a
//!   [`SweepObserver`] before asking for the next line, and check a
//!   [`CancelToken`] before every read. Failures keep the points read so far.

use crate::adapters::Transport;
use crate::error::{AnalyserError, AppResult};
use crate::protocol::{
    self, link_error, parse_values, read_line, read_until_sentinel, Command, SENTINEL_LINE,
};
use num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One measured point of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TracePoint {
    /// Frequency in Hz.
    pub frequency: f64,
    /// Magnitude (|Z| in Ohm for the polar impedance format).
    pub magnitude: f64,
    /// Phase in degrees.
    pub phase: f64,
}

impl TracePoint {
    /// Create a point.
    pub fn new(frequency: f64, magnitude: f64, phase: f64) -> Self {
        Self {
            frequency,
            magnitude,
            phase,
        }
    }

    /// Parse a `freq,mag,phase` data line.
    pub fn parse(line: &str) -> AppResult<Self> {
        let values = parse_values(line, 3)?;
        Ok(Self::new(values[0], values[1], values[2]))
    }

    /// Magnitude and phase as a complex number.
    pub fn impedance(&self) -> Complex<f64> {
        Complex::from_polar(self.magnitude, self.phase.to_radians())
    }
}

/// A trace returned by one acquisition.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SweepResult {
    /// Points in the order received.
    pub points: Vec<TracePoint>,
    /// Point count configured when the sweep was triggered.
    pub requested_points: usize,
    /// Wall-clock duration of the sweep. Diagnostic only.
    pub elapsed: Duration,
}

impl SweepResult {
    /// An empty trace for a sweep of `requested_points`.
    pub fn empty(requested_points: usize) -> Self {
        Self {
            points: Vec::new(),
            requested_points,
            elapsed: Duration::ZERO,
        }
    }

    /// Number of points received.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether no points were received.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Whether the device delivered exactly the configured number of points.
    pub fn is_complete(&self) -> bool {
        self.points.len() == self.requested_points
    }

    /// Frequencies in Hz.
    pub fn frequencies(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.frequency).collect()
    }

    /// Magnitudes.
    pub fn magnitudes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.magnitude).collect()
    }

    /// Phases in degrees.
    pub fn phases(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.phase).collect()
    }
}

/// How a sweep is read from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMode {
    /// Whole block, then parse.
    #[default]
    Bulk,
    /// Point by point with live observer callbacks.
    Incremental,
}

/// Size limits applied while reading sweeps and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepLimits {
    /// Longest accepted response line.
    pub max_line_len: usize,
    /// Largest bulk sweep block buffered.
    pub max_sweep_bytes: usize,
}

impl Default for SweepLimits {
    fn default() -> Self {
        Self {
            max_line_len: protocol::DEFAULT_MAX_LINE_LEN,
            max_sweep_bytes: 1 << 20,
        }
    }
}

/// Cooperative cancellation for incremental sweeps.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// A fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Receives the growing trace during an incremental sweep.
pub trait SweepObserver {
    /// Called after every new point; the new point is the last element of `trace`.
    fn on_point(&mut self, trace: &[TracePoint]);
}

impl<F> SweepObserver for F
where
    F: FnMut(&[TracePoint]),
{
    fn on_point(&mut self, trace: &[TracePoint]) {
        self(trace)
    }
}

impl SweepObserver for mpsc::UnboundedSender<TracePoint> {
    fn on_point(&mut self, trace: &[TracePoint]) {
        if let Some(point) = trace.last() {
            // A dropped receiver only means nobody is watching.
            let _ = self.send(*point);
        }
    }
}

/// Parse a complete bulk sweep block.
///
/// Records are split on `\r`; the first record is the header and the last
/// non-empty one is the sentinel, both discarded. The rule assumes the device
/// always sends the header line.
pub fn parse_bulk(text: &str) -> AppResult<Vec<TracePoint>> {
    let mut records: Vec<&str> = text.split('\r').collect();
    while records.last().is_some_and(|r| r.trim().is_empty()) {
        records.pop();
    }

    match records.pop() {
        Some(last) if last.trim() == SENTINEL_LINE => {}
        _ => return Err(AnalyserError::malformed("END sentinel", tail(text))),
    }
    if records.is_empty() {
        return Err(AnalyserError::malformed("sweep header line", text));
    }

    let header = records.remove(0);
    if TracePoint::parse(header).is_ok() {
        warn!(header, "Sweep header looks like a data point; it is discarded as header");
    }

    records.into_iter().map(TracePoint::parse).collect()
}

fn tail(text: &str) -> String {
    let start = text
        .char_indices()
        .rev()
        .nth(31)
        .map_or(0, |(i, _)| i);
    text[start..].to_string()
}

/// Trigger a sweep and read it as one block.
#[tracing::instrument(level = "debug", skip(transport, limits))]
pub fn acquire_bulk<T: Transport + ?Sized>(
    transport: &mut T,
    requested_points: usize,
    limits: &SweepLimits,
) -> AppResult<SweepResult> {
    transport.clear_input().map_err(link_error)?;
    protocol::send(transport, &Command::Trigger)?;
    let start = Instant::now();

    let block = read_until_sentinel(transport, limits.max_sweep_bytes)?;
    let text = String::from_utf8(block).map_err(|e| {
        AnalyserError::malformed("ASCII sweep data", String::from_utf8_lossy(e.as_bytes()))
    })?;
    let points = parse_bulk(&text)?;
    let elapsed = start.elapsed();

    let result = SweepResult {
        points,
        requested_points,
        elapsed,
    };
    if result.is_complete() {
        info!(points = result.len(), ?elapsed, "Bulk sweep complete");
    } else {
        warn!(
            received = result.len(),
            requested = requested_points,
            "Bulk sweep ended early"
        );
    }
    Ok(result)
}

/// Trigger a sweep and read it line by line.
///
/// Accepts at most `requested_points + 1` data lines; one more fails with
/// [`AnalyserError::AcquisitionOverrun`]. Any failure after the trigger is
/// returned as [`AnalyserError::IncompleteSweep`] holding the points read so far;
/// whatever is left of the stream in the input buffer is discarded.
#[tracing::instrument(level = "debug", skip(transport, limits, observer, cancel))]
pub fn acquire_incremental<T, O>(
    transport: &mut T,
    requested_points: usize,
    limits: &SweepLimits,
    observer: &mut O,
    cancel: &CancelToken,
) -> AppResult<SweepResult>
where
    T: Transport + ?Sized,
    O: SweepObserver + ?Sized,
{
    transport.clear_input().map_err(link_error)?;
    protocol::send(transport, &Command::Trigger)?;
    let start = Instant::now();

    let mut points = Vec::with_capacity(requested_points);
    let outcome = stream_points(
        transport,
        requested_points + 1,
        limits.max_line_len,
        observer,
        cancel,
        &mut points,
    );

    let result = SweepResult {
        points,
        requested_points,
        elapsed: start.elapsed(),
    };

    match outcome {
        Ok(()) => {
            info!(points = result.len(), elapsed = ?result.elapsed, "Incremental sweep complete");
            Ok(result)
        }
        Err(err) => {
            if matches!(err, AnalyserError::Cancelled) {
                warn!(points = result.len(), "Sweep cancelled");
            } else {
                warn!(points = result.len(), error = %err, "Incremental sweep failed");
            }
            // The rest of the stream must not be read as the next confirmation.
            if !matches!(err, AnalyserError::Disconnected(_)) {
                if let Err(e) = transport.clear_input() {
                    debug!("Failed to clear input after sweep error: {}", e);
                }
            }
            Err(AnalyserError::IncompleteSweep {
                trace: result,
                source: Box::new(err),
            })
        }
    }
}

fn stream_points<T, O>(
    transport: &mut T,
    limit: usize,
    max_line_len: usize,
    observer: &mut O,
    cancel: &CancelToken,
    points: &mut Vec<TracePoint>,
) -> AppResult<()>
where
    T: Transport + ?Sized,
    O: SweepObserver + ?Sized,
{
    if cancel.is_cancelled() {
        return Err(AnalyserError::Cancelled);
    }
    let header = read_line(transport, max_line_len)?;
    debug!(header = %header, "Sweep header");

    loop {
        if cancel.is_cancelled() {
            return Err(AnalyserError::Cancelled);
        }
        let line = read_line(transport, max_line_len)?;
        if line.trim() == SENTINEL_LINE {
            return Ok(());
        }
        if points.len() >= limit {
            return Err(AnalyserError::AcquisitionOverrun { limit });
        }
        points.push(TracePoint::parse(&line)?);
        observer.on_point(points);
    }
}
