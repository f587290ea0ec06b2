//! Custom error types for the analyser driver.
//!
//! This module defines the primary error type, `AnalyserError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! everything that can go wrong between opening a serial port and writing a trace to disk.
//!
//! ## Error Hierarchy
//!
//! - **`Connect`**: The port could not be opened, or the default configuration sequence
//!   applied right after opening failed. The transport is closed in both cases.
//! - **`NotConnected`** / **`Disconnected`**: Operation on a closed session, or the
//!   transport reported loss of link during the call. After `Disconnected` every further
//!   call fails fast with `NotConnected` until the caller reconnects.
//! - **`Timeout`** / **`Truncated`**: A response line did not terminate within the
//!   transport timeout, or grew past the permitted length.
//! - **`MalformedResponse`**: A confirmation or data line did not match the expected grammar.
//!   The instrument state snapshot is never touched when this is returned.
//! - **`AcquisitionOverrun`** / **`IncompleteSweep`** / **`Cancelled`**: Incremental sweep
//!   outcomes. `IncompleteSweep` carries the points received before the failure.
//! - **`CorruptFile`** / **`FileExists`**: Result file codec failures.
//!
//! By using `#[from]`, `AnalyserError` can be created from I/O and configuration errors,
//! which keeps the `?` operator usable throughout the crate.

use crate::hardware::sweep::SweepResult;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, AnalyserError>;

/// Every failure the driver, the acquisition engine and the result codec can report.
#[derive(Error, Debug)]
pub enum AnalyserError {
    /// The port could not be opened or the initial configuration sequence failed.
    #[error("Could not connect to analyser on '{port}': {source}")]
    Connect {
        /// Port identifier given by the caller.
        port: String,
        /// Underlying cause.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Operation attempted on a session that is closed or lost its link.
    #[error("Analyser not connected")]
    NotConnected,

    /// The transport reported loss of link; the session is now disconnected.
    #[error("Analyser link lost: {0}")]
    Disconnected(String),

    /// No terminator arrived within the transport timeout.
    #[error("No response terminator within {0:?}")]
    Timeout(Duration),

    /// A response exceeded the permitted length before its terminator.
    #[error("Response exceeded {max_len} bytes without terminator")]
    Truncated {
        /// Length limit that was exceeded.
        max_len: usize,
    },

    /// A response did not match the expected grammar.
    #[error("Malformed response (expected {expected}): {response:?}")]
    MalformedResponse {
        /// Description of what the parser expected.
        expected: String,
        /// The offending response text.
        response: String,
    },

    /// An incremental sweep produced more data lines than the safety cap allows.
    #[error("Sweep overran {limit} points without an END sentinel")]
    AcquisitionOverrun {
        /// Maximum number of data lines accepted (configured points + 1).
        limit: usize,
    },

    /// An incremental sweep stopped early; the points read so far are kept.
    #[error("Sweep incomplete after {} points: {source}", .trace.points.len())]
    IncompleteSweep {
        /// Partial trace.
        trace: SweepResult,
        /// Reason the sweep stopped.
        #[source]
        source: Box<AnalyserError>,
    },

    /// The caller cancelled a running sweep.
    #[error("Sweep cancelled")]
    Cancelled,

    /// A result file does not match its declared layout.
    #[error("Corrupt result file: {0}")]
    CorruptFile(String),

    /// Writing would overwrite an existing file.
    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// A requested setting is rejected before anything is sent.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),
}

impl AnalyserError {
    pub(crate) fn malformed(expected: impl Into<String>, response: impl Into<String>) -> Self {
        Self::MalformedResponse {
            expected: expected.into(),
            response: response.into(),
        }
    }

    /// The underlying cause, looking through `IncompleteSweep`.
    pub fn root(&self) -> &AnalyserError {
        match self {
            Self::IncompleteSweep { source, .. } => source.root(),
            other => other,
        }
    }

    /// Points acquired before an incremental sweep stopped, if any.
    pub fn partial_trace(&self) -> Option<&SweepResult> {
        match self {
            Self::IncompleteSweep { trace, .. } => Some(trace),
            _ => None,
        }
    }

    /// Whether the error means the session can no longer be used.
    pub fn is_link_lost(&self) -> bool {
        matches!(
            self.root(),
            Self::Disconnected(_) | Self::NotConnected
        )
    }
}

impl From<figment::Error> for AnalyserError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}
