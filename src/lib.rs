//! # TE300x DAQ Library
//!
//! Serial driver and sweep acquisition for Trewmac TE300x network/impedance analysers.
//! The crate talks the analyser's ASCII line protocol over a serial port, keeps a
//! snapshot of the configuration the device confirmed, acquires frequency sweeps,
//! and stores the resulting impedance traces in a compact big-endian file format.
//!
//! ## Crate Structure
//!
//! - **`adapters`**: The `Transport` trait and its serial and in-memory implementations.
//! - **`protocol`**: Command encoding, bounded line reads, and sentinel detection for
//!   streamed sweeps.
//! - **`hardware`**: The `Te300x` session, the confirmed `InstrumentState`, the bulk and
//!   incremental sweep engines, and a simulated analyser for tests.
//! - **`data`**: Trace and waveform files, power spectra, and result file naming.
//! - **`worker`**: Runs a session on its own thread behind an async, message-passing handle.
//! - **`config`**: Figment-based configuration (defaults, TOML file, `TE300X_` environment).
//! - **`error`**: The `AnalyserError` enum used throughout the crate.
//! - **`tracing_setup`**: Structured logging initialisation.
//!
//! ## Example
//!
//! ```
//! use te300x_daq::config::SweepDefaults;
//! use te300x_daq::data::{save_trace, load_trace, SampleFormat};
//! use te300x_daq::hardware::{mock::SimulatedAnalyser, CancelToken, Te300x, TracePoint};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let device = SimulatedAnalyser::new();
//! let mut analyser = Te300x::with_transport("sim", device.transport(), &SweepDefaults::default())?;
//! analyser.set_frequency_range(1e6, 10e6, 10)?;
//!
//! let mut live = |trace: &[TracePoint]| println!("{} points so far", trace.len());
//! let sweep = analyser.acquire_sweep_incremental(&mut live, &CancelToken::new())?;
//!
//! let dir = tempfile::tempdir()?;
//! let path = dir.path().join("trace.trc");
//! save_trace(&path, &sweep.points, SampleFormat::F64)?;
//! assert_eq!(load_trace(&path)?.points, sweep.points);
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod protocol;
pub mod tracing_setup;
pub mod worker;

pub use error::{AnalyserError, AppResult};
