//! Analyser driver
//!
//! - [`te300x`]: the instrument session
//! - [`state`]: device-confirmed configuration snapshot
//! - [`sweep`]: bulk and incremental sweep acquisition
//! - [`mock`]: simulated instrument for tests and demos

pub mod mock;
pub mod state;
pub mod sweep;
pub mod te300x;

pub use state::{BaudRate, DataFormat, InstrumentState, Mode};
pub use sweep::{AcquisitionMode, CancelToken, SweepObserver, SweepResult, TracePoint};
pub use te300x::Te300x;
