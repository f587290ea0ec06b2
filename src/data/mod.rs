//! Result storage.
pub mod filename;
pub mod trace_file;
pub mod waveform;

pub use trace_file::{load_trace, save_trace, SampleFormat, StoredTrace};
pub use waveform::{Spectrum, SpectrumScale, Waveform};
