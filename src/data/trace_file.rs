//! Binary impedance trace files.
//!
//! All numbers are big-endian:
//!
//! ```text
//! i32 header_len | header | u32 channels = 3 | f64 start_freq | f64 freq_step | samples
//! ```
//!
//! Samples are interleaved per point as `[f, |Z|, arg Z]`, `f64` for
//! [`HEADER_F64`] files and `f32` for [`HEADER_F32`] files. Files written by the
//! older acquisition scripts ([`HEADER_LEGACY`]) carry a measurement time string
//! instead of start frequency and step and are read-only here.

use crate::error::{AnalyserError, AppResult};
use crate::hardware::sweep::TracePoint;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use tracing::{debug, info};

/// Lossless trace layout.
pub const HEADER_F64: &str = "<Z_mag_phase_Rust_bef8>";
/// Compact trace layout.
pub const HEADER_F32: &str = "<Z_mag_phase_Rust_bef4>";
/// Layout written by the older acquisition scripts.
pub const HEADER_LEGACY: &str = "<Z_mag_phase_Python_bef4>";

const CHANNELS: u32 = 3;

/// Sample width of a written trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleFormat {
    /// 8-byte samples; reading back is bit-identical.
    #[default]
    F64,
    /// 4-byte samples.
    F32,
}

impl SampleFormat {
    fn header(self) -> &'static str {
        match self {
            SampleFormat::F64 => HEADER_F64,
            SampleFormat::F32 => HEADER_F32,
        }
    }

    fn width(self) -> usize {
        match self {
            SampleFormat::F64 => 8,
            SampleFormat::F32 => 4,
        }
    }
}

/// A trace read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredTrace {
    /// Version header found in the file.
    pub header: String,
    /// Measurement time, present in legacy files only.
    pub measured_at: Option<String>,
    /// Start frequency in Hz as recorded in the file.
    pub start_frequency: Option<f64>,
    /// Frequency step in Hz as recorded in the file.
    pub frequency_step: Option<f64>,
    /// The points.
    pub points: Vec<TracePoint>,
}

impl StoredTrace {
    /// Frequencies in Hz.
    pub fn frequencies(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.frequency).collect()
    }
}

/// Serialize a trace.
pub fn encode_trace(points: &[TracePoint], format: SampleFormat) -> Bytes {
    let header = format.header();
    let (start, step) = match (points.first(), points.last()) {
        (Some(first), Some(last)) if points.len() > 1 => (
            first.frequency,
            (last.frequency - first.frequency) / (points.len() - 1) as f64,
        ),
        (Some(first), _) => (first.frequency, 0.0),
        _ => (0.0, 0.0),
    };

    let mut buf = BytesMut::with_capacity(
        4 + header.len() + 4 + 16 + points.len() * 3 * format.width(),
    );
    buf.put_i32(header.len() as i32);
    buf.put_slice(header.as_bytes());
    buf.put_u32(CHANNELS);
    buf.put_f64(start);
    buf.put_f64(step);
    for p in points {
        match format {
            SampleFormat::F64 => {
                buf.put_f64(p.frequency);
                buf.put_f64(p.magnitude);
                buf.put_f64(p.phase);
            }
            SampleFormat::F32 => {
                buf.put_f32(p.frequency as f32);
                buf.put_f32(p.magnitude as f32);
                buf.put_f32(p.phase as f32);
            }
        }
    }
    buf.freeze()
}

fn need(buf: &[u8], n: usize, what: &str) -> AppResult<()> {
    if buf.remaining() < n {
        return Err(AnalyserError::CorruptFile(format!(
            "{what}: need {n} bytes, {} left",
            buf.remaining()
        )));
    }
    Ok(())
}

/// Read a length-prefixed string.
pub(crate) fn take_string(buf: &mut &[u8], what: &str) -> AppResult<String> {
    need(*buf, 4, what)?;
    let len = buf.get_i32();
    let len = usize::try_from(len)
        .map_err(|_| AnalyserError::CorruptFile(format!("{what}: negative length {len}")))?;
    need(*buf, len, what)?;
    let text = std::str::from_utf8(&buf[..len])
        .map_err(|_| AnalyserError::CorruptFile(format!("{what}: not UTF-8")))?
        .to_string();
    buf.advance(len);
    Ok(text)
}

/// Parse a serialized trace.
pub fn decode_trace(data: &[u8]) -> AppResult<StoredTrace> {
    let mut buf = data;
    let header = take_string(&mut buf, "header")?;

    let (format, measured_at, start, step) = match header.as_str() {
        HEADER_F64 | HEADER_F32 => {
            need(buf, 4 + 16, "channel count and frequency axis")?;
            check_channels(buf.get_u32())?;
            let start = buf.get_f64();
            let step = buf.get_f64();
            let format = if header == HEADER_F64 {
                SampleFormat::F64
            } else {
                SampleFormat::F32
            };
            (format, None, Some(start), Some(step))
        }
        HEADER_LEGACY => {
            let time = take_string(&mut buf, "measurement time")?;
            need(buf, 4, "channel count")?;
            check_channels(buf.get_u32())?;
            (SampleFormat::F32, Some(time), None, None)
        }
        other => {
            return Err(AnalyserError::CorruptFile(format!(
                "unknown trace header {other:?}"
            )))
        }
    };

    let record = 3 * format.width();
    if buf.remaining() % record != 0 {
        return Err(AnalyserError::CorruptFile(format!(
            "{} sample bytes is not a whole number of {record}-byte records",
            buf.remaining()
        )));
    }

    let mut points = Vec::with_capacity(buf.remaining() / record);
    while buf.has_remaining() {
        let point = match format {
            SampleFormat::F64 => TracePoint::new(buf.get_f64(), buf.get_f64(), buf.get_f64()),
            SampleFormat::F32 => TracePoint::new(
                f64::from(buf.get_f32()),
                f64::from(buf.get_f32()),
                f64::from(buf.get_f32()),
            ),
        };
        points.push(point);
    }

    Ok(StoredTrace {
        header,
        measured_at,
        start_frequency: start,
        frequency_step: step,
        points,
    })
}

fn check_channels(nc: u32) -> AppResult<()> {
    if nc == CHANNELS {
        Ok(())
    } else {
        Err(AnalyserError::CorruptFile(format!(
            "trace has {nc} channels, expected {CHANNELS}"
        )))
    }
}

/// Write `bytes` to a new file; an existing file is left untouched.
pub(crate) fn write_new(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => AnalyserError::FileExists(path.to_path_buf()),
            _ => AnalyserError::Io(e),
        })?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

/// Save a trace; fails with [`AnalyserError::FileExists`] rather than overwrite.
pub fn save_trace(path: impl AsRef<Path>, points: &[TracePoint], format: SampleFormat) -> AppResult<()> {
    let path = path.as_ref();
    write_new(path, &encode_trace(points, format))?;
    info!(path = %path.display(), points = points.len(), "Trace saved");
    Ok(())
}

/// Load a trace in any supported layout.
pub fn load_trace(path: impl AsRef<Path>) -> AppResult<StoredTrace> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let trace = decode_trace(&data)?;
    debug!(path = %path.display(), header = %trace.header, points = trace.points.len(), "Trace loaded");
    Ok(trace)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<TracePoint> {
        vec![
            TracePoint::new(1e6, 50.123456789, -12.5),
            TracePoint::new(1.5e6, 48.0, 0.1),
            TracePoint::new(2e6, 47.25, 3.0),
        ]
    }

    #[test]
    fn layout_of_compact_file() {
        let bytes = encode_trace(&sample(), SampleFormat::F32);
        let header_len = HEADER_F32.len();
        assert_eq!(&bytes[..4], &(header_len as i32).to_be_bytes());
        assert_eq!(&bytes[4..4 + header_len], HEADER_F32.as_bytes());
        assert_eq!(&bytes[4 + header_len..8 + header_len], &3u32.to_be_bytes());
        assert_eq!(bytes.len(), 8 + header_len + 16 + 3 * 3 * 4);
    }

    #[test]
    fn f64_trace_is_bit_identical() {
        let decoded = decode_trace(&encode_trace(&sample(), SampleFormat::F64)).unwrap();
        assert_eq!(decoded.points, sample());
        assert_eq!(decoded.start_frequency, Some(1e6));
        assert_eq!(decoded.frequency_step, Some(0.5e6));
    }

    #[test]
    fn empty_trace() {
        let decoded = decode_trace(&encode_trace(&[], SampleFormat::F64)).unwrap();
        assert!(decoded.points.is_empty());
    }

    #[test]
    fn header_length_past_end_is_corrupt() {
        let mut bytes = encode_trace(&sample(), SampleFormat::F64).to_vec();
        bytes[..4].copy_from_slice(&10_000i32.to_be_bytes());
        assert!(matches!(
            decode_trace(&bytes),
            Err(AnalyserError::CorruptFile(_))
        ));
    }

    #[test]
    fn partial_record_is_corrupt() {
        let mut bytes = encode_trace(&sample(), SampleFormat::F64).to_vec();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            decode_trace(&bytes),
            Err(AnalyserError::CorruptFile(_))
        ));
    }

    #[test]
    fn reads_legacy_layout() {
        let mut buf = BytesMut::new();
        buf.put_i32(HEADER_LEGACY.len() as i32);
        buf.put_slice(HEADER_LEGACY.as_bytes());
        let time = "2022-09-13-21-46-41";
        buf.put_i32(time.len() as i32);
        buf.put_slice(time.as_bytes());
        buf.put_u32(3);
        for v in [1e6f32, 50.0, 10.0, 2e6, 48.0, 9.0] {
            buf.put_f32(v);
        }

        let trace = decode_trace(&buf).unwrap();
        assert_eq!(trace.measured_at.as_deref(), Some(time));
        assert_eq!(trace.start_frequency, None);
        assert_eq!(trace.points[1], TracePoint::new(2e6, 48.0, 9.0));
    }

    #[test]
    fn unknown_header_is_corrupt() {
        let mut buf = BytesMut::new();
        buf.put_i32(5);
        buf.put_slice(b"<XYZ>");
        assert!(matches!(
            decode_trace(&buf),
            Err(AnalyserError::CorruptFile(_))
        ));
    }
}
