//! Time-sampled multi-channel waveforms.
//!
//! File layout (big-endian), shared with older LabVIEW and Matlab tooling:
//!
//! ```text
//! i32 header_len | "<WFM_Python_>f4>" | u32 channels | f64 t0 | f64 dt | f64 dt_reserved | f32 samples
//! ```
//!
//! Samples are stored row-major, one row of `channels` values per time step.

use crate::data::trace_file::{take_string, write_new};
use crate::error::{AnalyserError, AppResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_complex::Complex;
use rustfft::FftPlanner;
use std::path::Path;
use tracing::{debug, info};

/// Header written to waveform files.
pub const WAVEFORM_HEADER: &str = "<WFM_Python_>f4>";

/// Amplitude scale of a power spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpectrumScale {
    /// Magnitude as computed.
    #[default]
    Linear,
    /// `20 log10` of the magnitude.
    Decibel,
}

/// One-sided magnitude spectrum of every channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// FFT length after padding.
    pub nfft: usize,
    /// Bin frequencies in Hz.
    pub frequencies: Vec<f64>,
    /// One vector of bin values per channel.
    pub channels: Vec<Vec<f64>>,
}

/// Sampled waveform with one or more channels.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    channels: usize,
    samples: Vec<f32>,
    /// Time of the first sample in seconds.
    pub t0: f64,
    /// Sample interval in seconds.
    pub dt: f64,
    /// Kept for file compatibility, not used.
    pub dt_reserved: f64,
}

impl Waveform {
    /// Build from row-major samples.
    pub fn new(channels: usize, samples: Vec<f32>, dt: f64, t0: f64) -> AppResult<Self> {
        if channels == 0 || samples.len() % channels != 0 {
            return Err(AnalyserError::InvalidParameter(format!(
                "{} samples do not fill rows of {channels} channels",
                samples.len()
            )));
        }
        if !(dt.is_finite() && dt > 0.0) {
            return Err(AnalyserError::InvalidParameter(format!(
                "sample interval {dt}"
            )));
        }
        Ok(Self {
            channels,
            samples,
            t0,
            dt,
            dt_reserved: 0.0,
        })
    }

    /// Build from one vector per channel; all must have the same length.
    pub fn from_channels(columns: &[Vec<f32>], dt: f64, t0: f64) -> AppResult<Self> {
        let ns = columns.first().map_or(0, Vec::len);
        if columns.iter().any(|c| c.len() != ns) {
            return Err(AnalyserError::InvalidParameter(
                "channels differ in length".to_string(),
            ));
        }
        let samples = (0..ns)
            .flat_map(|k| columns.iter().map(move |c| c[k]))
            .collect();
        Self::new(columns.len(), samples, dt, t0)
    }

    /// Number of channels.
    pub fn channel_count(&self) -> usize {
        self.channels
    }

    /// Number of samples per channel.
    pub fn ns(&self) -> usize {
        self.samples.len() / self.channels
    }

    /// Row-major samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample times in seconds.
    pub fn times(&self) -> Vec<f64> {
        (0..self.ns()).map(|k| self.t0 + k as f64 * self.dt).collect()
    }

    /// Sample rate in Hz.
    pub fn fs(&self) -> f64 {
        1.0 / self.dt
    }

    /// Samples of channel `index`.
    pub fn channel(&self, index: usize) -> Option<Vec<f32>> {
        (index < self.channels).then(|| {
            self.samples
                .iter()
                .skip(index)
                .step_by(self.channels)
                .copied()
                .collect()
        })
    }

    /// One-sided magnitude spectrum of every channel.
    ///
    /// With `padding > 0` the FFT length is `2^(ceil(log2 ns) + padding - 1)`;
    /// otherwise it equals the sample count. `normalise` scales each channel to
    /// its own maximum.
    ///
    /// # Errors
    /// [`AnalyserError::InvalidParameter`] if the padded length does not fit in `usize`.
    pub fn power_spectrum(
        &self,
        normalise: bool,
        scale: SpectrumScale,
        padding: u32,
    ) -> AppResult<Spectrum> {
        let ns = self.ns();
        let nfft = if padding > 0 && ns > 0 {
            ns.checked_next_power_of_two()
                .and_then(|n| n.trailing_zeros().checked_add(padding - 1))
                .and_then(|exponent| 1usize.checked_shl(exponent))
                .ok_or_else(|| {
                    AnalyserError::InvalidParameter(format!(
                        "zero-padding {padding} overflows the FFT length for {ns} samples"
                    ))
                })?
        } else {
            ns
        };
        if nfft == 0 {
            return Ok(Spectrum {
                nfft,
                frequencies: Vec::new(),
                channels: vec![Vec::new(); self.channels],
            });
        }
        let bins = nfft.div_ceil(2);
        let frequencies = (0..bins)
            .map(|k| k as f64 / nfft as f64 * self.fs())
            .collect();

        let fft = FftPlanner::<f64>::new().plan_fft_forward(nfft);
        let channels = (0..self.channels)
            .map(|c| {
                let mut buffer: Vec<Complex<f64>> = self
                    .samples
                    .iter()
                    .skip(c)
                    .step_by(self.channels)
                    .map(|&v| Complex::new(f64::from(v), 0.0))
                    .collect();
                buffer.resize(nfft, Complex::new(0.0, 0.0));
                fft.process(&mut buffer);

                let mut power: Vec<f64> = buffer[..bins].iter().map(|z| z.norm()).collect();
                if normalise {
                    let max = power.iter().copied().fold(0.0_f64, f64::max);
                    if max > 0.0 {
                        power.iter_mut().for_each(|p| *p /= max);
                    }
                }
                if scale == SpectrumScale::Decibel {
                    power.iter_mut().for_each(|p| *p = 20.0 * p.log10());
                }
                power
            })
            .collect();

        debug!(nfft, bins, channels = self.channels, "Power spectrum computed");
        Ok(Spectrum {
            nfft,
            frequencies,
            channels,
        })
    }

    /// Serialize to the waveform file layout.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(4 + WAVEFORM_HEADER.len() + 28 + self.samples.len() * 4);
        buf.put_i32(WAVEFORM_HEADER.len() as i32);
        buf.put_slice(WAVEFORM_HEADER.as_bytes());
        buf.put_u32(self.channels as u32);
        buf.put_f64(self.t0);
        buf.put_f64(self.dt);
        buf.put_f64(self.dt_reserved);
        for &v in &self.samples {
            buf.put_f32(v);
        }
        buf.freeze()
    }

    /// Parse a waveform file image. Any header string is accepted.
    pub fn decode(data: &[u8]) -> AppResult<Self> {
        let mut buf = data;
        let header = take_string(&mut buf, "header")?;
        if buf.remaining() < 28 {
            return Err(AnalyserError::CorruptFile(format!(
                "waveform {header:?} ends inside its time axis"
            )));
        }
        let channels = buf.get_u32() as usize;
        let t0 = buf.get_f64();
        let dt = buf.get_f64();
        let dt_reserved = buf.get_f64();

        if channels == 0 || buf.remaining() % (4 * channels) != 0 {
            return Err(AnalyserError::CorruptFile(format!(
                "{} sample bytes do not fill rows of {channels} channels",
                buf.remaining()
            )));
        }
        let mut samples = Vec::with_capacity(buf.remaining() / 4);
        while buf.has_remaining() {
            samples.push(buf.get_f32());
        }

        Ok(Self {
            channels,
            samples,
            t0,
            dt,
            dt_reserved,
        })
    }

    /// Save; fails with [`AnalyserError::FileExists`] rather than overwrite.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        write_new(path, &self.encode())?;
        info!(path = %path.display(), ns = self.ns(), channels = self.channels, "Waveform saved");
        Ok(())
    }

    /// Load a waveform file.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        Self::decode(&std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn sine(freq: f64, fs: f64, ns: usize) -> Vec<f32> {
        (0..ns)
            .map(|k| (2.0 * PI * freq * k as f64 / fs).sin() as f32)
            .collect()
    }

    #[test]
    fn channels_are_interleaved() {
        let wfm = Waveform::from_channels(&[vec![1.0, 2.0, 3.0], vec![-1.0, -2.0, -3.0]], 0.5, 1.0)
            .unwrap();
        assert_eq!(wfm.ns(), 3);
        assert_eq!(wfm.samples(), &[1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        assert_eq!(wfm.channel(1), Some(vec![-1.0, -2.0, -3.0]));
        assert_eq!(wfm.channel(2), None);
        assert_eq!(wfm.times(), vec![1.0, 1.5, 2.0]);
        assert_eq!(wfm.fs(), 2.0);
    }

    #[test]
    fn rejects_ragged_input() {
        assert!(Waveform::new(2, vec![1.0, 2.0, 3.0], 1.0, 0.0).is_err());
        assert!(Waveform::new(1, vec![1.0], 0.0, 0.0).is_err());
    }

    #[test]
    fn decode_inverts_encode() {
        let wfm = Waveform::new(2, vec![0.5, 1.5, -2.0, 8.25], 1e-8, -1e-6).unwrap();
        assert_eq!(Waveform::decode(&wfm.encode()).unwrap(), wfm);
    }

    #[test]
    fn truncated_file_is_corrupt() {
        let wfm = Waveform::new(2, vec![0.5, 1.5, -2.0, 8.25], 1e-8, 0.0).unwrap();
        let bytes = wfm.encode();
        assert!(matches!(
            Waveform::decode(&bytes[..bytes.len() - 2]),
            Err(AnalyserError::CorruptFile(_))
        ));
    }

    #[test]
    fn spectrum_peaks_at_tone() {
        let fs = 1024.0;
        let wfm = Waveform::new(1, sine(64.0, fs, 1024), 1.0 / fs, 0.0).unwrap();
        let spectrum = wfm.power_spectrum(true, SpectrumScale::Linear, 0).unwrap();
        assert_eq!(spectrum.nfft, 1024);
        assert_eq!(spectrum.frequencies.len(), 512);

        let power = &spectrum.channels[0];
        let peak = power
            .iter()
            .enumerate()
            .fold((0, 0.0), |best, (k, &p)| if p > best.1 { (k, p) } else { best });
        assert_eq!(spectrum.frequencies[peak.0], 64.0);
        assert!((peak.1 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn padding_rounds_up_to_power_of_two() {
        let wfm = Waveform::new(1, sine(10.0, 100.0, 100), 0.01, 0.0).unwrap();
        assert_eq!(wfm.power_spectrum(false, SpectrumScale::Linear, 1).unwrap().nfft, 128);
        assert_eq!(wfm.power_spectrum(false, SpectrumScale::Linear, 3).unwrap().nfft, 512);
        let db = wfm.power_spectrum(true, SpectrumScale::Decibel, 0).unwrap();
        assert!(db.channels[0].iter().all(|&p| p <= 1e-12));
    }

    #[test]
    fn oversized_padding_is_rejected() {
        let wfm = Waveform::new(1, sine(10.0, 100.0, 100), 0.01, 0.0).unwrap();
        for padding in [64, 1000, u32::MAX] {
            assert!(matches!(
                wfm.power_spectrum(false, SpectrumScale::Linear, padding),
                Err(AnalyserError::InvalidParameter(_))
            ));
        }
    }
}
