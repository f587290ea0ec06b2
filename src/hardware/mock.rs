//! Simulated TE300x
//!
//! Protocol-level stand-in for the analyser, plugged into a [`MockTransport`] so the
//! session and the acquisition engine can be exercised without hardware.
//!
//! The simulator keeps its own settings and clamps and rounds requested values the
//! way the instrument does, so echo-and-adopt is observable. Sweeps are answered
//! from a series RLC model. One-shot [`Fault`]s reproduce the broken responses the
//! driver has to survive.
//!
//! # Example
//!
//! ```
//! use te300x_daq::config::SweepDefaults;
//! use te300x_daq::hardware::mock::SimulatedAnalyser;
//! use te300x_daq::hardware::te300x::Te300x;
//!
//! let device = SimulatedAnalyser::new();
//! let mut session = Te300x::with_transport("sim", device.transport(), &SweepDefaults::default())?;
//! let sweep = session.acquire_sweep()?;
//! assert_eq!(sweep.points, device.expected_trace());
//! # Ok::<(), te300x_daq::error::AnalyserError>(())
//! ```

use crate::adapters::MockTransport;
use crate::hardware::sweep::TracePoint;
use num_complex::Complex;
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Header line sent before sweep data.
pub const SWEEP_HEADER: &str = "Freq(Hz),|Z|(Ohm),arg(Z)(deg)";

/// One-shot misbehaviour, consumed by the first command it applies to.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Next confirmation omits the `=` separator.
    MissingSeparator,
    /// Next confirmation echoes an unexpected key.
    WrongKey,
    /// Next command gets no reply.
    Silent,
    /// Next sweep never sends the sentinel and streams `extra_lines` extra points.
    NoSentinel {
        /// Points sent beyond the configured count.
        extra_lines: usize,
    },
    /// Next sweep replaces data line `index` with text.
    CorruptPoint {
        /// Zero-based data line index.
        index: usize,
    },
    /// Next sweep sends the sentinel after `points` lines.
    EarlySentinel {
        /// Data lines sent before the sentinel.
        points: usize,
    },
    /// Next sweep starts without its header line.
    NoHeader,
}

impl Fault {
    fn applies_to_sweep(&self) -> bool {
        matches!(
            self,
            Fault::NoSentinel { .. }
                | Fault::CorruptPoint { .. }
                | Fault::EarlySentinel { .. }
                | Fault::NoHeader
        )
    }
}

/// Ranges the simulated instrument clamps settings to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceLimits {
    /// Lowest frequency in MHz.
    pub min_mhz: f64,
    /// Highest frequency in MHz.
    pub max_mhz: f64,
    /// Largest point count.
    pub max_points: u32,
    /// Largest averaging factor.
    pub max_averaging: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            min_mhz: 0.1,
            max_mhz: 100.0,
            max_points: 2000,
            max_averaging: 256,
        }
    }
}

/// Series RLC load the simulated instrument measures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesRlc {
    /// Resistance in Ohm.
    pub r: f64,
    /// Inductance in Henry.
    pub l: f64,
    /// Capacitance in Farad.
    pub c: f64,
}

impl Default for SeriesRlc {
    fn default() -> Self {
        // Resonates near 5 MHz.
        Self {
            r: 50.0,
            l: 10e-6,
            c: 100e-12,
        }
    }
}

impl SeriesRlc {
    /// Complex impedance at `frequency` Hz.
    pub fn impedance(&self, frequency: f64) -> Complex<f64> {
        let w = 2.0 * PI * frequency;
        Complex::new(self.r, w * self.l - 1.0 / (w * self.c))
    }

    /// Impedance as a trace point (magnitude, phase in degrees).
    pub fn point(&self, frequency: f64) -> TracePoint {
        let (magnitude, phase) = self.impedance(frequency).to_polar();
        TracePoint::new(frequency, magnitude, phase.to_degrees())
    }
}

struct Device {
    version: String,
    fmin_mhz: f64,
    fmax_mhz: f64,
    points: u32,
    averaging: u32,
    z0: f64,
    output: f64,
    format: String,
    mode: String,
    baud: u32,
    limits: DeviceLimits,
    model: SeriesRlc,
    faults: VecDeque<Fault>,
}

/// Cloneable handle to one simulated instrument.
#[derive(Clone)]
pub struct SimulatedAnalyser {
    device: Arc<Mutex<Device>>,
}

impl Default for SimulatedAnalyser {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAnalyser {
    /// Instrument in its power-on configuration.
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(Device {
                version: "TE3001 simulator v1.0".to_string(),
                fmin_mhz: 0.3,
                fmax_mhz: 20.0,
                points: 500,
                averaging: 16,
                z0: 50.0,
                output: 100.0,
                format: "polZ".to_string(),
                mode: "S11".to_string(),
                baud: 115_200,
                limits: DeviceLimits::default(),
                model: SeriesRlc::default(),
                faults: VecDeque::new(),
            })),
        }
    }

    /// Replace the clamping ranges.
    pub fn with_limits(self, limits: DeviceLimits) -> Self {
        self.device().limits = limits;
        self
    }

    /// Replace the measured load.
    pub fn with_model(self, model: SeriesRlc) -> Self {
        self.device().model = model;
        self
    }

    /// A transport wired to this instrument.
    pub fn transport(&self) -> MockTransport {
        let handle = self.clone();
        MockTransport::new(move |bytes| handle.respond(bytes))
    }

    /// Queue a one-shot fault.
    pub fn inject(&self, fault: Fault) {
        self.device().faults.push_back(fault);
    }

    /// Configured point count.
    pub fn points(&self) -> u32 {
        self.device().points
    }

    /// Line speed last confirmed.
    pub fn baud_rate(&self) -> u32 {
        self.device().baud
    }

    /// The trace a fault-free sweep with the current settings returns.
    pub fn expected_trace(&self) -> Vec<TracePoint> {
        let device = self.device();
        (0..device.points as usize)
            .map(|k| device.model.point(device.frequency(k)))
            .collect()
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, bytes: &[u8]) -> Vec<u8> {
        self.device().respond(bytes).into_bytes()
    }
}

impl Device {
    fn take_fault(&mut self, pred: impl Fn(&Fault) -> bool) -> Option<Fault> {
        let index = self.faults.iter().position(pred)?;
        self.faults.remove(index)
    }

    fn frequency(&self, k: usize) -> f64 {
        let fmin = self.fmin_mhz * 1e6;
        let fmax = self.fmax_mhz * 1e6;
        let step = if self.points > 1 {
            (fmax - fmin) / f64::from(self.points - 1)
        } else {
            0.0
        };
        fmin + step * k as f64
    }

    fn respond(&mut self, bytes: &[u8]) -> String {
        let text = String::from_utf8_lossy(bytes).into_owned();
        let mut chars = text.chars();
        let verb = chars.next();
        let args: Vec<&str> = chars.as_str().split('\r').filter(|a| !a.is_empty()).collect();

        if self.take_fault(|f| *f == Fault::Silent).is_some() {
            return String::new();
        }

        match (verb, args.as_slice()) {
            (Some('V'), []) => format!("{}\r", self.version),
            (Some('I'), []) => format!("{}\r", self.format),
            (Some('N'), []) => self.sweep(),
            (Some('S'), [mhz]) => match self.clamp_mhz(mhz) {
                Some(v) => {
                    self.fmin_mhz = v;
                    self.confirm("S", &format!("{v:.2}"))
                }
                None => error_line(),
            },
            (Some('E'), [mhz]) => match self.clamp_mhz(mhz) {
                Some(v) => {
                    self.fmax_mhz = v;
                    self.confirm("E", &format!("{v:.2}"))
                }
                None => error_line(),
            },
            (Some('P'), [n]) => match n.trim().parse::<u32>() {
                Ok(n) => {
                    self.points = n.clamp(1, self.limits.max_points);
                    let points = self.points.to_string();
                    self.confirm("P", &points)
                }
                Err(_) => error_line(),
            },
            (Some('F'), [mhz]) => match self.clamp_mhz(mhz) {
                Some(v) => {
                    let p = self.model.point(v * 1e6);
                    format!("{},{},{}\r", p.frequency, p.magnitude, p.phase)
                }
                None => error_line(),
            },
            (Some('C'), [name, value]) => self.configure(name, value),
            _ => error_line(),
        }
    }

    fn clamp_mhz(&self, text: &str) -> Option<f64> {
        let mhz: f64 = text.trim().parse().ok()?;
        let clamped = mhz.clamp(self.limits.min_mhz, self.limits.max_mhz);
        Some((clamped * 100.0).round() / 100.0)
    }

    fn confirm(&mut self, key: &str, value: &str) -> String {
        if self.take_fault(|f| *f == Fault::MissingSeparator).is_some() {
            return format!("{key} {value}\r");
        }
        if self.take_fault(|f| *f == Fault::WrongKey).is_some() {
            return format!("X{key}={value}\r");
        }
        format!("{key}={value}\r")
    }

    fn configure(&mut self, name: &str, value: &str) -> String {
        match name {
            "averaging" => match value.trim().parse::<u32>() {
                Ok(n) => {
                    self.averaging = n.clamp(1, self.limits.max_averaging);
                    let averaging = self.averaging.to_string();
                    self.confirm(name, &averaging)
                }
                Err(_) => error_line(),
            },
            "output" => match value.trim().parse::<f64>() {
                Ok(level) => {
                    self.output = level.clamp(0.0, 100.0).round();
                    let output = format!("{}%", self.output);
                    self.confirm(name, &output)
                }
                Err(_) => error_line(),
            },
            "zo" => match value.trim().parse::<f64>() {
                Ok(z0) if z0 > 0.0 => {
                    self.z0 = (z0 * 10.0).round() / 10.0;
                    let z0 = format!("{:.1}", self.z0);
                    self.confirm(name, &z0)
                }
                _ => error_line(),
            },
            "format" => {
                if matches!(value, "polZ" | "recZ" | "polS") {
                    self.format = value.to_string();
                }
                let format = self.format.clone();
                self.confirm(name, &format)
            }
            "mode" => {
                let mode = value.trim().to_ascii_uppercase();
                if mode == "S11" || mode == "S21" {
                    self.mode = mode;
                }
                let mode = self.mode.clone();
                self.confirm(name, &mode)
            }
            "baud" => match value.trim().parse::<u32>() {
                Ok(bps @ (9600 | 115_200)) => {
                    self.baud = bps;
                    format!("Baud rate {bps}\r")
                }
                _ => error_line(),
            },
            _ => error_line(),
        }
    }

    fn sweep(&mut self) -> String {
        let fault = self.take_fault(Fault::applies_to_sweep);
        let configured = self.points as usize;

        let mut out = String::new();
        if fault != Some(Fault::NoHeader) {
            out.push_str(SWEEP_HEADER);
            out.push('\r');
        }

        let lines = match fault {
            Some(Fault::NoSentinel { extra_lines }) => configured + extra_lines,
            Some(Fault::EarlySentinel { points }) => points.min(configured),
            _ => configured,
        };
        for k in 0..lines {
            if fault == Some(Fault::CorruptPoint { index: k }) {
                out.push_str("1e6,overload,0\r");
                continue;
            }
            let p = self.model.point(self.frequency(k));
            out.push_str(&format!("{},{},{}\r", p.frequency, p.magnitude, p.phase));
        }

        if !matches!(fault, Some(Fault::NoSentinel { .. })) {
            out.push_str("END\r");
        }
        out
    }
}

fn error_line() -> String {
    "ERR\r".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Transport;
    use crate::protocol::read_line;

    fn exchange(transport: &mut MockTransport, command: &[u8]) -> String {
        transport.write_all(command).unwrap();
        read_line(transport, 1000).unwrap()
    }

    #[test]
    fn clamps_and_rounds_settings() {
        let device = SimulatedAnalyser::new();
        let mut transport = device.transport();
        assert_eq!(exchange(&mut transport, b"E250.00\r"), "E=100.00");
        assert_eq!(exchange(&mut transport, b"P5000\r"), "P=2000");
        assert_eq!(exchange(&mut transport, b"Caveraging\r0\r"), "averaging=1");
        assert_eq!(exchange(&mut transport, b"Coutput\r75\r"), "output=75%");
        assert_eq!(exchange(&mut transport, b"Czo\r75.04\r"), "zo=75.0");
        assert_eq!(exchange(&mut transport, b"Cwhat\r1\r"), "ERR");
        assert_eq!(device.points(), 2000);
    }

    #[test]
    fn faults_are_one_shot() {
        let device = SimulatedAnalyser::new();
        let mut transport = device.transport();
        device.inject(Fault::MissingSeparator);
        assert_eq!(exchange(&mut transport, b"P10\r"), "P 10");
        assert_eq!(exchange(&mut transport, b"P10\r"), "P=10");
    }

    #[test]
    fn sweep_stream_shape() {
        let device = SimulatedAnalyser::new();
        let mut transport = device.transport();
        exchange(&mut transport, b"P3\r");
        transport.write_all(b"N").unwrap();
        assert_eq!(read_line(&mut transport, 1000).unwrap(), SWEEP_HEADER);
        for expected in device.expected_trace() {
            let line = read_line(&mut transport, 1000).unwrap();
            assert_eq!(TracePoint::parse(&line).unwrap(), expected);
        }
        assert_eq!(read_line(&mut transport, 1000).unwrap(), "END");
    }

    #[test]
    fn rlc_resonance_is_resistive() {
        let model = SeriesRlc::default();
        let f0 = 1.0 / (2.0 * PI * (model.l * model.c).sqrt());
        let p = model.point(f0);
        assert!((p.magnitude - model.r).abs() < 1e-6);
        assert!(p.phase.abs() < 1e-6);
    }
}
