//! Trewmac TE300x Network/Impedance Analyser Driver
//!
//! Protocol Overview:
//! - Format: ASCII command/response over RS-232
//! - Baud: 115200 (power-on default) or 9600, 8N1
//! - Terminator: CR (\r)
//! - Every setting is confirmed by one `key=value` line; the confirmed value is
//!   adopted, since the analyser clamps and rounds what it is sent
//! - Strict turn-taking: one command in flight, its confirmation consumed before the next
//!
//! # Example Usage
//!
//! ```no_run
//! use te300x_daq::hardware::te300x::Te300x;
//! use std::time::Duration;
//!
//! let mut analyser = Te300x::connect("/dev/ttyUSB0", Duration::from_secs(5))?;
//! analyser.set_frequency_range(1e6, 10e6, 201)?;
//! let sweep = analyser.acquire_sweep()?;
//! println!("{} points in {:?}", sweep.len(), sweep.elapsed);
//! analyser.close();
//! # Ok::<(), te300x_daq::error::AnalyserError>(())
//! ```

use crate::adapters::Transport;
use crate::config::SweepDefaults;
use crate::error::{AnalyserError, AppResult};
use crate::hardware::state::{BaudRate, DataFormat, InstrumentState, Mode};
use crate::hardware::sweep::{
    self, AcquisitionMode, CancelToken, SweepLimits, SweepObserver, SweepResult, TracePoint,
};
use crate::protocol::{self, link_error, parse_echo, read_line, Command};
use std::str::FromStr;
use tracing::{debug, info, warn};

#[cfg(feature = "instrument_serial")]
use crate::adapters::SerialTransport;
#[cfg(feature = "instrument_serial")]
use crate::config::AnalyserConfig;
#[cfg(feature = "instrument_serial")]
use std::time::Duration;

/// Session with one TE300x analyser.
///
/// Owns the transport exclusively. A session is `Connected` while it holds the
/// transport; [`close`](Self::close) or a link loss reported by the transport
/// makes it `Disconnected`, after which every call fails with
/// [`AnalyserError::NotConnected`].
pub struct Te300x<T: Transport> {
    port: String,
    link: Option<T>,
    state: InstrumentState,
    limits: SweepLimits,
}

#[cfg(feature = "instrument_serial")]
impl Te300x<SerialTransport> {
    /// Open a serial port and apply the default configuration sequence.
    ///
    /// # Errors
    /// [`AnalyserError::Connect`] if the port cannot be opened or any step of
    /// the configuration sequence fails; the port is closed again in that case.
    pub fn connect(port: &str, timeout: Duration) -> AppResult<Self> {
        let mut config = AnalyserConfig::default();
        config.connection.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        Self::connect_with(port, &config)
    }

    /// Open a serial port using line settings, limits and defaults from `config`.
    pub fn connect_with(port: &str, config: &AnalyserConfig) -> AppResult<Self> {
        let baud_rate = BaudRate::try_from(config.connection.baud_rate)
            .map_err(AnalyserError::InvalidParameter)?;
        let transport =
            SerialTransport::open(port, baud_rate.bps(), config.connection.timeout()).map_err(
                |e| AnalyserError::Connect {
                    port: port.to_string(),
                    source: Box::new(e),
                },
            )?;

        let mut session = Self::attach(port, transport, &config.sweep, config.connection.limits())?;
        session.state.baud_rate = baud_rate;
        Ok(session)
    }
}

impl<T: Transport> Te300x<T> {
    /// Start a session over an already open transport with default limits.
    pub fn with_transport(port: &str, transport: T, defaults: &SweepDefaults) -> AppResult<Self> {
        Self::attach(port, transport, defaults, SweepLimits::default())
    }

    /// Start a session over an already open transport.
    ///
    /// Applies the default configuration sequence (frequency range, averaging,
    /// z0, output, format, mode) in that order. Any failure drops the transport
    /// and returns [`AnalyserError::Connect`].
    pub fn attach(
        port: &str,
        transport: T,
        defaults: &SweepDefaults,
        limits: SweepLimits,
    ) -> AppResult<Self> {
        let mut session = Self {
            port: port.to_string(),
            link: Some(transport),
            state: InstrumentState::default(),
            limits,
        };

        info!(port, "Connecting to TE300x");
        if let Err(err) = session.apply_defaults(defaults) {
            session.close();
            return Err(AnalyserError::Connect {
                port: port.to_string(),
                source: Box::new(err),
            });
        }

        info!(
            port,
            fmin = session.state.fmin,
            fmax = session.state.fmax,
            points = session.state.points,
            "TE300x connected"
        );
        Ok(session)
    }

    fn apply_defaults(&mut self, defaults: &SweepDefaults) -> AppResult<()> {
        self.set_frequency_range(defaults.fmin_hz, defaults.fmax_hz, defaults.points)?;
        self.set_averaging(defaults.averaging)?;
        self.set_z0(defaults.z0_ohm)?;
        self.set_output(defaults.output_percent)?;
        self.set_format(defaults.format.clone())?;
        self.set_mode(defaults.mode.clone())?;
        Ok(())
    }

    /// Port identifier the session was opened with.
    pub fn port(&self) -> &str {
        &self.port
    }

    /// Device-confirmed configuration.
    pub fn state(&self) -> &InstrumentState {
        &self.state
    }

    /// Whether the session still owns a usable transport.
    pub fn is_connected(&self) -> bool {
        self.link.is_some()
    }

    /// Line and block size limits in use.
    pub fn limits(&self) -> SweepLimits {
        self.limits
    }

    /// Change the line and block size limits.
    pub fn set_limits(&mut self, limits: SweepLimits) {
        self.limits = limits;
    }

    /// Set the sweep range and point count.
    ///
    /// Sends `S`, `E` and `P` in turn. The device's echoed values are adopted
    /// together once all three confirmations parsed; any failure leaves the
    /// state untouched.
    pub fn set_frequency_range(&mut self, fmin: f64, fmax: f64, points: u32) -> AppResult<()> {
        if !(fmin.is_finite() && fmax.is_finite()) || fmin <= 0.0 || fmin >= fmax {
            return Err(AnalyserError::InvalidParameter(format!(
                "frequency range {fmin}..{fmax} Hz"
            )));
        }
        if points == 0 {
            return Err(AnalyserError::InvalidParameter(
                "point count must be at least 1".to_string(),
            ));
        }

        let start = self.confirm(&Command::StartFrequency(fmin), "S")?;
        let start = mhz_to_hz(parse_number(&start, "start frequency in MHz")?);

        let stop = self.confirm(&Command::StopFrequency(fmax), "E")?;
        let stop = mhz_to_hz(parse_number(&stop, "stop frequency in MHz")?);

        let count = self.confirm(&Command::Points(points), "P")?;
        let count = parse_number(&count, "integer point count")?;

        self.state.fmin = start;
        self.state.fmax = stop;
        self.state.points = count;

        if self.state.fmin >= self.state.fmax {
            warn!(
                fmin = self.state.fmin,
                fmax = self.state.fmax,
                "Device confirmed an empty frequency range"
            );
        }
        Ok(())
    }

    /// Set the averaging factor (`Caveraging`).
    pub fn set_averaging(&mut self, averaging: u32) -> AppResult<()> {
        if averaging == 0 {
            return Err(AnalyserError::InvalidParameter(
                "averaging must be at least 1".to_string(),
            ));
        }
        let value = self.configure("averaging", &averaging.to_string())?;
        self.state.averaging = parse_number(&value, "integer averaging factor")?;
        Ok(())
    }

    /// Set the output level in percent (`Coutput`, confirmed as `output=<n>%`).
    pub fn set_output(&mut self, percent: f64) -> AppResult<()> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(AnalyserError::InvalidParameter(format!(
                "output level {percent}%"
            )));
        }
        let value = self.configure("output", &format!("{percent:.0}"))?;
        let level = value.trim_end_matches('%').trim();
        self.state.output = parse_number(level, "output level in percent")?;
        Ok(())
    }

    /// Set the reference impedance in Ohm (`Czo`).
    pub fn set_z0(&mut self, z0: f64) -> AppResult<()> {
        if !z0.is_finite() || z0 <= 0.0 {
            return Err(AnalyserError::InvalidParameter(format!(
                "reference impedance {z0} Ohm"
            )));
        }
        let value = self.configure("zo", &format!("{z0:.1}"))?;
        self.state.z0 = parse_number(&value, "reference impedance in Ohm")?;
        Ok(())
    }

    /// Select reflection (S11) or transmission (S21).
    pub fn set_mode(&mut self, mode: Mode) -> AppResult<()> {
        let value = self.configure("mode", mode.as_str())?;
        self.state.mode =
            Mode::from_device(&value).ok_or_else(|| AnalyserError::malformed("S11 or S21", value))?;
        Ok(())
    }

    /// Select the output data format.
    pub fn set_format(&mut self, format: DataFormat) -> AppResult<()> {
        let value = self.configure("format", format.as_str())?;
        if value.is_empty() {
            return Err(AnalyserError::malformed("data format name", value));
        }
        self.state.format = DataFormat::from(value);
        Ok(())
    }

    /// Change the line speed on both ends.
    ///
    /// The confirmation is read at the old speed; the local port switches afterwards.
    pub fn set_baudrate(&mut self, rate: BaudRate) -> AppResult<()> {
        let bps = rate.bps().to_string();
        let command = Command::Configure {
            name: "baud",
            value: &bps,
        };
        let response = self.query(&command)?;
        let confirmed = parse_baud_confirmation(&response)?;

        let link = self.link()?;
        let switched = link.set_baud_rate(confirmed.bps()).map_err(link_error);
        self.guard(switched)?;

        self.state.baud_rate = confirmed;
        info!(baud = confirmed.bps(), "Line speed changed");
        Ok(())
    }

    /// Change the line speed to the supported rate nearest `bps`.
    ///
    /// Anything above 10 kbaud selects 115200, everything else 9600.
    pub fn set_baudrate_nearest(&mut self, bps: u32) -> AppResult<()> {
        self.set_baudrate(BaudRate::nearest(bps))
    }

    /// Firmware version string (`V`).
    pub fn read_version(&mut self) -> AppResult<String> {
        Ok(self.query(&Command::Version)?.trim().to_string())
    }

    /// Output data format as reported by the device (`I`). Does not touch the state.
    pub fn read_format(&mut self) -> AppResult<String> {
        Ok(self.query(&Command::FormatQuery)?.trim().to_string())
    }

    /// Measure at a single frequency (`F`).
    pub fn read_single(&mut self, frequency: f64) -> AppResult<TracePoint> {
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(AnalyserError::InvalidParameter(format!(
                "frequency {frequency} Hz"
            )));
        }
        let line = self.query(&Command::Single(frequency))?;
        TracePoint::parse(&line)
    }

    /// Run one sweep and read it as a block.
    pub fn acquire_sweep(&mut self) -> AppResult<SweepResult> {
        let requested = self.requested_points();
        let limits = self.limits;
        let link = self.link()?;
        let result = sweep::acquire_bulk(link, requested, &limits);
        self.guard(result)
    }

    /// Run one sweep point by point, reporting each point to `observer`.
    ///
    /// Cancellation through `cancel` is checked before every line read.
    pub fn acquire_sweep_incremental<O>(
        &mut self,
        observer: &mut O,
        cancel: &CancelToken,
    ) -> AppResult<SweepResult>
    where
        O: SweepObserver + ?Sized,
    {
        let requested = self.requested_points();
        let limits = self.limits;
        let link = self.link()?;
        let result = sweep::acquire_incremental(link, requested, &limits, observer, cancel);
        self.guard(result)
    }

    /// Run one sweep with the given strategy. Bulk mode ignores `observer` and `cancel`.
    pub fn acquire<O>(
        &mut self,
        mode: AcquisitionMode,
        observer: &mut O,
        cancel: &CancelToken,
    ) -> AppResult<SweepResult>
    where
        O: SweepObserver + ?Sized,
    {
        match mode {
            AcquisitionMode::Bulk => self.acquire_sweep(),
            AcquisitionMode::Incremental => self.acquire_sweep_incremental(observer, cancel),
        }
    }

    /// Release the transport. Calling it again is a no-op.
    pub fn close(&mut self) {
        if self.link.take().is_some() {
            info!(port = %self.port, "TE300x session closed");
        }
    }

    fn requested_points(&self) -> usize {
        usize::try_from(self.state.points).unwrap_or(usize::MAX)
    }

    fn link(&mut self) -> AppResult<&mut T> {
        self.link.as_mut().ok_or(AnalyserError::NotConnected)
    }

    /// Drop the transport if `result` reports a lost link.
    fn guard<R>(&mut self, result: AppResult<R>) -> AppResult<R> {
        if let Err(err) = &result {
            if matches!(err.root(), AnalyserError::Disconnected(_)) {
                warn!(port = %self.port, error = %err, "Link lost, session disconnected");
                self.link = None;
            }
        }
        result
    }

    /// Send one command and read its single response line.
    ///
    /// Input left over from an earlier failed exchange is dropped first, so a
    /// late reply or the tail of a truncated line is never taken as this
    /// command's response.
    fn query(&mut self, command: &Command<'_>) -> AppResult<String> {
        let max_len = self.limits.max_line_len;
        let link = self.link()?;
        let result = link
            .clear_input()
            .map_err(link_error)
            .and_then(|()| protocol::send(link, command))
            .and_then(|()| read_line(link, max_len));
        let response = self.guard(result)?;
        debug!(?command, response = %response, "Exchange complete");
        Ok(response)
    }

    /// Send a setting and return the value part of its `key=value` confirmation.
    fn confirm(&mut self, command: &Command<'_>, key: &str) -> AppResult<String> {
        let response = self.query(command)?;
        let (echoed, value) = parse_echo(&response)?;
        if !echoed.eq_ignore_ascii_case(key) {
            warn!(expected = key, echoed, "Confirmation key mismatch");
        }
        Ok(value.to_string())
    }

    fn configure(&mut self, name: &str, value: &str) -> AppResult<String> {
        self.confirm(&Command::Configure { name, value }, name)
    }
}

impl<T: Transport> Drop for Te300x<T> {
    fn drop(&mut self) {
        self.close();
    }
}

fn mhz_to_hz(mhz: f64) -> f64 {
    (mhz * 1e6).round()
}

fn parse_number<N: FromStr>(value: &str, expected: &str) -> AppResult<N> {
    value
        .trim()
        .parse()
        .map_err(|_| AnalyserError::malformed(expected, value))
}

/// Accepts `baud=<rate>` or free text whose third word is the rate.
fn parse_baud_confirmation(response: &str) -> AppResult<BaudRate> {
    let token = match response.split_once('=') {
        Some((_, value)) => Some(value.trim()),
        None => response.split_whitespace().nth(2),
    };
    token
        .and_then(|t| t.parse::<u32>().ok())
        .and_then(|bps| BaudRate::try_from(bps).ok())
        .ok_or_else(|| AnalyserError::malformed("baud rate confirmation", response))
}
