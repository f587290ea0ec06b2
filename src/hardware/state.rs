//! Configuration snapshot of a connected analyser.
//!
//! Every field holds the value the device *confirmed*, never the value that was
//! requested. The session only writes a field after the matching confirmation
//! line parsed cleanly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Output data format reported by the `I` query and set with `Cformat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(into = "String", from = "String")]
pub enum DataFormat {
    /// `polZ`: impedance magnitude and phase.
    #[default]
    PolarImpedance,
    /// `recZ`: impedance real and imaginary parts.
    RectangularImpedance,
    /// `polS`: reflection/transmission coefficient magnitude and phase.
    PolarScattering,
    /// Any other format name the device reports.
    Other(String),
}

impl DataFormat {
    /// Name used on the wire.
    pub fn as_str(&self) -> &str {
        match self {
            DataFormat::PolarImpedance => "polZ",
            DataFormat::RectangularImpedance => "recZ",
            DataFormat::PolarScattering => "polS",
            DataFormat::Other(name) => name,
        }
    }
}

impl From<&str> for DataFormat {
    fn from(name: &str) -> Self {
        match name.trim() {
            "polZ" => DataFormat::PolarImpedance,
            "recZ" => DataFormat::RectangularImpedance,
            "polS" => DataFormat::PolarScattering,
            other => DataFormat::Other(other.to_string()),
        }
    }
}

impl From<String> for DataFormat {
    fn from(name: String) -> Self {
        DataFormat::from(name.as_str())
    }
}

impl From<DataFormat> for String {
    fn from(format: DataFormat) -> Self {
        format.as_str().to_string()
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Measurement mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// S11, one-port reflection.
    #[default]
    Reflection,
    /// S21, two-port transmission.
    Transmission,
}

impl Mode {
    /// Name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Reflection => "S11",
            Mode::Transmission => "S21",
        }
    }

    /// Parse the device's confirmation text.
    pub fn from_device(text: &str) -> Option<Self> {
        match text.trim().to_ascii_uppercase().as_str() {
            "S11" => Some(Mode::Reflection),
            "S21" => Some(Mode::Transmission),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Supported serial line speeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum BaudRate {
    /// 9600 baud.
    B9600,
    /// 115200 baud, the power-on default.
    #[default]
    B115200,
}

impl BaudRate {
    /// Bits per second.
    pub fn bps(self) -> u32 {
        match self {
            BaudRate::B9600 => 9600,
            BaudRate::B115200 => 115_200,
        }
    }

    /// Nearest supported rate: anything above 10 kbaud selects 115200.
    pub fn nearest(bps: u32) -> Self {
        if bps > 10_000 {
            BaudRate::B115200
        } else {
            BaudRate::B9600
        }
    }
}

impl TryFrom<u32> for BaudRate {
    type Error = String;

    fn try_from(bps: u32) -> Result<Self, Self::Error> {
        match bps {
            9600 => Ok(BaudRate::B9600),
            115_200 => Ok(BaudRate::B115200),
            other => Err(format!("unsupported baud rate {other}")),
        }
    }
}

impl From<BaudRate> for u32 {
    fn from(rate: BaudRate) -> Self {
        rate.bps()
    }
}

/// Device-confirmed configuration of one analyser.
///
/// A freshly created snapshot holds zeros and defaults; a successful
/// connection replaces every field through the default configuration sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct InstrumentState {
    /// Sweep start frequency in Hz.
    pub fmin: f64,
    /// Sweep stop frequency in Hz.
    pub fmax: f64,
    /// Number of sweep points.
    pub points: u32,
    /// Averaging factor.
    pub averaging: u32,
    /// Reference impedance in Ohm.
    pub z0: f64,
    /// Output level in percent.
    pub output: f64,
    /// Output data format.
    pub format: DataFormat,
    /// Measurement mode.
    pub mode: Mode,
    /// Serial line speed.
    pub baud_rate: BaudRate,
}

impl InstrumentState {
    /// Frequency step between sweep points, 0 for single-point sweeps.
    pub fn frequency_step(&self) -> f64 {
        if self.points > 1 {
            (self.fmax - self.fmin) / f64::from(self.points - 1)
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_names_round_trip() {
        for format in [
            DataFormat::PolarImpedance,
            DataFormat::RectangularImpedance,
            DataFormat::PolarScattering,
        ] {
            assert_eq!(DataFormat::from(format.as_str()), format);
        }
        assert_eq!(
            DataFormat::from("linZ"),
            DataFormat::Other("linZ".to_string())
        );
    }

    #[test]
    fn mode_from_device_text() {
        assert_eq!(Mode::from_device("S11"), Some(Mode::Reflection));
        assert_eq!(Mode::from_device(" s21 "), Some(Mode::Transmission));
        assert_eq!(Mode::from_device("S22"), None);
    }

    #[test]
    fn baud_rate_selection() {
        assert_eq!(BaudRate::nearest(57_600), BaudRate::B115200);
        assert_eq!(BaudRate::nearest(4800), BaudRate::B9600);
        assert!(BaudRate::try_from(19_200).is_err());
        assert_eq!(BaudRate::try_from(9600), Ok(BaudRate::B9600));
    }

    #[test]
    fn frequency_step() {
        let state = InstrumentState {
            fmin: 1e6,
            fmax: 11e6,
            points: 11,
            ..Default::default()
        };
        assert_eq!(state.frequency_step(), 1e6);
        let single = InstrumentState {
            points: 1,
            ..state
        };
        assert_eq!(single.frequency_step(), 0.0);
    }
}
