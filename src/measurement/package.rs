use std::fmt;
use std::ops::Sub;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

use crate::ProductId;

/// A numeric value read from the wavemeter.
///
/// Finite values are held as exact decimals. The driver can also produce
/// non-finite doubles, which are kept as explicit variants so they can be
/// encoded with SCPI sentinel values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reading {
    Finite(Decimal),
    NaN,
    Infinity,
    NegInfinity,
}

impl Reading {
    /// The decimal value, if finite.
    pub fn value(&self) -> Option<Decimal> {
        match self {
            Reading::Finite(value) => Some(*value),
            _ => None,
        }
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Reading::Finite(_))
    }

    fn infinite(positive: bool) -> Self {
        if positive {
            Reading::Infinity
        } else {
            Reading::NegInfinity
        }
    }
}

impl From<f64> for Reading {
    fn from(value: f64) -> Self {
        if value.is_nan() {
            return Reading::NaN;
        }
        if value.is_infinite() {
            return Reading::infinite(value > 0.0);
        }
        // Doubles beyond the decimal range saturate.
        Decimal::from_f64(value)
            .map(Reading::Finite)
            .unwrap_or_else(|| Reading::infinite(value > 0.0))
    }
}

impl From<Decimal> for Reading {
    fn from(value: Decimal) -> Self {
        Reading::Finite(value)
    }
}

impl From<i32> for Reading {
    fn from(value: i32) -> Self {
        Reading::Finite(Decimal::from(value))
    }
}

impl Sub for Reading {
    type Output = Reading;

    /// IEEE-754 style subtraction.
    fn sub(self, rhs: Reading) -> Reading {
        use Reading::*;
        match (self, rhs) {
            (Finite(a), Finite(b)) => a
                .checked_sub(b)
                .map(Finite)
                .unwrap_or_else(|| Reading::infinite(a > b)),
            (NaN, _) | (_, NaN) => NaN,
            (Infinity, Infinity) | (NegInfinity, NegInfinity) => NaN,
            (Infinity, _) | (_, NegInfinity) => Infinity,
            (NegInfinity, _) | (_, Infinity) => NegInfinity,
        }
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Finite(value) => write!(f, "{}", value.normalize()),
            Reading::NaN => f.write_str("NaN"),
            Reading::Infinity => f.write_str("inf"),
            Reading::NegInfinity => f.write_str("-inf"),
        }
    }
}

/// The five values handed to the driver callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawEvent {
    /// Wavemeter product id (`Ver`).
    pub product_id: ProductId,
    /// `cmi*` mode code.
    pub mode: i32,
    /// Integer payload; a timestamp in ms for most measurement modes.
    pub int_val: i32,
    /// Double payload; the measured value for most measurement modes.
    pub double_val: f64,
    /// Extra result field, only meaningful for a few modes.
    pub result: i32,
}

/// Which timestamped scalar a [`Measurement::Scalar`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Quantity {
    /// Internal temperature in °C.
    Temperature,
    /// Ambient air pressure in Pa.
    Pressure,
    /// Driver clock, `cmiNowTick_d`.
    TimeTick,
    /// Distance measurement (interferometer models).
    Distance,
    /// Linewidth in nm.
    Linewidth,
    AnalogIn,
    AnalogOut,
    ExternalInput,
    DeviationSensitivityFactor,
}

/// PID regulation parameters reported by laser-control versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PidParameter {
    P,
    I,
    D,
    T,
    Dt,
}

impl PidParameter {
    pub fn name(&self) -> &'static str {
        match self {
            PidParameter::P => "P",
            PidParameter::I => "I",
            PidParameter::D => "D",
            PidParameter::T => "T",
            PidParameter::Dt => "dt",
        }
    }
}

/// Integer state indicators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateKind {
    ResultMode,
    Range,
    PulseMode,
    WideMode,
    FastMode,
    ExposureMode,
    Reduced,
    Link,
    Operation,
    DisplayMode,
    AnalysisMode,
    SwitcherMode,
    PidCourse,
    DeviationSensitivityDim,
}

/// Statistic of the interference pattern on a CCD array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternStatistic {
    Minimum,
    Maximum,
    Average,
    Exposure,
}

/// Wavemeter server lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerEvent {
    DllAttach,
    DllDetach,
    Initialized,
}

/// Kind-specific content of a [`DataPackage`].
///
/// Channel and CCD array indices are 1-based.
#[derive(Debug, Clone, PartialEq)]
pub enum Measurement {
    Wavelength {
        channel: u32,
        timestamp: i32,
        value: Reading,
    },
    Power {
        channel: u32,
        value: Reading,
    },
    Scalar {
        quantity: Quantity,
        timestamp: i32,
        value: Reading,
    },
    Pid {
        parameter: PidParameter,
        timestamp: i32,
        value: Reading,
    },
    State {
        kind: StateKind,
        value: i32,
    },
    SwitcherChannel {
        channel: u32,
    },
    Pattern {
        statistic: PatternStatistic,
        channel: u32,
        ccd_array: u32,
        value: i32,
    },
    Server(ServerEvent),
}

/// Immutable record produced from one driver callback.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPackage {
    pub product_id: ProductId,
    pub mode: i32,
    pub measurement: Measurement,
}

impl fmt::Display for DataPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.measurement {
            Measurement::Wavelength {
                channel,
                timestamp,
                value,
            } => write!(
                f,
                "Wavelength {value} nm | timestamp {timestamp} | channel {channel}"
            )?,
            Measurement::Power { channel, value } => {
                write!(f, "Power {value} µW | channel {channel}")?
            }
            Measurement::Scalar {
                quantity,
                timestamp,
                value,
            } => write!(f, "{quantity:?} {value} | timestamp {timestamp}")?,
            Measurement::Pid {
                parameter,
                timestamp,
                value,
            } => write!(
                f,
                "PID {} {value} | timestamp {timestamp}",
                parameter.name()
            )?,
            Measurement::State { kind, value } => write!(f, "{kind:?} = {value}")?,
            Measurement::SwitcherChannel { channel } => {
                write!(f, "Active switcher channel {channel}")?
            }
            Measurement::Pattern {
                statistic,
                channel,
                ccd_array,
                value,
            } => write!(
                f,
                "Pattern {statistic:?} {value} | channel {channel} | ccd {ccd_array}"
            )?,
            Measurement::Server(event) => write!(f, "Server {event:?}")?,
        }
        write!(f, " | wavemeter {}", self.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_reading_from_non_finite_doubles() {
        assert_eq!(Reading::from(f64::NAN), Reading::NaN);
        assert_eq!(Reading::from(f64::INFINITY), Reading::Infinity);
        assert_eq!(Reading::from(f64::NEG_INFINITY), Reading::NegInfinity);
        assert_eq!(Reading::from(1.0e300), Reading::Infinity);
        assert_eq!(Reading::from(-1.0e300), Reading::NegInfinity);
    }

    #[test]
    fn test_reading_from_finite_double() {
        let reading = Reading::from(532.25);
        assert_eq!(reading.value(), Some(Decimal::from_str("532.25").unwrap()));
        assert_eq!(reading.to_string(), "532.25");
    }

    #[test]
    fn test_reading_subtraction() {
        let a = Reading::from(Decimal::from_str("780.5").unwrap());
        let b = Reading::from(Decimal::from_str("780.25").unwrap());
        assert_eq!((a - b).to_string(), "0.25");
        assert_eq!(Reading::Infinity - a, Reading::Infinity);
        assert_eq!(a - Reading::Infinity, Reading::NegInfinity);
        assert_eq!(Reading::Infinity - Reading::Infinity, Reading::NaN);
        assert_eq!(a - Reading::NaN, Reading::NaN);
    }
}
