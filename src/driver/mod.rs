//! Access to the wlmData driver.
//!
//! The vendor library is a single, globally stateful instance: every call acts
//! on whichever wavemeter was last selected with [`WavemeterDriver::select`],
//! and asynchronous results arrive through one process-wide callback. The
//! [`WavemeterDriver`] trait mirrors that shape directly; serializing access
//! and re-selecting the right wavemeter is the job of
//! [`DriverHub`](crate::session::DriverHub).
//!
//! Two implementations exist:
//!
//! - [`SimulatedDriver`]: in-process model used by tests and `--simulate`.
//! - `WlmDriver` (feature `wlm-sdk`): FFI calls into the installed library.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::measurement::{RawEvent, Reading};
use crate::ProductId;

pub mod simulated;
#[cfg(feature = "wlm-sdk")]
pub mod wlm;

pub use simulated::{DriverCall, JournalEntry, SimulatedDriver, SimulatedWavemeter};
#[cfg(feature = "wlm-sdk")]
pub use wlm::WlmDriver;

/// Receives every raw event delivered by the driver callback.
///
/// Invoked on a thread owned by the driver; must not block.
pub type EventSink = Arc<dyn Fn(RawEvent) + Send + Sync>;

/// Error values returned by wlmData functions.
///
/// Measurement getters and `Set*` functions use two different numbering
/// schemes; both are folded into this enum.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    #[error("No value measured")]
    NoValue,
    #[error("No signal detected")]
    NoSignal,
    #[error("Bad signal, no calculable pattern")]
    BadSignal,
    #[error("Signal too small, underexposed")]
    LowSignal,
    #[error("Signal too large, overexposed")]
    BigSignal,
    #[error("Wavemeter server not running")]
    WlmMissing,
    #[error("Function not available on this wavemeter")]
    NotAvailable,
    #[error("No pulse detected")]
    NoPulse,
    #[error("Channel not available")]
    ChannelNotAvailable,
    #[error("Division by zero")]
    Div0,
    #[error("Value out of measurement range")]
    OutOfRange,
    #[error("Unit not available")]
    UnitNotAvailable,
    #[error("TCP connection to the wavemeter server failed")]
    TcpError,
    #[error("Parameter out of range")]
    ParameterOutOfRange,
    #[error("Value could not be set")]
    CouldNotSet,
    #[error("Wavemeter server out of resources")]
    OutOfResources,
    #[error("Wavemeter server internal error")]
    InternalError,
    #[error("Wavemeter server busy")]
    Busy,
    #[error("Not in measurement mode")]
    NotInMeasurementMode,
    #[error("Only allowed in measurement mode")]
    OnlyInMeasurementMode,
    #[error("Channel temporarily not available")]
    ChannelTemporarilyNotAvailable,
    #[error("Unknown driver error code {0}")]
    Unknown(i32),
}

impl DriverError {
    /// Map an `Err*` code returned by a measurement getter.
    pub fn from_error_code(code: i32) -> Self {
        match code {
            0 => DriverError::NoValue,
            -1 => DriverError::NoSignal,
            -2 => DriverError::BadSignal,
            -3 => DriverError::LowSignal,
            -4 => DriverError::BigSignal,
            -5 => DriverError::WlmMissing,
            -6 => DriverError::NotAvailable,
            -8 => DriverError::NoPulse,
            -10 => DriverError::ChannelNotAvailable,
            -13 => DriverError::Div0,
            -14 => DriverError::OutOfRange,
            -15 => DriverError::UnitNotAvailable,
            -26 => DriverError::TcpError,
            -28 => DriverError::ParameterOutOfRange,
            other => DriverError::Unknown(other),
        }
    }

    /// Map a `ResERR_*` code returned by a `Set*` function.
    pub fn from_result_code(code: i32) -> Self {
        match code {
            -1 => DriverError::WlmMissing,
            -2 => DriverError::CouldNotSet,
            -3 => DriverError::ParameterOutOfRange,
            -4 => DriverError::OutOfResources,
            -5 => DriverError::InternalError,
            -6 => DriverError::NotAvailable,
            -7 => DriverError::Busy,
            -8 => DriverError::NotInMeasurementMode,
            -9 => DriverError::OnlyInMeasurementMode,
            -10 => DriverError::ChannelNotAvailable,
            -11 => DriverError::ChannelTemporarilyNotAvailable,
            other => DriverError::Unknown(other),
        }
    }

    /// The wavemeter server is not running for the selected instrument.
    ///
    /// Opening the server window usually fixes this.
    pub fn is_instrument_missing(&self) -> bool {
        matches!(self, DriverError::WlmMissing)
    }
}

const ERR_TEMPERATURE: f64 = -1000.0;

/// Interpret the return value of `GetWavelengthNum`/`GetFrequencyNum`/`GetCalWavelength`.
///
/// Values `<= 0` are error codes.
pub fn check_measurement(value: f64) -> Result<Reading, DriverError> {
    if value <= 0.0 {
        return Err(DriverError::from_error_code(value as i32));
    }
    Ok(Reading::from(value))
}

/// Interpret the return value of `GetTemperature`.
///
/// Errors are reported as `ErrTemperature + Err*`.
pub fn check_temperature(value: f64) -> Result<Reading, DriverError> {
    if value <= ERR_TEMPERATURE {
        return Err(DriverError::from_error_code((value - ERR_TEMPERATURE) as i32));
    }
    Ok(Reading::from(value))
}

/// Interpret an integer getter, where negative values are error codes.
pub fn check_count(value: i32) -> Result<u32, DriverError> {
    u32::try_from(value).map_err(|_| DriverError::from_error_code(value))
}

/// Interpret the result of an `Instantiate` notification request.
///
/// The library returns zero when it could not reach the wavemeter server.
pub fn check_instantiate(value: i32) -> Result<(), DriverError> {
    if value == 0 {
        Err(DriverError::WlmMissing)
    } else {
        Ok(())
    }
}

/// Interpret a `ResERR_*` result of a `Set*` function.
pub fn check_result(code: i32) -> Result<(), DriverError> {
    if code == 0 {
        Ok(())
    } else {
        Err(DriverError::from_result_code(code))
    }
}

/// Which calibration wavelength to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationPhase {
    /// Reference wavelength measured before the last calibration.
    Before,
    /// Reference wavelength measured after the last calibration.
    After,
}

impl CalibrationPhase {
    /// The `ba` argument of `GetCalWavelength`.
    pub fn code(&self) -> i32 {
        match self {
            CalibrationPhase::Before => 0,
            CalibrationPhase::After => 1,
        }
    }
}

/// Identification of the selected wavemeter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavemeterInfo {
    /// Device type, `GetWLMVersion(0)` (5 = LSA, 6 = WS6, ...).
    pub version_type: i32,
    /// Version number, used as serial number.
    pub serial: i32,
    /// Software revision.
    pub revision: i32,
    /// Software build.
    pub build: i32,
}

impl WavemeterInfo {
    /// Model name as shown in the identification string.
    pub fn model(&self) -> String {
        match self.version_type {
            5 => "LSA".to_string(),
            n => format!("WS{n}"),
        }
    }
}

impl fmt::Display for WavemeterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} (rev. {}.{})",
            self.model(),
            self.serial,
            self.revision,
            self.build
        )
    }
}

/// Synchronous interface to the vendor driver.
///
/// Calls other than [`select`](Self::select), [`show_window`](Self::show_window)
/// and the callback functions act on the currently selected wavemeter.
/// Implementations may block; they are only called from session worker
/// threads.
pub trait WavemeterDriver: Send + Sync {
    /// Make `product_id` the wavemeter addressed by subsequent calls.
    fn select(&self, product_id: ProductId) -> Result<(), DriverError>;

    /// Wavelength of a 1-based switcher channel, in nm (vacuum).
    fn wavelength(&self, channel: u32) -> Result<Reading, DriverError>;

    /// Frequency of a 1-based switcher channel, in THz.
    fn frequency(&self, channel: u32) -> Result<Reading, DriverError>;

    /// Internal temperature in °C.
    fn temperature(&self) -> Result<Reading, DriverError>;

    fn switcher_channel(&self) -> Result<u32, DriverError>;

    fn set_switcher_channel(&self, channel: u32) -> Result<(), DriverError>;

    fn switcher_mode(&self) -> Result<bool, DriverError>;

    fn set_switcher_mode(&self, enabled: bool) -> Result<(), DriverError>;

    /// Number of switcher channels of the selected wavemeter.
    fn channel_count(&self) -> Result<u32, DriverError>;

    /// Number of wavemeter servers running on this machine.
    fn wavemeter_count(&self) -> Result<u32, DriverError>;

    fn info(&self) -> Result<WavemeterInfo, DriverError>;

    fn calibration_wavelength(&self, phase: CalibrationPhase) -> Result<Reading, DriverError>;

    /// Start or show the wavemeter server window for `product_id`.
    fn show_window(&self, product_id: ProductId) -> Result<(), DriverError>;

    /// Install the process-wide event callback.
    fn install_callback(&self, sink: EventSink) -> Result<(), DriverError>;

    /// Remove the process-wide event callback.
    fn remove_callback(&self) -> Result<(), DriverError>;
}
