//! Raw FFI declarations for the HighFinesse `wlmData` library.
//!
//! Only the entry points used by `wlm_scpi` are declared. Signatures follow
//! `wlmData.h`; all functions use the platform system calling convention
//! (`stdcall` on 32-bit Windows).
//!
//! Linking is enabled by the `wlm-sdk` feature. Without it the declarations
//! compile but must not be called.

#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]

use std::os::raw::{c_double, c_long, c_void};

/// Callback signature installed with `cNotifyInstallCallbackEx`.
///
/// Arguments: product id (`Ver`), mode code, integer value, double value, result.
pub type CallbackProcEx =
    unsafe extern "system" fn(ver: i32, mode: i32, int_val: i32, dbl_val: c_double, res1: i32);

// Instantiating constants for the 'RFC' parameter
pub const cInstCheckForWLM: c_long = -1;
pub const cInstResetCalc: c_long = 0;
pub const cInstNotification: c_long = 1;
pub const cInstCopyPattern: c_long = 2;
pub const cInstControlWLM: c_long = 3;

// Notification constants for the 'Mode' parameter
pub const cNotifyInstallCallback: c_long = 0;
pub const cNotifyRemoveCallback: c_long = 1;
pub const cNotifyInstallWaitEvent: c_long = 2;
pub const cNotifyRemoveWaitEvent: c_long = 3;
pub const cNotifyInstallCallbackEx: c_long = 4;
pub const cNotifyInstallWaitEventEx: c_long = 5;

// ControlWLM actions
pub const cCtrlWLMShow: c_long = 1;
pub const cCtrlWLMHide: c_long = 2;
pub const cCtrlWLMExit: c_long = 3;
pub const cCtrlWLMWait: c_long = 0x0010;
pub const cCtrlWLMStartSilent: c_long = 0x0020;
pub const cCtrlWLMSilent: c_long = 0x0040;

// GetWLMVersion selectors
pub const cVersionType: c_long = 0;
pub const cVersionNumber: c_long = 1;
pub const cVersionRevision: c_long = 2;
pub const cVersionCompilation: c_long = 3;

// Return error values of GetFrequency, GetWavelength, GetWLMVersion
pub const ErrNoValue: c_long = 0;
pub const ErrNoSignal: c_long = -1;
pub const ErrBadSignal: c_long = -2;
pub const ErrLowSignal: c_long = -3;
pub const ErrBigSignal: c_long = -4;
pub const ErrWlmMissing: c_long = -5;
pub const ErrNotAvailable: c_long = -6;
pub const InfNothingChanged: c_long = -7;
pub const ErrNoPulse: c_long = -8;
pub const ErrChannelNotAvailable: c_long = -10;
pub const ErrDiv0: c_long = -13;
pub const ErrOutOfRange: c_long = -14;
pub const ErrUnitNotAvailable: c_long = -15;
pub const ErrTCPErr: c_long = -26;
pub const ErrParameterOutOfRange: c_long = -28;

// Return error values of GetTemperature and GetPressure
pub const ErrTemperature: c_long = -1000;

// ResultError constants of Set...-functions
pub const ResERR_NoErr: c_long = 0;
pub const ResERR_WlmMissing: c_long = -1;
pub const ResERR_CouldNotSet: c_long = -2;
pub const ResERR_ParmOutOfRange: c_long = -3;
pub const ResERR_WlmOutOfResources: c_long = -4;
pub const ResERR_WlmInternalError: c_long = -5;
pub const ResERR_NotAvailable: c_long = -6;
pub const ResERR_WlmBusy: c_long = -7;
pub const ResERR_NotInMeasurementMode: c_long = -8;
pub const ResERR_OnlyInMeasurementMode: c_long = -9;
pub const ResERR_ChannelNotAvailable: c_long = -10;
pub const ResERR_ChannelTemporarilyNotAvailable: c_long = -11;

extern "system" {
    /// Installs or removes notification callbacks and controls the server.
    pub fn Instantiate(RFC: c_long, Mode: c_long, P1: *const c_void, P2: c_long) -> c_long;

    /// Starts, shows or hides the wavemeter server application.
    pub fn ControlWLMEx(Action: c_long, App: isize, Ver: c_long, Delay: c_long, Res: c_long)
        -> c_long;

    /// Selects the wavemeter addressed by subsequent calls.
    pub fn PresetWLMIndex(Ver: c_long) -> c_long;

    /// Number of wavemeter servers currently running.
    pub fn GetWLMCount(V: c_long) -> c_long;

    /// Version information, selected by `Ver` (type, number, revision, compilation).
    pub fn GetWLMVersion(Ver: c_long) -> c_long;

    /// Wavelength of a switcher channel (1-based) in nm.
    pub fn GetWavelengthNum(num: c_long, WL: c_double) -> c_double;

    /// Frequency of a switcher channel (1-based) in THz.
    pub fn GetFrequencyNum(num: c_long, F: c_double) -> c_double;

    /// Internal temperature in degrees Celsius.
    pub fn GetTemperature(T: c_double) -> c_double;

    /// Active switcher channel (1-based).
    pub fn GetSwitcherChannel(CH: c_long) -> c_long;

    /// Switches to the given channel (1-based).
    pub fn SetSwitcherChannel(CH: c_long) -> c_long;

    /// Whether the multichannel switcher mode is enabled.
    pub fn GetSwitcherMode(SM: c_long) -> c_long;

    /// Enables or disables the multichannel switcher mode.
    pub fn SetSwitcherMode(SM: c_long) -> c_long;

    /// Number of available switcher channels.
    pub fn GetChannelsCount(c: c_long) -> c_long;

    /// Calibration wavelength before (`ba = 0`) or after (`ba = 1`) the last calibration.
    pub fn GetCalWavelength(ba: c_long, WL: c_double) -> c_double;
}
