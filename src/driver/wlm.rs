//! wlmData FFI driver.
//!
//! The library keeps its own global state, so this type carries none. The
//! callback registered with `Instantiate` has no user-data pointer; the
//! installed [`EventSink`] is therefore held in a process-wide slot that the
//! trampoline reads on every invocation.

#![allow(unsafe_code)]

use std::os::raw::{c_long, c_void};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use wlmdata_sys as ffi;

use super::{
    check_count, check_instantiate, check_measurement, check_result, check_temperature,
    CalibrationPhase, DriverError, EventSink, WavemeterDriver, WavemeterInfo,
};
use crate::measurement::{RawEvent, Reading};
use crate::ProductId;

/// How long `ControlWLMEx` waits for the server window, in ms.
const SHOW_WINDOW_DELAY_MS: c_long = 10_000;

static CALLBACK_SINK: Lazy<RwLock<Option<EventSink>>> = Lazy::new(|| RwLock::new(None));

/// Called by the library on its own thread for every notification.
unsafe extern "system" fn callback_trampoline(
    ver: i32,
    mode: i32,
    int_val: i32,
    dbl_val: f64,
    res1: i32,
) {
    let sink = CALLBACK_SINK.read().clone();
    if let Some(sink) = sink {
        sink(RawEvent {
            product_id: ver,
            mode,
            int_val,
            double_val: dbl_val,
            result: res1,
        });
    }
}

/// Driver backed by the installed wlmData library.
#[derive(Debug, Default)]
pub struct WlmDriver {
    _private: (),
}

impl WlmDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WavemeterDriver for WlmDriver {
    fn select(&self, product_id: ProductId) -> Result<(), DriverError> {
        // SAFETY: plain value arguments, no pointers involved
        let result = unsafe { ffi::PresetWLMIndex(product_id as c_long) };
        check_result(result as i32)
    }

    fn wavelength(&self, channel: u32) -> Result<Reading, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetWavelengthNum(channel as c_long, 0.0) };
        check_measurement(value)
    }

    fn frequency(&self, channel: u32) -> Result<Reading, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetFrequencyNum(channel as c_long, 0.0) };
        check_measurement(value)
    }

    fn temperature(&self) -> Result<Reading, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetTemperature(0.0) };
        check_temperature(value)
    }

    fn switcher_channel(&self) -> Result<u32, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetSwitcherChannel(0) };
        check_count(value as i32)
    }

    fn set_switcher_channel(&self, channel: u32) -> Result<(), DriverError> {
        // SAFETY: plain value argument; the library range-checks it
        let result = unsafe { ffi::SetSwitcherChannel(channel as c_long) };
        check_result(result as i32)
    }

    fn switcher_mode(&self) -> Result<bool, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetSwitcherMode(0) };
        check_count(value as i32).map(|mode| mode != 0)
    }

    fn set_switcher_mode(&self, enabled: bool) -> Result<(), DriverError> {
        // SAFETY: plain value argument
        let result = unsafe { ffi::SetSwitcherMode(c_long::from(enabled)) };
        check_result(result as i32)
    }

    fn channel_count(&self) -> Result<u32, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetChannelsCount(0) };
        check_count(value as i32)
    }

    fn wavemeter_count(&self) -> Result<u32, DriverError> {
        // SAFETY: value arguments only; the library ignores the dummy argument
        let value = unsafe { ffi::GetWLMCount(0) };
        check_count(value as i32)
    }

    fn info(&self) -> Result<WavemeterInfo, DriverError> {
        let version = |selector: c_long| -> Result<i32, DriverError> {
            // SAFETY: `selector` is one of the cVersion* constants
            let value = unsafe { ffi::GetWLMVersion(selector) };
            check_count(value as i32).map(|value| value as i32)
        };

        Ok(WavemeterInfo {
            version_type: version(ffi::cVersionType)?,
            serial: version(ffi::cVersionNumber)?,
            revision: version(ffi::cVersionRevision)?,
            build: version(ffi::cVersionCompilation)?,
        })
    }

    fn calibration_wavelength(&self, phase: CalibrationPhase) -> Result<Reading, DriverError> {
        // SAFETY: value arguments only; the phase code is 0 or 1
        let value = unsafe { ffi::GetCalWavelength(phase.code() as c_long, 0.0) };
        check_measurement(value)
    }

    fn show_window(&self, product_id: ProductId) -> Result<(), DriverError> {
        // SAFETY: a null window handle (0) is accepted with cCtrlWLMShow
        let flags = unsafe {
            ffi::ControlWLMEx(
                ffi::cCtrlWLMShow | ffi::cCtrlWLMWait,
                0,
                product_id as c_long,
                SHOW_WINDOW_DELAY_MS,
                0,
            )
        };
        // The flags only describe what the server did; the retried call tells
        // whether the wavemeter is reachable now.
        tracing::debug!(product_id, flags, "ControlWLMEx returned");
        Ok(())
    }

    fn install_callback(&self, sink: EventSink) -> Result<(), DriverError> {
        *CALLBACK_SINK.write() = Some(sink);
        let callback: ffi::CallbackProcEx = callback_trampoline;
        // SAFETY: the trampoline matches CallbackProcEx and lives for the whole
        // program; it only reads the sink slot.
        let result = unsafe {
            ffi::Instantiate(
                ffi::cInstNotification,
                ffi::cNotifyInstallCallbackEx,
                callback as *const c_void,
                0,
            )
        };
        tracing::debug!(result, "Installed wlmData callback");
        check_instantiate(result as i32).map_err(|err| {
            *CALLBACK_SINK.write() = None;
            err
        })
    }

    fn remove_callback(&self) -> Result<(), DriverError> {
        // SAFETY: cNotifyRemoveCallback takes no callback pointer; -1 is the
        // documented placeholder
        let result = unsafe {
            ffi::Instantiate(
                ffi::cInstNotification,
                ffi::cNotifyRemoveCallback,
                usize::MAX as *const c_void,
                0,
            )
        };
        tracing::debug!(result, "Removed wlmData callback");
        check_instantiate(result as i32)?;
        *CALLBACK_SINK.write() = None;
        Ok(())
    }
}
