//! In-process wlmData model.
//!
//! Behaves like the vendor library from the caller's point of view: one
//! global selection, one callback slot, blocking calls. On top of that it
//! records the most recent calls together with the selection in force at the
//! time and flags any two calls that overlap in time, which lets tests verify the
//! session locking protocol.
//!
//! Readings are derived from the product id so that a reply obtained with the
//! wrong selection is detectable.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use super::{CalibrationPhase, DriverError, EventSink, WavemeterDriver, WavemeterInfo};
use crate::measurement::{RawEvent, Reading};
use crate::ProductId;

/// Speed of light in vacuum, nm·THz.
const SPEED_OF_LIGHT: Decimal = Decimal::from_parts(299_792_458, 0, 0, false, 3);

/// Number of calls the journal keeps; older entries are discarded.
pub const JOURNAL_CAPACITY: usize = 4096;

/// A driver call, as recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DriverCall {
    Select(ProductId),
    Wavelength(u32),
    Frequency(u32),
    Temperature,
    SwitcherChannel,
    SetSwitcherChannel(u32),
    SwitcherMode,
    SetSwitcherMode(bool),
    ChannelCount,
    WavemeterCount,
    Info,
    CalibrationWavelength(CalibrationPhase),
    ShowWindow(ProductId),
    InstallCallback,
    RemoveCallback,
}

/// One journal line: the call and the wavemeter selected when it ran.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JournalEntry {
    pub selected: Option<ProductId>,
    pub call: DriverCall,
}

/// State of one simulated wavemeter.
#[derive(Debug, Clone)]
pub struct SimulatedWavemeter {
    pub product_id: ProductId,
    pub version_type: i32,
    pub revision: i32,
    pub build: i32,
    pub channel_count: u32,
    /// Wavelength of channel 1 in nm; channel `n` reads `base + (n - 1) / 4`.
    pub base_wavelength: Decimal,
    pub temperature: Reading,
    pub calibration_before: Reading,
    pub calibration_after: Reading,
    pub switcher_channel: u32,
    pub switcher_mode: bool,
    /// Per-channel overrides, checked before the computed value.
    pub channel_readings: HashMap<u32, Result<Reading, DriverError>>,
}

impl SimulatedWavemeter {
    /// A WS8 with eight channels and product-id dependent readings.
    pub fn new(product_id: ProductId) -> Self {
        let offset = Decimal::from(product_id.rem_euclid(400));
        Self {
            product_id,
            version_type: 8,
            revision: 8,
            build: 1234,
            channel_count: 8,
            base_wavelength: Decimal::from(400) + offset,
            temperature: Reading::Finite(Decimal::new(2350, 2)),
            calibration_before: Reading::Finite(Decimal::new(632_991_000, 6)),
            calibration_after: Reading::Finite(Decimal::new(632_991_250, 6)),
            switcher_channel: 1,
            switcher_mode: false,
            channel_readings: HashMap::new(),
        }
    }

    pub fn with_channel_count(mut self, channel_count: u32) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_base_wavelength(mut self, nm: Decimal) -> Self {
        self.base_wavelength = nm;
        self
    }

    /// Fix the wavelength result of one channel.
    pub fn with_channel(mut self, channel: u32, reading: Result<Reading, DriverError>) -> Self {
        self.channel_readings.insert(channel, reading);
        self
    }

    fn wavelength(&self, channel: u32) -> Result<Reading, DriverError> {
        if channel == 0 || channel > self.channel_count {
            return Err(DriverError::ChannelNotAvailable);
        }
        if let Some(reading) = self.channel_readings.get(&channel) {
            return *reading;
        }
        let step = Decimal::new(i64::from(channel - 1) * 25, 2);
        Ok(Reading::Finite(self.base_wavelength + step))
    }

    fn frequency(&self, channel: u32) -> Result<Reading, DriverError> {
        match self.wavelength(channel)? {
            Reading::Finite(nm) if !nm.is_zero() => Ok(Reading::Finite(
                (SPEED_OF_LIGHT / nm).round_dp(9).normalize(),
            )),
            Reading::Finite(_) => Err(DriverError::Div0),
            other => Ok(other),
        }
    }

    fn info(&self) -> WavemeterInfo {
        WavemeterInfo {
            version_type: self.version_type,
            serial: self.product_id,
            revision: self.revision,
            build: self.build,
        }
    }
}

#[derive(Default)]
struct SimState {
    wavemeters: BTreeMap<ProductId, SimulatedWavemeter>,
    selected: Option<ProductId>,
    missing_until_window: HashSet<ProductId>,
    windows_opened: Vec<ProductId>,
    latency: Duration,
    journal: VecDeque<JournalEntry>,
    remove_callback_error: Option<DriverError>,
}

/// Simulated wlmData driver.
#[derive(Default)]
pub struct SimulatedDriver {
    state: Mutex<SimState>,
    sink: Arc<Mutex<Option<EventSink>>>,
    in_call: AtomicBool,
    overlap: AtomicBool,
}

/// Marks a driver call as running; detects concurrent entry.
struct CallGuard<'a> {
    in_call: &'a AtomicBool,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.in_call.store(false, Ordering::SeqCst);
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Driver with default wavemeters for the given product ids.
    pub fn with_wavemeters(product_ids: impl IntoIterator<Item = ProductId>) -> Self {
        let driver = Self::new();
        for product_id in product_ids {
            driver.add_wavemeter(SimulatedWavemeter::new(product_id));
        }
        driver
    }

    pub fn add_wavemeter(&self, wavemeter: SimulatedWavemeter) {
        self.state
            .lock()
            .wavemeters
            .insert(wavemeter.product_id, wavemeter);
    }

    /// Time every call blocks before returning.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Report `WlmMissing` for `product_id` until its window is shown.
    pub fn set_missing_until_window(&self, product_id: ProductId) {
        self.state.lock().missing_until_window.insert(product_id);
    }

    /// Override the wavelength result of one channel.
    pub fn set_channel_reading(
        &self,
        product_id: ProductId,
        channel: u32,
        reading: Result<Reading, DriverError>,
    ) {
        if let Some(wavemeter) = self.state.lock().wavemeters.get_mut(&product_id) {
            wavemeter.channel_readings.insert(channel, reading);
        }
    }

    /// Make `remove_callback` fail with `error` while leaving the callback
    /// installed. `None` restores normal behaviour.
    pub fn set_remove_callback_failure(&self, error: Option<DriverError>) {
        self.state.lock().remove_callback_error = error;
    }

    pub fn selected(&self) -> Option<ProductId> {
        self.state.lock().selected
    }

    /// The last [`JOURNAL_CAPACITY`] calls, oldest first.
    pub fn journal(&self) -> Vec<JournalEntry> {
        self.state.lock().journal.iter().copied().collect()
    }

    pub fn clear_journal(&self) {
        self.state.lock().journal.clear();
    }

    pub fn windows_opened(&self) -> Vec<ProductId> {
        self.state.lock().windows_opened.clone()
    }

    /// Whether two driver calls ever ran at the same time.
    pub fn overlap_detected(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub fn callback_installed(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Deliver `event` through the installed callback from a separate thread,
    /// the way the vendor library does.
    ///
    /// The handle yields `true` if a callback was installed.
    pub fn emit_event(&self, event: RawEvent) -> JoinHandle<bool> {
        let sink = Arc::clone(&self.sink);
        std::thread::spawn(move || {
            let sink = sink.lock().clone();
            match sink {
                Some(sink) => {
                    sink(event);
                    true
                }
                None => false,
            }
        })
    }

    fn enter(&self, call: DriverCall) -> CallGuard<'_> {
        if self.in_call.swap(true, Ordering::SeqCst) {
            tracing::error!(?call, "Overlapping driver calls detected");
            self.overlap.store(true, Ordering::SeqCst);
        }
        let latency = {
            let mut state = self.state.lock();
            let selected = state.selected;
            if state.journal.len() == JOURNAL_CAPACITY {
                state.journal.pop_front();
            }
            state.journal.push_back(JournalEntry { selected, call });
            state.latency
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        CallGuard {
            in_call: &self.in_call,
        }
    }

    /// Run `f` against the selected wavemeter.
    fn with_selected<T>(
        &self,
        f: impl FnOnce(&mut SimulatedWavemeter) -> Result<T, DriverError>,
    ) -> Result<T, DriverError> {
        let mut state = self.state.lock();
        let product_id = state.selected.ok_or(DriverError::WlmMissing)?;
        if state.missing_until_window.contains(&product_id) {
            return Err(DriverError::WlmMissing);
        }
        let wavemeter = state
            .wavemeters
            .get_mut(&product_id)
            .ok_or(DriverError::WlmMissing)?;
        f(wavemeter)
    }
}

impl WavemeterDriver for SimulatedDriver {
    fn select(&self, product_id: ProductId) -> Result<(), DriverError> {
        let _call = self.enter(DriverCall::Select(product_id));
        let mut state = self.state.lock();
        if !state.wavemeters.contains_key(&product_id) {
            return Err(DriverError::WlmMissing);
        }
        state.selected = Some(product_id);
        Ok(())
    }

    fn wavelength(&self, channel: u32) -> Result<Reading, DriverError> {
        let _call = self.enter(DriverCall::Wavelength(channel));
        self.with_selected(|wm| wm.wavelength(channel))
    }

    fn frequency(&self, channel: u32) -> Result<Reading, DriverError> {
        let _call = self.enter(DriverCall::Frequency(channel));
        self.with_selected(|wm| wm.frequency(channel))
    }

    fn temperature(&self) -> Result<Reading, DriverError> {
        let _call = self.enter(DriverCall::Temperature);
        self.with_selected(|wm| Ok(wm.temperature))
    }

    fn switcher_channel(&self) -> Result<u32, DriverError> {
        let _call = self.enter(DriverCall::SwitcherChannel);
        self.with_selected(|wm| Ok(wm.switcher_channel))
    }

    fn set_switcher_channel(&self, channel: u32) -> Result<(), DriverError> {
        let _call = self.enter(DriverCall::SetSwitcherChannel(channel));
        self.with_selected(|wm| {
            if channel == 0 || channel > wm.channel_count {
                return Err(DriverError::ParameterOutOfRange);
            }
            wm.switcher_channel = channel;
            Ok(())
        })
    }

    fn switcher_mode(&self) -> Result<bool, DriverError> {
        let _call = self.enter(DriverCall::SwitcherMode);
        self.with_selected(|wm| Ok(wm.switcher_mode))
    }

    fn set_switcher_mode(&self, enabled: bool) -> Result<(), DriverError> {
        let _call = self.enter(DriverCall::SetSwitcherMode(enabled));
        self.with_selected(|wm| {
            wm.switcher_mode = enabled;
            Ok(())
        })
    }

    fn channel_count(&self) -> Result<u32, DriverError> {
        let _call = self.enter(DriverCall::ChannelCount);
        self.with_selected(|wm| Ok(wm.channel_count))
    }

    fn wavemeter_count(&self) -> Result<u32, DriverError> {
        let _call = self.enter(DriverCall::WavemeterCount);
        Ok(self.state.lock().wavemeters.len() as u32)
    }

    fn info(&self) -> Result<WavemeterInfo, DriverError> {
        let _call = self.enter(DriverCall::Info);
        self.with_selected(|wm| Ok(wm.info()))
    }

    fn calibration_wavelength(&self, phase: CalibrationPhase) -> Result<Reading, DriverError> {
        let _call = self.enter(DriverCall::CalibrationWavelength(phase));
        self.with_selected(|wm| {
            Ok(match phase {
                CalibrationPhase::Before => wm.calibration_before,
                CalibrationPhase::After => wm.calibration_after,
            })
        })
    }

    fn show_window(&self, product_id: ProductId) -> Result<(), DriverError> {
        let _call = self.enter(DriverCall::ShowWindow(product_id));
        let mut state = self.state.lock();
        state.windows_opened.push(product_id);
        state.missing_until_window.remove(&product_id);
        if state.wavemeters.contains_key(&product_id) {
            Ok(())
        } else {
            Err(DriverError::WlmMissing)
        }
    }

    fn install_callback(&self, sink: EventSink) -> Result<(), DriverError> {
        let _call = self.enter(DriverCall::InstallCallback);
        *self.sink.lock() = Some(sink);
        Ok(())
    }

    fn remove_callback(&self) -> Result<(), DriverError> {
        let _call = self.enter(DriverCall::RemoveCallback);
        if let Some(error) = self.state.lock().remove_callback_error {
            return Err(error);
        }
        *self.sink.lock() = None;
        Ok(())
    }
}
