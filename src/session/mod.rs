//! Wavemeter sessions multiplexed onto one driver.
//!
//! # Locking protocol
//!
//! The driver addresses whichever wavemeter was selected last, process-wide.
//! Every operation of a [`Wavemeter`] therefore:
//!
//! 1. acquires the [`DriverHub`] mutex,
//! 2. moves the guard into a job for the session's worker thread,
//! 3. re-selects the driver on that thread if another wavemeter is selected,
//! 4. performs the driver call,
//! 5. drops the guard and replies through a oneshot channel.
//!
//! Because the guard lives inside the job, a caller that gives up waiting
//! (for example after a timeout) cannot release the mutex while the driver
//! call is still running.
//!
//! # Remediation
//!
//! When the driver reports that the wavemeter server is missing, the session
//! opens the server window once and retries the call once. A second failure
//! is reported as [`SessionError::InstrumentUnavailable`].

mod hub;
mod worker;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{oneshot, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::driver::{CalibrationPhase, DriverError, WavemeterDriver, WavemeterInfo};
use crate::error::SessionError;
use crate::event_bus::Subscription;
use crate::measurement::{DataPackage, Reading};
use crate::ProductId;

pub use hub::{DriverHub, HubState};
use worker::{JobSender, Worker};

/// Lifecycle of a [`Wavemeter`] session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connecting,
    Connected,
    Disconnecting,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnecting => "disconnecting",
            SessionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Logical handle for one wavemeter.
///
/// At most one session per product id can be connected through the same
/// [`DriverHub`]. Share the session with `Arc`; all operations take `&self`.
pub struct Wavemeter {
    product_id: ProductId,
    hub: Arc<DriverHub>,
    state: Mutex<SessionState>,
    worker: Mutex<Option<Worker>>,
}

impl Wavemeter {
    pub fn new(product_id: ProductId, hub: Arc<DriverHub>) -> Self {
        Self {
            product_id,
            hub,
            state: Mutex::new(SessionState::Unconnected),
            worker: Mutex::new(None),
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn hub(&self) -> &Arc<DriverHub> {
        &self.hub
    }

    /// Connect the session.
    ///
    /// Registers the product id as live, starts the worker thread, selects the
    /// wavemeter and installs the driver callback if no other session has.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyConnected`] if this or another session for the
    ///   same product id is connected. Nothing changes in that case.
    /// - Any error from selecting the wavemeter or installing the callback.
    ///   The registration is rolled back and the worker stopped.
    pub async fn connect(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Unconnected | SessionState::Disconnected => {
                    *state = SessionState::Connecting;
                }
                _ => return Err(SessionError::AlreadyConnected(self.product_id)),
            }
        }

        if !self.hub.lock().await.register(self.product_id) {
            *self.state.lock() = SessionState::Unconnected;
            return Err(SessionError::AlreadyConnected(self.product_id));
        }

        let worker = match Worker::spawn(self.product_id, Arc::clone(self.hub.driver())) {
            Ok(worker) => worker,
            Err(err) => {
                warn!(product_id = self.product_id, "Failed to start worker: {}", err);
                self.hub.lock().await.unregister(self.product_id);
                *self.state.lock() = SessionState::Unconnected;
                return Err(SessionError::WorkerStopped(self.product_id));
            }
        };
        *self.worker.lock() = Some(worker);

        let sink = self.hub.event_sink();
        let result = self
            .execute(move |state, driver| {
                if !state.callback_installed() {
                    driver.install_callback(Arc::clone(&sink))?;
                    state.set_callback_installed(true);
                    debug!("Installed driver callback");
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => {
                *self.state.lock() = SessionState::Connected;
                info!(product_id = self.product_id, "Connected to wavemeter");
                Ok(())
            }
            Err(err) => {
                warn!(product_id = self.product_id, "Failed to connect: {}", err);
                self.hub.lock().await.unregister(self.product_id);
                self.stop_worker().await;
                *self.state.lock() = SessionState::Unconnected;
                Err(err)
            }
        }
    }

    /// Disconnect the session. Calling it again is a no-op.
    ///
    /// The product id is always unregistered. The driver callback is removed
    /// when the last live session leaves; a failure to remove it is returned
    /// after the session has been torn down.
    pub async fn disconnect(&self) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            match *state {
                SessionState::Connecting | SessionState::Connected => {
                    *state = SessionState::Disconnecting;
                }
                _ => return Ok(()),
            }
        }

        let mut guard = self.hub.lock().await;
        guard.unregister(self.product_id);

        let mut result = Ok(());
        if !guard.has_live_sessions() && guard.callback_installed() {
            result = self
                .run_locked(guard, false, |state, driver| {
                    driver.remove_callback()?;
                    state.set_callback_installed(false);
                    Ok(())
                })
                .await;
            match &result {
                Ok(()) => debug!("Removed driver callback"),
                Err(err) => warn!(
                    product_id = self.product_id,
                    "Failed to remove driver callback: {}", err
                ),
            }
        } else {
            drop(guard);
        }

        self.stop_worker().await;
        *self.state.lock() = SessionState::Disconnected;
        info!(product_id = self.product_id, "Disconnected from wavemeter");
        result
    }

    /// Subscribe to packages the driver callback reports for this wavemeter.
    pub fn subscribe(&self) -> Subscription<ProductId, DataPackage> {
        self.hub.subscribe(self.product_id)
    }

    /// Wavelength of a 1-based channel in nm.
    pub async fn get_wavelength(&self, channel: u32) -> Result<Reading, SessionError> {
        self.execute(move |_, driver| driver.wavelength(channel))
            .await
    }

    /// Frequency of a 1-based channel in THz.
    pub async fn get_frequency(&self, channel: u32) -> Result<Reading, SessionError> {
        self.execute(move |_, driver| driver.frequency(channel))
            .await
    }

    pub async fn get_temperature(&self) -> Result<Reading, SessionError> {
        self.execute(|_, driver| driver.temperature()).await
    }

    /// Active switcher channel (1-based).
    pub async fn get_channel(&self) -> Result<u32, SessionError> {
        self.execute(|_, driver| driver.switcher_channel()).await
    }

    pub async fn set_channel(&self, channel: u32) -> Result<(), SessionError> {
        self.execute(move |_, driver| driver.set_switcher_channel(channel))
            .await
    }

    pub async fn get_channel_count(&self) -> Result<u32, SessionError> {
        self.execute(|_, driver| driver.channel_count()).await
    }

    pub async fn get_switch_mode(&self) -> Result<bool, SessionError> {
        self.execute(|_, driver| driver.switcher_mode()).await
    }

    pub async fn set_switch_mode(&self, enabled: bool) -> Result<(), SessionError> {
        self.execute(move |_, driver| driver.set_switcher_mode(enabled))
            .await
    }

    pub async fn get_wavemeter_info(&self) -> Result<WavemeterInfo, SessionError> {
        self.execute(|_, driver| driver.info()).await
    }

    /// Number of wavemeter servers known to the driver.
    pub async fn get_wavemeter_count(&self) -> Result<u32, SessionError> {
        self.execute(|_, driver| driver.wavemeter_count()).await
    }

    pub async fn get_calibration_wavelength(
        &self,
        phase: CalibrationPhase,
    ) -> Result<Reading, SessionError> {
        self.execute(move |_, driver| driver.calibration_wavelength(phase))
            .await
    }

    /// Drift of the calibration reference: after minus before.
    ///
    /// Both values are read within one locked job.
    pub async fn get_calibration_difference(&self) -> Result<Reading, SessionError> {
        self.execute(|_, driver| {
            let after = driver.calibration_wavelength(CalibrationPhase::After)?;
            let before = driver.calibration_wavelength(CalibrationPhase::Before)?;
            Ok(after - before)
        })
        .await
    }

    /// Run `op` on the worker with this wavemeter selected.
    async fn execute<T, F>(&self, op: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: Fn(&mut HubState, &dyn WavemeterDriver) -> Result<T, DriverError> + Send + 'static,
    {
        let guard = self.hub.lock().await;
        self.run_locked(guard, true, op).await
    }

    /// Hand the locked hub state to the worker and run `op` there.
    async fn run_locked<T, F>(
        &self,
        guard: OwnedMutexGuard<HubState>,
        select: bool,
        op: F,
    ) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: Fn(&mut HubState, &dyn WavemeterDriver) -> Result<T, DriverError> + Send + 'static,
    {
        let sender = self.job_sender()?;
        let product_id = self.product_id;
        let (reply_tx, reply_rx) = oneshot::channel();

        sender
            .submit(Box::new(move |driver| {
                let mut guard = guard;
                let result = if select {
                    call_with_remediation(&mut guard, driver, product_id, &op)
                } else {
                    op(&mut guard, driver).map_err(SessionError::from)
                };
                drop(guard);
                if reply_tx.send(result).is_err() {
                    debug!(product_id, "Caller went away before the driver call finished");
                }
            }))
            .await?;

        reply_rx
            .await
            .map_err(|_| SessionError::WorkerStopped(product_id))?
    }

    fn job_sender(&self) -> Result<JobSender, SessionError> {
        self.worker
            .lock()
            .as_ref()
            .map(Worker::sender)
            .ok_or(SessionError::NotConnected(self.product_id))
    }

    async fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop().await;
        }
    }
}

impl fmt::Debug for Wavemeter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wavemeter")
            .field("product_id", &self.product_id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for Wavemeter {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if matches!(state, SessionState::Connecting | SessionState::Connected) {
            warn!(
                product_id = self.product_id,
                "Wavemeter session dropped while {}; call disconnect() first", state
            );
        }
    }
}

/// Select, call, and on a missing server open its window and try once more.
fn call_with_remediation<T, F>(
    state: &mut HubState,
    driver: &dyn WavemeterDriver,
    product_id: ProductId,
    op: &F,
) -> Result<T, SessionError>
where
    F: Fn(&mut HubState, &dyn WavemeterDriver) -> Result<T, DriverError>,
{
    let attempt = |state: &mut HubState| -> Result<T, DriverError> {
        state.ensure_selected(driver, product_id)?;
        op(state, driver)
    };

    match attempt(state) {
        Err(err) if err.is_instrument_missing() => {
            warn!(product_id, "Wavemeter not available, opening its window");
            if let Err(err) = driver.show_window(product_id) {
                debug!(product_id, "Opening the window failed: {}", err);
            }
            state.invalidate_selection();
            match attempt(state) {
                Err(err) if err.is_instrument_missing() => {
                    Err(SessionError::InstrumentUnavailable(product_id))
                }
                other => other.map_err(SessionError::from),
            }
        }
        other => other.map_err(SessionError::from),
    }
}
