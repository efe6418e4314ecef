use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, trace};

use crate::driver::{DriverError, EventSink, WavemeterDriver};
use crate::event_bus::{EventBus, Subscription};
use crate::measurement::{data_factory, DataPackage, RawEvent};
use crate::ProductId;

/// Driver-wide state guarded by the hub mutex.
#[derive(Debug, Default)]
pub struct HubState {
    selected: Option<ProductId>,
    callback_installed: bool,
    live: HashSet<ProductId>,
}

impl HubState {
    /// Select `product_id` inside the driver unless it already is.
    pub(crate) fn ensure_selected(
        &mut self,
        driver: &dyn WavemeterDriver,
        product_id: ProductId,
    ) -> Result<(), DriverError> {
        if self.selected == Some(product_id) {
            return Ok(());
        }
        trace!(product_id, previous = ?self.selected, "Selecting wavemeter");
        // Unknown after a failed select
        self.selected = None;
        driver.select(product_id)?;
        self.selected = Some(product_id);
        Ok(())
    }

    /// Forget the recorded selection so the next call selects again.
    pub(crate) fn invalidate_selection(&mut self) {
        self.selected = None;
    }

    pub(crate) fn register(&mut self, product_id: ProductId) -> bool {
        self.live.insert(product_id)
    }

    pub(crate) fn unregister(&mut self, product_id: ProductId) -> bool {
        self.live.remove(&product_id)
    }

    pub(crate) fn has_live_sessions(&self) -> bool {
        !self.live.is_empty()
    }

    pub(crate) fn callback_installed(&self) -> bool {
        self.callback_installed
    }

    pub(crate) fn set_callback_installed(&mut self, installed: bool) {
        self.callback_installed = installed;
    }
}

/// Shared access point to one wlmData driver instance.
///
/// Owns the single mutex that every session must hold while it selects the
/// driver and calls into it, and the event bus that receives the driver
/// callback stream. Build one per driver and share it between sessions.
pub struct DriverHub {
    driver: Arc<dyn WavemeterDriver>,
    state: Arc<Mutex<HubState>>,
    events: EventBus<ProductId, DataPackage>,
}

impl DriverHub {
    pub fn new(driver: Arc<dyn WavemeterDriver>) -> Self {
        Self {
            driver,
            state: Arc::new(Mutex::new(HubState::default())),
            events: EventBus::new(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn WavemeterDriver> {
        &self.driver
    }

    pub fn events(&self) -> &EventBus<ProductId, DataPackage> {
        &self.events
    }

    /// Subscribe to packages published for `product_id`.
    pub fn subscribe(&self, product_id: ProductId) -> Subscription<ProductId, DataPackage> {
        self.events.subscribe(product_id)
    }

    /// Wavemeter currently selected inside the driver, if known.
    pub async fn selected(&self) -> Option<ProductId> {
        self.state.lock().await.selected
    }

    /// Product ids with a connected session, sorted.
    pub async fn live_sessions(&self) -> Vec<ProductId> {
        let mut live: Vec<_> = self.state.lock().await.live.iter().copied().collect();
        live.sort_unstable();
        live
    }

    pub async fn callback_installed(&self) -> bool {
        self.state.lock().await.callback_installed
    }

    pub(crate) async fn lock(&self) -> OwnedMutexGuard<HubState> {
        Arc::clone(&self.state).lock_owned().await
    }

    /// Sink handed to the driver: raw events are turned into packages and
    /// published under their product id.
    pub(crate) fn event_sink(&self) -> EventSink {
        let events = self.events.clone();
        Arc::new(move |raw: RawEvent| match data_factory().get(&raw) {
            Ok(package) => {
                let topic = package.product_id;
                events.publish(&topic, package);
            }
            Err(err) => {
                debug!(product_id = raw.product_id, "Dropping driver event: {}", err);
            }
        })
    }
}
