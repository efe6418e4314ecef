//! TCP front end: one [`WavemeterServer`] per configured wavemeter.

mod connection;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::config::{ServerConfig, WavemeterEndpoint};
use crate::error::ServerError;
use crate::session::{DriverHub, Wavemeter};

pub use connection::ConnectionHandler;

/// First pause after a failed `accept`; doubled on each further failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Listeners of one wavemeter plus its connected session.
#[derive(Debug)]
pub struct WavemeterServer {
    wavemeter: Arc<Wavemeter>,
    listeners: Vec<TcpListener>,
    config: ServerConfig,
}

impl WavemeterServer {
    /// Connect the wavemeter session and bind all listeners of `endpoint`.
    ///
    /// # Errors
    ///
    /// Fails if the session cannot connect or an address cannot be bound. The
    /// session is disconnected again in the latter case.
    pub async fn bind(
        endpoint: &WavemeterEndpoint,
        hub: Arc<DriverHub>,
        config: ServerConfig,
    ) -> Result<Self, ServerError> {
        let wavemeter = Arc::new(Wavemeter::new(endpoint.product_id, hub));
        wavemeter.connect().await?;

        let mut listeners = Vec::new();
        for addr in endpoint.bind_addrs() {
            match TcpListener::bind(addr).await {
                Ok(listener) => listeners.push(listener),
                Err(source) => {
                    if let Err(err) = wavemeter.disconnect().await {
                        warn!(
                            product_id = endpoint.product_id,
                            "Failed to disconnect after bind error: {}", err
                        );
                    }
                    return Err(ServerError::Bind { addr, source });
                }
            }
        }

        Ok(Self {
            wavemeter,
            listeners,
            config,
        })
    }

    pub fn wavemeter(&self) -> &Arc<Wavemeter> {
        &self.wavemeter
    }

    /// Addresses actually bound, with ephemeral ports resolved.
    pub fn local_addrs(&self) -> std::io::Result<Vec<SocketAddr>> {
        self.listeners
            .iter()
            .map(TcpListener::local_addr)
            .collect()
    }

    /// Accept clients until `shutdown` fires, then wait for all connections
    /// to close and disconnect the session.
    pub async fn serve(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let addrs = self.local_addrs()?;
        info!(
            "Serving wavemeter {} on {}",
            self.wavemeter.product_id(),
            addrs
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let Self {
            wavemeter,
            listeners,
            config,
        } = self;
        let tracker = TaskTracker::new();

        let accept_loops = listeners.into_iter().map(|listener| {
            accept_loop(
                listener,
                Arc::clone(&wavemeter),
                &config,
                &tracker,
                &shutdown,
            )
        });
        join_all(accept_loops).await;

        tracker.close();
        tracker.wait().await;
        debug!(product_id = wavemeter.product_id(), "All connections closed");

        wavemeter.disconnect().await?;
        Ok(())
    }
}

async fn accept_loop(
    listener: TcpListener,
    wavemeter: Arc<Wavemeter>,
    config: &ServerConfig,
    tracker: &TaskTracker,
    shutdown: &CancellationToken,
) {
    let mut backoff = None;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    backoff = None;
                    if let Err(err) = stream.set_nodelay(true) {
                        debug!(%peer, "Failed to set TCP_NODELAY: {}", err);
                    }
                    let handler = ConnectionHandler::new(Arc::clone(&wavemeter), config);
                    tracker.spawn(handler.run(stream, peer.to_string(), shutdown.child_token()));
                }
                Err(err) => {
                    let delay = next_accept_backoff(backoff);
                    backoff = Some(delay);
                    warn!(
                        product_id = wavemeter.product_id(),
                        "Accept error, retrying in {:?}: {}", delay, err
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}

/// Pause before the next `accept` after a failure.
fn next_accept_backoff(previous: Option<Duration>) -> Duration {
    match previous {
        None => ACCEPT_BACKOFF_MIN,
        Some(delay) => (delay * 2).min(ACCEPT_BACKOFF_MAX),
    }
}
