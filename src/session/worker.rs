use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::driver::WavemeterDriver;
use crate::error::SessionError;
use crate::ProductId;

/// A unit of work executed on the worker thread.
pub(crate) type Job = Box<dyn FnOnce(&dyn WavemeterDriver) + Send>;

/// Dedicated OS thread that runs all driver calls of one session.
///
/// Jobs are handed over through a single-slot mailbox, so at most one job
/// waits while another runs.
pub(crate) struct Worker {
    product_id: ProductId,
    sender: mpsc::Sender<Job>,
    thread: JoinHandle<()>,
}

impl Worker {
    pub(crate) fn spawn(
        product_id: ProductId,
        driver: Arc<dyn WavemeterDriver>,
    ) -> std::io::Result<Self> {
        let (sender, mut receiver) = mpsc::channel::<Job>(1);

        let thread = std::thread::Builder::new()
            .name(format!("wlm-worker-{product_id}"))
            .spawn(move || {
                debug!(product_id, "Worker started");
                while let Some(job) = receiver.blocking_recv() {
                    job(driver.as_ref());
                }
                debug!(product_id, "Worker stopped");
            })?;

        Ok(Self {
            product_id,
            sender,
            thread,
        })
    }

    pub(crate) fn sender(&self) -> JobSender {
        JobSender {
            product_id: self.product_id,
            sender: self.sender.clone(),
        }
    }

    /// Close the mailbox and wait for the thread to finish its last job.
    pub(crate) async fn stop(self) {
        let Self {
            product_id,
            sender,
            thread,
        } = self;
        drop(sender);

        match tokio::task::spawn_blocking(move || thread.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!(product_id, "Worker thread panicked"),
            Err(err) => warn!(product_id, "Failed to join worker thread: {}", err),
        }
    }
}

/// Cloneable submission side of a [`Worker`].
#[derive(Clone)]
pub(crate) struct JobSender {
    product_id: ProductId,
    sender: mpsc::Sender<Job>,
}

impl JobSender {
    /// Queue `job`, waiting while the mailbox is full.
    pub(crate) async fn submit(&self, job: Job) -> Result<(), SessionError> {
        self.sender
            .send(job)
            .await
            .map_err(|_| SessionError::WorkerStopped(self.product_id))
    }
}
