//! In-order command queue backed by a dedicated worker thread.
//!
//! Shared machinery behind [`crate::Device`] and [`crate::Link`]: the
//! handle owns the sending half of a bounded channel, the worker thread
//! drains it and runs each job to completion before taking the next one.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error};

use tandem_types::DeviceId;

use crate::error::{DeviceError, Result};
use crate::events::DeviceEvent;
use crate::pending::Pending;

/// A queued job. Returns the failure reason when the job's own result
/// reports one; a panic is caught by the worker.
type Job = Box<dyn FnOnce() -> Option<String> + Send + 'static>;

/// Extracts a failure reason from a job's result, for event reporting.
pub(crate) type Classify<R> = fn(&R) -> Option<String>;

pub(crate) struct CommandQueue {
    name: String,
    job_tx: Option<mpsc::Sender<Job>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CommandQueue {
    /// Spawn the worker thread. `owner` is the device reported in events.
    pub(crate) fn spawn(
        name: String,
        owner: DeviceId,
        depth: usize,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        let (job_tx, job_rx) = mpsc::channel::<Job>(depth);

        let worker_name = name.clone();
        let worker = thread::Builder::new()
            .name(format!("tandem-{name}"))
            .spawn(move || run_queue(worker_name, owner, job_rx, events))
            .map_err(|e| DeviceError::Spawn {
                queue: name.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            name,
            job_tx: Some(job_tx),
            worker: Some(worker),
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Enqueue `job`. Suspends only while the queue is full.
    pub(crate) async fn submit<R, F>(&self, job: F, classify: Classify<R>) -> Result<Pending<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let job_tx = self
            .job_tx
            .as_ref()
            .ok_or_else(|| DeviceError::Stopped(self.name.clone()))?;

        let (tx, rx) = oneshot::channel();
        let wrapped: Job = Box::new(move || {
            let out = job();
            let failure = classify(&out);
            // Receiver may be gone if the run was aborted; the result is discarded.
            let _ = tx.send(out);
            failure
        });

        job_tx
            .send(wrapped)
            .await
            .map_err(|_| DeviceError::Stopped(self.name.clone()))?;

        Ok(Pending::new(self.name.clone(), rx))
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain what is queued and exit.
        self.job_tx.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!(queue = %self.name, "worker thread panicked");
            }
        }
    }
}

// ── Worker loop ───────────────────────────────────────────────────────────────

fn run_queue(
    name: String,
    owner: DeviceId,
    mut job_rx: mpsc::Receiver<Job>,
    events: broadcast::Sender<DeviceEvent>,
) {
    debug!(queue = %name, "queue worker started");
    let mut seq: u64 = 0;

    while let Some(job) = job_rx.blocking_recv() {
        match panic::catch_unwind(AssertUnwindSafe(job)) {
            Ok(None) => {
                let _ = events.send(DeviceEvent::JobCompleted { device: owner, seq });
            }
            Ok(Some(reason)) => {
                debug!(queue = %name, seq, %reason, "job failed");
                let _ = events.send(DeviceEvent::JobFailed {
                    device: owner,
                    seq,
                    reason,
                });
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(queue = %name, seq, %message, "job panicked");
                let _ = events.send(DeviceEvent::JobPanicked {
                    device: owner,
                    seq,
                    message,
                });
            }
        }
        seq += 1;
    }

    debug!(queue = %name, jobs = seq, "queue worker exiting");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".into()
    }
}
