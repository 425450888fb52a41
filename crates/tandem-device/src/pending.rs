//! Completion handles for work issued to a queue.

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;

use crate::error::{DeviceError, Result};

/// Result of a job that has been issued but may not have run yet.
///
/// Issuing never blocks on the job itself; the caller decides when to
/// suspend by calling [`Pending::wait`].
#[derive(Debug)]
pub struct Pending<R> {
    queue: String,
    rx: oneshot::Receiver<R>,
}

impl<R> Pending<R> {
    pub(crate) fn new(queue: String, rx: oneshot::Receiver<R>) -> Self {
        Self { queue, rx }
    }

    /// Name of the queue the job was issued to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Suspend until the job has run.
    pub async fn wait(self) -> Result<R> {
        let Self { queue, rx } = self;
        rx.await.map_err(|_| DeviceError::Dropped(queue))
    }

    /// Non-blocking poll. Returns `None` while the job is still queued or
    /// running. Once this returns `Some`, the handle is spent.
    pub fn try_take(&mut self) -> Option<Result<R>> {
        match self.rx.try_recv() {
            Ok(v) => Some(Ok(v)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(DeviceError::Dropped(self.queue.clone()))),
        }
    }
}
