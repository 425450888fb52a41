use tokio::sync::broadcast;

use tandem_types::config::DeviceConfig;
use tandem_types::DeviceId;

use crate::error::Result;
use crate::events::DeviceEvent;
use crate::pending::Pending;
use crate::queue::CommandQueue;

/// A compute device: one in-order command queue executing on its own thread.
///
/// Work issued to the same device runs strictly in issue order; work on
/// two different devices runs concurrently.
pub struct Device {
    id: DeviceId,
    queue: CommandQueue,
}

impl Device {
    pub fn spawn(
        id: DeviceId,
        config: &DeviceConfig,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        config.validate()?;
        let queue = CommandQueue::spawn(id.to_string(), id, config.queue_depth, events)?;
        Ok(Self { id, queue })
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Issue `job` to this device's queue without waiting for it to run.
    pub async fn submit<R, F>(&self, job: F) -> Result<Pending<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.queue.submit(job, |_| None).await
    }

    /// Like [`Device::submit`], for jobs returning a `Result`. An `Err`
    /// is reported as [`DeviceEvent::JobFailed`] rather than `JobCompleted`.
    pub async fn submit_fallible<T, E, F>(
        &self,
        job: F,
    ) -> Result<Pending<std::result::Result<T, E>>>
    where
        F: FnOnce() -> std::result::Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: std::fmt::Display + Send + 'static,
    {
        self.queue
            .submit(job, |out| out.as_ref().err().map(ToString::to_string))
            .await
    }

    /// Issue `job` and wait for its result.
    pub async fn run<R, F>(&self, job: F) -> Result<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit(job).await?.wait().await
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("queue", &self.queue.name())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
