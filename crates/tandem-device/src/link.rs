//! Cross-device copy links.
//!
//! A [`Link`] is a one-directional copy engine between two devices. It owns
//! its own queue, so a transfer never waits behind compute work queued on
//! either endpoint.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::warn;

use tandem_types::config::DeviceConfig;
use tandem_types::{Block, DeviceId};

use crate::error::{DeviceError, Result};
use crate::events::DeviceEvent;
use crate::pending::Pending;
use crate::queue::CommandQueue;

/// Performs the actual copy of a block into `dst`'s memory space.
pub type Copier = Arc<dyn Fn(Block, DeviceId) -> tandem_types::Result<Block> + Send + Sync>;

/// Plain host-side copy with a new residency tag.
pub fn default_copier() -> Copier {
    Arc::new(|block: Block, dst: DeviceId| Ok(block.to_device(dst)))
}

pub struct Link {
    src: DeviceId,
    dst: DeviceId,
    latency: Duration,
    copier: Copier,
    queue: CommandQueue,
    events: broadcast::Sender<DeviceEvent>,
}

impl Link {
    pub fn spawn(
        src: DeviceId,
        dst: DeviceId,
        config: &DeviceConfig,
        events: broadcast::Sender<DeviceEvent>,
    ) -> Result<Self> {
        Self::with_copier(src, dst, config, events, default_copier())
    }

    pub fn with_copier(
        src: DeviceId,
        dst: DeviceId,
        config: &DeviceConfig,
        events: broadcast::Sender<DeviceEvent>,
        copier: Copier,
    ) -> Result<Self> {
        config.validate()?;
        let queue = CommandQueue::spawn(
            format!("link {src}→{dst}"),
            src,
            config.queue_depth,
            events.clone(),
        )?;
        Ok(Self {
            src,
            dst,
            latency: Duration::from_micros(config.link_latency_us),
            copier,
            queue,
            events,
        })
    }

    pub fn src(&self) -> DeviceId {
        self.src
    }

    pub fn dst(&self) -> DeviceId {
        self.dst
    }

    /// Issue an asynchronous copy of `block` to the destination device.
    ///
    /// The returned handle resolves once the data is valid on `dst`.
    pub async fn transfer(&self, block: Block) -> Result<Pending<Result<Block>>> {
        let (src, dst) = (self.src, self.dst);
        let latency = self.latency;
        let copier = Arc::clone(&self.copier);
        let events = self.events.clone();

        self.queue
            .submit(move || {
                let result = copy_block(block, src, dst, latency, &copier);
                let event = match &result {
                    Ok(b) => DeviceEvent::TransferCompleted {
                        src,
                        dst,
                        bytes: std::mem::size_of_val(b.data()),
                    },
                    Err(e) => {
                        warn!(%src, %dst, error = %e, "transfer failed");
                        DeviceEvent::TransferFailed {
                            src,
                            dst,
                            reason: e.to_string(),
                        }
                    }
                };
                let _ = events.send(event);
                result
            }, |_| None)
            .await
    }
}

fn copy_block(
    block: Block,
    src: DeviceId,
    dst: DeviceId,
    latency: Duration,
    copier: &Copier,
) -> Result<Block> {
    if block.device() != src {
        return Err(DeviceError::WrongDevice {
            expected: src,
            found: block.device(),
        });
    }
    if !latency.is_zero() {
        std::thread::sleep(latency);
    }
    let copied = copier(block, dst).map_err(|e| DeviceError::Copy {
        src,
        dst,
        reason: e.to_string(),
    })?;
    if copied.device() != dst {
        return Err(DeviceError::Copy {
            src,
            dst,
            reason: format!("copier left block on {}", copied.device()),
        });
    }
    Ok(copied)
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("latency", &self.latency)
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
