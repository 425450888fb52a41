//! `tandem-device`: simulated accelerators with in-order command queues.
//!
//! Each [`Device`] executes the closures issued to it on a dedicated worker
//! thread, one at a time and in issue order, the way a device stream
//! serializes kernels. Each [`Link`] is an independent copy engine that
//! moves [`tandem_types::Block`]s from one device's memory space to
//! another's. Issuing work returns a [`Pending`] handle immediately.
//!
//! ```text
//!            submit()                        submit()
//!               │                               │
//!     ┌─────────▼────────┐  Link A→B  ┌─────────▼────────┐
//!     │ accel:0 queue    │──────────▶│ accel:1 queue    │
//!     │ (worker thread)  │◀──────────│ (worker thread)  │
//!     └──────────────────┘  Link B→A  └──────────────────┘
//! ```

pub mod device;
pub mod error;
pub mod events;
pub mod link;
pub mod pending;
mod queue;

// ── Public re-exports ─────────────────────────────────────────────────────────

pub use device::Device;
pub use error::{DeviceError, Result};
pub use events::DeviceEvent;
pub use link::{default_copier, Copier, Link};
pub use pending::Pending;

use std::collections::BTreeMap;

use tokio::sync::broadcast;
use tracing::info;

use tandem_types::config::DeviceConfig;
use tandem_types::{DeviceId, TandemError};

/// Event buffer. Slow subscribers lag rather than stall the workers.
const EVENT_CAPACITY: usize = 256;

// ── Mesh ──────────────────────────────────────────────────────────────────────

/// A fixed set of devices plus one link for every ordered device pair.
pub struct Mesh {
    devices: BTreeMap<DeviceId, Device>,
    links: BTreeMap<(DeviceId, DeviceId), Link>,
    events: broadcast::Sender<DeviceEvent>,
}

impl Mesh {
    pub fn spawn(ids: &[DeviceId], config: &DeviceConfig) -> Result<Self> {
        Self::spawn_with_copier(ids, config, default_copier())
    }

    /// Like [`Mesh::spawn`], but every link copies through `copier`.
    pub fn spawn_with_copier(
        ids: &[DeviceId],
        config: &DeviceConfig,
        copier: Copier,
    ) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut devices = BTreeMap::new();
        for &id in ids {
            if id.is_host() {
                return Err(TandemError::Config("the host is not a mesh device".into()).into());
            }
            if devices.contains_key(&id) {
                return Err(TandemError::Config(format!("device {id} listed twice")).into());
            }
            devices.insert(id, Device::spawn(id, config, events.clone())?);
        }

        let mut links = BTreeMap::new();
        for &src in ids {
            for &dst in ids {
                if src != dst {
                    let link = Link::with_copier(
                        src,
                        dst,
                        config,
                        events.clone(),
                        copier.clone(),
                    )?;
                    links.insert((src, dst), link);
                }
            }
        }

        info!(
            devices = devices.len(),
            links = links.len(),
            queue_depth = config.queue_depth,
            link_latency_us = config.link_latency_us,
            "device mesh up"
        );

        Ok(Self { devices, links, events })
    }

    pub fn device(&self, id: DeviceId) -> Result<&Device> {
        self.devices.get(&id).ok_or(DeviceError::UnknownDevice(id))
    }

    pub fn link(&self, src: DeviceId, dst: DeviceId) -> Result<&Link> {
        self.links
            .get(&(src, dst))
            .ok_or(DeviceError::UnknownLink { src, dst })
    }

    pub fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.keys().copied().collect()
    }

    /// Receive every [`DeviceEvent`] emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}

impl std::fmt::Debug for Mesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mesh")
            .field("devices", &self.device_ids())
            .field("links", &self.links.len())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_types::Block;

    const A: DeviceId = DeviceId::Accel(0);
    const B: DeviceId = DeviceId::Accel(1);

    #[test]
    fn builds_links_for_every_ordered_pair() {
        let mesh = Mesh::spawn(&[A, B], &DeviceConfig::default()).unwrap();
        assert_eq!(mesh.device_ids(), vec![A, B]);
        assert!(mesh.link(A, B).is_ok());
        assert!(mesh.link(B, A).is_ok());
        assert!(matches!(mesh.link(A, A), Err(DeviceError::UnknownLink { .. })));
        assert!(matches!(
            mesh.device(DeviceId::Accel(7)),
            Err(DeviceError::UnknownDevice(DeviceId::Accel(7)))
        ));
    }

    #[test]
    fn rejects_host_and_duplicates() {
        let cfg = DeviceConfig::default();
        assert!(Mesh::spawn(&[DeviceId::Host, B], &cfg).is_err());
        assert!(Mesh::spawn(&[A, A], &cfg).is_err());
    }

    #[tokio::test]
    async fn devices_and_links_cooperate() {
        let mesh = Mesh::spawn(&[A, B], &DeviceConfig::default()).unwrap();
        let mut events = mesh.subscribe();

        let doubled = mesh
            .device(A)
            .unwrap()
            .run(|| {
                let mut b = Block::new(A, vec![1, 2], vec![1.0, 2.0]).unwrap();
                b.data_mut().iter_mut().for_each(|v| *v *= 2.0);
                b
            })
            .await
            .unwrap();

        let moved = mesh
            .link(A, B)
            .unwrap()
            .transfer(doubled)
            .await
            .unwrap()
            .wait()
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.device(), B);
        assert_eq!(moved.data(), &[2.0, 4.0]);

        let mut saw_transfer = false;
        while let Ok(ev) = events.try_recv() {
            if let DeviceEvent::TransferCompleted { bytes, .. } = ev {
                assert_eq!(bytes, 8);
                saw_transfer = true;
            }
        }
        assert!(saw_transfer);
    }
}
