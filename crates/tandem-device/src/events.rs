use tandem_types::DeviceId;

/// Observability events emitted by device queues and links.
/// Nothing in the scheduler depends on them.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A job finished successfully on a device queue. `seq` counts jobs in
    /// issue order across completed, failed and panicked jobs.
    JobCompleted { device: DeviceId, seq: u64 },

    /// A job ran but its result reported a failure.
    JobFailed {
        device: DeviceId,
        seq: u64,
        reason: String,
    },

    /// A job panicked; its `Pending` resolves to `DeviceError::Dropped`.
    JobPanicked {
        device: DeviceId,
        seq: u64,
        message: String,
    },

    /// A block arrived on its destination device.
    TransferCompleted {
        src: DeviceId,
        dst: DeviceId,
        bytes: usize,
    },

    /// A copy was rejected or failed.
    TransferFailed {
        src: DeviceId,
        dst: DeviceId,
        reason: String,
    },
}
