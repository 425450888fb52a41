use tandem_types::{DeviceId, TandemError};

/// Crate-local error type for device queues and links.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DeviceError {
    #[error(transparent)]
    Types(#[from] TandemError),

    #[error("failed to spawn worker for {queue}: {reason}")]
    Spawn { queue: String, reason: String },

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("no link {src} → {dst}")]
    UnknownLink { src: DeviceId, dst: DeviceId },

    #[error("{0} has stopped accepting work")]
    Stopped(String),

    #[error("job on {0} did not complete")]
    Dropped(String),

    #[error("block resident on {found}, expected {expected}")]
    WrongDevice { expected: DeviceId, found: DeviceId },

    #[error("copy {src} → {dst} failed: {reason}")]
    Copy {
        src: DeviceId,
        dst: DeviceId,
        reason: String,
    },
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, DeviceError>;
