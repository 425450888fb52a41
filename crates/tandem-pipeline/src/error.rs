use tandem_types::StageId;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("{stage} failed on shard {shard}: {reason}")]
    StageExecution {
        stage: StageId,
        shard: usize,
        reason: String,
    },

    #[error("transfer of shard {shard} failed: {reason}")]
    Transfer { shard: usize, reason: String },

    #[error("shard {shard} output has row shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        shard: usize,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("scheduling error: {0}")]
    Scheduling(String),

    #[error("execution error: {0}")]
    Execution(String),

    #[error("invalid phase transition: {from} → {to}")]
    InvalidTransition { from: String, to: String },
}

impl PipelineError {
    /// Shard index attached to the failure, if any.
    pub fn shard(&self) -> Option<usize> {
        match self {
            Self::StageExecution { shard, .. }
            | Self::Transfer { shard, .. }
            | Self::ShapeMismatch { shard, .. } => Some(*shard),
            _ => None,
        }
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
