// Global error type shared by every tandem crate.

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TandemError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("shape error: {0}")]
    Shape(String),

    #[error("device error: {0}")]
    Device(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, TandemError>;
