//! Error types for layout operations.

use thiserror::Error;

/// Errors that can occur while building or driving a layout engine.
///
/// Caller misuse of the asynchronous mutation API (unknown ids, duplicate ids)
/// is never reported through this type; those commands are absorbed.
#[derive(Error, Debug)]
pub enum LayoutError {
    /// World extent is zero, negative or not finite.
    #[error("invalid world extent: {0}")]
    InvalidExtent(f32),

    /// Worker pool would have no threads.
    #[error("invalid worker count: {0} (must be >= 1)")]
    InvalidWorkerCount(usize),

    /// Tree depth outside the supported range.
    #[error("invalid tree depth: {depth} (must be within 1..={max})")]
    InvalidDepth { depth: u8, max: u8 },

    /// Any other configuration value that cannot be used.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// The simulation or a worker thread could not be started.
    #[error("failed to spawn thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// An internal invariant does not hold (programming defect).
    #[error("layout inconsistency: {message}")]
    Inconsistent { message: String },

    /// Node definitions could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error while reading or writing definitions.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl LayoutError {
    pub(crate) fn inconsistent(message: impl Into<String>) -> Self {
        LayoutError::Inconsistent {
            message: message.into(),
        }
    }
}
