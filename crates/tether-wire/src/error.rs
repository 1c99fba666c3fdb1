//! Encoder and queue errors.

use tether_shm::ShmError;
use thiserror::Error;

/// Errors from encoding, queueing or flushing commands.
#[derive(Debug, Error)]
pub enum WireError {
    /// Queueing this command would make the framed document larger than
    /// the command buffer. Nothing was queued or written.
    #[error("command '{command}' needs {required} bytes, command buffer holds {capacity}")]
    CapacityExceeded {
        /// Wire type of the refused command.
        command: &'static str,
        /// Framed size including this command and the sentinel.
        required: usize,
        /// Command buffer size.
        capacity: usize,
    },
    /// A float parameter was NaN or infinite.
    #[error("command '{command}' parameter {index} is not finite")]
    NonFiniteParameter {
        /// Wire type of the refused command.
        command: &'static str,
        /// Index into the parameter list.
        index: usize,
    },
    /// JSON serialization failed.
    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),
    /// A command document could not be parsed.
    #[error("malformed command document: {reason}")]
    Malformed {
        /// What was wrong.
        reason: String,
    },
    /// The command buffers could not be mapped.
    #[error(transparent)]
    Shm(#[from] ShmError),
}
