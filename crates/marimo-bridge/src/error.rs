//! Error types for the bridge.

use marimo_protocol::{CellId, DecodeError};

/// Failures reported by the notebook host.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The cell is no longer part of the host document (deleted mid-flight).
    #[error("Cell not found in notebook: {0}")]
    CellNotFound(CellId),

    #[error("Execution call failed: {0}")]
    Execution(String),

    #[error("Renderer unavailable: {0}")]
    Renderer(String),
}

/// Failures of the kernel transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Kernel is not running")]
    KernelDown,

    #[error("Command {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Failed to decode kernel payload: {0}")]
    Decode(#[from] DecodeError),
}

/// Error type for bridge operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// A `queued` cell operation arrived without a run id.
    #[error("Queued operation for cell {0} has no run_id")]
    MissingRunId(CellId),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
