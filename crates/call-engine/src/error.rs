//! Error types for call-engine

use thiserror::Error;

use cellgate_dialog_core::DialogError;
use cellgate_media_core::MediaError;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors surfaced by the orchestrator and its collaborators
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A bridge is already in progress
    #[error("Gateway busy ({state})")]
    Busy { state: String },

    #[error("SIP error: {0}")]
    Sip(#[from] DialogError),

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    /// The cellular leg refused an operation
    #[error("Cellular leg error: {0}")]
    Cellular(String),

    /// No usable media description
    #[error("Negotiation failed: {0}")]
    Negotiation(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
