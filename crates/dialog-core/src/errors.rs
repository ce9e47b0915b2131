//! Error types for dialog-core

use thiserror::Error;

use cellgate_sip_core::SipError;

/// Errors surfaced by the SIP user agent
#[derive(Error, Debug)]
pub enum DialogError {
    /// Socket bind/send/receive failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed or unusable SIP content
    #[error("SIP error: {0}")]
    Sip(#[from] SipError),

    /// Transport task is gone
    #[error("Transport closed")]
    TransportClosed,

    /// Registration did not succeed within the allowed attempts
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    /// No dialog with this Call-ID
    #[error("Unknown dialog: {0}")]
    UnknownDialog(String),

    /// Operation not valid in the dialog's current state
    #[error("Dialog {call_id} cannot {operation} in state {state}")]
    InvalidState {
        call_id: String,
        operation: &'static str,
        state: String,
    },

    /// STUN discovery failed against every server
    #[error("STUN error: {0}")]
    Stun(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for dialog-core operations
pub type DialogResult<T> = std::result::Result<T, DialogError>;
