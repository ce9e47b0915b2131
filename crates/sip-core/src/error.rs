use thiserror::Error;

/// Errors produced while parsing or interpreting SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SipError {
    /// No `\r\n\r\n` header/body boundary, or not UTF-8 text
    #[error("not a SIP message")]
    NotSipMessage,

    /// Start line is neither a request line nor a status line
    #[error("Invalid start line: {0}")]
    InvalidStartLine(String),

    /// A required header is absent
    #[error("Missing header: {0}")]
    MissingHeader(&'static str),

    /// A header is present but its value cannot be used
    #[error("Invalid {name} header: {value}")]
    InvalidHeader { name: &'static str, value: String },

    /// SDP body lacks usable media information
    #[error("Invalid SDP: {0}")]
    InvalidSdp(String),

    /// Authentication challenge that cannot be answered
    #[error("Unsupported authentication challenge: {0}")]
    UnsupportedChallenge(String),
}

impl SipError {
    pub(crate) fn invalid_header(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidHeader {
            name,
            value: value.into(),
        }
    }
}

/// Result type for SIP operations
pub type Result<T> = std::result::Result<T, SipError>;
