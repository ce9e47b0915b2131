use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::RtpPayloadType;

/// Negotiated remote media endpoint
///
/// The payload type is fixed for the lifetime of a media session once the
/// offer/answer exchange has settled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RtpEndpoint {
    /// Remote media address from the SDP connection line
    pub address: IpAddr,
    /// Remote RTP port from the SDP media line
    pub port: u16,
    /// Negotiated payload type
    pub payload_type: RtpPayloadType,
}

impl RtpEndpoint {
    /// Create an endpoint
    pub fn new(address: IpAddr, port: u16, payload_type: RtpPayloadType) -> Self {
        Self {
            address,
            port,
            payload_type,
        }
    }

    /// Socket address packets are sent to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for RtpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (PT {})", self.socket_addr(), self.payload_type)
    }
}
