//! Minimal STUN (RFC 5389) Binding client for learning the public address

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::{DialogError, DialogResult};

/// STUN message header size (20 bytes)
const HEADER_SIZE: usize = 20;

/// STUN magic cookie value (RFC 5389)
pub const MAGIC_COOKIE: u32 = 0x2112_A442;

const BINDING_REQUEST: u16 = 0x0001;
const BINDING_RESPONSE: u16 = 0x0101;
const BINDING_ERROR_RESPONSE: u16 = 0x0111;

const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// 96-bit transaction identifier
pub type TransactionId = [u8; 12];

fn stun_error(msg: impl Into<String>) -> DialogError {
    DialogError::Stun(msg.into())
}

pub fn new_transaction_id() -> TransactionId {
    rand::thread_rng().gen()
}

/// Binding request without attributes
pub fn binding_request(transaction_id: &TransactionId) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_u16(BINDING_REQUEST);
    buf.put_u16(0);
    buf.put_u32(MAGIC_COOKIE);
    buf.put_slice(transaction_id);
    buf.freeze()
}

fn decode_address(mut value: &[u8], transaction_id: &TransactionId, xor: bool) -> DialogResult<SocketAddr> {
    if value.len() < 4 {
        return Err(stun_error("address attribute too short"));
    }
    value.advance(1);
    let family = value.get_u8();
    let mut port = value.get_u16();
    if xor {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }
    let ip = match family {
        1 if value.len() >= 4 => {
            let mut raw = value.get_u32();
            if xor {
                raw ^= MAGIC_COOKIE;
            }
            IpAddr::V4(Ipv4Addr::from(raw))
        }
        2 if value.len() >= 16 => {
            let mut octets = [0u8; 16];
            value.copy_to_slice(&mut octets);
            if xor {
                let mut mask = [0u8; 16];
                mask[..4].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
                mask[4..].copy_from_slice(transaction_id);
                for (byte, m) in octets.iter_mut().zip(mask) {
                    *byte ^= m;
                }
            }
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        _ => return Err(stun_error(format!("unsupported address family {family}"))),
    };
    Ok(SocketAddr::new(ip, port))
}

/// Mapped address from a Binding success response; XOR-MAPPED-ADDRESS is
/// preferred over the legacy MAPPED-ADDRESS
pub fn parse_binding_response(data: &[u8], transaction_id: &TransactionId) -> DialogResult<SocketAddr> {
    if data.len() < HEADER_SIZE {
        return Err(stun_error("packet too small for STUN header"));
    }
    let mut header = &data[..HEADER_SIZE];
    let msg_type = header.get_u16();
    let length = header.get_u16() as usize;
    if header.get_u32() != MAGIC_COOKIE {
        return Err(stun_error("invalid magic cookie"));
    }
    if header != transaction_id {
        return Err(stun_error("transaction id mismatch"));
    }
    match msg_type {
        BINDING_RESPONSE => {}
        BINDING_ERROR_RESPONSE => return Err(stun_error("binding error response")),
        other => return Err(stun_error(format!("unexpected message type {other:#06x}"))),
    }
    if data.len() < HEADER_SIZE + length {
        return Err(stun_error("truncated attributes"));
    }

    let mut attributes = &data[HEADER_SIZE..HEADER_SIZE + length];
    let mut mapped = None;
    while attributes.len() >= 4 {
        let attr_type = attributes.get_u16();
        let attr_len = attributes.get_u16() as usize;
        if attributes.len() < attr_len {
            return Err(stun_error("incomplete attribute value"));
        }
        let value = &attributes[..attr_len];
        match attr_type {
            ATTR_XOR_MAPPED_ADDRESS => return decode_address(value, transaction_id, true),
            ATTR_MAPPED_ADDRESS => mapped = Some(decode_address(value, transaction_id, false)?),
            _ => {}
        }
        let padded = (attr_len + 3) & !3;
        attributes.advance(padded.min(attributes.len()));
    }
    mapped.ok_or_else(|| stun_error("no mapped address in response"))
}

/// One Binding transaction against `server`
pub async fn query(socket: &UdpSocket, server: SocketAddr, timeout: Duration) -> DialogResult<SocketAddr> {
    let transaction_id = new_transaction_id();
    socket.send_to(&binding_request(&transaction_id), server).await?;

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 576];
    loop {
        let (len, from) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf))
            .await
            .map_err(|_| stun_error(format!("no response from {server}")))??;
        if from != server {
            debug!(%from, "ignoring datagram during STUN discovery");
            continue;
        }
        match parse_binding_response(&buf[..len], &transaction_id) {
            Ok(mapped) => return Ok(mapped),
            Err(e) => debug!(%server, error = %e, "ignoring STUN reply"),
        }
    }
}

/// Try each `host:port` server in order until one answers
pub async fn discover(socket: &UdpSocket, servers: &[String], timeout: Duration) -> DialogResult<SocketAddr> {
    for server in servers {
        let resolved = match tokio::net::lookup_host(server.as_str()).await {
            Ok(mut addrs) => addrs.find(SocketAddr::is_ipv4),
            Err(e) => {
                warn!(%server, error = %e, "cannot resolve STUN server");
                continue;
            }
        };
        let Some(addr) = resolved else {
            continue;
        };
        match query(socket, addr, timeout).await {
            Ok(mapped) => {
                info!(%server, %mapped, "public address discovered");
                return Ok(mapped);
            }
            Err(e) => warn!(%server, error = %e, "STUN query failed"),
        }
    }
    Err(stun_error("no STUN server answered"))
}
