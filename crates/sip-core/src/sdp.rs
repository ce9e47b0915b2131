//! Minimal SDP (RFC 4566) for a single audio stream
//!
//! Only what the gateway needs is read: the connection address, the audio
//! port and the offered payload types. Negotiation is a fixed preference
//! order, not a general offer/answer engine.

use std::net::IpAddr;

use crate::error::{Result, SipError};

/// Payload type for G.711 µ-law
pub const PT_PCMU: u8 = 0;
/// Payload type for G.711 A-law
pub const PT_PCMA: u8 = 8;
/// Payload type for G.722
pub const PT_G722: u8 = 9;
/// Dynamic payload type used for telephone-event
pub const PT_TELEPHONE_EVENT: u8 = 101;

/// Codec preference when answering: PCMA, then PCMU, then G.722
pub const ANSWER_PREFERENCE: [u8; 3] = [PT_PCMA, PT_PCMU, PT_G722];

/// Payload types offered in outgoing INVITEs
pub const DEFAULT_OFFER: [u8; 2] = [PT_PCMA, PT_G722];

fn codec_name(payload_type: u8) -> Option<&'static str> {
    match payload_type {
        PT_PCMU => Some("PCMU"),
        PT_PCMA => Some("PCMA"),
        PT_G722 => Some("G722"),
        _ => None,
    }
}

/// Parsed audio session description
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionDescription {
    /// Media-level connection address, else the session-level one
    pub connection: Option<IpAddr>,
    /// Port from `m=audio`
    pub audio_port: Option<u16>,
    /// Payload types listed on the `m=audio` line, in order
    pub payload_types: Vec<u8>,
    /// `a=rtpmap` entries as (payload type, encoding name)
    pub rtpmap: Vec<(u8, String)>,
}

impl SessionDescription {
    /// Lenient parse; unknown or malformed lines are skipped
    pub fn parse(body: &str) -> Self {
        let mut sdp = Self::default();
        let mut session_connection = None;
        let mut media_connection = None;
        let mut in_audio = false;

        for line in body.lines().map(str::trim) {
            let Some((kind, value)) = line.split_once('=') else {
                continue;
            };
            match kind {
                "m" => {
                    let mut parts = value.split_whitespace();
                    in_audio = parts.next() == Some("audio");
                    if in_audio && sdp.audio_port.is_none() {
                        sdp.audio_port = parts.next().and_then(|p| p.parse().ok());
                        let _proto = parts.next();
                        sdp.payload_types = parts.filter_map(|pt| pt.parse().ok()).collect();
                    }
                }
                "c" => {
                    let addr = value
                        .split_whitespace()
                        .nth(2)
                        .map(|a| a.split('/').next().unwrap_or(a))
                        .and_then(|a| a.parse::<IpAddr>().ok());
                    if in_audio {
                        media_connection = media_connection.or(addr);
                    } else if sdp.audio_port.is_none() {
                        session_connection = session_connection.or(addr);
                    }
                }
                "a" if in_audio => {
                    if let Some(map) = value.strip_prefix("rtpmap:") {
                        let mut parts = map.split_whitespace();
                        let pt = parts.next().and_then(|p| p.parse::<u8>().ok());
                        let name = parts.next().and_then(|n| n.split('/').next());
                        if let (Some(pt), Some(name)) = (pt, name) {
                            sdp.rtpmap.push((pt, name.to_string()));
                        }
                    }
                }
                _ => {}
            }
        }
        sdp.connection = media_connection.or(session_connection);
        sdp
    }

    /// Remote RTP address and port
    pub fn media_target(&self) -> Result<(IpAddr, u16)> {
        let address = self
            .connection
            .ok_or_else(|| SipError::InvalidSdp("no connection address".into()))?;
        match self.audio_port {
            Some(port) if port != 0 => Ok((address, port)),
            Some(_) => Err(SipError::InvalidSdp("audio stream rejected (port 0)".into())),
            None => Err(SipError::InvalidSdp("no audio media line".into())),
        }
    }

    /// Whether the peer offered this payload type, by number or by rtpmap name
    pub fn offers(&self, payload_type: u8) -> bool {
        if self.payload_types.contains(&payload_type) {
            return true;
        }
        codec_name(payload_type).is_some_and(|name| {
            self.rtpmap
                .iter()
                .any(|(_, mapped)| mapped.eq_ignore_ascii_case(name))
        })
    }

    /// Pick the audio payload type per [`ANSWER_PREFERENCE`], PCMA if nothing
    /// recognizable was offered
    pub fn negotiate_payload_type(&self) -> u8 {
        ANSWER_PREFERENCE
            .into_iter()
            .find(|pt| self.offers(*pt))
            .unwrap_or(PT_PCMA)
    }

    /// Whether telephone-event was offered
    pub fn offers_telephone_event(&self) -> bool {
        self.rtpmap
            .iter()
            .any(|(_, name)| name.eq_ignore_ascii_case("telephone-event"))
    }
}

fn build(local_ip: IpAddr, rtp_port: u16, session_id: u64, payload_types: &[u8]) -> String {
    let addr_type = if local_ip.is_ipv4() { "IP4" } else { "IP6" };
    let mut formats: Vec<String> = payload_types.iter().map(u8::to_string).collect();
    formats.push(PT_TELEPHONE_EVENT.to_string());

    let mut sdp = format!(
        "v=0\r\n\
         o=- {session_id} {session_id} IN {addr_type} {local_ip}\r\n\
         s=cellgate\r\n\
         c=IN {addr_type} {local_ip}\r\n\
         t=0 0\r\n\
         m=audio {rtp_port} RTP/AVP {}\r\n",
        formats.join(" ")
    );
    for pt in payload_types {
        if let Some(name) = codec_name(*pt) {
            // G.722 keeps an 8000 RTP clock
            sdp.push_str(&format!("a=rtpmap:{pt} {name}/8000\r\n"));
        }
    }
    sdp.push_str(&format!(
        "a=rtpmap:{PT_TELEPHONE_EVENT} telephone-event/8000\r\n\
         a=fmtp:{PT_TELEPHONE_EVENT} 0-16\r\n\
         a=ptime:20\r\n\
         a=sendrecv\r\n"
    ));
    sdp
}

/// SDP offer for an outgoing INVITE
pub fn build_offer(local_ip: IpAddr, rtp_port: u16, session_id: u64) -> String {
    build(local_ip, rtp_port, session_id, &DEFAULT_OFFER)
}

/// SDP answer carrying only the negotiated codec plus telephone-event
pub fn build_answer(local_ip: IpAddr, rtp_port: u16, session_id: u64, payload_type: u8) -> String {
    build(local_ip, rtp_port, session_id, &[payload_type])
}
