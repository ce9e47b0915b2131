//! SIP message model and text codec
//!
//! A message is a start line, a [`Headers`] map and an opaque body. Parsing
//! splits on the first blank line; serialization always rewrites
//! `Content-Length` from the body actually carried.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use tracing::trace;

use crate::error::{Result, SipError};
use crate::headers::{names, param, split_list, Headers};
use crate::sdp::SessionDescription;

/// Protocol version token
pub const SIP_VERSION: &str = "SIP/2.0";

/// SIP request methods
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    /// Any other method, kept verbatim
    Other(String),
}

impl Method {
    /// Wire spelling
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Other(other) => other,
        }
    }
}

impl FromStr for Method {
    type Err = SipError;

    fn from_str(s: &str) -> Result<Self> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_alphabetic() || b == b'-') {
            return Err(SipError::InvalidStartLine(s.to_string()));
        }
        Ok(match s.to_ascii_uppercase().as_str() {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            _ => Method::Other(s.to_string()),
        })
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First line of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    /// `METHOD uri SIP/2.0`
    Request { method: Method, uri: String },
    /// `SIP/2.0 code reason`
    Response { status: u16, reason: String },
}

impl fmt::Display for StartLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartLine::Request { method, uri } => write!(f, "{method} {uri} {SIP_VERSION}"),
            StartLine::Response { status, reason } => write!(f, "{SIP_VERSION} {status} {reason}"),
        }
    }
}

impl FromStr for StartLine {
    type Err = SipError;

    fn from_str(line: &str) -> Result<Self> {
        let invalid = || SipError::InvalidStartLine(line.to_string());
        if let Some(rest) = line.strip_prefix(SIP_VERSION) {
            let rest = rest.trim_start();
            let (code, reason) = rest.split_once(' ').unwrap_or((rest, ""));
            let status: u16 = code.parse().map_err(|_| invalid())?;
            if !(100..700).contains(&status) {
                return Err(invalid());
            }
            return Ok(StartLine::Response {
                status,
                reason: reason.trim().to_string(),
            });
        }

        let mut parts = line.split_whitespace();
        let (Some(method), Some(uri), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if version != SIP_VERSION {
            return Err(invalid());
        }
        Ok(StartLine::Request {
            method: method.parse()?,
            uri: uri.to_string(),
        })
    }
}

/// Parsed `CSeq` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

/// A SIP request or response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    pub start_line: StartLine,
    pub headers: Headers,
    pub body: String,
}

impl SipMessage {
    /// New request with no headers
    pub fn request(method: Method, uri: impl Into<String>) -> Self {
        Self {
            start_line: StartLine::Request {
                method,
                uri: uri.into(),
            },
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// New response with no headers
    pub fn response(status: u16, reason: impl Into<String>) -> Self {
        Self {
            start_line: StartLine::Response {
                status,
                reason: reason.into(),
            },
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Parse a datagram
    pub fn parse(data: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(data).map_err(|_| SipError::NotSipMessage)?;
        let (head, body) = text.split_once("\r\n\r\n").ok_or(SipError::NotSipMessage)?;

        let mut lines = head.split("\r\n");
        let first = lines.next().unwrap_or_default().trim();
        let start_line: StartLine = first.parse()?;

        let mut headers = Headers::new();
        let mut pending: Option<(String, String)> = None;
        for line in lines {
            if line.starts_with(' ') || line.starts_with('\t') {
                // folded continuation line
                if let Some((_, value)) = pending.as_mut() {
                    value.push(' ');
                    value.push_str(line.trim());
                }
                continue;
            }
            if let Some((name, value)) = pending.take() {
                headers.append(&name, value);
            }
            match line.split_once(':') {
                Some((name, value)) => pending = Some((name.trim().to_string(), value.trim().to_string())),
                None if !line.is_empty() => trace!(line, "skipping malformed header line"),
                None => {}
            }
        }
        if let Some((name, value)) = pending {
            headers.append(&name, value);
        }

        // honor Content-Length when it is shorter than what arrived
        let body = match headers
            .get(names::CONTENT_LENGTH)
            .and_then(|len| len.trim().parse::<usize>().ok())
        {
            Some(len) if len < body.len() && body.is_char_boundary(len) => &body[..len],
            _ => body,
        };

        Ok(Self {
            start_line,
            headers,
            body: body.to_string(),
        })
    }

    /// Serialize for the wire
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }

    /// Header value shortcut
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Set a header, builder style
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Attach a body and its content type
    pub fn with_body(mut self, content_type: &str, body: impl Into<String>) -> Self {
        self.headers.set(names::CONTENT_TYPE, content_type);
        self.body = body.into();
        self
    }

    pub fn is_request(&self) -> bool {
        matches!(self.start_line, StartLine::Request { .. })
    }

    pub fn is_response(&self) -> bool {
        !self.is_request()
    }

    /// Request method, if this is a request
    pub fn method(&self) -> Option<&Method> {
        match &self.start_line {
            StartLine::Request { method, .. } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    /// Request URI, if this is a request
    pub fn request_uri(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Request { uri, .. } => Some(uri),
            StartLine::Response { .. } => None,
        }
    }

    /// Status code, if this is a response
    pub fn status(&self) -> Option<u16> {
        match &self.start_line {
            StartLine::Response { status, .. } => Some(*status),
            StartLine::Request { .. } => None,
        }
    }

    /// Reason phrase, if this is a response
    pub fn reason(&self) -> Option<&str> {
        match &self.start_line {
            StartLine::Response { reason, .. } => Some(reason),
            StartLine::Request { .. } => None,
        }
    }

    pub fn call_id(&self) -> Result<&str> {
        self.header(names::CALL_ID)
            .filter(|id| !id.is_empty())
            .ok_or(SipError::MissingHeader(names::CALL_ID))
    }

    pub fn cseq(&self) -> Result<CSeq> {
        let value = self
            .header(names::CSEQ)
            .ok_or(SipError::MissingHeader(names::CSEQ))?;
        let mut parts = value.split_whitespace();
        let seq = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| SipError::invalid_header(names::CSEQ, value))?;
        let method = parts
            .next()
            .ok_or_else(|| SipError::invalid_header(names::CSEQ, value))?
            .parse()?;
        Ok(CSeq { seq, method })
    }

    /// Method named in the CSeq header (what a response answers)
    pub fn cseq_method(&self) -> Option<Method> {
        self.cseq().ok().map(|c| c.method)
    }

    pub fn from_tag(&self) -> Option<&str> {
        self.header(names::FROM).and_then(|v| param(v, "tag"))
    }

    pub fn to_tag(&self) -> Option<&str> {
        self.header(names::TO).and_then(|v| param(v, "tag"))
    }

    /// Branch of the topmost Via
    pub fn via_branch(&self) -> Option<&str> {
        let via = self.header(names::VIA)?;
        let top = split_list(via).into_iter().next()?;
        param(top, "branch")
    }

    /// URI inside the first Contact header
    pub fn contact_uri(&self) -> Option<&str> {
        let contact = self.header(names::CONTACT)?;
        let first = split_list(contact).into_iter().next()?;
        Some(header_uri(first))
    }

    /// `host:port` of the Contact URI, defaulting the port to 5060
    pub fn contact_host_port(&self) -> Option<(String, u16)> {
        self.contact_uri().and_then(uri_host_port)
    }

    /// Content of an `Expires` header, if numeric
    pub fn expires(&self) -> Option<u32> {
        self.header(names::EXPIRES)?.trim().parse().ok()
    }

    /// SDP body, if the message carries one
    pub fn sdp(&self) -> Option<SessionDescription> {
        let is_sdp = self
            .header(names::CONTENT_TYPE)
            .map_or(true, |ct| ct.to_ascii_lowercase().starts_with("application/sdp"));
        if !is_sdp || self.body.trim().is_empty() {
            return None;
        }
        Some(SessionDescription::parse(&self.body))
    }

    /// Socket address the response should go back to, from the top Via
    /// (`received`/`rport` honored), falling back to `source`
    pub fn response_target(&self, source: SocketAddr) -> SocketAddr {
        let Some(top) = self
            .header(names::VIA)
            .and_then(|via| split_list(via).into_iter().next())
        else {
            return source;
        };
        let rport = param(top, "rport").and_then(|p| p.parse::<u16>().ok());
        let received = param(top, "received").and_then(|r| r.parse::<IpAddr>().ok());
        match (received, rport) {
            (Some(ip), Some(port)) => SocketAddr::new(ip, port),
            (Some(ip), None) => SocketAddr::new(ip, source.port()),
            _ => source,
        }
    }
}

impl fmt::Display for SipMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.start_line)?;
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case(names::CONTENT_LENGTH) {
                continue;
            }
            write!(f, "{name}: {value}\r\n")?;
        }
        write!(f, "{}: {}\r\n\r\n{}", names::CONTENT_LENGTH, self.body.len(), self.body)
    }
}

/// URI of a name-addr (`"Name" <sip:u@h>;tag=x`) or addr-spec header value
pub fn header_uri(value: &str) -> &str {
    if let (Some(start), Some(end)) = (value.find('<'), value.find('>')) {
        if start < end {
            return &value[start + 1..end];
        }
    }
    value.split(';').next().unwrap_or(value).trim()
}

/// User part of a SIP URI (`sip:user@host` → `user`)
pub fn uri_user(uri: &str) -> Option<&str> {
    let rest = uri
        .strip_prefix("sip:")
        .or_else(|| uri.strip_prefix("sips:"))
        .or_else(|| uri.strip_prefix("tel:"))
        .unwrap_or(uri);
    let user = match rest.split_once('@') {
        Some((user, _)) => user,
        None if uri.starts_with("tel:") => rest.split(';').next().unwrap_or(rest),
        None => return None,
    };
    let user = user.split(';').next().unwrap_or(user);
    (!user.is_empty()).then_some(user)
}

/// Host and port of a SIP URI, port defaulting to 5060
pub fn uri_host_port(uri: &str) -> Option<(String, u16)> {
    let rest = uri
        .strip_prefix("sip:")
        .or_else(|| uri.strip_prefix("sips:"))
        .unwrap_or(uri);
    let host_part = rest.rsplit_once('@').map_or(rest, |(_, h)| h);
    let host_part = host_part
        .split(|c: char| c == ';' || c == '?' || c == '>')
        .next()
        .unwrap_or(host_part);
    if host_part.is_empty() {
        return None;
    }
    if let Some(stripped) = host_part.strip_prefix('[') {
        // IPv6 reference
        let (host, after) = stripped.split_once(']')?;
        let port = after.strip_prefix(':').and_then(|p| p.parse().ok()).unwrap_or(5060);
        return Some((host.to_string(), port));
    }
    match host_part.split_once(':') {
        Some((host, port)) => Some((host.to_string(), port.parse().ok()?)),
        None => Some((host_part.to_string(), 5060)),
    }
}
