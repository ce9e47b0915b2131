//! Request and response builders
//!
//! Every builder is a pure function of its inputs; identifiers (tags,
//! branches, Call-IDs) are generated by the helpers at the bottom and passed
//! in by the caller so that retransmissions reuse them.

use rand::Rng;

use crate::headers::{names, split_list};
use crate::message::{Method, SipMessage};

/// Max-Forwards value on every request
pub const MAX_FORWARDS: u32 = 70;

/// Methods advertised in `Allow`
pub const ALLOWED_METHODS: &str = "INVITE, ACK, BYE, CANCEL, OPTIONS";

/// Local user agent identity used to stamp requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    /// Account user part
    pub username: String,
    /// Registrar / PBX domain
    pub domain: String,
    /// Optional display name for From
    pub display_name: Option<String>,
    /// Host advertised in Via and Contact (public address when known)
    pub host: String,
    /// Port advertised in Via and Contact
    pub port: u16,
    /// `User-Agent` header value
    pub user_agent: String,
}

impl LocalIdentity {
    /// Address of record: `sip:user@domain`
    pub fn aor(&self) -> String {
        format!("sip:{}@{}", self.username, self.domain)
    }

    /// Contact header value
    pub fn contact(&self) -> String {
        format!("<sip:{}@{}:{}>", self.username, self.host, self.port)
    }

    /// From header value with our tag
    pub fn from_header(&self, tag: &str) -> String {
        match &self.display_name {
            Some(name) => format!("\"{name}\" <{}>;tag={tag}", self.aor()),
            None => format!("<{}>;tag={tag}", self.aor()),
        }
    }

    /// Via header value for a new client transaction
    pub fn via(&self, branch: &str) -> String {
        format!("SIP/2.0/UDP {}:{};branch={branch};rport", self.host, self.port)
    }

    /// Registrar request URI: `sip:domain`
    pub fn registrar_uri(&self) -> String {
        format!("sip:{}", self.domain)
    }
}

/// Identifiers for an in-dialog request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogParams {
    /// Remote target (remote Contact, else the original request URI)
    pub request_uri: String,
    /// Our side as it appears in From, including our tag
    pub local: String,
    /// Their side as it appears in To, including their tag when known
    pub remote: String,
    pub call_id: String,
    pub cseq: u32,
}

fn stamp(msg: SipMessage, identity: &LocalIdentity, branch: &str) -> SipMessage {
    msg.with_header(names::VIA, identity.via(branch))
        .with_header(names::MAX_FORWARDS, MAX_FORWARDS.to_string())
}

/// REGISTER (pass `expires = 0` to unregister)
pub fn register(
    identity: &LocalIdentity,
    call_id: &str,
    cseq: u32,
    from_tag: &str,
    branch: &str,
    expires: u32,
    authorization: Option<&(&'static str, String)>,
) -> SipMessage {
    let mut msg = stamp(SipMessage::request(Method::Register, identity.registrar_uri()), identity, branch)
        .with_header(names::FROM, identity.from_header(from_tag))
        .with_header(names::TO, format!("<{}>", identity.aor()))
        .with_header(names::CALL_ID, call_id)
        .with_header(names::CSEQ, format!("{cseq} REGISTER"))
        .with_header(names::CONTACT, identity.contact())
        .with_header(names::EXPIRES, expires.to_string())
        .with_header(names::ALLOW, ALLOWED_METHODS)
        .with_header(names::USER_AGENT, identity.user_agent.clone());
    if let Some((name, value)) = authorization {
        msg.headers.set(name, value.clone());
    }
    msg
}

/// INVITE with an SDP offer
pub fn invite(
    identity: &LocalIdentity,
    target_uri: &str,
    call_id: &str,
    cseq: u32,
    from_tag: &str,
    branch: &str,
    sdp: &str,
    authorization: Option<&(&'static str, String)>,
) -> SipMessage {
    let mut msg = stamp(SipMessage::request(Method::Invite, target_uri), identity, branch)
        .with_header(names::FROM, identity.from_header(from_tag))
        .with_header(names::TO, format!("<{target_uri}>"))
        .with_header(names::CALL_ID, call_id)
        .with_header(names::CSEQ, format!("{cseq} INVITE"))
        .with_header(names::CONTACT, identity.contact())
        .with_header(names::ALLOW, ALLOWED_METHODS)
        .with_header(names::USER_AGENT, identity.user_agent.clone())
        .with_body("application/sdp", sdp);
    if let Some((name, value)) = authorization {
        msg.headers.set(name, value.clone());
    }
    msg
}

/// OPTIONS keepalive / capability probe
pub fn options(
    identity: &LocalIdentity,
    target_uri: &str,
    call_id: &str,
    cseq: u32,
    from_tag: &str,
    branch: &str,
) -> SipMessage {
    stamp(SipMessage::request(Method::Options, target_uri), identity, branch)
        .with_header(names::FROM, identity.from_header(from_tag))
        .with_header(names::TO, format!("<{target_uri}>"))
        .with_header(names::CALL_ID, call_id)
        .with_header(names::CSEQ, format!("{cseq} OPTIONS"))
        .with_header(names::CONTACT, identity.contact())
        .with_header(names::USER_AGENT, identity.user_agent.clone())
}

/// Response to `request`, echoing Via, From, To, Call-ID, CSeq and
/// Record-Route; `to_tag` is added to To when it carries none yet
pub fn response(request: &SipMessage, status: u16, reason: &str, to_tag: Option<&str>) -> SipMessage {
    let mut msg = SipMessage::response(status, reason);
    for name in [names::VIA, names::FROM, names::TO, names::CALL_ID, names::CSEQ, names::RECORD_ROUTE] {
        if let Some(value) = request.header(name) {
            msg.headers.set(name, value);
        }
    }
    if let (Some(tag), None) = (to_tag, request.to_tag()) {
        if let Some(to) = msg.header(names::TO).map(str::to_string) {
            msg.headers.set(names::TO, format!("{to};tag={tag}"));
        }
    }
    msg
}

/// ACK for a final response to `invite`
///
/// For 2xx the ACK is a new transaction sent to the remote target; for
/// non-2xx it reuses the INVITE's branch and request URI. In both cases the
/// CSeq number is the one the response carried.
pub fn ack(
    invite: &SipMessage,
    final_response: &SipMessage,
    identity: &LocalIdentity,
    request_uri: &str,
    branch: &str,
) -> SipMessage {
    let seq = final_response
        .cseq()
        .map(|c| c.seq)
        .or_else(|_| invite.cseq().map(|c| c.seq))
        .unwrap_or(1);
    let success = final_response.status().is_some_and(|s| (200..300).contains(&s));
    let (uri, branch) = if success {
        (request_uri.to_string(), branch.to_string())
    } else {
        (
            invite.request_uri().unwrap_or(request_uri).to_string(),
            invite.via_branch().unwrap_or(branch).to_string(),
        )
    };

    let mut msg = stamp(SipMessage::request(Method::Ack, uri), identity, &branch);
    for (name, source) in [
        (names::FROM, invite),
        (names::TO, final_response),
        (names::CALL_ID, invite),
    ] {
        if let Some(value) = source.header(name) {
            msg.headers.set(name, value);
        }
    }
    msg.headers.set(names::CSEQ, format!("{seq} ACK"));
    if success {
        // route set from the 2xx, reversed for the UAC
        if let Some(rr) = final_response.header(names::RECORD_ROUTE) {
            let mut routes = split_list(rr);
            routes.reverse();
            msg.headers.set(names::ROUTE, routes.join(", "));
        }
    }
    msg
}

/// CANCEL for a pending INVITE: same request URI, top Via, From, To,
/// Call-ID and CSeq number
pub fn cancel(invite: &SipMessage) -> SipMessage {
    let uri = invite.request_uri().unwrap_or_default().to_string();
    let mut msg = SipMessage::request(Method::Cancel, uri);
    if let Some(top) = invite.header(names::VIA).and_then(|v| split_list(v).into_iter().next()) {
        msg.headers.set(names::VIA, top);
    }
    msg.headers.set(names::MAX_FORWARDS, MAX_FORWARDS.to_string());
    for name in [names::FROM, names::TO, names::CALL_ID] {
        if let Some(value) = invite.header(name) {
            msg.headers.set(name, value);
        }
    }
    let seq = invite.cseq().map(|c| c.seq).unwrap_or(1);
    msg.headers.set(names::CSEQ, format!("{seq} CANCEL"));
    msg
}

/// BYE inside an established dialog
pub fn bye(params: &DialogParams, identity: &LocalIdentity, branch: &str) -> SipMessage {
    stamp(SipMessage::request(Method::Bye, params.request_uri.clone()), identity, branch)
        .with_header(names::FROM, params.local.clone())
        .with_header(names::TO, params.remote.clone())
        .with_header(names::CALL_ID, params.call_id.clone())
        .with_header(names::CSEQ, format!("{} BYE", params.cseq))
        .with_header(names::USER_AGENT, identity.user_agent.clone())
}

/// Fresh Via branch with the RFC 3261 magic cookie
pub fn new_branch() -> String {
    format!("z9hG4bK{:016x}", rand::thread_rng().gen::<u64>())
}

/// Fresh From/To tag
pub fn new_tag() -> String {
    format!("{:08x}", rand::thread_rng().gen::<u32>())
}

/// Fresh Call-ID scoped to `host`
pub fn new_call_id(host: &str) -> String {
    format!("{}@{host}", uuid::Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> LocalIdentity {
        LocalIdentity {
            username: "1001".into(),
            domain: "pbx.example.com".into(),
            display_name: None,
            host: "203.0.113.5".into(),
            port: 5060,
            user_agent: "cellgate/test".into(),
        }
    }

    #[test]
    fn test_register_shape() {
        let msg = register(&identity(), "cid", 3, "tag1", "z9hG4bKb", 3600, None);
        let text = msg.to_string();
        assert!(text.starts_with("REGISTER sip:pbx.example.com SIP/2.0\r\n"));
        assert_eq!(msg.header("CSeq"), Some("3 REGISTER"));
        assert_eq!(msg.header("Contact"), Some("<sip:1001@203.0.113.5:5060>"));
        assert_eq!(msg.expires(), Some(3600));
        assert_eq!(msg.via_branch(), Some("z9hG4bKb"));
        let auth = ("Authorization", "Digest x".to_string());
        let msg = register(&identity(), "cid", 4, "tag1", "z9hG4bKc", 0, Some(&auth));
        assert_eq!(msg.header("Authorization"), Some("Digest x"));
        assert_eq!(msg.expires(), Some(0));
    }

    #[test]
    fn test_response_adds_to_tag_and_echoes_vias() {
        let invite = SipMessage::request(Method::Invite, "sip:1001@h")
            .with_header("Via", "SIP/2.0/UDP a;branch=z9hG4bK1, SIP/2.0/UDP b;branch=z9hG4bK2")
            .with_header("From", "<sip:pbx@h>;tag=abc")
            .with_header("To", "<sip:1001@h>")
            .with_header("Call-ID", "c1")
            .with_header("CSeq", "5 INVITE");
        let ringing = response(&invite, 180, "Ringing", Some("xyz"));
        assert_eq!(ringing.status(), Some(180));
        assert_eq!(ringing.to_tag(), Some("xyz"));
        assert_eq!(ringing.header("Via"), invite.header("Via"));
        assert_eq!(ringing.header("CSeq"), Some("5 INVITE"));
    }

    #[test]
    fn test_ack_echoes_response_cseq() {
        let id = identity();
        let invite = invite(&id, "sip:100@pbx", "c1", 2, "ft", "z9hG4bKinv", "v=0\r\n", None);
        let ok = response(&invite, 200, "OK", Some("tt"))
            .with_header("CSeq", "2 INVITE")
            .with_header("Record-Route", "<sip:p1;lr>, <sip:p2;lr>");
        let a = ack(&invite, &ok, &id, "sip:100@10.0.0.9:5060", "z9hG4bKack");
        assert_eq!(a.method(), Some(&Method::Ack));
        assert_eq!(a.header("CSeq"), Some("2 ACK"));
        assert_eq!(a.request_uri(), Some("sip:100@10.0.0.9:5060"));
        assert_eq!(a.via_branch(), Some("z9hG4bKack"));
        assert_eq!(a.to_tag(), Some("tt"));
        assert_eq!(a.header("Route"), Some("<sip:p2;lr>, <sip:p1;lr>"));
        assert!(a.body.is_empty());
    }

    #[test]
    fn test_ack_for_error_reuses_invite_branch() {
        let id = identity();
        let invite = invite(&id, "sip:100@pbx", "c1", 7, "ft", "z9hG4bKinv", "", None);
        let busy = response(&invite, 486, "Busy Here", Some("tt"));
        let a = ack(&invite, &busy, &id, "sip:ignored", "z9hG4bKnew");
        assert_eq!(a.request_uri(), Some("sip:100@pbx"));
        assert_eq!(a.via_branch(), Some("z9hG4bKinv"));
        assert_eq!(a.header("CSeq"), Some("7 ACK"));
    }

    #[test]
    fn test_cancel_matches_invite() {
        let invite = invite(&identity(), "sip:100@pbx", "c9", 11, "ft", "z9hG4bKinv", "", None);
        let c = cancel(&invite);
        assert_eq!(c.request_uri(), Some("sip:100@pbx"));
        assert_eq!(c.via_branch(), Some("z9hG4bKinv"));
        assert_eq!(c.header("CSeq"), Some("11 CANCEL"));
        assert_eq!(c.call_id().unwrap(), "c9");
    }

    #[test]
    fn test_identifiers() {
        assert!(new_branch().starts_with("z9hG4bK"));
        assert_ne!(new_tag(), new_tag());
        assert!(new_call_id("h").ends_with("@h"));
    }
}
