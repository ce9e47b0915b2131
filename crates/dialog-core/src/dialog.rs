//! Per-call SIP dialog state machine
//!
//! A [`SipDialog`] never touches the network. Every input (a response, an
//! in-dialog request, a local operation) returns the list of
//! [`DialogAction`]s the user agent has to carry out, which keeps the
//! machine deterministic and testable without sockets.
//!
//! ```text
//! Trying ──► Ringing ──► Answered ──► Terminated
//!    │          │                        ▲
//!    └──────────┴──── >=300 / CANCEL ────┘
//! ```

use std::fmt;
use std::net::SocketAddr;

use tracing::{debug, info, warn};

use cellgate_rtp_core::RtpEndpoint;
use cellgate_sip_core::auth::{self, AuthChallenge, Credentials};
use cellgate_sip_core::builder::{self, DialogParams, LocalIdentity};
use cellgate_sip_core::message::{header_uri, uri_user};
use cellgate_sip_core::{names, Method, SessionDescription, SipMessage};

use crate::errors::{DialogError, DialogResult};
use crate::events::SipEvent;

/// Dialog state; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DialogState {
    Trying,
    Ringing,
    Answered,
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DialogState::Trying => "Trying",
            DialogState::Ringing => "Ringing",
            DialogState::Answered => "Answered",
            DialogState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}

/// Which side sent the INVITE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Side effect requested by the dialog
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialogAction {
    /// Send once
    Send {
        message: SipMessage,
        destination: SocketAddr,
    },
    /// Send and keep retransmitting per Timer A until canceled
    StartRetransmit {
        message: SipMessage,
        destination: SocketAddr,
    },
    /// Stop any INVITE retransmission for this dialog
    CancelRetransmit,
    /// Publish to the subscriber
    Notify(SipEvent),
}

/// Media endpoint from an SDP body, with the payload type negotiated
pub fn endpoint_from_sdp(sdp: &SessionDescription) -> DialogResult<RtpEndpoint> {
    let (address, port) = sdp.media_target()?;
    Ok(RtpEndpoint::new(address, port, sdp.negotiate_payload_type()))
}

/// One SIP dialog (RFC 3261 §12) plus the INVITE transaction that created it
#[derive(Debug, Clone)]
pub struct SipDialog {
    call_id: String,
    direction: Direction,
    state: DialogState,
    identity: LocalIdentity,
    credentials: Option<Credentials>,
    /// Where in-dialog requests go (outbound proxy, or the caller's source)
    peer: SocketAddr,
    local_tag: String,
    remote_tag: Option<String>,
    /// Highest CSeq we have used
    local_cseq: u32,
    /// CSeq of the INVITE that currently owns the dialog
    invite_cseq: u32,
    remote_cseq: u32,
    remote_contact: Option<String>,
    /// Outbound: request URI we dialed. Inbound: caller's From URI.
    target_uri: String,
    /// Last INVITE sent (outbound) or received (inbound)
    invite: SipMessage,
    /// Outbound: the INVITE replaced by a credentialed retry
    superseded_invite: Option<SipMessage>,
    /// Inbound: last response sent to the INVITE
    last_response: Option<SipMessage>,
    /// Outbound: the 2xx that established the dialog
    answer: Option<SipMessage>,
    local_sdp: Option<String>,
    remote_endpoint: Option<RtpEndpoint>,
    auth_handled: bool,
    local_hangup: bool,
    confirmed: bool,
}

impl SipDialog {
    /// Start an outbound call; the returned actions carry the INVITE
    pub fn outbound(
        identity: LocalIdentity,
        credentials: Option<Credentials>,
        target_uri: &str,
        peer: SocketAddr,
        local_sdp: String,
    ) -> (Self, Vec<DialogAction>) {
        let call_id = builder::new_call_id(&identity.host);
        let local_tag = builder::new_tag();
        let invite = builder::invite(
            &identity,
            target_uri,
            &call_id,
            1,
            &local_tag,
            &builder::new_branch(),
            &local_sdp,
            None,
        );
        let dialog = Self {
            call_id,
            direction: Direction::Outbound,
            state: DialogState::Trying,
            identity,
            credentials,
            peer,
            local_tag,
            remote_tag: None,
            local_cseq: 1,
            invite_cseq: 1,
            remote_cseq: 0,
            remote_contact: None,
            target_uri: target_uri.to_string(),
            invite: invite.clone(),
            superseded_invite: None,
            last_response: None,
            answer: None,
            local_sdp: Some(local_sdp),
            remote_endpoint: None,
            auth_handled: false,
            local_hangup: false,
            confirmed: false,
        };
        info!(call_id = %dialog.call_id, target = %target_uri, "placing call");
        let actions = vec![DialogAction::StartRetransmit {
            message: invite,
            destination: peer,
        }];
        (dialog, actions)
    }

    /// Wrap a new inbound INVITE
    pub fn inbound(invite: SipMessage, source: SocketAddr, identity: LocalIdentity) -> DialogResult<Self> {
        let call_id = invite.call_id()?.to_string();
        let cseq = invite.cseq()?;
        let target_uri = invite
            .header(names::FROM)
            .map(|from| header_uri(from).to_string())
            .ok_or(cellgate_sip_core::SipError::MissingHeader(names::FROM))?;
        let remote_endpoint = invite.sdp().and_then(|sdp| endpoint_from_sdp(&sdp).ok());

        Ok(Self {
            call_id,
            direction: Direction::Inbound,
            state: DialogState::Trying,
            identity,
            credentials: None,
            peer: source,
            local_tag: builder::new_tag(),
            remote_tag: invite.from_tag().map(str::to_string),
            local_cseq: 0,
            invite_cseq: cseq.seq,
            remote_cseq: cseq.seq,
            remote_contact: invite.contact_uri().map(str::to_string),
            target_uri,
            invite,
            superseded_invite: None,
            last_response: None,
            answer: None,
            local_sdp: None,
            remote_endpoint,
            auth_handled: false,
            local_hangup: false,
            confirmed: false,
        })
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }

    /// Remote media endpoint: the caller's offer (inbound) or the answer
    /// (outbound, once answered)
    pub fn remote_endpoint(&self) -> Option<RtpEndpoint> {
        self.remote_endpoint
    }

    /// The remote party's user part (the number, for PBX calls)
    pub fn remote_user(&self) -> Option<&str> {
        uri_user(&self.target_uri)
    }

    /// The INVITE that owns the dialog
    pub fn invite(&self) -> &SipMessage {
        &self.invite
    }

    fn send(&self, message: SipMessage) -> DialogAction {
        DialogAction::Send {
            message,
            destination: self.peer,
        }
    }

    fn reply(request: &SipMessage, source: SocketAddr, status: u16, reason: &str) -> DialogAction {
        DialogAction::Send {
            destination: request.response_target(source),
            message: builder::response(request, status, reason, None),
        }
    }

    fn invalid_state(&self, operation: &'static str) -> DialogError {
        DialogError::InvalidState {
            call_id: self.call_id.clone(),
            operation,
            state: self.state.to_string(),
        }
    }

    // ---- UAS side -------------------------------------------------------

    fn respond_to_invite(&mut self, status: u16, reason: &str, body: Option<&str>) -> DialogAction {
        let tag = (status > 100).then_some(self.local_tag.as_str());
        let mut response = builder::response(&self.invite, status, reason, tag);
        if (101..300).contains(&status) {
            response.headers.set(names::CONTACT, self.identity.contact());
        }
        if let Some(body) = body {
            response = response.with_body("application/sdp", body);
        }
        self.last_response = Some(response.clone());
        DialogAction::Send {
            destination: self.invite.response_target(self.peer),
            message: response,
        }
    }

    fn require_pending_inbound(&self, operation: &'static str) -> DialogResult<()> {
        if self.direction != Direction::Inbound
            || matches!(self.state, DialogState::Answered | DialogState::Terminated)
        {
            return Err(self.invalid_state(operation));
        }
        Ok(())
    }

    /// 100 Trying for a fresh inbound INVITE
    pub fn trying(&mut self) -> Vec<DialogAction> {
        vec![self.respond_to_invite(100, "Trying", None)]
    }

    /// 180 Ringing
    pub fn ring(&mut self) -> DialogResult<Vec<DialogAction>> {
        self.require_pending_inbound("ring")?;
        self.state = DialogState::Ringing;
        Ok(vec![self.respond_to_invite(180, "Ringing", None)])
    }

    /// 200 OK with our SDP answer
    pub fn accept(&mut self, local_sdp: String) -> DialogResult<Vec<DialogAction>> {
        self.require_pending_inbound("accept")?;
        let action = self.respond_to_invite(200, "OK", Some(&local_sdp));
        self.local_sdp = Some(local_sdp);
        self.state = DialogState::Answered;
        info!(call_id = %self.call_id, "inbound call answered");
        Ok(vec![action])
    }

    /// Final error response to a pending inbound INVITE
    pub fn reject(&mut self, status: u16, reason: &str) -> DialogResult<Vec<DialogAction>> {
        self.require_pending_inbound("reject")?;
        let action = self.respond_to_invite(status, reason, None);
        self.state = DialogState::Terminated;
        self.local_hangup = true;
        info!(call_id = %self.call_id, status, "inbound call rejected");
        Ok(vec![action])
    }

    // ---- UAC side -------------------------------------------------------

    fn ack_for(&self, response: &SipMessage) -> DialogAction {
        let request_uri = self.remote_contact.as_deref().unwrap_or(&self.target_uri);
        self.send(builder::ack(
            &self.invite,
            response,
            &self.identity,
            request_uri,
            &builder::new_branch(),
        ))
    }

    /// Retransmitted final responses to the replaced INVITE still need their ACK
    fn ack_superseded(&self, response: &SipMessage, status: u16, seq: u32) -> Option<DialogAction> {
        if status < 200 {
            return None;
        }
        let invite = self.superseded_invite.as_ref()?;
        if invite.cseq().ok()?.seq != seq {
            return None;
        }
        Some(self.send(builder::ack(
            invite,
            response,
            &self.identity,
            &self.target_uri,
            &builder::new_branch(),
        )))
    }

    fn dialog_params(&mut self) -> DialogParams {
        self.local_cseq += 1;
        let (local, remote) = match self.direction {
            Direction::Outbound => (
                self.invite.header(names::FROM).unwrap_or_default().to_string(),
                self.answer
                    .as_ref()
                    .and_then(|a| a.header(names::TO))
                    .or_else(|| self.invite.header(names::TO))
                    .unwrap_or_default()
                    .to_string(),
            ),
            Direction::Inbound => {
                let to = self.invite.header(names::TO).unwrap_or_default();
                let local = if self.invite.to_tag().is_some() {
                    to.to_string()
                } else {
                    format!("{to};tag={}", self.local_tag)
                };
                (local, self.invite.header(names::FROM).unwrap_or_default().to_string())
            }
        };
        DialogParams {
            request_uri: self
                .remote_contact
                .clone()
                .unwrap_or_else(|| self.target_uri.clone()),
            local,
            remote,
            call_id: self.call_id.clone(),
            cseq: self.local_cseq,
        }
    }

    fn bye(&mut self) -> DialogAction {
        let params = self.dialog_params();
        let bye = builder::bye(&params, &self.identity, &builder::new_branch());
        self.send(bye)
    }

    /// Feed a response that matched this dialog's Call-ID
    pub fn handle_response(&mut self, response: &SipMessage) -> Vec<DialogAction> {
        let (Some(status), Ok(cseq)) = (response.status(), response.cseq()) else {
            warn!(call_id = %self.call_id, "dropping response without status or CSeq");
            return Vec::new();
        };
        if cseq.method != Method::Invite {
            debug!(call_id = %self.call_id, status, method = %cseq.method, "in-dialog response");
            return Vec::new();
        }
        if self.direction == Direction::Inbound {
            debug!(call_id = %self.call_id, status, "ignoring INVITE response on inbound dialog");
            return Vec::new();
        }
        if cseq.seq != self.invite_cseq {
            debug!(call_id = %self.call_id, status, cseq = cseq.seq, "response to a superseded INVITE");
            return self.ack_superseded(response, status, cseq.seq).into_iter().collect();
        }

        let mut actions = vec![DialogAction::CancelRetransmit];
        match status {
            100..=199 => self.on_provisional(response, status, &mut actions),
            200..=299 => self.on_success(response, &mut actions),
            401 | 407 if !self.auth_handled && self.state < DialogState::Answered && self.credentials.is_some() => {
                self.on_challenge(response, status, &mut actions)
            }
            _ => self.on_failure(response, status, &mut actions),
        }
        actions
    }

    fn on_provisional(&mut self, response: &SipMessage, status: u16, actions: &mut Vec<DialogAction>) {
        if status == 100 || self.state != DialogState::Trying {
            return;
        }
        self.state = DialogState::Ringing;
        self.remote_tag = response.to_tag().map(str::to_string).or(self.remote_tag.take());
        debug!(call_id = %self.call_id, status, "remote ringing");
        actions.push(DialogAction::Notify(SipEvent::CallRinging {
            call_id: self.call_id.clone(),
        }));
    }

    fn on_success(&mut self, response: &SipMessage, actions: &mut Vec<DialogAction>) {
        match self.state {
            DialogState::Answered => {
                debug!(call_id = %self.call_id, "duplicate 200, re-sending ACK");
                actions.push(self.ack_for(response));
                return;
            }
            DialogState::Terminated => {
                // 200 crossed our CANCEL: confirm, then end it properly
                actions.push(self.ack_for(response));
                if self.local_hangup && self.answer.is_none() {
                    self.remote_contact = response.contact_uri().map(str::to_string);
                    self.answer = Some(response.clone());
                    actions.push(self.bye());
                }
                return;
            }
            DialogState::Trying | DialogState::Ringing => {}
        }

        self.remote_tag = response.to_tag().map(str::to_string);
        self.remote_contact = response.contact_uri().map(str::to_string);
        self.answer = Some(response.clone());
        actions.push(self.ack_for(response));

        let endpoint = response
            .sdp()
            .ok_or_else(|| DialogError::Sip(cellgate_sip_core::SipError::InvalidSdp("answer has no SDP".into())))
            .and_then(|sdp| endpoint_from_sdp(&sdp));
        match endpoint {
            Ok(endpoint) => {
                self.state = DialogState::Answered;
                self.remote_endpoint = Some(endpoint);
                info!(call_id = %self.call_id, %endpoint, "call answered");
                actions.push(DialogAction::Notify(SipEvent::CallAnswered {
                    call_id: self.call_id.clone(),
                    endpoint,
                }));
            }
            Err(e) => {
                warn!(call_id = %self.call_id, error = %e, "answer without usable media, hanging up");
                actions.push(self.bye());
                self.state = DialogState::Terminated;
                actions.push(DialogAction::Notify(SipEvent::CallFailed {
                    call_id: self.call_id.clone(),
                    status: 488,
                    reason: e.to_string(),
                }));
            }
        }
    }

    fn on_challenge(&mut self, response: &SipMessage, status: u16, actions: &mut Vec<DialogAction>) {
        let (challenge, credentials) = match (AuthChallenge::from_response(response), self.credentials.clone()) {
            (Ok(challenge), Some(credentials)) => (challenge, credentials),
            _ => return self.on_failure(response, status, actions),
        };
        actions.push(self.ack_for(response));

        let authorization = auth::authorization(&credentials, &challenge, &Method::Invite, &self.target_uri);
        self.auth_handled = true;
        self.local_cseq += 1;
        self.invite_cseq = self.local_cseq;
        let invite = builder::invite(
            &self.identity,
            &self.target_uri,
            &self.call_id,
            self.invite_cseq,
            &self.local_tag,
            &builder::new_branch(),
            self.local_sdp.as_deref().unwrap_or_default(),
            Some(&authorization),
        );
        self.superseded_invite = Some(std::mem::replace(&mut self.invite, invite.clone()));
        debug!(call_id = %self.call_id, status, realm = %challenge.realm, "re-sending INVITE with credentials");
        actions.push(DialogAction::StartRetransmit {
            message: invite,
            destination: self.peer,
        });
    }

    fn on_failure(&mut self, response: &SipMessage, status: u16, actions: &mut Vec<DialogAction>) {
        if self.state == DialogState::Answered {
            debug!(call_id = %self.call_id, status, "ignoring error response after answer");
            return;
        }
        actions.push(self.ack_for(response));
        if self.state == DialogState::Terminated {
            return;
        }
        self.state = DialogState::Terminated;
        if self.local_hangup {
            debug!(call_id = %self.call_id, status, "pending INVITE closed after local hangup");
            return;
        }
        let reason = response.reason().unwrap_or_default().to_string();
        info!(call_id = %self.call_id, status, %reason, "call failed");
        actions.push(DialogAction::Notify(SipEvent::CallFailed {
            call_id: self.call_id.clone(),
            status,
            reason,
        }));
    }

    // ---- requests inside the dialog --------------------------------------

    /// Feed a request that matched this dialog's Call-ID
    pub fn handle_request(&mut self, request: &SipMessage, source: SocketAddr) -> Vec<DialogAction> {
        let Some(method) = request.method() else {
            return Vec::new();
        };
        match method {
            Method::Bye => {
                let mut actions = vec![Self::reply(request, source, 200, "OK")];
                if self.state != DialogState::Terminated {
                    self.state = DialogState::Terminated;
                    info!(call_id = %self.call_id, "remote hangup");
                    actions.push(DialogAction::CancelRetransmit);
                    actions.push(DialogAction::Notify(SipEvent::CallEnded {
                        call_id: self.call_id.clone(),
                        reason: "remote hangup".into(),
                    }));
                }
                actions
            }
            Method::Ack => {
                if self.direction == Direction::Inbound && self.state == DialogState::Answered && !self.confirmed {
                    self.confirmed = true;
                    debug!(call_id = %self.call_id, "ACK received");
                    return vec![DialogAction::Notify(SipEvent::CallConfirmed {
                        call_id: self.call_id.clone(),
                    })];
                }
                Vec::new()
            }
            Method::Cancel => {
                let mut actions = vec![Self::reply(request, source, 200, "OK")];
                if self.direction == Direction::Inbound
                    && matches!(self.state, DialogState::Trying | DialogState::Ringing)
                {
                    actions.push(self.respond_to_invite(487, "Request Terminated", None));
                    self.state = DialogState::Terminated;
                    info!(call_id = %self.call_id, "caller cancelled");
                    actions.push(DialogAction::Notify(SipEvent::CallEnded {
                        call_id: self.call_id.clone(),
                        reason: "cancelled by caller".into(),
                    }));
                }
                actions
            }
            Method::Invite => self.on_invite(request, source),
            Method::Options => vec![Self::reply(request, source, 200, "OK")],
            other => {
                debug!(call_id = %self.call_id, method = %other, "dropping unsupported in-dialog request");
                Vec::new()
            }
        }
    }

    fn on_invite(&mut self, request: &SipMessage, source: SocketAddr) -> Vec<DialogAction> {
        let seq = request.cseq().map(|c| c.seq).unwrap_or_default();
        if self.direction == Direction::Inbound && seq == self.invite_cseq {
            // retransmission: repeat whatever we said last
            debug!(call_id = %self.call_id, "INVITE retransmission");
            return self
                .last_response
                .clone()
                .map(|message| DialogAction::Send {
                    destination: request.response_target(source),
                    message,
                })
                .into_iter()
                .collect();
        }
        if seq <= self.remote_cseq {
            return Vec::new();
        }
        self.remote_cseq = seq;
        match (self.state, self.local_sdp.as_deref()) {
            (DialogState::Answered, Some(sdp)) => {
                // session refresh: keep the media as it is
                debug!(call_id = %self.call_id, "re-INVITE answered with current session");
                let response = builder::response(request, 200, "OK", None)
                    .with_header(names::CONTACT, self.identity.contact())
                    .with_body("application/sdp", sdp);
                vec![DialogAction::Send {
                    destination: request.response_target(source),
                    message: response,
                }]
            }
            _ => vec![Self::reply(request, source, 491, "Request Pending")],
        }
    }

    /// Local hangup: CANCEL a pending outbound call, BYE an answered one,
    /// decline a pending inbound one
    pub fn hangup(&mut self) -> Vec<DialogAction> {
        let actions = match (self.state, self.direction) {
            (DialogState::Terminated, _) => return Vec::new(),
            (DialogState::Answered, _) => vec![DialogAction::CancelRetransmit, self.bye()],
            (_, Direction::Outbound) => {
                vec![DialogAction::CancelRetransmit, self.send(builder::cancel(&self.invite))]
            }
            (_, Direction::Inbound) => vec![self.respond_to_invite(603, "Decline", None)],
        };
        info!(call_id = %self.call_id, state = %self.state, "local hangup");
        self.state = DialogState::Terminated;
        self.local_hangup = true;
        actions
    }
}
