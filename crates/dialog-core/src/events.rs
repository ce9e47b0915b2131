//! Events published by the user agent to its single subscriber

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use cellgate_rtp_core::RtpEndpoint;

/// Registration lifecycle as seen by the subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationState {
    Unregistered,
    Registering,
    Registered,
    /// All attempts used up; carries the last failure reason
    Failed(String),
}

/// Call and registration events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SipEvent {
    /// Registration state changed
    Registration(RegistrationState),

    /// Keepalives went unanswered; the subscriber should reconnect
    ConnectionLost,

    /// New inbound INVITE, already answered with 100 Trying
    IncomingCall {
        call_id: String,
        /// Caller user part (number) from the From header
        from: String,
        /// Called user part from the To header
        to: String,
        /// Value of the configured forwarding header, if present
        forward_to: Option<String>,
        /// Caller's media endpoint with the negotiated payload type
        offer: Option<RtpEndpoint>,
    },

    /// Outbound call got 180/183
    CallRinging { call_id: String },

    /// Outbound call got 200 and was ACKed; media can flow
    CallAnswered { call_id: String, endpoint: RtpEndpoint },

    /// Inbound call we answered received its ACK
    CallConfirmed { call_id: String },

    /// Outbound call ended before answer with a final error response
    CallFailed {
        call_id: String,
        status: u16,
        reason: String,
    },

    /// Dialog ended (BYE, CANCEL, negotiation failure)
    CallEnded { call_id: String, reason: String },
}

impl SipEvent {
    /// Call-ID the event refers to, if it is call-scoped
    pub fn call_id(&self) -> Option<&str> {
        match self {
            SipEvent::Registration(_) | SipEvent::ConnectionLost => None,
            SipEvent::IncomingCall { call_id, .. }
            | SipEvent::CallRinging { call_id }
            | SipEvent::CallAnswered { call_id, .. }
            | SipEvent::CallConfirmed { call_id }
            | SipEvent::CallFailed { call_id, .. }
            | SipEvent::CallEnded { call_id, .. } => Some(call_id),
        }
    }
}

/// Delivery point for [`SipEvent`]s with at most one subscriber
///
/// Publishing never blocks. Events published while nobody subscribed are
/// dropped; subscribing again replaces the previous receiver, so rebinding
/// mid-call loses whatever the old receiver had not drained.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    subscriber: Arc<Mutex<Option<mpsc::UnboundedSender<SipEvent>>>>,
}

impl EventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take over the event stream
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SipEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.subscriber.lock() = Some(tx);
        rx
    }

    pub fn publish(&self, event: SipEvent) {
        let mut subscriber = self.subscriber.lock();
        match subscriber.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    debug!("event subscriber went away");
                    *subscriber = None;
                }
            }
            None => debug!(?event, "no subscriber, dropping event"),
        }
    }
}
