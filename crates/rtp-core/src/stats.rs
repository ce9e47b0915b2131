//! Receive-side RTP statistics
//!
//! Tracks what the media session sees on its socket and classifies each
//! packet so the receive loop can decide whether it feeds the jitter buffer.

use serde::Serialize;
use tracing::trace;

use crate::packet::RtpHeader;
use crate::{RtpPayloadType, RtpSequenceNumber, TELEPHONE_EVENT_PT};

/// What the receive path should do with a packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// New audio for the negotiated payload type
    Accept,
    /// Already seen within the recent window
    Duplicate,
    /// RFC 4733 DTMF event, not audio
    TelephoneEvent,
    /// Audio in a payload type other than the negotiated one
    PayloadTypeMismatch,
}

/// RTP packet statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RtpStats {
    /// Total number of RTP packets received
    pub packets_received: u64,

    /// Total number of payload bytes received
    pub bytes_received: u64,

    /// Total number of RTP packets sent
    pub packets_sent: u64,

    /// Total number of payload bytes sent
    pub bytes_sent: u64,

    /// Duplicate packets received
    pub packets_duplicated: u64,

    /// Packets arriving with a sequence number older than the highest seen
    pub packets_out_of_order: u64,

    /// Sequence numbers skipped over (estimated loss)
    pub packets_lost: u64,

    /// Packets with an unexpected payload type
    pub payload_type_mismatches: u64,

    /// Telephone-event packets ignored
    pub telephone_events: u64,

    /// Highest sequence number seen
    #[serde(skip)]
    highest_seq: Option<RtpSequenceNumber>,

    /// Bit `n` set means `highest_seq - n` has been received
    #[serde(skip)]
    window: u64,
}

impl RtpStats {
    /// Empty statistics
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest sequence number seen so far
    pub fn highest_sequence(&self) -> Option<RtpSequenceNumber> {
        self.highest_seq
    }

    /// Account for a sent packet
    pub fn record_sent(&mut self, payload_len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += payload_len as u64;
    }

    /// Account for a received packet and classify it
    pub fn record_received(
        &mut self,
        header: &RtpHeader,
        payload_len: usize,
        expected_payload_type: RtpPayloadType,
    ) -> ReceiveOutcome {
        self.packets_received += 1;
        self.bytes_received += payload_len as u64;

        if header.payload_type == TELEPHONE_EVENT_PT {
            self.telephone_events += 1;
            return ReceiveOutcome::TelephoneEvent;
        }
        if header.payload_type != expected_payload_type {
            self.payload_type_mismatches += 1;
            return ReceiveOutcome::PayloadTypeMismatch;
        }

        let seq = header.sequence_number;
        let Some(highest) = self.highest_seq else {
            self.highest_seq = Some(seq);
            self.window = 1;
            return ReceiveOutcome::Accept;
        };

        let ahead = seq.wrapping_sub(highest);
        if ahead == 0 {
            self.packets_duplicated += 1;
            return ReceiveOutcome::Duplicate;
        }
        if ahead < 0x8000 {
            // newer packet
            if ahead > 1 {
                trace!(expected = highest.wrapping_add(1), got = seq, "RTP sequence gap");
            }
            self.packets_lost += u64::from(ahead - 1);
            self.window = if ahead >= 64 { 1 } else { (self.window << ahead) | 1 };
            self.highest_seq = Some(seq);
            return ReceiveOutcome::Accept;
        }

        let behind = highest.wrapping_sub(seq);
        if behind < 64 {
            let bit = 1u64 << behind;
            if self.window & bit != 0 {
                self.packets_duplicated += 1;
                return ReceiveOutcome::Duplicate;
            }
            self.window |= bit;
            self.packets_lost = self.packets_lost.saturating_sub(1);
        }
        self.packets_out_of_order += 1;
        ReceiveOutcome::Accept
    }
}
