//! Outbound RTP bookkeeping
//!
//! One sequencer per media session. Sequence numbers and timestamps start at
//! random values and wrap; the marker bit is set on the first packet of the
//! stream.

use bytes::Bytes;
use rand::Rng;

use crate::packet::{RtpHeader, RtpPacket};
use crate::{RtpPayloadType, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// Generates headers for a single outbound stream
#[derive(Debug, Clone)]
pub struct RtpSequencer {
    ssrc: RtpSsrc,
    payload_type: RtpPayloadType,
    sequence_number: RtpSequenceNumber,
    timestamp: RtpTimestamp,
    timestamp_step: u32,
    first: bool,
}

impl RtpSequencer {
    /// Sequencer with random SSRC, sequence number and timestamp origin
    pub fn new(payload_type: RtpPayloadType, timestamp_step: u32) -> Self {
        let mut rng = rand::thread_rng();
        Self::with_initial(payload_type, timestamp_step, rng.gen(), rng.gen(), rng.gen())
    }

    /// Sequencer with explicit starting values
    pub fn with_initial(
        payload_type: RtpPayloadType,
        timestamp_step: u32,
        ssrc: RtpSsrc,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
    ) -> Self {
        Self {
            ssrc,
            payload_type,
            sequence_number,
            timestamp,
            timestamp_step,
            first: true,
        }
    }

    /// Stream SSRC
    pub fn ssrc(&self) -> RtpSsrc {
        self.ssrc
    }

    /// Sequence number the next packet will carry
    pub fn next_sequence_number(&self) -> RtpSequenceNumber {
        self.sequence_number
    }

    /// Build the next packet and advance by one frame
    pub fn next_packet(&mut self, payload: impl Into<Bytes>) -> RtpPacket {
        let mut header = RtpHeader::new(
            self.payload_type,
            self.sequence_number,
            self.timestamp,
            self.ssrc,
        );
        header.marker = self.first;
        self.first = false;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.timestamp_step);
        RtpPacket::new(header, payload)
    }
}
