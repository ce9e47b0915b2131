//! RTP header and packet (RFC 3550 §5.1)
//!
//! Outbound packets always carry the fixed 12-byte header with no CSRC list
//! and no extension. Inbound parsing accepts the full format: the CSRC list is
//! kept, a header extension is skipped and padding is stripped from the
//! payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, RtpError};
use crate::{RtpPayloadType, RtpSequenceNumber, RtpSsrc, RtpTimestamp};

/// Only version understood on the wire
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed header
pub const RTP_HEADER_SIZE: usize = 12;

/// RTP fixed header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Padding flag as seen on the wire
    pub padding: bool,
    /// Extension flag as seen on the wire
    pub extension: bool,
    /// Marker bit
    pub marker: bool,
    /// Payload type (7 bits)
    pub payload_type: RtpPayloadType,
    /// Sequence number
    pub sequence_number: RtpSequenceNumber,
    /// Media timestamp
    pub timestamp: RtpTimestamp,
    /// Synchronization source
    pub ssrc: RtpSsrc,
    /// Contributing sources
    pub csrc: Vec<RtpSsrc>,
}

impl RtpHeader {
    /// Header for an outbound packet
    pub fn new(
        payload_type: RtpPayloadType,
        sequence_number: RtpSequenceNumber,
        timestamp: RtpTimestamp,
        ssrc: RtpSsrc,
    ) -> Self {
        Self {
            padding: false,
            extension: false,
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
        }
    }

    /// Encoded size of this header
    pub fn size(&self) -> usize {
        RTP_HEADER_SIZE + self.csrc.len() * 4
    }

    /// Write the header (never an extension) into `buf`
    pub fn serialize(&self, buf: &mut BytesMut) {
        let csrc_count = self.csrc.len().min(15) as u8;
        buf.put_u8((RTP_VERSION << 6) | (u8::from(self.padding) << 5) | csrc_count);
        buf.put_u8((u8::from(self.marker) << 7) | (self.payload_type & 0x7F));
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);
        for csrc in self.csrc.iter().take(15) {
            buf.put_u32(*csrc);
        }
    }

    /// Parse a header, returning it with the offset where the payload starts
    pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(RtpError::BufferTooSmall {
                required: RTP_HEADER_SIZE,
                available: data.len(),
            });
        }

        let mut buf = data;
        let first = buf.get_u8();
        let version = first >> 6;
        if version != RTP_VERSION {
            return Err(RtpError::InvalidVersion(version));
        }
        let padding = first & 0x20 != 0;
        let extension = first & 0x10 != 0;
        let csrc_count = (first & 0x0F) as usize;

        let second = buf.get_u8();
        let marker = second & 0x80 != 0;
        let payload_type = second & 0x7F;
        let sequence_number = buf.get_u16();
        let timestamp = buf.get_u32();
        let ssrc = buf.get_u32();

        let mut offset = RTP_HEADER_SIZE + csrc_count * 4;
        if data.len() < offset {
            return Err(RtpError::BufferTooSmall {
                required: offset,
                available: data.len(),
            });
        }
        let csrc = (0..csrc_count).map(|_| buf.get_u32()).collect();

        if extension {
            if data.len() < offset + 4 {
                return Err(RtpError::BufferTooSmall {
                    required: offset + 4,
                    available: data.len(),
                });
            }
            // profile-specific id (2 bytes), then length in 32-bit words
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
            if data.len() < offset {
                return Err(RtpError::BufferTooSmall {
                    required: offset,
                    available: data.len(),
                });
            }
        }

        Ok((
            Self {
                padding,
                extension,
                marker,
                payload_type,
                sequence_number,
                timestamp,
                ssrc,
                csrc,
            },
            offset,
        ))
    }
}

/// RTP packet: header plus payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Packet header
    pub header: RtpHeader,
    /// Payload with any padding removed
    pub payload: Bytes,
}

impl RtpPacket {
    /// Create a packet from parts
    pub fn new(header: RtpHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }

    /// Total encoded size
    pub fn size(&self) -> usize {
        self.header.size() + self.payload.len()
    }

    /// Encode to a contiguous buffer
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.size());
        let mut header = self.header.clone();
        // padding is never produced locally
        header.padding = false;
        header.serialize(&mut buf);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decode a datagram
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (header, offset) = RtpHeader::parse(data)?;
        let mut end = data.len();
        if header.padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(RtpError::InvalidPacket(format!(
                    "padding length {pad} exceeds packet"
                )));
            }
            end -= pad;
        }
        Ok(Self {
            payload: Bytes::copy_from_slice(&data[offset..end]),
            header,
        })
    }
}
