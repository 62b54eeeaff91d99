//! RTP packet parsing and serialization (RFC 3550 §5.1)
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |                       CSRC list (CC x 4)                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RtpError};

/// Fixed header size without CSRCs or extension
pub const HEADER_SIZE: usize = 12;

/// Header extension (profile id + data words)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extension {
    pub profile: u16,
    pub data: Bytes,
}

/// A parsed RTP packet
///
/// The payload is a slice of the input buffer; cloning a packet never
/// copies media bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    pub extension: Option<Extension>,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Build a packet with no CSRCs or extension
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32, payload: Bytes) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
            payload,
        }
    }

    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(RtpError::PacketTooShort.into());
        }
        let version = data[0] >> 6;
        if version != 2 {
            return Err(RtpError::UnsupportedVersion(version).into());
        }
        let padding = data[0] & 0x20 != 0;
        let has_extension = data[0] & 0x10 != 0;
        let csrc_count = (data[0] & 0x0F) as usize;
        let marker = data[1] & 0x80 != 0;
        let payload_type = data[1] & 0x7F;
        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = HEADER_SIZE;
        if data.len() < offset + csrc_count * 4 {
            return Err(RtpError::PacketTooShort.into());
        }
        let csrc = (0..csrc_count)
            .map(|i| {
                let at = offset + i * 4;
                u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
            })
            .collect();
        offset += csrc_count * 4;

        let extension = if has_extension {
            if data.len() < offset + 4 {
                return Err(RtpError::PacketTooShort.into());
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;
            if data.len() < offset + words * 4 {
                return Err(RtpError::PacketTooShort.into());
            }
            let ext = data.slice(offset..offset + words * 4);
            offset += words * 4;
            Some(Extension { profile, data: ext })
        } else {
            None
        };

        let mut end = data.len();
        if padding {
            let pad = data[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(RtpError::InvalidPadding.into());
            }
            end -= pad;
        }

        Ok(RtpPacket {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: data.slice(offset..end),
        })
    }

    /// Serialized header length
    pub fn header_len(&self) -> usize {
        HEADER_SIZE
            + self.csrc.len() * 4
            + self.extension.as_ref().map_or(0, |e| 4 + e.data.len())
    }

    /// Serialized packet length
    pub fn len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Serialize the packet (never padded)
    pub fn marshal(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len());
        let mut first = 2 << 6 | (self.csrc.len() as u8 & 0x0F);
        if self.extension.is_some() {
            first |= 0x10;
        }
        out.put_u8(first);
        out.put_u8(((self.marker as u8) << 7) | (self.payload_type & 0x7F));
        out.put_u16(self.sequence_number);
        out.put_u32(self.timestamp);
        out.put_u32(self.ssrc);
        for csrc in &self.csrc {
            out.put_u32(*csrc);
        }
        if let Some(ext) = &self.extension {
            out.put_u16(ext.profile);
            out.put_u16((ext.data.len() / 4) as u16);
            out.put_slice(&ext.data);
        }
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// Outgoing RTP header state shared by all packetizers
///
/// Sequence numbers wrap at 16 bits; the SSRC is chosen randomly unless
/// given explicitly.
#[derive(Debug, Clone)]
pub struct RtpSequencer {
    pub payload_type: u8,
    pub ssrc: u32,
    sequence: u16,
}

impl RtpSequencer {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence: 0,
        }
    }

    pub fn with_random_ssrc(payload_type: u8) -> Self {
        let ssrc = rand::random::<u32>();
        tracing::debug!(
            payload_type,
            ssrc = format_args!("{:#010X}", ssrc),
            "RTP sequencer created"
        );
        Self::new(payload_type, ssrc)
    }

    /// Sequence number the next packet will carry
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    /// Stamp a payload and advance the sequence number
    pub fn packet(&mut self, timestamp: u32, marker: bool, payload: Bytes) -> RtpPacket {
        let mut packet = RtpPacket::new(self.payload_type, self.sequence, timestamp, self.ssrc, payload);
        packet.marker = marker;
        self.sequence = self.sequence.wrapping_add(1);
        packet
    }
}
