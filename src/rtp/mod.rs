//! RTP ingestion and egress
//!
//! Each encoded frame travels as one or more RTP packets. On ingest, packets
//! pass through the [`ReorderBuffer`], then a codec [`Depacketizer`] that
//! reassembles fragments and splits aggregates into complete units (NAL
//! units, OBUs or AAC access units). On egress a [`Packetizer`] does the
//! reverse for a frame's unit list.
//!
//! ## Supported payload formats
//!
//! | Codec | Module | RFC |
//! |-------|--------|-----|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) |
//! | H.265 | [`h265`] | [RFC 7798](https://tools.ietf.org/html/rfc7798) |
//! | AV1   | [`av1`]  | AV1 RTP payload specification |
//! | AAC   | [`aac`]  | [RFC 3640](https://tools.ietf.org/html/rfc3640) (hbr mode) |
//! | G.711, Opus | [`Passthrough`] | RFC 3551, RFC 7587 |

pub mod aac;
pub mod av1;
pub mod dts;
pub mod h264;
pub mod h265;
pub mod packet;
pub mod reorder;

use bytes::Bytes;

use crate::error::Result;

pub use dts::DtsEstimator;
pub use packet::{RtpPacket, RtpSequencer};
pub use reorder::ReorderBuffer;

/// Default egress MTU (payload bytes per packet)
pub const DEFAULT_MTU: usize = 1200;

/// A complete unit recovered from RTP payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// RTP timestamp of the unit (adjusted for MTAP offsets)
    pub timestamp: u32,
    pub data: Bytes,
}

impl Unit {
    pub fn new(timestamp: u32, data: Bytes) -> Self {
        Self { timestamp, data }
    }
}

/// Codec-specific RTP depacketizer
///
/// Packets must arrive in sequence order; a sequence gap discards any
/// partially reassembled unit.
pub trait Depacketizer: Send {
    /// Consume one packet, appending completed units to `out`
    fn push(&mut self, packet: &RtpPacket, out: &mut Vec<Unit>) -> Result<()>;

    /// Drop partial state
    fn reset(&mut self);
}

/// Codec-specific RTP packetizer
///
/// The last packet of a frame carries the marker bit.
pub trait Packetizer: Send {
    /// Split one frame's units into packets
    fn packetize(&mut self, units: &[Bytes], timestamp: u32, out: &mut Vec<RtpPacket>);

    /// RTP payload type number
    fn payload_type(&self) -> u8;
}

/// Tracks the expected next sequence number for fragment reassembly
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SeqTracker {
    next: Option<u16>,
}

impl SeqTracker {
    /// Record `seq`; returns false when a packet was skipped
    pub(crate) fn advance(&mut self, seq: u16) -> bool {
        let contiguous = self.next.map_or(true, |n| n == seq);
        self.next = Some(seq.wrapping_add(1));
        contiguous
    }

    pub(crate) fn reset(&mut self) {
        self.next = None;
    }
}

/// Payload formats that map one unit to one packet (G.711, Opus)
#[derive(Debug)]
pub struct Passthrough {
    sequencer: RtpSequencer,
}

impl Passthrough {
    pub fn new(sequencer: RtpSequencer) -> Self {
        Self { sequencer }
    }
}

impl Depacketizer for Passthrough {
    fn push(&mut self, packet: &RtpPacket, out: &mut Vec<Unit>) -> Result<()> {
        if !packet.payload.is_empty() {
            out.push(Unit::new(packet.timestamp, packet.payload.clone()));
        }
        Ok(())
    }

    fn reset(&mut self) {}
}

impl Packetizer for Passthrough {
    fn packetize(&mut self, units: &[Bytes], timestamp: u32, out: &mut Vec<RtpPacket>) {
        for (i, unit) in units.iter().enumerate() {
            let last = i + 1 == units.len();
            out.push(self.sequencer.packet(timestamp, last, unit.clone()));
        }
    }

    fn payload_type(&self) -> u8 {
        self.sequencer.payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_tracker() {
        let mut tracker = SeqTracker::default();
        assert!(tracker.advance(10));
        assert!(tracker.advance(11));
        assert!(!tracker.advance(13));
        assert!(tracker.advance(14));
        tracker.reset();
        assert!(tracker.advance(100));
        let mut wrap = SeqTracker::default();
        wrap.advance(u16::MAX);
        assert!(wrap.advance(0));
    }

    #[test]
    fn test_passthrough_round_trip() {
        let mut pass = Passthrough::new(RtpSequencer::new(8, 7));
        let mut packets = Vec::new();
        let frames = [Bytes::from_static(&[0xD5; 160])];
        pass.packetize(&frames, 160, &mut packets);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].marker);
        assert_eq!(pass.payload_type(), 8);

        let mut units = Vec::new();
        pass.push(&packets[0], &mut units).unwrap();
        assert_eq!(units, vec![Unit::new(160, frames[0].clone())]);
    }
}
