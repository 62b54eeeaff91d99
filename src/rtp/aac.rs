//! MPEG-4 AAC RTP payload format, hbr mode (RFC 3640)
//!
//! ```text
//! AU-headers-length(16, in bits) | AU-header* | padding to byte | AU data*
//! AU-header = AU-size(13) | AU-Index(-delta)(3)
//! ```
//!
//! An access unit larger than one packet is fragmented: every fragment
//! repeats a single AU-header carrying the full AU size, and the marker bit
//! is set only on the last one.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::RtpSequencer;
use super::{Depacketizer, Packetizer, RtpPacket, SeqTracker, Unit, DEFAULT_MTU};
use crate::error::{Result, RtpError};

/// Samples per AAC access unit; RTP timestamp step between AUs
pub const SAMPLES_PER_AU: u32 = 1024;

const AU_HEADER_BITS: usize = 16;

#[derive(Debug)]
struct Fragment {
    timestamp: u32,
    size: usize,
    data: BytesMut,
}

/// Splits AAC RTP payloads into access units
#[derive(Debug, Default)]
pub struct AacDepacketizer {
    fragment: Option<Fragment>,
    seq: SeqTracker,
}

impl AacDepacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the AU-header section, returning AU sizes and the data offset
    fn au_sizes(payload: &[u8]) -> Result<(Vec<usize>, usize)> {
        if payload.len() < 2 {
            return Err(RtpError::PacketTooShort.into());
        }
        let bits = u16::from_be_bytes([payload[0], payload[1]]) as usize;
        if bits == 0 || bits % AU_HEADER_BITS != 0 {
            return Err(RtpError::InvalidAuHeader.into());
        }
        let header_bytes = bits.div_ceil(8);
        let data_offset = 2 + header_bytes;
        if data_offset > payload.len() {
            return Err(RtpError::InvalidAuHeader.into());
        }
        let sizes = payload[2..data_offset]
            .chunks_exact(2)
            .map(|h| (u16::from_be_bytes([h[0], h[1]]) >> 3) as usize)
            .collect();
        Ok((sizes, data_offset))
    }
}

impl Depacketizer for AacDepacketizer {
    fn push(&mut self, packet: &RtpPacket, out: &mut Vec<Unit>) -> Result<()> {
        if !self.seq.advance(packet.sequence_number) && self.fragment.take().is_some() {
            tracing::debug!(
                seq = packet.sequence_number,
                "sequence gap inside AAC fragment, partial AU dropped"
            );
        }

        let payload = &packet.payload;
        let (sizes, mut offset) = Self::au_sizes(payload)?;
        let ts = packet.timestamp;

        if let Some(mut fragment) = self.fragment.take() {
            let continues = sizes.len() == 1 && sizes[0] == fragment.size && ts == fragment.timestamp;
            if continues {
                fragment.data.put_slice(&payload[offset..]);
                if fragment.data.len() >= fragment.size {
                    fragment.data.truncate(fragment.size);
                    out.push(Unit::new(ts, fragment.data.freeze()));
                } else {
                    self.fragment = Some(fragment);
                }
                return Ok(());
            }
            tracing::debug!("AAC fragment not continued, discarding");
        }

        // a lone AU larger than the remaining payload starts a fragment
        if sizes.len() == 1 && sizes[0] > payload.len() - offset {
            let mut data = BytesMut::with_capacity(sizes[0]);
            data.put_slice(&payload[offset..]);
            self.fragment = Some(Fragment {
                timestamp: ts,
                size: sizes[0],
                data,
            });
            return Ok(());
        }

        for (i, size) in sizes.into_iter().enumerate() {
            if offset + size > payload.len() {
                return Err(RtpError::InvalidAuHeader.into());
            }
            let au_ts = ts.wrapping_add(i as u32 * SAMPLES_PER_AU);
            out.push(Unit::new(au_ts, payload.slice(offset..offset + size)));
            offset += size;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.fragment = None;
        self.seq.reset();
    }
}

/// Packs AAC access units, one per packet, fragmenting at the MTU
#[derive(Debug)]
pub struct AacPacketizer {
    sequencer: RtpSequencer,
    mtu: usize,
}

impl AacPacketizer {
    pub fn new(sequencer: RtpSequencer) -> Self {
        Self {
            sequencer,
            mtu: DEFAULT_MTU,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu.max(16);
        self
    }

    fn au_header(size: usize) -> [u8; 4] {
        let header = ((size as u16) << 3) & 0xFFF8;
        let [hi, lo] = header.to_be_bytes();
        [0x00, AU_HEADER_BITS as u8, hi, lo]
    }
}

impl Packetizer for AacPacketizer {
    fn packetize(&mut self, units: &[Bytes], timestamp: u32, out: &mut Vec<RtpPacket>) {
        for (i, au) in units.iter().enumerate() {
            if au.is_empty() {
                continue;
            }
            let ts = timestamp.wrapping_add(i as u32 * SAMPLES_PER_AU);
            let header = Self::au_header(au.len());
            let max_chunk = self.mtu - header.len();

            let mut offset = 0;
            while offset < au.len() {
                let chunk = (au.len() - offset).min(max_chunk);
                let last = offset + chunk == au.len();
                let mut payload = BytesMut::with_capacity(header.len() + chunk);
                payload.put_slice(&header);
                payload.put_slice(&au[offset..offset + chunk]);
                out.push(self.sequencer.packet(ts, last, payload.freeze()));
                offset += chunk;
            }
        }
    }

    fn payload_type(&self) -> u8 {
        self.sequencer.payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(seq: u16, ts: u32, payload: Vec<u8>) -> RtpPacket {
        RtpPacket::new(97, seq, ts, 1, Bytes::from(payload))
    }

    #[test]
    fn test_single_au() {
        let mut depacketizer = AacDepacketizer::new();
        let mut out = Vec::new();
        // 16 header bits, AU size 3
        depacketizer
            .push(&rtp(1, 1024, vec![0x00, 0x10, 0x00, 0x18, 0x21, 0x10, 0x04]), &mut out)
            .unwrap();
        assert_eq!(out, vec![Unit::new(1024, Bytes::from_static(&[0x21, 0x10, 0x04]))]);
    }

    #[test]
    fn test_multiple_aus_get_consecutive_timestamps() {
        let mut depacketizer = AacDepacketizer::new();
        let mut out = Vec::new();
        let payload = vec![
            0x00, 0x20, // 32 header bits
            0x00, 0x10, // size 2
            0x00, 0x09, // size 1, index delta 1
            0xAA, 0xBB, 0xCC,
        ];
        depacketizer.push(&rtp(1, 5000, payload), &mut out).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0].data[..], &[0xAA, 0xBB]);
        assert_eq!(out[0].timestamp, 5000);
        assert_eq!(&out[1].data[..], &[0xCC]);
        assert_eq!(out[1].timestamp, 5000 + SAMPLES_PER_AU);
    }

    #[test]
    fn test_au_size_past_payload() {
        let mut depacketizer = AacDepacketizer::new();
        let mut out = Vec::new();
        let payload = vec![0x00, 0x20, 0x00, 0x10, 0x00, 0x40, 0xAA, 0xBB, 0xCC];
        assert!(depacketizer.push(&rtp(1, 0, payload), &mut out).is_err());
    }

    #[test]
    fn test_bad_header_length() {
        let mut depacketizer = AacDepacketizer::new();
        let mut out = Vec::new();
        assert!(depacketizer
            .push(&rtp(1, 0, vec![0x00, 0x0C, 0x00, 0x10]), &mut out)
            .is_err());
        assert!(depacketizer.push(&rtp(2, 0, vec![0x00]), &mut out).is_err());
    }

    #[test]
    fn test_fragmented_au_round_trip() {
        let mut packetizer = AacPacketizer::new(RtpSequencer::new(97, 5)).with_mtu(64);
        let au = Bytes::from((0..150u8).collect::<Vec<_>>());
        let mut packets = Vec::new();
        packetizer.packetize(&[au.clone()], 2048, &mut packets);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets.iter().filter(|p| p.marker).count(), 1);
        assert!(packets[2].marker);

        let mut depacketizer = AacDepacketizer::new();
        let mut out = Vec::new();
        for packet in &packets {
            depacketizer.push(packet, &mut out).unwrap();
        }
        assert_eq!(out, vec![Unit::new(2048, au)]);
    }

    #[test]
    fn test_lost_fragment_drops_au() {
        let mut packetizer = AacPacketizer::new(RtpSequencer::new(97, 5)).with_mtu(64);
        let au = Bytes::from(vec![0x11; 150]);
        let mut packets = Vec::new();
        packetizer.packetize(&[au], 0, &mut packets);

        let mut depacketizer = AacDepacketizer::new();
        let mut out = Vec::new();
        depacketizer.push(&packets[0], &mut out).unwrap();
        depacketizer.push(&packets[2], &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_au_header_layout() {
        assert_eq!(AacPacketizer::au_header(371), [0x00, 0x10, 0x0B, 0x98]);
    }
}
