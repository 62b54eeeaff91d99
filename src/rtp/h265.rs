//! H.265 RTP payload format (RFC 7798)
//!
//! The payload header mirrors the 2-byte HEVC NAL header:
//! ```text
//! F(1) | Type(6) | LayerId(6) | TID(3)
//! ```
//!
//! - Type 48 (AP): `[DONL(16)] { size(16) NALU [DOND(8)] }*`
//! - Type 49 (FU): FU header `S(1) E(1) FuType(6)`, `[DONL(16)]`, fragment
//!
//! DONL/DOND fields are present only when the session negotiated
//! `sprop-max-don-diff > 0`.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::RtpSequencer;
use super::{Depacketizer, Packetizer, RtpPacket, SeqTracker, Unit, DEFAULT_MTU};
use crate::error::{Result, RtpError};

pub const AP: u8 = 48;
pub const FU: u8 = 49;
pub const PACI: u8 = 50;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// Reassembles H.265 NAL units from RTP payloads
#[derive(Debug, Default)]
pub struct H265Depacketizer {
    using_donl: bool,
    fragment: Option<BytesMut>,
    seq: SeqTracker,
}

impl H265Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect DONL/DOND fields in AP and FU packets
    pub fn with_donl(mut self, using_donl: bool) -> Self {
        self.using_donl = using_donl;
        self
    }

    fn split_aggregate(&self, payload: &Bytes, timestamp: u32, out: &mut Vec<Unit>) -> Result<()> {
        let mut offset = 2;
        if self.using_donl {
            offset += 2;
        }
        let mut first = true;
        while offset < payload.len() {
            if !first && self.using_donl {
                offset += 1; // DOND
            }
            if offset + 2 > payload.len() {
                return Err(RtpError::InvalidAggregation.into());
            }
            let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
            offset += 2;
            if size == 0 || offset + size > payload.len() {
                return Err(RtpError::InvalidAggregation.into());
            }
            out.push(Unit::new(timestamp, payload.slice(offset..offset + size)));
            offset += size;
            first = false;
        }
        Ok(())
    }

    fn push_fragment(&mut self, payload: &Bytes, timestamp: u32, out: &mut Vec<Unit>) -> Result<()> {
        let skip = if self.using_donl { 5 } else { 3 };
        if payload.len() < skip {
            return Err(RtpError::PacketTooShort.into());
        }
        let fu_header = payload[2];
        let data = &payload[skip..];

        if fu_header & FU_START != 0 {
            if self.fragment.is_some() {
                tracing::debug!("FU start before previous end, discarding partial NALU");
            }
            let fu_type = fu_header & 0x3F;
            let mut buf = BytesMut::with_capacity(data.len() * 4 + 2);
            buf.put_u8((payload[0] & 0x81) | (fu_type << 1));
            buf.put_u8(payload[1]);
            buf.put_slice(data);
            self.fragment = Some(buf);
        } else {
            let Some(buf) = self.fragment.as_mut() else {
                return Err(RtpError::FragmentWithoutStart.into());
            };
            buf.put_slice(data);
        }

        if fu_header & FU_END != 0 {
            if let Some(buf) = self.fragment.take() {
                out.push(Unit::new(timestamp, buf.freeze()));
            }
        }
        Ok(())
    }
}

impl Depacketizer for H265Depacketizer {
    fn push(&mut self, packet: &RtpPacket, out: &mut Vec<Unit>) -> Result<()> {
        if !self.seq.advance(packet.sequence_number) && self.fragment.take().is_some() {
            tracing::debug!(
                seq = packet.sequence_number,
                "sequence gap inside FU, partial NALU dropped"
            );
        }

        let payload = &packet.payload;
        if payload.len() < 2 {
            return Err(RtpError::PacketTooShort.into());
        }
        let ts = packet.timestamp;

        match (payload[0] >> 1) & 0x3F {
            AP => self.split_aggregate(payload, ts, out),
            FU => self.push_fragment(payload, ts, out),
            PACI => Err(RtpError::UnsupportedNalu(PACI).into()),
            t if t < AP => {
                out.push(Unit::new(ts, payload.clone()));
                Ok(())
            }
            other => Err(RtpError::UnsupportedNalu(other).into()),
        }
    }

    fn reset(&mut self) {
        self.fragment = None;
        self.seq.reset();
    }
}

/// Splits H.265 NAL units into RTP packets (single NAL unit and FU)
#[derive(Debug)]
pub struct H265Packetizer {
    sequencer: RtpSequencer,
    mtu: usize,
}

impl H265Packetizer {
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

    fn packetize_nalu(&mut self, nalu: &Bytes, timestamp: u32, last_nalu: bool, out: &mut Vec<RtpPacket>) {
        if nalu.len() < 2 {
            return;
        }

        if nalu.len() <= self.mtu {
            out.push(self.sequencer.packet(timestamp, last_nalu, nalu.clone()));
            return;
        }

        let nal_type = (nalu[0] >> 1) & 0x3F;
        let header0 = (nalu[0] & 0x81) | (FU << 1);
        let header1 = nalu[1];
        let max_fragment = self.mtu - 3;

        let mut offset = 2;
        while offset < nalu.len() {
            let remaining = nalu.len() - offset;
            let chunk = remaining.min(max_fragment);
            let last = chunk == remaining;

            let mut fu_header = nal_type;
            if offset == 2 {
                fu_header |= FU_START;
            }
            if last {
                fu_header |= FU_END;
            }

            let mut payload = BytesMut::with_capacity(3 + chunk);
            payload.put_u8(header0);
            payload.put_u8(header1);
            payload.put_u8(fu_header);
            payload.put_slice(&nalu[offset..offset + chunk]);
            out.push(
                self.sequencer
                    .packet(timestamp, last_nalu && last, payload.freeze()),
            );
            offset += chunk;
        }
    }
}

impl Packetizer for H265Packetizer {
    fn packetize(&mut self, units: &[Bytes], timestamp: u32, out: &mut Vec<RtpPacket>) {
        let usable: Vec<&Bytes> = units.iter().filter(|n| n.len() >= 2).collect();
        for (i, nalu) in usable.iter().enumerate() {
            self.packetize_nalu(nalu, timestamp, i + 1 == usable.len(), out);
        }
    }

    fn payload_type(&self) -> u8 {
        self.sequencer.payload_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rtp(seq: u16, payload: &'static [u8]) -> RtpPacket {
        RtpPacket::new(96, seq, 1800, 1, Bytes::from_static(payload))
    }

    #[test]
    fn test_single_nalu() {
        let mut depacketizer = H265Depacketizer::new();
        let mut out = Vec::new();
        depacketizer
            .push(&rtp(1, &[0x26, 0x01, 0xAF]), &mut out)
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[0x26, 0x01, 0xAF]);
    }

    #[test]
    fn test_aggregation_packet() {
        let mut depacketizer = H265Depacketizer::new();
        let mut out = Vec::new();
        depacketizer
            .push(
                &rtp(
                    1,
                    &[
                        0x60, 0x01, // AP
                        0x00, 0x03, 0x40, 0x01, 0x0C, // VPS
                        0x00, 0x03, 0x42, 0x01, 0x01, // SPS
                    ],
                ),
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[0].data[..], &[0x40, 0x01, 0x0C]);
        assert_eq!(&out[1].data[..], &[0x42, 0x01, 0x01]);
    }

    #[test]
    fn test_aggregation_packet_with_donl() {
        let mut depacketizer = H265Depacketizer::new().with_donl(true);
        let mut out = Vec::new();
        depacketizer
            .push(
                &rtp(
                    1,
                    &[
                        0x60, 0x01, // AP
                        0x00, 0x05, // DONL
                        0x00, 0x02, 0x40, 0x01, // first unit
                        0x01, // DOND
                        0x00, 0x02, 0x44, 0x01, // second unit
                    ],
                ),
                &mut out,
            )
            .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(&out[1].data[..], &[0x44, 0x01]);
    }

    #[test]
    fn test_fragmentation_unit() {
        let mut depacketizer = H265Depacketizer::new();
        let mut out = Vec::new();
        // IDR_W_RADL (19) fragmented
        depacketizer.push(&rtp(1, &[0x62, 0x01, 0x93, 0xAA]), &mut out).unwrap();
        depacketizer.push(&rtp(2, &[0x62, 0x01, 0x13, 0xBB]), &mut out).unwrap();
        depacketizer.push(&rtp(3, &[0x62, 0x01, 0x53, 0xCC]), &mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0].data[..], &[0x26, 0x01, 0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_fragmentation_unit_with_donl() {
        let mut depacketizer = H265Depacketizer::new().with_donl(true);
        let mut out = Vec::new();
        depacketizer
            .push(&rtp(1, &[0x62, 0x01, 0x93, 0x00, 0x01, 0xAA]), &mut out)
            .unwrap();
        depacketizer
            .push(&rtp(2, &[0x62, 0x01, 0x53, 0x00, 0x02, 0xBB]), &mut out)
            .unwrap();
        assert_eq!(&out[0].data[..], &[0x26, 0x01, 0xAA, 0xBB]);
    }

    #[test]
    fn test_paci_unsupported() {
        let mut depacketizer = H265Depacketizer::new();
        let mut out = Vec::new();
        assert!(depacketizer.push(&rtp(1, &[0x64, 0x01, 0x00]), &mut out).is_err());
    }

    #[test]
    fn test_packetize_round_trip() {
        let mut packetizer = H265Packetizer::new(RtpSequencer::new(96, 9)).with_mtu(64);
        let vps = Bytes::from_static(&[0x40, 0x01, 0x0C]);
        let mut idr = vec![0x26, 0x01];
        idr.extend(std::iter::repeat(0x5A).take(200));
        let idr = Bytes::from(idr);

        let mut packets = Vec::new();
        packetizer.packetize(&[vps.clone(), idr.clone()], 3600, &mut packets);
        assert!(packets.iter().all(|p| p.payload.len() <= 64));
        assert!(packets.last().unwrap().marker);
        assert_eq!(packets.iter().filter(|p| p.marker).count(), 1);

        let mut depacketizer = H265Depacketizer::new();
        let mut out = Vec::new();
        for packet in &packets {
            depacketizer.push(packet, &mut out).unwrap();
        }
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].data, vps);
        assert_eq!(out[1].data, idr);
    }
}
