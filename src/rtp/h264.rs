//! H.264 RTP payload format (RFC 6184)
//!
//! Depacketization handles every packetization mode:
//!
//! | Type  | Name    | Layout after the 1-byte NAL header                      |
//! |-------|---------|---------------------------------------------------------|
//! | 1-23  | single  | NAL unit as-is                                          |
//! | 24    | STAP-A  | { size(16) NALU }*                                      |
//! | 25    | STAP-B  | DON(16) { size(16) NALU }*                              |
//! | 26    | MTAP16  | DONB(16) { size(16) DOND(8) TS offset(16) NALU }*       |
//! | 27    | MTAP24  | DONB(16) { size(16) DOND(8) TS offset(24) NALU }*       |
//! | 28    | FU-A    | FU header [S|E|R|Type] fragment                         |
//! | 29    | FU-B    | FU header, DON(16), fragment                            |
//!
//! Packetization uses single NAL unit packets and FU-A for NAL units larger
//! than the MTU.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::RtpSequencer;
use super::{Depacketizer, Packetizer, RtpPacket, SeqTracker, Unit, DEFAULT_MTU};
use crate::error::{Result, RtpError};

pub const STAP_A: u8 = 24;
pub const STAP_B: u8 = 25;
pub const MTAP16: u8 = 26;
pub const MTAP24: u8 = 27;
pub const FU_A: u8 = 28;
pub const FU_B: u8 = 29;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// Reassembles H.264 NAL units from RTP payloads
#[derive(Debug, Default)]
pub struct H264Depacketizer {
    fragment: Option<BytesMut>,
    seq: SeqTracker,
}

impl H264Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split `{ size(16) [DOND(8) TS offset(16|24)] NALU }*`
    fn split_aggregate(
        mut data: Bytes,
        timestamp: u32,
        offset_len: usize,
        out: &mut Vec<Unit>,
    ) -> Result<()> {
        while !data.is_empty() {
            if data.len() < 2 {
                return Err(RtpError::InvalidAggregation.into());
            }
            let size = u16::from_be_bytes([data[0], data[1]]) as usize;
            let mut header = 2;
            let mut ts = timestamp;
            if offset_len > 0 {
                // DOND(8) then the timestamp offset
                if data.len() < header + 1 + offset_len {
                    return Err(RtpError::InvalidAggregation.into());
                }
                let offset = data[header + 1..header + 1 + offset_len]
                    .iter()
                    .fold(0u32, |acc, b| (acc << 8) | *b as u32);
                ts = timestamp.wrapping_add(offset);
                header += 1 + offset_len;
            }
            if size == 0 || data.len() < header + size {
                return Err(RtpError::InvalidAggregation.into());
            }
            out.push(Unit::new(ts, data.slice(header..header + size)));
            data = data.slice(header + size..);
        }
        Ok(())
    }

    fn push_fragment(&mut self, payload: &Bytes, timestamp: u32, don: bool, out: &mut Vec<Unit>) -> Result<()> {
        let skip = if don { 4 } else { 2 };
        if payload.len() < skip {
            return Err(RtpError::PacketTooShort.into());
        }
        let indicator = payload[0];
        let header = payload[1];
        let data = &payload[skip..];

        if header & FU_START != 0 {
            if self.fragment.is_some() {
                tracing::debug!("FU start before previous end, discarding partial NALU");
            }
            let mut buf = BytesMut::with_capacity(data.len() * 4 + 1);
            buf.put_u8((indicator & 0xE0) | (header & 0x1F));
            buf.put_slice(data);
            self.fragment = Some(buf);
        } else {
            let Some(buf) = self.fragment.as_mut() else {
                return Err(RtpError::FragmentWithoutStart.into());
            };
            buf.put_slice(data);
        }

        if header & FU_END != 0 {
            if let Some(buf) = self.fragment.take() {
                out.push(Unit::new(timestamp, buf.freeze()));
            }
        }
        Ok(())
    }
}

impl Depacketizer for H264Depacketizer {
    fn push(&mut self, packet: &RtpPacket, out: &mut Vec<Unit>) -> Result<()> {
        if !self.seq.advance(packet.sequence_number) && self.fragment.take().is_some() {
            tracing::debug!(
                seq = packet.sequence_number,
                "sequence gap inside FU, partial NALU dropped"
            );
        }

        let payload = &packet.payload;
        let Some(&first) = payload.first() else {
            return Err(RtpError::PacketTooShort.into());
        };
        let ts = packet.timestamp;

        match first & 0x1F {
            1..=23 => {
                out.push(Unit::new(ts, payload.clone()));
                Ok(())
            }
            STAP_A => Self::split_aggregate(payload.slice(1..), ts, 0, out),
            STAP_B => {
                if payload.len() < 3 {
                    return Err(RtpError::InvalidAggregation.into());
                }
                Self::split_aggregate(payload.slice(3..), ts, 0, out)
            }
            MTAP16 | MTAP24 => {
                if payload.len() < 3 {
                    return Err(RtpError::InvalidAggregation.into());
                }
                let offset_len = if first & 0x1F == MTAP16 { 2 } else { 3 };
                Self::split_aggregate(payload.slice(3..), ts, offset_len, out)
            }
            FU_A => self.push_fragment(payload, ts, false, out),
            FU_B => self.push_fragment(payload, ts, true, out),
            other => Err(RtpError::UnsupportedNalu(other).into()),
        }
    }

    fn reset(&mut self) {
        self.fragment = None;
        self.seq.reset();
    }
}

/// Splits H.264 NAL units into RTP packets
#[derive(Debug)]
pub struct H264Packetizer {
    sequencer: RtpSequencer,
    mtu: usize,
}

impl H264Packetizer {
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
        if nalu.is_empty() {
            return;
        }

        if nalu.len() <= self.mtu {
            out.push(self.sequencer.packet(timestamp, last_nalu, nalu.clone()));
            return;
        }

        let nal_header = nalu[0];
        let indicator = (nal_header & 0xE0) | FU_A;
        let nal_type = nal_header & 0x1F;
        let max_fragment = self.mtu - 2;

        let mut offset = 1;
        while offset < nalu.len() {
            let remaining = nalu.len() - offset;
            let chunk = remaining.min(max_fragment);
            let first = offset == 1;
            let last = chunk == remaining;

            let mut header = nal_type;
            if first {
                header |= FU_START;
            }
            if last {
                header |= FU_END;
            }

            let mut payload = BytesMut::with_capacity(2 + chunk);
            payload.put_u8(indicator);
            payload.put_u8(header);
            payload.put_slice(&nalu[offset..offset + chunk]);
            out.push(
                self.sequencer
                    .packet(timestamp, last_nalu && last, payload.freeze()),
            );
            offset += chunk;
        }
    }
}

impl Packetizer for H264Packetizer {
    fn packetize(&mut self, units: &[Bytes], timestamp: u32, out: &mut Vec<RtpPacket>) {
        let count = units.iter().filter(|n| !n.is_empty()).count();
        let mut seen = 0;
        for nalu in units.iter().filter(|n| !n.is_empty()) {
            seen += 1;
            self.packetize_nalu(nalu, timestamp, seen == count, out);
        }
    }

    fn payload_type(&self) -> u8 {
        self.sequencer.payload_type
    }
}
