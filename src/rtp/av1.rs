//! AV1 RTP payload format
//!
//! Every payload starts with an aggregation header:
//! ```text
//! Z(1) | Y(1) | W(2) | N(1) | reserved(3)
//! ```
//! - Z: the first OBU element continues a fragment from the previous packet
//! - Y: the last OBU element continues in the next packet
//! - W: number of OBU elements (0 = every element carries a LEB128 length;
//!   otherwise the last element has none)
//! - N: first packet of a coded video sequence
//!
//! Temporal delimiters are never transmitted; OBUs travel without their
//! size field.

use bytes::{BufMut, Bytes, BytesMut};

use super::packet::RtpSequencer;
use super::{Depacketizer, Packetizer, RtpPacket, SeqTracker, Unit, DEFAULT_MTU};
use crate::error::{Result, RtpError};
use crate::media::av1::{self, leb128_size, obu, read_leb128, write_leb128, ObuHeader};

const Z: u8 = 0x80;
const Y: u8 = 0x40;
const N: u8 = 0x08;

/// Reassembles OBUs from AV1 RTP payloads
#[derive(Debug, Default)]
pub struct Av1Depacketizer {
    fragment: Option<BytesMut>,
    seq: SeqTracker,
}

impl Av1Depacketizer {
    pub fn new() -> Self {
        Self::default()
    }

    fn elements(payload: &Bytes) -> Result<Vec<Bytes>> {
        let count = ((payload[0] >> 4) & 0x03) as usize;
        let mut elements = Vec::new();
        let mut offset = 1;
        while offset < payload.len() {
            let last_unsized = count != 0 && elements.len() + 1 == count;
            let len = if last_unsized {
                payload.len() - offset
            } else {
                let (len, used) =
                    read_leb128(&payload[offset..]).ok_or(RtpError::InvalidObu)?;
                offset += used;
                len as usize
            };
            if offset + len > payload.len() {
                return Err(RtpError::InvalidObu.into());
            }
            elements.push(payload.slice(offset..offset + len));
            offset += len;
        }
        Ok(elements)
    }

    fn emit(timestamp: u32, obu: Bytes, out: &mut Vec<Unit>) {
        if obu.is_empty() || av1::obu_type_of(&obu) == Some(obu::TEMPORAL_DELIMITER) {
            return;
        }
        out.push(Unit::new(timestamp, obu));
    }
}

impl Depacketizer for Av1Depacketizer {
    fn push(&mut self, packet: &RtpPacket, out: &mut Vec<Unit>) -> Result<()> {
        if !self.seq.advance(packet.sequence_number) && self.fragment.take().is_some() {
            tracing::debug!(
                seq = packet.sequence_number,
                "sequence gap inside OBU fragment, partial OBU dropped"
            );
        }

        let payload = &packet.payload;
        let Some(&header) = payload.first() else {
            return Err(RtpError::PacketTooShort.into());
        };
        let elements = Self::elements(payload)?;
        let count = elements.len();
        let ts = packet.timestamp;

        for (i, element) in elements.into_iter().enumerate() {
            let continues_previous = i == 0 && header & Z != 0;
            let continues_next = i + 1 == count && header & Y != 0;

            let obu = if continues_previous {
                let Some(mut buf) = self.fragment.take() else {
                    // start of this OBU was lost
                    continue;
                };
                buf.put_slice(&element);
                buf
            } else {
                if self.fragment.take().is_some() {
                    tracing::debug!("OBU fragment not continued, discarding");
                }
                BytesMut::from(&element[..])
            };

            if continues_next {
                self.fragment = Some(obu);
            } else {
                Self::emit(ts, obu.freeze(), out);
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.fragment = None;
        self.seq.reset();
    }
}

/// Strip the size field from an OBU for RTP transmission
fn without_size_field(unit: &Bytes) -> Option<Bytes> {
    let header = ObuHeader::parse(unit).ok()?;
    if !header.has_size_field {
        return Some(unit.clone());
    }
    let fixed = if header.has_extension { 2 } else { 1 };
    let end = header.header_len + header.payload_size.unwrap_or(0);
    if end > unit.len() {
        return None;
    }
    let mut out = BytesMut::with_capacity(end - header.header_len + fixed);
    out.put_u8(unit[0] & !0x02);
    if header.has_extension {
        out.put_u8(unit[1]);
    }
    out.put_slice(&unit[header.header_len..end]);
    Some(out.freeze())
}

/// Packs AV1 OBUs into RTP packets, fragmenting at the MTU
#[derive(Debug)]
pub struct Av1Packetizer {
    sequencer: RtpSequencer,
    mtu: usize,
}

impl Av1Packetizer {
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
}

impl Packetizer for Av1Packetizer {
    fn packetize(&mut self, units: &[Bytes], timestamp: u32, out: &mut Vec<RtpPacket>) {
        let obus: Vec<Bytes> = units
            .iter()
            .filter(|u| av1::obu_type_of(u) != Some(obu::TEMPORAL_DELIMITER))
            .filter_map(without_size_field)
            .collect();
        if obus.is_empty() {
            return;
        }
        let new_sequence = obus
            .iter()
            .any(|o| av1::obu_type_of(o) == Some(obu::SEQUENCE_HEADER));

        let mut packets: Vec<(u8, BytesMut)> = Vec::new();
        let mut header = if new_sequence { N } else { 0 };
        let mut body = BytesMut::with_capacity(self.mtu);

        for obu in &obus {
            let mut rest = &obu[..];
            loop {
                let space = self.mtu - 1 - body.len();
                let need = leb128_size(rest.len() as u64) + rest.len();
                if need <= space {
                    write_leb128(&mut body, rest.len() as u64);
                    body.put_slice(rest);
                    break;
                }
                if space > 2 {
                    let chunk = space - leb128_size(space as u64);
                    write_leb128(&mut body, chunk as u64);
                    body.put_slice(&rest[..chunk]);
                    rest = &rest[chunk..];
                    packets.push((header | Y, std::mem::take(&mut body)));
                    header = Z;
                } else {
                    packets.push((header, std::mem::take(&mut body)));
                    header = 0;
                }
            }
        }
        packets.push((header, body));

        let count = packets.len();
        for (i, (agg, body)) in packets.into_iter().enumerate() {
            let mut payload = BytesMut::with_capacity(1 + body.len());
            payload.put_u8(agg);
            payload.put_slice(&body);
            out.push(self.sequencer.packet(timestamp, i + 1 == count, payload.freeze()));
        }
    }

    fn payload_type(&self) -> u8 {
        self.sequencer.payload_type
    }
}
