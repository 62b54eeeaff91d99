//! H.264 NAL unit types, AVCDecoderConfigurationRecord and AVCC splitting
//!
//! ```text
//! version(1)=1 | profile(1) | compatibility(1) | level(1)
//! | 111111 lengthSizeMinusOne(2) | 111 numSPS(5) | { len(2) sps }*
//! | numPPS(1) | { len(2) pps }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// `nal_unit_type`, the low five bits of the NAL header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    /// Non-IDR slice or one of its data partitions (1..=4)
    Slice,
    Idr,
    Sei,
    Sps,
    Pps,
    Aud,
    EndOfSequence,
    EndOfStream,
    Filler,
}

impl NaluType {
    pub fn from_byte(b: u8) -> Option<Self> {
        Some(match b & 0x1F {
            1..=4 => NaluType::Slice,
            5 => NaluType::Idr,
            6 => NaluType::Sei,
            7 => NaluType::Sps,
            8 => NaluType::Pps,
            9 => NaluType::Aud,
            10 => NaluType::EndOfSequence,
            11 => NaluType::EndOfStream,
            12 => NaluType::Filler,
            _ => return None,
        })
    }

    pub fn of(nalu: &[u8]) -> Option<Self> {
        nalu.first().and_then(|b| Self::from_byte(*b))
    }
}

/// Parsed AVCDecoderConfigurationRecord
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvcConfig {
    /// profile_idc: 66 baseline, 77 main, 100 high
    pub profile: u8,
    pub compatibility: u8,
    /// level_idc, 31 = 3.1
    pub level: u8,
    pub nalu_length_size: u8,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl AvcConfig {
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 7 || data[0] != 1 {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        data.advance(1);
        let profile = data.get_u8();
        let compatibility = data.get_u8();
        let level = data.get_u8();
        let nalu_length_size = (data.get_u8() & 0x03) + 1;

        let sps_count = (data.get_u8() & 0x1F) as usize;
        let sps = parameter_sets(&mut data, sps_count)?;
        if !data.has_remaining() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        let pps_count = data.get_u8() as usize;
        let pps = parameter_sets(&mut data, pps_count)?;

        Ok(AvcConfig {
            profile,
            compatibility,
            level,
            nalu_length_size,
            sps,
            pps,
        })
    }

    /// Record for in-band SPS/PPS; profile, compatibility and level come
    /// from SPS bytes 1..4
    pub fn from_parameter_sets(sps: Bytes, pps: Bytes) -> Result<Self> {
        if sps.len() < 4 || pps.is_empty() {
            return Err(MediaError::InvalidAvcPacket.into());
        }
        Ok(AvcConfig {
            profile: sps[1],
            compatibility: sps[2],
            level: sps[3],
            nalu_length_size: 4,
            sps: vec![sps],
            pps: vec![pps],
        })
    }

    pub fn to_bytes(&self) -> Bytes {
        let sets: usize = self.sps.iter().chain(&self.pps).map(|ps| ps.len() + 2).sum();
        let mut out = BytesMut::with_capacity(7 + sets);
        out.put_slice(&[
            1,
            self.profile,
            self.compatibility,
            self.level,
            0xFC | (self.nalu_length_size.saturating_sub(1) & 0x03),
            0xE0 | (self.sps.len() as u8 & 0x1F),
        ]);
        for sps in &self.sps {
            out.put_u16(sps.len() as u16);
            out.put_slice(sps);
        }
        out.put_u8(self.pps.len() as u8);
        for pps in &self.pps {
            out.put_u16(pps.len() as u16);
            out.put_slice(pps);
        }
        out.freeze()
    }

    /// `avc1.PPCCLL` (RFC 6381)
    pub fn codec_string(&self) -> String {
        format!("avc1.{:02X}{:02X}{:02X}", self.profile, self.compatibility, self.level)
    }
}

/// `count` parameter sets, each behind a u16 length
fn parameter_sets(data: &mut Bytes, count: usize) -> Result<Vec<Bytes>> {
    (0..count)
        .map(|_| -> Result<Bytes> {
            if data.remaining() < 2 {
                return Err(MediaError::InvalidAvcPacket.into());
            }
            let len = data.get_u16() as usize;
            if data.remaining() < len {
                return Err(MediaError::InvalidAvcPacket.into());
            }
            Ok(data.split_to(len))
        })
        .collect()
}

/// Split a length-prefixed (AVCC/HVCC) body into NAL units without copying
///
/// Zero-length units are skipped; a length running past the buffer fails
/// the whole body.
pub fn split_avcc(data: &Bytes, nalu_length_size: u8) -> Result<Vec<Bytes>> {
    let size = nalu_length_size as usize;
    if !(1..=4).contains(&size) {
        return Err(MediaError::InvalidAvcPacket.into());
    }

    let mut nalus = Vec::new();
    let mut pos = 0;
    while pos < data.len() {
        let remaining = data.len() - pos;
        if remaining < size {
            return Err(MediaError::NaluOverrun { len: size, remaining }.into());
        }
        let len = data[pos..pos + size].iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        pos += size;
        let remaining = data.len() - pos;
        if len > remaining {
            return Err(MediaError::NaluOverrun { len, remaining }.into());
        }
        if len > 0 {
            nalus.push(data.slice(pos..pos + len));
        }
        pos += len;
    }
    Ok(nalus)
}

pub fn contains_idr<'a>(nalus: impl IntoIterator<Item = &'a Bytes>) -> bool {
    nalus.into_iter().any(|n| NaluType::of(n) == Some(NaluType::Idr))
}
