//! AV1 OBU framing and AV1CodecConfigurationRecord
//!
//! OBU header:
//! ```text
//! forbidden(1) | obu_type(4) | extension_flag(1) | has_size_field(1) | reserved(1)
//! [ temporal_id(3) | spatial_id(2) | reserved(3) ]   if extension_flag
//! [ obu_size (leb128) ]                               if has_size_field
//! ```
//!
//! AV1CodecConfigurationRecord (av1-isobmff §2.3.3):
//! ```text
//! marker(1)=1 version(7)=1 | seq_profile(3) seq_level_idx_0(5)
//! | seq_tier_0(1) high_bitdepth(1) twelve_bit(1) monochrome(1)
//!   chroma_subsampling_x(1) chroma_subsampling_y(1) chroma_sample_position(2)
//! | reserved(3) initial_presentation_delay_present(1) delay_minus_one(4)
//! | configOBUs
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// OBU types
pub mod obu {
    pub const SEQUENCE_HEADER: u8 = 1;
    pub const TEMPORAL_DELIMITER: u8 = 2;
    pub const FRAME_HEADER: u8 = 3;
    pub const TILE_GROUP: u8 = 4;
    pub const METADATA: u8 = 5;
    pub const FRAME: u8 = 6;
    pub const REDUNDANT_FRAME_HEADER: u8 = 7;
    pub const TILE_LIST: u8 = 8;
    pub const PADDING: u8 = 15;
}

/// Decode an unsigned LEB128 value, returning `(value, bytes_used)`
pub fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, b) in data.iter().take(8).enumerate() {
        value |= ((b & 0x7F) as u64) << (i * 7);
        if b & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Append an unsigned LEB128 value
pub fn write_leb128(out: &mut BytesMut, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

/// Encoded size of a LEB128 value
pub fn leb128_size(mut value: u64) -> usize {
    let mut n = 1;
    while value >= 0x80 {
        value >>= 7;
        n += 1;
    }
    n
}

/// Parsed OBU header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObuHeader {
    pub obu_type: u8,
    pub temporal_id: u8,
    pub spatial_id: u8,
    pub has_extension: bool,
    pub has_size_field: bool,
    /// Header bytes including the size field
    pub header_len: usize,
    /// Payload size when `has_size_field`
    pub payload_size: Option<usize>,
}

impl ObuHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let first = *data.first().ok_or(MediaError::InvalidAv1Packet)?;
        if first & 0x80 != 0 {
            return Err(MediaError::InvalidAv1Packet.into());
        }
        let obu_type = (first >> 3) & 0x0F;
        let has_extension = first & 0x04 != 0;
        let has_size_field = first & 0x02 != 0;

        let mut header_len = 1;
        let (mut temporal_id, mut spatial_id) = (0, 0);
        if has_extension {
            let ext = *data.get(1).ok_or(MediaError::InvalidAv1Packet)?;
            temporal_id = ext >> 5;
            spatial_id = (ext >> 3) & 0x03;
            header_len += 1;
        }

        let mut payload_size = None;
        if has_size_field {
            let (size, used) =
                read_leb128(&data[header_len..]).ok_or(MediaError::InvalidAv1Packet)?;
            header_len += used;
            payload_size = Some(size as usize);
        }

        Ok(ObuHeader {
            obu_type,
            temporal_id,
            spatial_id,
            has_extension,
            has_size_field,
            header_len,
            payload_size,
        })
    }
}

/// Type of an OBU from its first byte
pub fn obu_type_of(obu: &[u8]) -> Option<u8> {
    obu.first().map(|b| (b >> 3) & 0x0F)
}

/// Split a low-overhead bitstream into complete OBUs (zero-copy)
///
/// An OBU without a size field extends to the end of the buffer.
pub fn split_obus(data: &Bytes) -> Result<Vec<Bytes>> {
    let mut obus = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header = ObuHeader::parse(&data[offset..])?;
        let end = match header.payload_size {
            Some(size) => offset + header.header_len + size,
            None => data.len(),
        };
        if end > data.len() {
            return Err(MediaError::InvalidAv1Packet.into());
        }
        obus.push(data.slice(offset..end));
        offset = end;
    }
    Ok(obus)
}

/// Rewrite an OBU so that it carries an explicit size field
pub fn with_size_field(obu: &[u8]) -> Result<Bytes> {
    let header = ObuHeader::parse(obu)?;
    if header.has_size_field {
        return Ok(Bytes::copy_from_slice(obu));
    }
    let fixed = if header.has_extension { 2 } else { 1 };
    let payload = &obu[fixed..];
    let mut out = BytesMut::with_capacity(obu.len() + leb128_size(payload.len() as u64));
    out.put_u8(obu[0] | 0x02);
    if header.has_extension {
        out.put_u8(obu[1]);
    }
    write_leb128(&mut out, payload.len() as u64);
    out.put_slice(payload);
    Ok(out.freeze())
}

/// Check whether a temporal unit starts a new coded video sequence
///
/// A sequence header OBU only accompanies key frames in live streams, so it
/// doubles as the random access marker.
pub fn contains_sequence_header<'a, I>(obus: I) -> bool
where
    I: IntoIterator<Item = &'a Bytes>,
{
    obus.into_iter()
        .any(|o| obu_type_of(o) == Some(obu::SEQUENCE_HEADER))
}

struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn bits(&mut self, n: usize) -> Result<u32> {
        let mut value = 0u32;
        for _ in 0..n {
            let byte = *self
                .data
                .get(self.pos / 8)
                .ok_or(MediaError::InvalidAv1Packet)?;
            let bit = (byte >> (7 - (self.pos % 8))) & 1;
            value = (value << 1) | bit as u32;
            self.pos += 1;
        }
        Ok(value)
    }

    fn flag(&mut self) -> Result<bool> {
        Ok(self.bits(1)? == 1)
    }

    fn uvlc(&mut self) -> Result<u32> {
        let mut leading = 0;
        while !self.flag()? {
            leading += 1;
            if leading >= 32 {
                return Ok(u32::MAX);
            }
        }
        Ok(self.bits(leading)? + ((1u32 << leading) - 1))
    }
}

/// AV1 decoder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Av1Config {
    pub seq_profile: u8,
    pub seq_level_idx_0: u8,
    pub seq_tier_0: bool,
    pub high_bitdepth: bool,
    pub twelve_bit: bool,
    pub monochrome: bool,
    pub chroma_subsampling_x: bool,
    pub chroma_subsampling_y: bool,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay_minus_one: Option<u8>,
    /// Sequence header OBU (with size field)
    pub config_obus: Bytes,
}

impl Av1Config {
    /// Parse an AV1CodecConfigurationRecord
    pub fn parse(data: Bytes) -> Result<Self> {
        if data.len() < 4 || data[0] != 0x81 {
            return Err(MediaError::InvalidAv1Packet.into());
        }
        let b1 = data[1];
        let b2 = data[2];
        let b3 = data[3];
        Ok(Av1Config {
            seq_profile: b1 >> 5,
            seq_level_idx_0: b1 & 0x1F,
            seq_tier_0: b2 & 0x80 != 0,
            high_bitdepth: b2 & 0x40 != 0,
            twelve_bit: b2 & 0x20 != 0,
            monochrome: b2 & 0x10 != 0,
            chroma_subsampling_x: b2 & 0x08 != 0,
            chroma_subsampling_y: b2 & 0x04 != 0,
            chroma_sample_position: b2 & 0x03,
            initial_presentation_delay_minus_one: (b3 & 0x10 != 0).then_some(b3 & 0x0F),
            config_obus: data.slice(4..),
        })
    }

    /// Derive the record from a sequence header OBU
    ///
    /// Profile, level and tier of operating point 0 are read from the
    /// header; colour config falls back to 8-bit 4:2:0.
    pub fn from_sequence_header(obu: &Bytes) -> Result<Self> {
        let header = ObuHeader::parse(obu)?;
        if header.obu_type != obu::SEQUENCE_HEADER {
            return Err(MediaError::InvalidAv1Packet.into());
        }
        let payload = &obu[header.header_len..];
        let mut r = BitReader::new(payload);

        let seq_profile = r.bits(3)? as u8;
        let _still_picture = r.flag()?;
        let reduced_still_picture_header = r.flag()?;

        let (seq_level_idx_0, seq_tier_0) = if reduced_still_picture_header {
            (r.bits(5)? as u8, false)
        } else {
            let mut decoder_model_info_present = false;
            let mut buffer_delay_length = 0;
            if r.flag()? {
                // timing_info
                r.bits(32)?;
                r.bits(32)?;
                if r.flag()? {
                    r.uvlc()?;
                }
                decoder_model_info_present = r.flag()?;
                if decoder_model_info_present {
                    buffer_delay_length = r.bits(5)? as usize + 1;
                    r.bits(32)?;
                    r.bits(5)?;
                    r.bits(5)?;
                }
            }
            let initial_display_delay_present = r.flag()?;
            let operating_points = r.bits(5)? + 1;

            let mut first = None;
            for _ in 0..operating_points {
                r.bits(12)?;
                let level = r.bits(5)? as u8;
                let tier = if level > 7 { r.flag()? } else { false };
                if decoder_model_info_present && r.flag()? {
                    r.bits(buffer_delay_length)?;
                    r.bits(buffer_delay_length)?;
                    r.flag()?;
                }
                if initial_display_delay_present && r.flag()? {
                    r.bits(4)?;
                }
                first.get_or_insert((level, tier));
            }
            first.ok_or(MediaError::InvalidAv1Packet)?
        };

        Ok(Av1Config {
            seq_profile,
            seq_level_idx_0,
            seq_tier_0,
            high_bitdepth: false,
            twelve_bit: false,
            monochrome: false,
            chroma_subsampling_x: true,
            chroma_subsampling_y: true,
            chroma_sample_position: 0,
            initial_presentation_delay_minus_one: None,
            config_obus: with_size_field(obu)?,
        })
    }

    /// Serialize as an AV1CodecConfigurationRecord
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(4 + self.config_obus.len());
        out.put_u8(0x81);
        out.put_u8((self.seq_profile << 5) | (self.seq_level_idx_0 & 0x1F));
        out.put_u8(
            ((self.seq_tier_0 as u8) << 7)
                | ((self.high_bitdepth as u8) << 6)
                | ((self.twelve_bit as u8) << 5)
                | ((self.monochrome as u8) << 4)
                | ((self.chroma_subsampling_x as u8) << 3)
                | ((self.chroma_subsampling_y as u8) << 2)
                | (self.chroma_sample_position & 0x03),
        );
        out.put_u8(match self.initial_presentation_delay_minus_one {
            Some(d) => 0x10 | (d & 0x0F),
            None => 0,
        });
        out.put_slice(&self.config_obus);
        out.freeze()
    }

    /// RFC 6381 style codec string, e.g. `av01.0.08M.08`
    pub fn codec_string(&self) -> String {
        let depth = if self.twelve_bit {
            12
        } else if self.high_bitdepth {
            10
        } else {
            8
        };
        format!(
            "av01.{}.{:02}{}.{:02}",
            self.seq_profile,
            self.seq_level_idx_0,
            if self.seq_tier_0 { 'H' } else { 'M' },
            depth
        )
    }
}
