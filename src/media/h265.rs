//! H.265/HEVC parameter sets
//!
//! HEVC NAL headers are two bytes; the type lives in bits 1..7 of the first.
//!
//! HEVCDecoderConfigurationRecord (ISO/IEC 14496-15 §8.3.3.1) is 23 fixed
//! bytes followed by NAL unit arrays (VPS, SPS, PPS, optional SEI):
//! ```text
//! version(8) | profile_space(2) tier(1) profile_idc(5) | compat_flags(32)
//! | constraint_flags(48) | level_idc(8) | 1111 min_spatial_segmentation(12)
//! | 111111 parallelism(2) | 111111 chroma_format(2) | 11111 luma_depth-8(3)
//! | 11111 chroma_depth-8(3) | avg_frame_rate(16)
//! | constant_rate(2) num_temporal_layers(3) temporal_id_nested(1) length_size-1(2)
//! | num_arrays(8) | { completeness(1) 0 type(6) | count(16) | { len(16) nalu }* }*
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// HEVC NAL unit types the core cares about
pub mod nal {
    pub const BLA_W_LP: u8 = 16;
    pub const IDR_W_RADL: u8 = 19;
    pub const IDR_N_LP: u8 = 20;
    pub const CRA: u8 = 21;
    pub const RSV_IRAP_23: u8 = 23;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;
    pub const SEI_PREFIX: u8 = 39;
    pub const SEI_SUFFIX: u8 = 40;
}

/// NAL unit type from the first header byte
pub fn nalu_type(b: u8) -> u8 {
    (b >> 1) & 0x3F
}

/// Type of a NAL unit, if it has a header
pub fn nalu_type_of(nalu: &[u8]) -> Option<u8> {
    nalu.first().map(|b| nalu_type(*b))
}

/// IRAP pictures (BLA, IDR, CRA) are random access points
pub fn is_irap(t: u8) -> bool {
    (nal::BLA_W_LP..=nal::RSV_IRAP_23).contains(&t)
}

/// Check whether any NAL unit in the list is an IRAP picture
pub fn contains_irap<'a, I>(nalus: I) -> bool
where
    I: IntoIterator<Item = &'a Bytes>,
{
    nalus
        .into_iter()
        .any(|n| nalu_type_of(n).map(is_irap).unwrap_or(false))
}

/// Remove emulation prevention bytes (`00 00 03` -> `00 00`)
pub fn unescape_rbsp(nalu: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nalu.len());
    let mut zeros = 0;
    for &b in nalu {
        if zeros >= 2 && b == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    out
}

/// HEVC decoder configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HevcConfig {
    pub general_profile_space: u8,
    pub general_tier_flag: bool,
    pub general_profile_idc: u8,
    pub general_profile_compatibility_flags: u32,
    /// Lower 48 bits used
    pub general_constraint_indicator_flags: u64,
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16,
    pub parallelism_type: u8,
    pub chroma_format_idc: u8,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8,
    pub num_temporal_layers: u8,
    pub temporal_id_nested: bool,
    /// NALU length size in bytes (usually 4)
    pub nalu_length_size: u8,
    pub vps: Vec<Bytes>,
    pub sps: Vec<Bytes>,
    pub pps: Vec<Bytes>,
}

impl HevcConfig {
    /// Parse an HEVCDecoderConfigurationRecord
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.len() < 23 {
            return Err(MediaError::InvalidHevcPacket.into());
        }
        if data.get_u8() != 1 {
            return Err(MediaError::InvalidHevcPacket.into());
        }

        let b = data.get_u8();
        let general_profile_space = b >> 6;
        let general_tier_flag = (b & 0x20) != 0;
        let general_profile_idc = b & 0x1F;
        let general_profile_compatibility_flags = data.get_u32();
        let general_constraint_indicator_flags = data.get_uint(6);
        let general_level_idc = data.get_u8();
        let min_spatial_segmentation_idc = data.get_u16() & 0x0FFF;
        let parallelism_type = data.get_u8() & 0x03;
        let chroma_format_idc = data.get_u8() & 0x03;
        let bit_depth_luma_minus8 = data.get_u8() & 0x07;
        let bit_depth_chroma_minus8 = data.get_u8() & 0x07;
        let avg_frame_rate = data.get_u16();
        let b = data.get_u8();
        let constant_frame_rate = b >> 6;
        let num_temporal_layers = (b >> 3) & 0x07;
        let temporal_id_nested = (b & 0x04) != 0;
        let nalu_length_size = (b & 0x03) + 1;
        let num_arrays = data.get_u8();

        let mut vps = Vec::new();
        let mut sps = Vec::new();
        let mut pps = Vec::new();
        for _ in 0..num_arrays {
            if data.len() < 3 {
                return Err(MediaError::InvalidHevcPacket.into());
            }
            let t = data.get_u8() & 0x3F;
            let count = data.get_u16();
            for _ in 0..count {
                if data.len() < 2 {
                    return Err(MediaError::InvalidHevcPacket.into());
                }
                let len = data.get_u16() as usize;
                if data.len() < len {
                    return Err(MediaError::InvalidHevcPacket.into());
                }
                let nalu = data.split_to(len);
                match t {
                    nal::VPS => vps.push(nalu),
                    nal::SPS => sps.push(nalu),
                    nal::PPS => pps.push(nalu),
                    _ => {}
                }
            }
        }

        Ok(HevcConfig {
            general_profile_space,
            general_tier_flag,
            general_profile_idc,
            general_profile_compatibility_flags,
            general_constraint_indicator_flags,
            general_level_idc,
            min_spatial_segmentation_idc,
            parallelism_type,
            chroma_format_idc,
            bit_depth_luma_minus8,
            bit_depth_chroma_minus8,
            avg_frame_rate,
            constant_frame_rate,
            num_temporal_layers,
            temporal_id_nested,
            nalu_length_size,
            vps,
            sps,
            pps,
        })
    }

    /// Build a configuration from VPS/SPS/PPS NAL units
    ///
    /// profile_tier_level is read from the SPS after unescaping; everything
    /// the SPS does not carry at a fixed offset gets 4:2:0 8-bit defaults.
    pub fn from_parameter_sets(vps: Bytes, sps: Bytes, pps: Bytes) -> Result<Self> {
        let rbsp = unescape_rbsp(&sps);
        // 2-byte NAL header, 1 byte of vps id / sub layers, then PTL
        if rbsp.len() < 15 || vps.is_empty() || pps.is_empty() {
            return Err(MediaError::InvalidHevcPacket.into());
        }
        let max_sub_layers_minus1 = (rbsp[2] >> 1) & 0x07;
        let temporal_id_nested = (rbsp[2] & 0x01) != 0;
        let ptl = rbsp[3];
        let compat = u32::from_be_bytes([rbsp[4], rbsp[5], rbsp[6], rbsp[7]]);
        let constraint = rbsp[8..14]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64);

        Ok(HevcConfig {
            general_profile_space: ptl >> 6,
            general_tier_flag: (ptl & 0x20) != 0,
            general_profile_idc: ptl & 0x1F,
            general_profile_compatibility_flags: compat,
            general_constraint_indicator_flags: constraint,
            general_level_idc: rbsp[14],
            min_spatial_segmentation_idc: 0,
            parallelism_type: 0,
            chroma_format_idc: 1,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            avg_frame_rate: 0,
            constant_frame_rate: 0,
            num_temporal_layers: max_sub_layers_minus1 + 1,
            temporal_id_nested,
            nalu_length_size: 4,
            vps: vec![vps],
            sps: vec![sps],
            pps: vec![pps],
        })
    }

    /// Serialize as an HEVCDecoderConfigurationRecord
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(64);
        out.put_u8(1);
        out.put_u8(
            (self.general_profile_space << 6)
                | ((self.general_tier_flag as u8) << 5)
                | (self.general_profile_idc & 0x1F),
        );
        out.put_u32(self.general_profile_compatibility_flags);
        out.put_uint(self.general_constraint_indicator_flags & 0xFFFF_FFFF_FFFF, 6);
        out.put_u8(self.general_level_idc);
        out.put_u16(0xF000 | (self.min_spatial_segmentation_idc & 0x0FFF));
        out.put_u8(0xFC | (self.parallelism_type & 0x03));
        out.put_u8(0xFC | (self.chroma_format_idc & 0x03));
        out.put_u8(0xF8 | (self.bit_depth_luma_minus8 & 0x07));
        out.put_u8(0xF8 | (self.bit_depth_chroma_minus8 & 0x07));
        out.put_u16(self.avg_frame_rate);
        out.put_u8(
            (self.constant_frame_rate << 6)
                | ((self.num_temporal_layers & 0x07) << 3)
                | ((self.temporal_id_nested as u8) << 2)
                | (self.nalu_length_size.saturating_sub(1) & 0x03),
        );

        let arrays = [
            (nal::VPS, &self.vps),
            (nal::SPS, &self.sps),
            (nal::PPS, &self.pps),
        ];
        out.put_u8(arrays.iter().filter(|(_, v)| !v.is_empty()).count() as u8);
        for (t, sets) in arrays {
            if sets.is_empty() {
                continue;
            }
            out.put_u8(0x80 | t);
            out.put_u16(sets.len() as u16);
            for ps in sets {
                out.put_u16(ps.len() as u16);
                out.put_slice(ps);
            }
        }

        out.freeze()
    }

    /// RFC 6381 codec string without constraint bytes, e.g. `hvc1.1.6.L93`
    pub fn codec_string(&self) -> String {
        let space = match self.general_profile_space {
            1 => "A",
            2 => "B",
            3 => "C",
            _ => "",
        };
        let tier = if self.general_tier_flag { 'H' } else { 'L' };
        format!(
            "hvc1.{}{}.{:X}.{}{}",
            space,
            self.general_profile_idc,
            self.general_profile_compatibility_flags.reverse_bits(),
            tier,
            self.general_level_idc
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vps() -> Bytes {
        Bytes::from_static(&[0x40, 0x01, 0x0C, 0x01, 0xFF, 0xFF])
    }

    fn sps() -> Bytes {
        // NAL header, vps id / sub layers, PTL: Main profile, level 93
        Bytes::from_static(&[
            0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00, 0x00,
            0x03, 0x00, 0x5D, 0xA0, 0x02,
        ])
    }

    fn pps() -> Bytes {
        Bytes::from_static(&[0x44, 0x01, 0xC1, 0x72, 0xB4])
    }

    #[test]
    fn test_nalu_types() {
        assert_eq!(nalu_type(0x40), nal::VPS);
        assert_eq!(nalu_type(0x42), nal::SPS);
        assert_eq!(nalu_type(0x44), nal::PPS);
        assert_eq!(nalu_type(0x26), nal::IDR_W_RADL);
        assert_eq!(nalu_type(0x02), 1);
        assert!(is_irap(nal::CRA));
        assert!(!is_irap(1));
    }

    #[test]
    fn test_unescape_rbsp() {
        assert_eq!(
            unescape_rbsp(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_from_parameter_sets() {
        let config = HevcConfig::from_parameter_sets(vps(), sps(), pps()).unwrap();
        assert_eq!(config.general_profile_idc, 1);
        assert!(!config.general_tier_flag);
        assert_eq!(config.general_profile_compatibility_flags, 0x6000_0000);
        assert_eq!(config.general_constraint_indicator_flags, 0x9000_0000_0000);
        assert_eq!(config.general_level_idc, 93);
        assert_eq!(config.num_temporal_layers, 1);
        assert!(config.temporal_id_nested);
    }

    #[test]
    fn test_record_round_trip() {
        let config = HevcConfig::from_parameter_sets(vps(), sps(), pps()).unwrap();
        let record = config.to_bytes();
        assert_eq!(record[0], 1);
        assert_eq!(record[22], 3); // three arrays
        let parsed = HevcConfig::parse(record).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_parse_rejects_short_record() {
        assert!(HevcConfig::parse(Bytes::from_static(&[0x01; 10])).is_err());
    }

    #[test]
    fn test_parse_rejects_truncated_array() {
        let config = HevcConfig::from_parameter_sets(vps(), sps(), pps()).unwrap();
        let record = config.to_bytes();
        let truncated = record.slice(..record.len() - 3);
        assert!(HevcConfig::parse(truncated).is_err());
    }

    #[test]
    fn test_contains_irap() {
        let trail = Bytes::from_static(&[0x02, 0x01, 0xD0]);
        let idr = Bytes::from_static(&[0x26, 0x01, 0xAF]);
        assert!(!contains_irap([&trail]));
        assert!(contains_irap([&trail, &idr]));
    }

    #[test]
    fn test_codec_string() {
        let config = HevcConfig::from_parameter_sets(vps(), sps(), pps()).unwrap();
        assert_eq!(config.codec_string(), "hvc1.1.6.L93");
    }
}
