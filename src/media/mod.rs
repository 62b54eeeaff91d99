//! Media wire formats
//!
//! This module provides:
//! - FLV tag parsing and generation, audio/video tag headers
//! - Annex-B splitting and joining
//! - H.264 (AVCC), H.265 (HVCC) and AV1 (AV1C) decoder configuration records
//! - AAC AudioSpecificConfig and ADTS framing
//! - The per-track bytes pool

pub mod aac;
pub mod annexb;
pub mod av1;
pub mod flv;
pub mod h264;
pub mod h265;
pub mod pool;

pub use aac::{AacData, AacPacketType, AdtsHeader, AudioSpecificConfig};
pub use av1::Av1Config;
pub use flv::{FlvTag, FlvTagType, VideoTagHeader};
pub use h264::{AvcConfig, NaluType};
pub use h265::HevcConfig;
pub use pool::BytesPool;

/// Video codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodecId {
    H264,
    H265,
    Av1,
}

impl VideoCodecId {
    /// FLV legacy codec id
    pub fn flv_id(self) -> u8 {
        match self {
            VideoCodecId::H264 => 7,
            VideoCodecId::H265 => 12,
            VideoCodecId::Av1 => 13,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            VideoCodecId::H264 => "h264",
            VideoCodecId::H265 => "h265",
            VideoCodecId::Av1 => "av1",
        }
    }
}

/// Audio codec carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioCodecId {
    Aac,
    /// G.711 A-law
    Pcma,
    /// G.711 mu-law
    Pcmu,
    Opus,
}

impl AudioCodecId {
    pub fn flv_format(self) -> flv::AudioFormat {
        match self {
            AudioCodecId::Aac => flv::AudioFormat::Aac,
            AudioCodecId::Pcma => flv::AudioFormat::G711ALaw,
            AudioCodecId::Pcmu => flv::AudioFormat::G711MuLaw,
            AudioCodecId::Opus => flv::AudioFormat::Opus,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AudioCodecId::Aac => "aac",
            AudioCodecId::Pcma => "pcma",
            AudioCodecId::Pcmu => "pcmu",
            AudioCodecId::Opus => "opus",
        }
    }
}
