//! Per-codec behaviour of video tracks
//!
//! A video track owns one boxed [`VideoCodec`] that knows which units are
//! parameter sets, what makes a frame a random access point, how the FLV body
//! is split, and which RTP payload format applies.

mod av1;
mod h264;
mod h265;

use bytes::Bytes;

use crate::error::Result;
use crate::frame::AvFrame;
use crate::media::VideoCodecId;
use crate::rtp::{Depacketizer, Packetizer, RtpSequencer};

pub(crate) use av1::Av1Codec;
pub(crate) use h264::H264Codec;
pub(crate) use h265::H265Codec;

/// What a track does with an incoming unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnitKind {
    /// Updates the decoder configuration; `keep` also leaves it in the frame
    Parameter { keep: bool },
    /// Dropped (delimiters, filler)
    Ignored,
    /// Part of the picture
    Media,
}

/// Decoder configuration derived by a codec
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodecConfig {
    /// AVCDecoderConfigurationRecord, HVCC or AV1C
    pub record: Bytes,
    /// Raw parameter units in decode order
    pub parameter_sets: Vec<Bytes>,
    pub codec_string: String,
}

pub(crate) trait VideoCodec: Send + std::fmt::Debug {
    fn id(&self) -> VideoCodecId;

    fn classify(&self, unit: &[u8]) -> UnitKind;

    /// Whether the frame can start decoding
    fn is_keyframe(&self, frame: &AvFrame) -> bool;

    /// Record an in-band parameter unit; true when a complete configuration
    /// results that differs from the previous one
    fn update_parameter(&mut self, unit: Bytes) -> bool;

    /// Replace the configuration from an FLV sequence header record
    fn load_record(&mut self, record: Bytes) -> Result<()>;

    fn config(&self) -> Option<CodecConfig>;

    /// Split an FLV video body (after the 5-byte tag header) into units
    fn split_body(&self, body: &Bytes) -> Result<Vec<Bytes>>;

    /// Whether RTP egress repeats the parameter sets before each keyframe
    fn repeats_parameter_sets(&self) -> bool {
        true
    }

    fn depacketizer(&self) -> Box<dyn Depacketizer>;

    fn packetizer(&self, sequencer: RtpSequencer, mtu: usize) -> Box<dyn Packetizer>;
}

/// Dynamic RTP payload type used for egress
pub(crate) fn payload_type(id: VideoCodecId) -> u8 {
    match id {
        VideoCodecId::H264 => 96,
        VideoCodecId::H265 => 98,
        VideoCodecId::Av1 => 99,
    }
}

pub(crate) fn for_codec(id: VideoCodecId) -> Box<dyn VideoCodec> {
    match id {
        VideoCodecId::H264 => Box::new(H264Codec::default()),
        VideoCodecId::H265 => Box::new(H265Codec::default()),
        VideoCodecId::Av1 => Box::new(Av1Codec::default()),
    }
}
