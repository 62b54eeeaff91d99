//! Error types
//!
//! Parsers return [`MediaError`] or [`RtpError`] wrapped in the crate-level
//! [`Error`]. Ring and frame failures are never fatal to a stream: callers log
//! them and drop the frame in progress.

use std::fmt;

use crate::registry::RegistryError;

/// Crate result alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure reported by an adapter
    Io(std::io::Error),
    /// Malformed media payload (AVCC, annex-B, ADTS, OBU, FLV)
    Media(MediaError),
    /// Malformed RTP packet or demux failure
    Rtp(RtpError),
    /// Stream directory / lifecycle refusal
    Registry(RegistryError),
    /// The track's writer has gone away
    TrackClosed,
    /// A reader cursor was severed from the ring and must resync
    ReaderDetached,
    /// Waited longer than the configured timeout
    Timeout(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Media(e) => write!(f, "media error: {}", e),
            Error::Rtp(e) => write!(f, "RTP error: {}", e),
            Error::Registry(e) => write!(f, "registry error: {}", e),
            Error::TrackClosed => write!(f, "track closed"),
            Error::ReaderDetached => write!(f, "reader detached from ring"),
            Error::Timeout(what) => write!(f, "timed out waiting for {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Media(e) => Some(e),
            Error::Rtp(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<MediaError> for Error {
    fn from(e: MediaError) -> Self {
        Error::Media(e)
    }
}

impl From<RtpError> for Error {
    fn from(e: RtpError) -> Self {
        Error::Rtp(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Media payload parse errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Bad AVC packet or AVCDecoderConfigurationRecord
    InvalidAvcPacket,
    /// Bad HEVC packet or HEVCDecoderConfigurationRecord
    InvalidHevcPacket,
    /// Bad AV1 OBU or AV1CodecConfigurationRecord
    InvalidAv1Packet,
    /// Bad AAC packet or AudioSpecificConfig
    InvalidAacPacket,
    /// Bad ADTS header
    InvalidAdts,
    /// Bad FLV tag
    InvalidFlvTag,
    /// A length-prefixed NALU runs past the end of the buffer
    NaluOverrun { len: usize, remaining: usize },
    /// Codec id not handled by this track
    UnsupportedCodec(u8),
    /// A frame was flushed before any decoder configuration arrived
    MissingSequenceHeader,
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::InvalidAvcPacket => write!(f, "invalid AVC packet"),
            MediaError::InvalidHevcPacket => write!(f, "invalid HEVC packet"),
            MediaError::InvalidAv1Packet => write!(f, "invalid AV1 packet"),
            MediaError::InvalidAacPacket => write!(f, "invalid AAC packet"),
            MediaError::InvalidAdts => write!(f, "invalid ADTS header"),
            MediaError::InvalidFlvTag => write!(f, "invalid FLV tag"),
            MediaError::NaluOverrun { len, remaining } => write!(
                f,
                "NALU length {} exceeds remaining {} bytes",
                len, remaining
            ),
            MediaError::UnsupportedCodec(id) => write!(f, "unsupported codec id {}", id),
            MediaError::MissingSequenceHeader => write!(f, "no sequence header yet"),
        }
    }
}

impl std::error::Error for MediaError {}

/// RTP packet and depacketization errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpError {
    /// Fewer bytes than the fixed header (or declared CSRC/extension) needs
    PacketTooShort,
    /// Version field is not 2
    UnsupportedVersion(u8),
    /// Padding length larger than the payload
    InvalidPadding,
    /// Aggregation packet with a length field past the end
    InvalidAggregation,
    /// Fragment arrived without its start fragment
    FragmentWithoutStart,
    /// AAC AU-header section inconsistent with payload
    InvalidAuHeader,
    /// AV1 aggregation header or OBU length broken
    InvalidObu,
    /// NAL unit type not allowed in RTP payloads
    UnsupportedNalu(u8),
}

impl fmt::Display for RtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtpError::PacketTooShort => write!(f, "packet too short"),
            RtpError::UnsupportedVersion(v) => write!(f, "unsupported RTP version {}", v),
            RtpError::InvalidPadding => write!(f, "invalid padding"),
            RtpError::InvalidAggregation => write!(f, "invalid aggregation packet"),
            RtpError::FragmentWithoutStart => write!(f, "fragment without start"),
            RtpError::InvalidAuHeader => write!(f, "invalid AU header section"),
            RtpError::InvalidObu => write!(f, "invalid OBU element"),
            RtpError::UnsupportedNalu(t) => write!(f, "unsupported NALU type {}", t),
        }
    }
}

impl std::error::Error for RtpError {}
