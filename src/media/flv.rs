//! FLV tag framing for the FLV view
//!
//! ```text
//! +--------+-------------+---------------+-------------+---------+---------------+
//! | Type(1)| DataSize(3) | TS(3) TSExt(1)| StreamID(3) | Data(N) | PrevTagSize(4)|
//! +--------+-------------+---------------+-------------+---------+---------------+
//! ```
//!
//! Video bodies start with the 5-byte [`VideoTagHeader`]; audio bodies with
//! one [`audio_header_byte`] (plus the AAC packet type for AAC).

use bytes::Bytes;

use crate::error::{MediaError, Result};

pub const TAG_HEADER_SIZE: usize = 11;

/// Video tag prefix: frame type/codec, packet type, SI24 CTS
pub const VIDEO_HEADER_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlvTagType {
    Audio,
    Video,
    Script,
}

impl FlvTagType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b & 0x1F {
            8 => Some(FlvTagType::Audio),
            9 => Some(FlvTagType::Video),
            18 => Some(FlvTagType::Script),
            _ => None,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FlvTagType::Audio => 8,
            FlvTagType::Video => 9,
            FlvTagType::Script => 18,
        }
    }
}

/// One FLV tag; `data` is the body without header or trailer
#[derive(Debug, Clone)]
pub struct FlvTag {
    pub tag_type: FlvTagType,
    /// Milliseconds
    pub timestamp: u32,
    pub data: Bytes,
}

/// SoundFormat nibble of the audio tag byte, for the codecs tracks carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AudioFormat {
    G711ALaw = 7,
    G711MuLaw = 8,
    Aac = 10,
    /// Non-standard id shared by several servers
    Opus = 13,
}

impl AudioFormat {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b >> 4 {
            7 => Some(AudioFormat::G711ALaw),
            8 => Some(AudioFormat::G711MuLaw),
            10 => Some(AudioFormat::Aac),
            13 => Some(AudioFormat::Opus),
            _ => None,
        }
    }
}

/// First byte of an FLV audio tag
///
/// AAC always signals 44 kHz stereo; the real layout lives in the
/// AudioSpecificConfig.
pub fn audio_header_byte(format: AudioFormat, sample_rate: u32, sample_size: u8, channels: u8) -> u8 {
    if format == AudioFormat::Aac {
        return 0xAF;
    }
    let rate: u8 = match sample_rate {
        0..=8000 => 0,
        8001..=16000 => 1,
        16001..=32000 => 2,
        _ => 3,
    };
    let size = (sample_size == 16) as u8;
    let stereo = (channels > 1) as u8;
    ((format as u8) << 4) | (rate << 2) | (size << 1) | stereo
}

/// The AVC/HEVC/AV1 video tag prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoTagHeader {
    pub keyframe: bool,
    pub codec_id: u8,
    /// 0 = sequence header, 1 = NALUs, 2 = end of sequence
    pub packet_type: u8,
    /// Composition time offset in milliseconds
    pub composition_time: i32,
}

impl VideoTagHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < VIDEO_HEADER_SIZE {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let raw = ((data[2] as u32) << 16) | ((data[3] as u32) << 8) | data[4] as u32;
        // sign-extend SI24
        let composition_time = ((raw << 8) as i32) >> 8;
        Ok(VideoTagHeader {
            // 1 = keyframe, 4 = generated keyframe
            keyframe: matches!(data[0] >> 4, 1 | 4),
            codec_id: data[0] & 0x0F,
            packet_type: data[1],
            composition_time,
        })
    }

    pub fn is_sequence_header(&self) -> bool {
        self.packet_type == 0
    }

    pub fn to_bytes(&self) -> [u8; VIDEO_HEADER_SIZE] {
        let frame_type = if self.keyframe { 1 } else { 2 };
        let cts = (self.composition_time as u32) & 0x00FF_FFFF;
        [
            (frame_type << 4) | (self.codec_id & 0x0F),
            self.packet_type,
            (cts >> 16) as u8,
            (cts >> 8) as u8,
            cts as u8,
        ]
    }
}

impl FlvTag {
    pub fn encode_header(tag_type: FlvTagType, data_size: usize, timestamp: u32) -> [u8; TAG_HEADER_SIZE] {
        let size = data_size as u32;
        [
            tag_type.to_byte(),
            (size >> 16) as u8,
            (size >> 8) as u8,
            size as u8,
            (timestamp >> 16) as u8,
            (timestamp >> 8) as u8,
            timestamp as u8,
            (timestamp >> 24) as u8, // TimestampExtended
            0,
            0,
            0,
        ]
    }

    /// PreviousTagSize trailer
    pub fn encode_trailer(data_size: usize) -> [u8; 4] {
        ((data_size + TAG_HEADER_SIZE) as u32).to_be_bytes()
    }

    /// Parse one tag (header, body, trailer) off the front of `data`
    ///
    /// Returns the tag and the number of bytes it used.
    pub fn parse(data: &Bytes) -> Result<(Self, usize)> {
        if data.len() < TAG_HEADER_SIZE {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let tag_type = FlvTagType::from_byte(data[0]).ok_or(MediaError::InvalidFlvTag)?;
        let size = ((data[1] as usize) << 16) | ((data[2] as usize) << 8) | data[3] as usize;
        let timestamp = ((data[7] as u32) << 24)
            | ((data[4] as u32) << 16)
            | ((data[5] as u32) << 8)
            | data[6] as u32;
        let end = TAG_HEADER_SIZE + size;
        if data.len() < end + 4 {
            return Err(MediaError::InvalidFlvTag.into());
        }
        let tag = FlvTag {
            tag_type,
            timestamp,
            data: data.slice(TAG_HEADER_SIZE..end),
        };
        Ok((tag, end + 4))
    }
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    #[test]
    fn test_audio_format_nibble() {
        assert_eq!(AudioFormat::from_byte(0x72), Some(AudioFormat::G711ALaw));
        assert_eq!(AudioFormat::from_byte(0xAF), Some(AudioFormat::Aac));
        assert_eq!(AudioFormat::from_byte(0xD0), Some(AudioFormat::Opus));
        assert_eq!(AudioFormat::from_byte(0x20), None);
    }

    #[test]
    fn test_audio_header_byte() {
        assert_eq!(audio_header_byte(AudioFormat::Aac, 48000, 16, 1), 0xAF);
        // A-law, 8 kHz, 16-bit, mono
        assert_eq!(audio_header_byte(AudioFormat::G711ALaw, 8000, 16, 1), 0x72);
        // mu-law, 8 kHz, 16-bit, stereo
        assert_eq!(audio_header_byte(AudioFormat::G711MuLaw, 8000, 16, 2), 0x83);
        assert_eq!(audio_header_byte(AudioFormat::Opus, 48000, 16, 2), 0xDF);
    }

    #[test]
    fn test_video_tag_header() {
        let header = VideoTagHeader::parse(&[0x17, 0x01, 0x00, 0x00, 0x50]).unwrap();
        assert!(header.keyframe);
        assert_eq!(header.codec_id, 7);
        assert!(!header.is_sequence_header());
        assert_eq!(header.composition_time, 80);
        assert_eq!(header.to_bytes(), [0x17, 0x01, 0x00, 0x00, 0x50]);
    }

    #[test]
    fn test_video_tag_header_negative_cts() {
        let header = VideoTagHeader::parse(&[0x27, 0x01, 0xFF, 0xFF, 0xD8]).unwrap();
        assert!(!header.keyframe);
        assert_eq!(header.composition_time, -40);
        assert_eq!(header.to_bytes(), [0x27, 0x01, 0xFF, 0xFF, 0xD8]);
        assert!(VideoTagHeader::parse(&[0x17, 0x01]).is_err());
    }

    #[test]
    fn test_tag_framing() {
        let header = FlvTag::encode_header(FlvTagType::Video, 0x010203, 0x1234_5678);
        assert_eq!(header, [0x09, 0x01, 0x02, 0x03, 0x34, 0x56, 0x78, 0x12, 0x00, 0x00, 0x00]);
        assert_eq!(FlvTag::encode_trailer(5), [0x00, 0x00, 0x00, 0x10]);

        let body = [0xAF, 0x01, 0x21];
        let mut buf = BytesMut::new();
        buf.put_slice(&FlvTag::encode_header(FlvTagType::Audio, body.len(), 0x0100_0010));
        buf.put_slice(&body);
        buf.put_slice(&FlvTag::encode_trailer(body.len()));
        let bytes = buf.freeze();

        let (tag, used) = FlvTag::parse(&bytes).unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(tag.tag_type, FlvTagType::Audio);
        assert_eq!(tag.timestamp, 0x0100_0010);
        assert_eq!(&tag.data[..], &body);
        assert!(FlvTag::parse(&bytes.slice(..bytes.len() - 1)).is_err());
    }
}
