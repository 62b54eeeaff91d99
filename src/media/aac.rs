//! AAC configuration and ADTS framing
//!
//! FLV-style ingest carries raw AAC behind a packet-type byte
//! (0 = AudioSpecificConfig, 1 = raw frame); RTP and TS-style ingest deliver
//! ADTS frames, whose 7-byte header is laid out as:
//!
//! ```text
//! syncword(12) id(1) layer(2) protection_absent(1)
//! profile(2) sf_index(4) private(1) channel_config(3)
//! original(1) home(1) copyright_id(1) copyright_start(1)
//! frame_length(13) buffer_fullness(11) raw_blocks(2)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{MediaError, Result};

/// Byte after the FLV audio header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AacPacketType {
    SequenceHeader = 0,
    Raw = 1,
}

impl AacPacketType {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(AacPacketType::SequenceHeader),
            1 => Some(AacPacketType::Raw),
            _ => None,
        }
    }
}

/// Sampling frequencies by index; 13 and 14 are reserved, 15 is explicit
pub const SAMPLING_FREQUENCIES: [u32; 16] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350, 0, 0,
    0,
];

fn sampling_frequency_index(hz: u32) -> Option<u8> {
    SAMPLING_FREQUENCIES[..13]
        .iter()
        .position(|&f| f == hz)
        .map(|i| i as u8)
}

/// MPEG-4 AudioSpecificConfig with the GASpecificConfig flags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSpecificConfig {
    pub audio_object_type: u8,
    pub sampling_frequency_index: u8,
    pub sampling_frequency: u32,
    pub channel_configuration: u8,
    /// 960-sample frames instead of 1024
    pub frame_length_flag: bool,
    pub depends_on_core_coder: bool,
    pub extension_flag: bool,
}

impl AudioSpecificConfig {
    /// Plain config for a standard sampling rate
    pub fn new(audio_object_type: u8, sampling_frequency: u32, channels: u8) -> Result<Self> {
        let index =
            sampling_frequency_index(sampling_frequency).ok_or(MediaError::InvalidAacPacket)?;
        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index: index,
            sampling_frequency,
            channel_configuration: channels,
            frame_length_flag: false,
            depends_on_core_coder: false,
            extension_flag: false,
        })
    }

    /// aot(5) sf_index(4) [frequency(24)] channels(4) flags(3)
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 2 {
            return Err(MediaError::InvalidAacPacket.into());
        }
        let (b0, b1) = (data[0], data[1]);
        let audio_object_type = (b0 >> 3) & 0x1F;
        let sampling_frequency_index = ((b0 & 0x07) << 1) | ((b1 >> 7) & 0x01);

        if sampling_frequency_index == 0x0F {
            if data.len() < 5 {
                return Err(MediaError::InvalidAacPacket.into());
            }
            let f0 = (data[1] & 0x7F) as u32;
            let f1 = data[2] as u32;
            let f2 = data[3] as u32;
            let f3 = (data[4] >> 7) as u32;
            let sampling_frequency = (f0 << 17) | (f1 << 9) | (f2 << 1) | f3;
            let tail = data[4];
            return Ok(AudioSpecificConfig {
                audio_object_type,
                sampling_frequency_index,
                sampling_frequency,
                channel_configuration: (tail >> 3) & 0x0F,
                frame_length_flag: (tail & 0x04) != 0,
                depends_on_core_coder: (tail & 0x02) != 0,
                extension_flag: (tail & 0x01) != 0,
            });
        }

        let sampling_frequency = SAMPLING_FREQUENCIES[sampling_frequency_index as usize];
        if sampling_frequency == 0 {
            return Err(MediaError::InvalidAacPacket.into());
        }

        Ok(AudioSpecificConfig {
            audio_object_type,
            sampling_frequency_index,
            sampling_frequency,
            channel_configuration: (b1 >> 3) & 0x0F,
            frame_length_flag: (b1 & 0x04) != 0,
            depends_on_core_coder: (b1 & 0x02) != 0,
            extension_flag: (b1 & 0x01) != 0,
        })
    }

    /// Serialize the config (2 bytes, 5 with an explicit frequency)
    pub fn to_bytes(&self) -> Bytes {
        let flags = ((self.frame_length_flag as u8) << 2)
            | ((self.depends_on_core_coder as u8) << 1)
            | (self.extension_flag as u8);
        let mut out = BytesMut::with_capacity(5);
        out.put_u8((self.audio_object_type << 3) | ((self.sampling_frequency_index >> 1) & 0x07));
        if self.sampling_frequency_index == 0x0F {
            let f = self.sampling_frequency & 0x00FF_FFFF;
            out.put_u8(0x80 | ((f >> 17) & 0x7F) as u8);
            out.put_u8((f >> 9) as u8);
            out.put_u8((f >> 1) as u8);
            out.put_u8((((f & 0x01) as u8) << 7) | ((self.channel_configuration & 0x0F) << 3) | flags);
        } else {
            out.put_u8(
                ((self.sampling_frequency_index & 0x01) << 7)
                    | ((self.channel_configuration & 0x0F) << 3)
                    | flags,
            );
        }
        out.freeze()
    }

    /// The config an ADTS header implies
    pub fn from_adts(header: &AdtsHeader) -> Self {
        AudioSpecificConfig {
            audio_object_type: header.profile + 1,
            sampling_frequency_index: header.sampling_frequency_index,
            sampling_frequency: SAMPLING_FREQUENCIES[header.sampling_frequency_index as usize],
            channel_configuration: header.channel_configuration,
            frame_length_flag: false,
            depends_on_core_coder: false,
            extension_flag: false,
        }
    }

    /// 7-byte ADTS header (no CRC) for a raw frame of `payload_len` bytes
    pub fn to_adts(&self, payload_len: usize) -> [u8; 7] {
        let profile = self.audio_object_type.saturating_sub(1) & 0x03;
        let channels = self.channel_configuration;
        let len = payload_len + 7;
        [
            0xFF,
            0xF1,
            (profile << 6) | ((self.sampling_frequency_index & 0x0F) << 2) | ((channels >> 2) & 0x01),
            ((channels & 0x03) << 6) | ((len >> 11) & 0x03) as u8,
            (len >> 3) as u8,
            (((len & 0x07) << 5) | 0x1F) as u8,
            // buffer fullness 0x7FF (VBR), one raw block
            0xFC,
        ]
    }

    /// Channel count; 0 means the layout is signalled in-band
    pub fn channels(&self) -> u8 {
        match self.channel_configuration {
            1..=6 => self.channel_configuration,
            7 => 8,
            _ => 0,
        }
    }

    pub fn samples_per_frame(&self) -> u32 {
        if self.frame_length_flag {
            960
        } else {
            1024
        }
    }
}

/// Parsed ADTS header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdtsHeader {
    /// Audio object type minus one
    pub profile: u8,
    pub sampling_frequency_index: u8,
    pub channel_configuration: u8,
    /// Whole frame length including the header
    pub frame_length: usize,
    /// 7, or 9 when a CRC follows
    pub header_len: usize,
}

impl AdtsHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 7 || data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(MediaError::InvalidAdts.into());
        }
        let protection_absent = data[1] & 0x01 != 0;
        let profile = data[2] >> 6;
        let sampling_frequency_index = (data[2] >> 2) & 0x0F;
        if sampling_frequency_index > 12 {
            return Err(MediaError::InvalidAdts.into());
        }
        let channel_configuration = ((data[2] & 0x01) << 2) | (data[3] >> 6);
        let frame_length = (((data[3] & 0x03) as usize) << 11)
            | ((data[4] as usize) << 3)
            | ((data[5] >> 5) as usize);
        let header_len = if protection_absent { 7 } else { 9 };
        if frame_length < header_len {
            return Err(MediaError::InvalidAdts.into());
        }
        Ok(AdtsHeader {
            profile,
            sampling_frequency_index,
            channel_configuration,
            frame_length,
            header_len,
        })
    }
}

/// Split a buffer of back-to-back ADTS frames into raw AAC payloads
pub fn split_adts(data: &Bytes) -> Result<(AdtsHeader, Vec<Bytes>)> {
    let first = AdtsHeader::parse(data)?;
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let header = AdtsHeader::parse(&data[offset..])?;
        let end = offset + header.frame_length;
        if end > data.len() {
            return Err(MediaError::InvalidAdts.into());
        }
        frames.push(data.slice(offset + header.header_len..end));
        offset = end;
    }
    Ok((first, frames))
}

/// An FLV AAC body: config or raw frame
#[derive(Debug, Clone)]
pub enum AacData {
    SequenceHeader(AudioSpecificConfig),
    Frame { data: Bytes },
}

impl AacData {
    /// Parse what follows the FLV audio header byte
    pub fn parse(mut data: Bytes) -> Result<Self> {
        if data.is_empty() {
            return Err(MediaError::InvalidAacPacket.into());
        }
        let packet_type = data.get_u8();
        match AacPacketType::from_byte(packet_type) {
            Some(AacPacketType::SequenceHeader) => {
                let config = AudioSpecificConfig::parse(&data)?;
                Ok(AacData::SequenceHeader(config))
            }
            Some(AacPacketType::Raw) => Ok(AacData::Frame { data }),
            None => Err(MediaError::InvalidAacPacket.into()),
        }
    }
}
