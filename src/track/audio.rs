//! Audio track writer (AAC, G.711, Opus)

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::media::Media;
use super::{TrackHandle, TrackKind};
use crate::config::{RingConfig, ViewSet};
use crate::error::{MediaError, Result};
use crate::frame::view::{build_audio_avcc, build_flv, build_rtp};
use crate::frame::TICKS_PER_MS;
use crate::media::aac::split_adts;
use crate::media::flv::{audio_header_byte, AudioFormat, FlvTagType};
use crate::media::{AacData, AacPacketType, AudioCodecId, AudioSpecificConfig};
use crate::rtp::aac::{AacDepacketizer, AacPacketizer};
use crate::rtp::{Depacketizer, Packetizer, Passthrough, ReorderBuffer, RtpPacket, RtpSequencer, Unit};
use crate::stream::TrackSink;

const CLOCK_90K: u64 = 90_000;

fn payload_type(codec: AudioCodecId) -> u8 {
    match codec {
        AudioCodecId::Aac => 97,
        AudioCodecId::Pcma => 8,
        AudioCodecId::Pcmu => 0,
        AudioCodecId::Opus => 111,
    }
}

fn clock_rate(codec: AudioCodecId, sample_rate: u32) -> u32 {
    match codec {
        AudioCodecId::Aac => sample_rate,
        AudioCodecId::Pcma | AudioCodecId::Pcmu => 8000,
        AudioCodecId::Opus => 48_000,
    }
}

/// Convert between a media clock and 90 kHz
fn rescale(ticks: u32, from: u32, to: u32) -> u32 {
    (ticks as u64 * to as u64 / from.max(1) as u64) as u32
}

/// Single writer of an audio track
///
/// Every frame is a random access point. AAC needs an AudioSpecificConfig,
/// taken from an FLV sequence header or derived from ADTS headers.
pub struct AudioTrack {
    media: Media,
    codec: AudioCodecId,
    channels: u8,
    config: Option<AudioSpecificConfig>,
    /// FLV audio body prefix for the AVCC view
    avcc_header: Bytes,
    depacketizer: Option<Box<dyn Depacketizer>>,
    packetizer: Option<Box<dyn Packetizer>>,
    reorder: ReorderBuffer,
    reorder_drops: u64,
    rtp_base: Option<u32>,
    units: Vec<Unit>,
    mtu: usize,
}

impl AudioTrack {
    pub fn new(name: &str, codec: AudioCodecId, sample_rate: u32, channels: u8, ring: &RingConfig) -> Self {
        let rate = clock_rate(codec, sample_rate);
        let avcc_header = match codec {
            AudioCodecId::Aac => Bytes::from_static(&[0xAF, AacPacketType::Raw as u8]),
            other => Bytes::copy_from_slice(&[audio_header_byte(other.flv_format(), sample_rate, 16, channels)]),
        };
        Self {
            media: Media::new(
                name,
                TrackKind::Audio(codec),
                rate,
                payload_type(codec),
                ring.audio_size,
                ring,
            ),
            codec,
            channels,
            config: None,
            avcc_header,
            depacketizer: None,
            packetizer: None,
            reorder: ReorderBuffer::new(),
            reorder_drops: 0,
            rtp_base: None,
            units: Vec::new(),
            mtu: ring.rtp_mtu,
        }
    }

    pub(crate) fn attach(&mut self, sink: TrackSink, span: tracing::Span, buffer_time: Duration) {
        self.media.attach(sink, span, buffer_time);
    }

    pub fn handle(&self) -> TrackHandle {
        self.media.handle.clone()
    }

    pub fn name(&self) -> &str {
        self.media.name()
    }

    pub fn codec(&self) -> AudioCodecId {
        self.codec
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn audio_config(&self) -> Option<&AudioSpecificConfig> {
        self.config.as_ref()
    }

    /// Write back-to-back ADTS frames; the first starts at `pts` (90 kHz)
    pub fn write_adts(&mut self, pts: u32, data: &Bytes) -> Result<()> {
        if self.codec != AudioCodecId::Aac {
            return Err(MediaError::UnsupportedCodec(AudioFormat::Aac as u8).into());
        }
        let (header, frames) = split_adts(data)?;
        let config = AudioSpecificConfig::from_adts(&header);
        if self.config.as_ref() != Some(&config) {
            self.set_config(config);
        }
        let (samples, rate) = self
            .config
            .as_ref()
            .map(|c| (c.samples_per_frame(), c.sampling_frequency))
            .unwrap_or((1024, self.media.handle.clock_rate()));
        let step = rescale(samples, rate, CLOCK_90K as u32);
        for (i, frame) in frames.into_iter().enumerate() {
            self.write_frame(pts.wrapping_add(step.wrapping_mul(i as u32)), frame);
        }
        Ok(())
    }

    /// Write one raw frame (no container) at `pts` (90 kHz)
    pub fn write_raw(&mut self, pts: u32, payload: Bytes) {
        self.write_frame(pts, payload);
    }

    /// Write an FLV audio tag body stamped `timestamp` milliseconds
    pub fn write_avcc(&mut self, timestamp: u32, data: Bytes) -> Result<()> {
        let Some(&first) = data.first() else {
            return Err(MediaError::InvalidFlvTag.into());
        };
        if AudioFormat::from_byte(first) != Some(self.codec.flv_format()) {
            return Err(MediaError::UnsupportedCodec(first >> 4).into());
        }
        let pts = timestamp.wrapping_mul(TICKS_PER_MS);
        if self.codec != AudioCodecId::Aac {
            self.write_frame(pts, data.slice(1..));
            return Ok(());
        }
        match AacData::parse(data.slice(1..)) {
            Ok(AacData::SequenceHeader(config)) => self.set_config(config),
            Ok(AacData::Frame { data }) => self.write_frame(pts, data),
            Err(e) => {
                self.media.drop_frame(&e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Load an AudioSpecificConfig
    pub fn write_sequence_head(&mut self, record: Bytes) -> Result<()> {
        let config = AudioSpecificConfig::parse(&record)?;
        self.set_config(config);
        Ok(())
    }

    /// Feed one RTP packet
    pub fn write_rtp(&mut self, packet: RtpPacket) -> Result<()> {
        let mut next = self.reorder.push(packet);
        let mut result = Ok(());
        while let Some(packet) = next {
            if let Err(e) = self.demux(&packet) {
                self.media.drop_frame(&e);
                result = Err(e);
            }
            next = self.reorder.pop();
        }
        let drops = self.reorder.drops();
        self.media.record_drops(drops - self.reorder_drops);
        self.reorder_drops = drops;
        result
    }

    fn demux(&mut self, packet: &RtpPacket) -> Result<()> {
        let base = *self.rtp_base.get_or_insert(packet.timestamp);
        let codec = self.codec;
        let depacketizer = self.depacketizer.get_or_insert_with(|| match codec {
            AudioCodecId::Aac => Box::new(AacDepacketizer::new()) as Box<dyn Depacketizer>,
            _ => Box::new(Passthrough::new(RtpSequencer::new(payload_type(codec), 0))),
        });
        let mut units = std::mem::take(&mut self.units);
        let pushed = depacketizer.push(packet, &mut units);
        let rate = self.media.handle.clock_rate();
        for unit in units.drain(..) {
            let pts = rescale(unit.timestamp.wrapping_sub(base), rate, CLOCK_90K as u32);
            self.write_frame(pts, unit.data);
        }
        self.units = units;
        pushed
    }

    fn set_config(&mut self, config: AudioSpecificConfig) {
        let record = config.to_bytes();
        let mut header = BytesMut::with_capacity(2 + record.len());
        header.put_u8(0xAF);
        header.put_u8(AacPacketType::SequenceHeader as u8);
        header.put_slice(&record);
        let codec_string = format!("mp4a.40.{}", config.audio_object_type);
        self.channels = config.channels();
        self.config = Some(config);
        self.media.update_decoder(|decoder| {
            decoder.record = Some(record);
            decoder.sequence_header = Some(header.freeze());
            decoder.codec_string = Some(codec_string);
        });
    }

    fn write_frame(&mut self, pts: u32, payload: Bytes) {
        if payload.is_empty() {
            return;
        }
        self.media.frame().append_unit(payload);
        self.media.set_timestamps(pts, pts);
        self.flush();
    }

    fn flush(&mut self) {
        self.build_views();
        self.media.publish(true);
    }

    fn build_views(&mut self) {
        let views = self.media.handle.demanded_views();
        if views == ViewSet::NONE {
            return;
        }
        let mut frame = self.media.writer.value();
        frame.iframe = true;
        if views.avcc || views.flv {
            build_audio_avcc(&mut frame, &self.avcc_header, &self.media.pool);
        }
        if views.flv {
            let timestamp = frame.dts / TICKS_PER_MS;
            build_flv(&mut frame, FlvTagType::Audio, timestamp, &self.media.pool);
        }
        if views.rtp {
            let codec = self.codec;
            let payload_type = self.media.handle.payload_type();
            let mtu = self.mtu;
            let packetizer = self.packetizer.get_or_insert_with(|| {
                let sequencer = RtpSequencer::with_random_ssrc(payload_type);
                match codec {
                    AudioCodecId::Aac => Box::new(AacPacketizer::new(sequencer).with_mtu(mtu)) as Box<dyn Packetizer>,
                    _ => Box::new(Passthrough::new(sequencer)),
                }
            });
            let timestamp = rescale(frame.pts, CLOCK_90K as u32, self.media.handle.clock_rate());
            build_rtp(&mut frame, packetizer.as_mut(), timestamp, &[]);
        }
    }
}

impl fmt::Debug for AudioTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioTrack")
            .field("name", &self.media.name())
            .field("codec", &self.codec)
            .field("channels", &self.channels)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
