//! Video track writer (H.264, H.265, AV1)

use std::fmt;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};

use super::codec::{self, H265Codec, UnitKind, VideoCodec};
use super::media::Media;
use super::{TrackHandle, TrackKind};
use crate::config::{RingConfig, ViewSet};
use crate::error::{MediaError, Result};
use crate::frame::view::{build_flv, build_rtp, build_video_avcc};
use crate::frame::TICKS_PER_MS;
use crate::media::annexb::split_nalus;
use crate::media::flv::{FlvTagType, VIDEO_HEADER_SIZE};
use crate::media::{VideoCodecId, VideoTagHeader};
use crate::rtp::{Depacketizer, DtsEstimator, Packetizer, ReorderBuffer, RtpPacket, RtpSequencer, Unit};
use crate::stream::TrackSink;

/// Single writer of a video track
///
/// Accepts annex-B, AVCC (FLV body) or RTP input. Each complete frame is
/// flushed into the ring together with whatever views subscribers asked for.
pub struct VideoTrack {
    media: Media,
    codec: Box<dyn VideoCodec>,
    depacketizer: Option<Box<dyn Depacketizer>>,
    packetizer: Option<Box<dyn Packetizer>>,
    reorder: ReorderBuffer,
    reorder_drops: u64,
    dts: DtsEstimator,
    /// RTP timestamp of the frame being reassembled
    rtp_timestamp: Option<u32>,
    units: Vec<Unit>,
    pending_sei: Vec<Bytes>,
    mtu: usize,
}

impl VideoTrack {
    pub fn new(name: &str, codec: VideoCodecId, ring: &RingConfig) -> Self {
        Self {
            media: Media::new(
                name,
                TrackKind::Video(codec),
                90_000,
                codec::payload_type(codec),
                ring.video_size,
                ring,
            ),
            codec: codec::for_codec(codec),
            depacketizer: None,
            packetizer: None,
            reorder: ReorderBuffer::new(),
            reorder_drops: 0,
            dts: DtsEstimator::new(),
            rtp_timestamp: None,
            units: Vec::new(),
            pending_sei: Vec::new(),
            mtu: ring.rtp_mtu,
        }
    }

    /// H.265 RTP input carries DONL fields
    pub fn with_donl(mut self, using_donl: bool) -> Self {
        if self.codec.id() == VideoCodecId::H265 {
            self.codec = Box::new(H265Codec::default().with_donl(using_donl));
            self.depacketizer = None;
        }
        self
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

    pub fn codec(&self) -> VideoCodecId {
        self.codec.id()
    }

    /// Write one annex-B access unit and flush it
    ///
    /// Without a `dts` the decode time is estimated from the PTS order.
    pub fn write_annexb(&mut self, pts: u32, dts: Option<u32>, data: &Bytes) -> Result<()> {
        let nalus = split_nalus(data);
        if nalus.is_empty() {
            return Ok(());
        }
        let dts = dts.unwrap_or_else(|| self.dts.feed(pts));
        self.media.set_timestamps(pts, dts);
        for nalu in nalus {
            self.write_unit(nalu);
        }
        self.flush();
        Ok(())
    }

    /// Write an FLV video tag body stamped `timestamp` milliseconds
    ///
    /// A sequence header updates the decoder configuration and produces no
    /// frame. A body that does not split cleanly drops the frame.
    pub fn write_avcc(&mut self, timestamp: u32, data: Bytes) -> Result<()> {
        let header = VideoTagHeader::parse(&data)?;
        if header.codec_id != self.codec.id().flv_id() {
            return Err(MediaError::UnsupportedCodec(header.codec_id).into());
        }
        let body = data.slice(VIDEO_HEADER_SIZE..);
        match header.packet_type {
            0 => return self.write_sequence_head(body),
            1 => {}
            // end of sequence
            _ => return Ok(()),
        }

        let units = match self.codec.split_body(&body) {
            Ok(units) => units,
            Err(e) => {
                self.media.drop_frame(&e);
                return Err(e);
            }
        };
        let dts = timestamp.wrapping_mul(TICKS_PER_MS);
        let pts = dts.wrapping_add((header.composition_time * TICKS_PER_MS as i32) as u32);
        self.media.set_timestamps(pts, dts);
        for unit in units {
            self.write_unit(unit);
        }
        self.flush();
        Ok(())
    }

    /// Feed one RTP packet; a marker bit completes the frame
    pub fn write_rtp(&mut self, packet: RtpPacket) -> Result<()> {
        let mut next = self.reorder.push(packet);
        let mut result = Ok(());
        while let Some(packet) = next {
            if let Err(e) = self.demux(&packet) {
                result = Err(e);
            }
            next = self.reorder.pop();
        }
        let drops = self.reorder.drops();
        self.media.record_drops(drops - self.reorder_drops);
        self.reorder_drops = drops;
        result
    }

    /// Load a decoder configuration record (AVCC, HVCC or AV1C)
    pub fn write_sequence_head(&mut self, record: Bytes) -> Result<()> {
        self.codec.load_record(record)?;
        self.refresh_decoder();
        Ok(())
    }

    /// Queue an SEI unit for the front of the next frame
    pub fn insert_sei(&mut self, sei: Bytes) {
        self.pending_sei.push(sei);
    }

    fn demux(&mut self, packet: &RtpPacket) -> Result<()> {
        if self.rtp_timestamp.is_some_and(|ts| ts != packet.timestamp) {
            // marker lost: the timestamp change ends the previous frame
            self.flush_rtp();
        }
        self.rtp_timestamp = Some(packet.timestamp);

        let mut units = std::mem::take(&mut self.units);
        let depacketizer = self
            .depacketizer
            .get_or_insert_with(|| self.codec.depacketizer());
        let pushed = depacketizer.push(packet, &mut units);
        for unit in units.drain(..) {
            self.write_unit(unit.data);
        }
        self.units = units;

        if let Err(e) = pushed {
            self.media.drop_frame(&e);
            self.rtp_timestamp = None;
            return Err(e);
        }
        if packet.marker {
            self.flush_rtp();
        }
        Ok(())
    }

    fn flush_rtp(&mut self) {
        let Some(pts) = self.rtp_timestamp.take() else {
            return;
        };
        if self.media.is_empty() {
            return;
        }
        let dts = self.dts.feed(pts);
        self.media.set_timestamps(pts, dts);
        self.flush();
    }

    fn write_unit(&mut self, unit: Bytes) {
        match self.codec.classify(&unit) {
            UnitKind::Ignored => {}
            UnitKind::Parameter { keep } => {
                if self.codec.update_parameter(unit.clone()) {
                    self.refresh_decoder();
                }
                if keep {
                    self.media.frame().append_unit(unit);
                }
            }
            UnitKind::Media => self.media.frame().append_unit(unit),
        }
    }

    fn refresh_decoder(&self) {
        let Some(config) = self.codec.config() else {
            return;
        };
        let header = VideoTagHeader {
            keyframe: true,
            codec_id: self.codec.id().flv_id(),
            packet_type: 0,
            composition_time: 0,
        };
        let mut body = BytesMut::with_capacity(VIDEO_HEADER_SIZE + config.record.len());
        body.put_slice(&header.to_bytes());
        body.put_slice(&config.record);
        self.media.update_decoder(|decoder| {
            decoder.record = Some(config.record);
            decoder.sequence_header = Some(body.freeze());
            decoder.parameter_sets = config.parameter_sets;
            decoder.codec_string = Some(config.codec_string);
        });
    }

    /// Close the frame in progress and publish it
    ///
    /// An empty frame (only parameter sets or delimiters) is discarded.
    pub fn flush(&mut self) {
        if self.media.is_empty() {
            self.media.writer.discard_current();
            return;
        }
        if !self.pending_sei.is_empty() {
            let sei = std::mem::take(&mut self.pending_sei);
            self.media.frame().prepend_units(sei);
        }
        let iframe = self.codec.is_keyframe(&self.media.frame());
        self.build_views(iframe);
        self.media.publish(iframe);
    }

    fn build_views(&mut self, iframe: bool) {
        let views = self.media.handle.demanded_views();
        if views == ViewSet::NONE {
            return;
        }
        let id = self.codec.id();
        let prefix = if views.rtp && iframe && self.codec.repeats_parameter_sets() {
            self.media.handle.decoder_config().parameter_sets
        } else {
            Vec::new()
        };

        let mut frame = self.media.writer.value();
        frame.iframe = iframe;
        if views.avcc || views.flv {
            build_video_avcc(&mut frame, id, &self.media.pool);
        }
        if views.flv {
            let timestamp = frame.dts / TICKS_PER_MS;
            build_flv(&mut frame, FlvTagType::Video, timestamp, &self.media.pool);
        }
        if views.rtp {
            let payload_type = self.media.handle.payload_type();
            let mtu = self.mtu;
            let codec = &self.codec;
            let packetizer = self
                .packetizer
                .get_or_insert_with(|| codec.packetizer(RtpSequencer::with_random_ssrc(payload_type), mtu));
            let timestamp = frame.pts;
            build_rtp(&mut frame, packetizer.as_mut(), timestamp, &prefix);
        }
    }
}

impl fmt::Debug for VideoTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoTrack")
            .field("name", &self.media.name())
            .field("codec", &self.codec)
            .field("sequence", &self.media.writer.sequence())
            .finish_non_exhaustive()
    }
}
