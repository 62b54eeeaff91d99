//! Derived payload views
//!
//! Each builder reads the AU list and appends to one view. Headers go into a
//! single pooled block that the frame keeps until reset; payload spans are
//! shared with the AU list, never copied.

use std::sync::Arc;

use bytes::{BufMut, Bytes};

use super::{AvFrame, TICKS_PER_MS};
use crate::media::av1;
use crate::media::flv::{FlvTagType, TAG_HEADER_SIZE, VIDEO_HEADER_SIZE};
use crate::media::{BytesPool, FlvTag, VideoCodecId, VideoTagHeader};
use crate::rtp::Packetizer;

/// NALU length prefix width written into AVCC bodies
pub const NALU_LENGTH_SIZE: usize = 4;

/// FLV video body: tag header, then every unit with a length prefix
///
/// AV1 OBUs are written back to back with their own size fields instead.
pub fn build_video_avcc(frame: &mut AvFrame, codec: VideoCodecId, pool: &Arc<BytesPool>) {
    let header = VideoTagHeader {
        keyframe: frame.iframe,
        codec_id: codec.flv_id(),
        packet_type: 1,
        composition_time: frame.cts() / TICKS_PER_MS as i32,
    };

    if codec == VideoCodecId::Av1 {
        let block = pool.copy_from(&header.to_bytes());
        let mut avcc = vec![block.clone()];
        for obu in frame.units() {
            if obu.first().is_some_and(|h| h & 0x02 != 0) {
                avcc.push(obu.clone());
            } else if let Ok(sized) = av1::with_size_field(obu) {
                avcc.push(sized);
            }
        }
        frame.avcc = avcc;
        frame.keep_block(pool, block);
        return;
    }

    let count = frame.units().count();
    let mut buf = pool.get(VIDEO_HEADER_SIZE + NALU_LENGTH_SIZE * count);
    buf.put_slice(&header.to_bytes());
    for unit in frame.units() {
        buf.put_u32(unit.len() as u32);
    }
    let block = buf.freeze();

    let mut avcc = Vec::with_capacity(1 + count * 2);
    avcc.push(block.slice(..VIDEO_HEADER_SIZE));
    let mut offset = VIDEO_HEADER_SIZE;
    for unit in frame.units() {
        avcc.push(block.slice(offset..offset + NALU_LENGTH_SIZE));
        avcc.push(unit.clone());
        offset += NALU_LENGTH_SIZE;
    }
    frame.avcc = avcc;
    frame.keep_block(pool, block);
}

/// FLV audio body: `header` (one byte, or two for AAC) then the raw frames
pub fn build_audio_avcc(frame: &mut AvFrame, header: &[u8], pool: &Arc<BytesPool>) {
    let block = pool.copy_from(header);
    let mut avcc = Vec::with_capacity(1 + frame.units().count());
    avcc.push(block.clone());
    avcc.extend(frame.units().cloned());
    frame.avcc = avcc;
    frame.keep_block(pool, block);
}

/// RTP packets for the frame; `prefix` units (parameter sets) go first
pub fn build_rtp(frame: &mut AvFrame, packetizer: &mut dyn Packetizer, timestamp: u32, prefix: &[Bytes]) {
    let mut units = Vec::with_capacity(prefix.len() + frame.units().count());
    units.extend(prefix.iter().cloned());
    units.extend(frame.units().cloned());
    let mut packets = Vec::new();
    packetizer.packetize(&units, timestamp, &mut packets);
    frame.rtp = packets;
}

/// FLV tag around the AVCC view; builds nothing while that view is empty
pub fn build_flv(frame: &mut AvFrame, tag_type: FlvTagType, timestamp_ms: u32, pool: &Arc<BytesPool>) {
    if frame.avcc.is_empty() {
        return;
    }
    let data_size = frame.avcc_len();
    let mut buf = pool.get(TAG_HEADER_SIZE + 4);
    buf.put_slice(&FlvTag::encode_header(tag_type, data_size, timestamp_ms));
    buf.put_slice(&FlvTag::encode_trailer(data_size));
    let block = buf.freeze();

    let mut flv = Vec::with_capacity(frame.avcc.len() + 2);
    flv.push(block.slice(..TAG_HEADER_SIZE));
    flv.extend(frame.avcc.iter().cloned());
    flv.push(block.slice(TAG_HEADER_SIZE..));
    frame.flv = flv;
    frame.keep_block(pool, block);
}

/// Join spans into one buffer (tests and adapters writing whole tags)
pub fn concat(spans: &[Bytes]) -> Bytes {
    let len = spans.iter().map(|s| s.len()).sum();
    let mut out = bytes::BytesMut::with_capacity(len);
    for span in spans {
        out.put_slice(span);
    }
    out.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingValue;
    use crate::rtp::h264::H264Packetizer;
    use crate::rtp::RtpSequencer;

    fn h264_frame() -> AvFrame {
        let mut frame = AvFrame {
            pts: 3600 + 2 * 3600,
            dts: 3600,
            iframe: true,
            ..Default::default()
        };
        frame.append_unit(Bytes::from_static(&[0x65, 0xAA, 0xBB]));
        frame.append_unit(Bytes::from_static(&[0x06, 0x05]));
        frame
    }

    #[test]
    fn test_video_avcc_layout() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = h264_frame();
        build_video_avcc(&mut frame, VideoCodecId::H264, &pool);

        let body = concat(&frame.avcc);
        // keyframe + AVC, NALU packet, cts 80 ms
        assert_eq!(&body[..5], &[0x17, 0x01, 0x00, 0x00, 80]);
        assert_eq!(&body[5..9], &[0, 0, 0, 3]);
        assert_eq!(&body[9..12], &[0x65, 0xAA, 0xBB]);
        assert_eq!(&body[12..16], &[0, 0, 0, 2]);
        assert_eq!(body.len(), 18);
    }

    #[test]
    fn test_av1_avcc_adds_size_fields() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = AvFrame::default();
        // frame OBU (type 6) without size field
        frame.append_unit(Bytes::from_static(&[0x30, 0x01, 0x02]));
        build_video_avcc(&mut frame, VideoCodecId::Av1, &pool);

        let body = concat(&frame.avcc);
        assert_eq!(body[0] & 0x0F, 13);
        assert_eq!(&body[5..], &[0x32, 0x02, 0x01, 0x02]);
    }

    #[test]
    fn test_audio_avcc_and_flv() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = AvFrame {
            pts: 90 * 40,
            dts: 90 * 40,
            iframe: true,
            ..Default::default()
        };
        frame.append_unit(Bytes::from_static(&[0x21, 0x10, 0x04]));
        build_audio_avcc(&mut frame, &[0xAF, 0x01], &pool);
        build_flv(&mut frame, FlvTagType::Audio, 40, &pool);

        let tag = concat(&frame.flv);
        let (parsed, consumed) = FlvTag::parse(&tag).unwrap();
        assert_eq!(consumed, tag.len());
        assert_eq!(parsed.timestamp, 40);
        assert_eq!(&parsed.data[..], &[0xAF, 0x01, 0x21, 0x10, 0x04]);
        assert_eq!(&tag[tag.len() - 4..], &(5u32 + 11).to_be_bytes());
    }

    #[test]
    fn test_flv_skipped_without_avcc() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = h264_frame();
        build_flv(&mut frame, FlvTagType::Video, 0, &pool);
        assert!(frame.flv.is_empty());
    }

    #[test]
    fn test_rtp_prefix_and_marker() {
        let mut frame = h264_frame();
        let mut packetizer = H264Packetizer::new(RtpSequencer::new(96, 1));
        let sps = Bytes::from_static(&[0x67, 0x42]);
        build_rtp(&mut frame, &mut packetizer, 3600, &[sps.clone()]);

        assert_eq!(frame.rtp.len(), 3);
        assert_eq!(frame.rtp[0].payload, sps);
        assert!(frame.rtp[2].marker);
        assert!(frame.rtp.iter().all(|p| p.timestamp == 3600));
    }

    #[test]
    fn test_views_released_on_reset() {
        let pool = Arc::new(BytesPool::new());
        let mut frame = h264_frame();
        build_video_avcc(&mut frame, VideoCodecId::H264, &pool);
        build_flv(&mut frame, FlvTagType::Video, 0, &pool);
        let reused = pool.reused();

        frame.reset();
        assert!(frame.avcc.is_empty() && frame.flv.is_empty());
        // both blocks came back: the next two requests of those sizes hit the pool
        let _ = pool.get(VIDEO_HEADER_SIZE + 8);
        let _ = pool.get(TAG_HEADER_SIZE + 4);
        assert_eq!(pool.reused(), reused + 2);
    }
}
