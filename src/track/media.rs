//! Writer state common to audio and video tracks

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLockWriteGuard;

use super::{now, Anchor, DecoderConfig, TrackHandle, TrackKind};
use crate::config::RingConfig;
use crate::error::Error;
use crate::frame::{forward_ticks, AvFrame, TICKS_PER_MS};
use crate::media::BytesPool;
use crate::ring::RingWriter;
use crate::stream::TrackSink;

fn ticks_to_ms(ticks: u64) -> u32 {
    (ticks / TICKS_PER_MS as u64) as u32
}

/// Ring writer plus the bookkeeping every track does on flush
#[derive(Debug)]
pub(super) struct Media {
    pub(super) handle: TrackHandle,
    pub(super) writer: RingWriter<AvFrame>,
    pub(super) pool: Arc<BytesPool>,
    base_size: usize,
    buffer_time: Duration,
    sink: Option<TrackSink>,
    span: tracing::Span,
    announced: bool,
    last_dts: Option<u32>,
    /// 90 kHz ticks since the first frame
    elapsed: u64,
    last_idr: Option<u32>,
    latest: Option<Anchor>,
    /// Candidate history starts, oldest first
    anchors: VecDeque<Anchor>,
}

impl Media {
    pub(super) fn new(
        name: &str,
        kind: TrackKind,
        clock_rate: u32,
        payload_type: u8,
        size: usize,
        ring: &RingConfig,
    ) -> Self {
        let writer = RingWriter::new(size, ring);
        let handle = TrackHandle::new(name, kind, clock_rate, payload_type, writer.handle());
        Self {
            handle,
            base_size: writer.size(),
            writer,
            pool: Arc::new(BytesPool::new()),
            buffer_time: Duration::ZERO,
            sink: None,
            span: tracing::Span::none(),
            announced: false,
            last_dts: None,
            elapsed: 0,
            last_idr: None,
            latest: None,
            anchors: VecDeque::new(),
        }
    }

    /// Connect to a stream: announce on first frame, log inside its span
    pub(super) fn attach(&mut self, sink: TrackSink, span: tracing::Span, buffer_time: Duration) {
        self.sink = Some(sink);
        self.span = span;
        self.buffer_time = buffer_time;
    }

    pub(super) fn name(&self) -> &str {
        self.handle.name()
    }

    pub(super) fn frame(&self) -> RwLockWriteGuard<'_, AvFrame> {
        self.writer.value()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.writer.value().is_empty()
    }

    pub(super) fn set_timestamps(&self, pts: u32, dts: u32) {
        let mut frame = self.writer.value();
        frame.pts = pts;
        frame.dts = dts;
    }

    /// Reset the frame in progress after malformed input
    pub(super) fn drop_frame(&mut self, error: &Error) {
        self.writer.discard_current();
        self.handle.shared().stats().record_drops(1);
        let _enter = self.span.enter();
        tracing::warn!(track = %self.handle.name(), error = %error, "malformed input, frame dropped");
    }

    pub(super) fn record_drops(&self, count: u64) {
        if count > 0 {
            self.handle.shared().stats().record_drops(count);
        }
    }

    pub(super) fn update_decoder(&self, update: impl FnOnce(&mut DecoderConfig)) {
        let seq = self.handle.shared().update_decoder(update);
        let _enter = self.span.enter();
        tracing::info!(track = %self.handle.name(), seq, "decoder configuration changed");
    }

    /// Publish the frame in progress and advance the ring
    pub(super) fn publish(&mut self, iframe: bool) {
        let at = now();
        let sequence = self.writer.sequence();
        let (bytes, dts) = {
            let mut frame = self.writer.value();
            frame.sequence = sequence;
            frame.iframe = iframe;
            frame.written_at = Some(at);
            let delta = self.last_dts.map_or(0, |prev| forward_ticks(prev, frame.dts));
            self.elapsed += delta as u64;
            frame.abs_time = ticks_to_ms(self.elapsed);
            frame.delta_time = ticks_to_ms(delta as u64);
            (frame.payload_len(), frame.dts)
        };
        self.last_dts = Some(dts);

        let slot = self.writer.step();
        let anchor = Anchor {
            slot,
            sequence,
            at,
        };
        let shared = self.handle.shared();
        shared.stats().record_frame(at, bytes);

        if iframe && self.handle.is_video() {
            self.on_keyframe(anchor.clone());
        }
        if !self.buffer_time.is_zero() {
            self.retain_history(anchor.clone(), iframe);
        }
        self.handle.shared().set_previous(self.latest.replace(anchor));
        self.protect();
        self.handle.shared().mark_published(at);

        let _enter = self.span.enter();
        tracing::trace!(track = %self.handle.name(), sequence, dts, bytes, iframe, "frame published");
        if !self.announced {
            self.announced = true;
            tracing::info!(track = %self.handle.name(), codec = self.handle.kind().codec_name(), "track ready");
            if let Some(sink) = &self.sink {
                sink.announce(self.handle.clone());
            }
        }
    }

    fn on_keyframe(&mut self, anchor: Anchor) {
        if let Some(last) = self.last_idr {
            let gop = anchor.sequence.wrapping_sub(last);
            self.handle.shared().stats().set_gop(gop);
            self.resize_for_gop(gop as usize);
        }
        self.last_idr = Some(anchor.sequence);
        self.handle.shared().set_idr(anchor);
    }

    /// Give back growth once two GOPs fit; slots held by readers stay
    fn resize_for_gop(&mut self, gop: usize) {
        let target = self.base_size.max(gop * 2);
        if self.writer.size() > target {
            self.writer.shrink(target);
        }
    }

    /// Keep the newest anchor at or before `now - buffer_time` as history
    fn retain_history(&mut self, anchor: Anchor, iframe: bool) {
        if iframe || !self.handle.is_video() {
            self.anchors.push_back(anchor);
        }
        let cutoff = now().checked_sub(self.buffer_time);
        while self.anchors.len() >= 2 && cutoff.is_some_and(|c| self.anchors[1].at <= c) {
            self.anchors.pop_front();
        }
        while self.anchors.front().is_some_and(|a| a.live().is_none()) {
            self.anchors.pop_front();
        }
        self.handle.shared().set_history(self.anchors.front().cloned());
    }

    fn protect(&mut self) {
        let keep = self
            .handle
            .idr()
            .into_iter()
            .chain(self.anchors.front().and_then(Anchor::live));
        self.writer.protect(keep.collect::<Vec<_>>());
    }
}

impl Drop for Media {
    fn drop(&mut self) {
        let shared = self.handle.shared();
        shared.closed.store(true, Ordering::Release);
        shared.wake_all();
        if self.announced {
            if let Some(sink) = &self.sink {
                sink.withdraw(&self.handle);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::media::VideoCodecId;

    fn media(size: usize) -> Media {
        Media::new(
            "h264",
            TrackKind::Video(VideoCodecId::H264),
            90_000,
            96,
            size,
            &RingConfig::default().min_size(2),
        )
    }

    fn push(media: &mut Media, dts: u32, iframe: bool) {
        media.frame().append_unit(Bytes::from_static(&[0x41, 0x9A]));
        media.set_timestamps(dts, dts);
        media.publish(iframe);
    }

    #[test]
    fn test_timing_fields() {
        let mut media = media(8);
        push(&mut media, 90_000, true);
        push(&mut media, 90_000 + 3600, false);

        let frame = media.handle.current_frame().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.abs_time, 40);
        assert_eq!(frame.delta_time, 40);
        let pre = media.handle.pre_frame().unwrap();
        assert_eq!(pre.sequence, 0);
        assert!(pre.iframe);
    }

    #[test]
    fn test_timeline_past_i32_ticks() {
        let mut media = media(8);
        push(&mut media, 0, true);
        let seven_hours = 7 * 3600 * 90_000;
        push(&mut media, seven_hours, false);
        let frame = media.handle.current_frame().unwrap();
        assert_eq!(frame.abs_time, 7 * 3600 * 1000);
        assert_eq!(frame.delta_time, 7 * 3600 * 1000);

        // wraps the 32-bit clock
        push(&mut media, seven_hours.wrapping_add(seven_hours), false);
        let frame = media.handle.current_frame().unwrap();
        assert_eq!(frame.abs_time, 14 * 3600 * 1000);

        // small regressions hold the timeline
        push(&mut media, seven_hours.wrapping_add(seven_hours).wrapping_sub(900), false);
        assert_eq!(media.handle.current_frame().unwrap().abs_time, 14 * 3600 * 1000);
    }

    #[test]
    fn test_idr_and_gop() {
        let mut media = media(16);
        for i in 0..12u32 {
            push(&mut media, i * 3600, i % 5 == 0);
        }
        let idr = media.handle.idr().unwrap();
        assert_eq!(idr.sequence(), 10);
        assert_eq!(media.handle.stats().gop(), 5);
    }

    #[test]
    fn test_idr_protected_when_gop_exceeds_ring() {
        let mut media = media(4);
        push(&mut media, 0, true);
        for i in 1..10u32 {
            push(&mut media, i * 3600, false);
        }
        assert!(media.writer.size() > 4);
        assert_eq!(media.handle.idr().unwrap().sequence(), 0);
    }

    #[test]
    fn test_growth_returned_on_short_gop() {
        let mut media = media(4);
        push(&mut media, 0, true);
        for i in 1..10u32 {
            push(&mut media, i * 3600, false);
        }
        let grown = media.writer.size();
        assert!(grown > 4);
        // a short GOP lets the ring give back the extra slots
        push(&mut media, 10 * 3600, true);
        push(&mut media, 11 * 3600, false);
        push(&mut media, 12 * 3600, true);
        assert!(media.writer.size() < grown);
    }

    #[tokio::test]
    async fn test_growth_returned_while_reader_follows() {
        let mut media = media(4);
        push(&mut media, 0, true);
        for i in 1..10u32 {
            push(&mut media, i * 3600, false);
        }
        let grown = media.writer.size();
        assert!(grown > 4);

        let mut reader = media.handle.read_ring();
        reader.attach(media.handle.ring().latest().unwrap()).await.unwrap();
        push(&mut media, 10 * 3600, true);
        push(&mut media, 11 * 3600, false);
        push(&mut media, 12 * 3600, true);
        assert_eq!(media.handle.ring().readers(), 1);
        assert!(media.writer.size() < grown);

        reader.read_next().await.unwrap();
        assert_eq!(reader.sequence(), Some(10));
    }

    #[test]
    fn test_drop_frame_counts() {
        let mut media = media(4);
        media.frame().append_unit(Bytes::from_static(&[0x65]));
        media.drop_frame(&Error::Timeout("test"));
        assert!(media.is_empty());
        assert_eq!(media.handle.stats().drops(), 1);
    }

    #[test]
    fn test_drop_closes_handle() {
        let media = media(4);
        let handle = media.handle.clone();
        drop(media);
        assert!(handle.is_closed());
    }
}
