//! Tracks: named media channels over a frame ring
//!
//! The publisher side owns a [`VideoTrack`], [`AudioTrack`] or
//! [`DataTrack`] and is its only writer. Everything readers need lives behind
//! a cheap, cloneable [`TrackHandle`]:
//!
//! ```text
//!   VideoTrack (publisher task)            TrackHandle (shared)
//!   ┌───────────────────────┐            ┌──────────────────────────┐
//!   │ codec strategy        │            │ ring handle              │
//!   │ DTS estimator         │──writes──► │ latest IDR / history     │
//!   │ RTP reorder + demux   │            │ decoder config + seq     │
//!   │ RingWriter<AvFrame>   │            │ stats, view demand       │
//!   └───────────────────────┘            └──────────────────────────┘
//! ```

pub(crate) mod codec;
mod audio;
mod data;
mod media;
mod video;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::sync::Notify;

use crate::config::ViewSet;
use crate::frame::AvFrame;
use crate::media::{AudioCodecId, VideoCodecId};
use crate::ring::{RingHandle, RingReader, Slot};
use crate::stats::{TrackStats, TrackSummary};

pub use audio::AudioTrack;
pub use data::{DataReader, DataTrack, DataTrackHandle};
pub use video::VideoTrack;

/// Wall clock used for frame timestamps; follows tokio's (pausable) clock
pub(crate) fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Media type and codec of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video(VideoCodecId),
    Audio(AudioCodecId),
}

impl TrackKind {
    pub fn is_video(self) -> bool {
        matches!(self, TrackKind::Video(_))
    }

    pub fn is_audio(self) -> bool {
        matches!(self, TrackKind::Audio(_))
    }

    pub fn codec_name(self) -> &'static str {
        match self {
            TrackKind::Video(codec) => codec.name(),
            TrackKind::Audio(codec) => codec.name(),
        }
    }
}

/// Cached decoder configuration
///
/// `seq` increases every time the configuration changes; readers compare it
/// against the value they last saw.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecoderConfig {
    pub seq: u32,
    /// AVCDecoderConfigurationRecord, HVCC, AV1C or AudioSpecificConfig
    pub record: Option<Bytes>,
    /// FLV tag body announcing the record (RTMP sequence header)
    pub sequence_header: Option<Bytes>,
    /// Raw parameter units (SPS/PPS, VPS/SPS/PPS, sequence header OBU)
    pub parameter_sets: Vec<Bytes>,
    /// RFC 6381 codec string when known
    pub codec_string: Option<String>,
}

/// A published frame worth remembering (IDR, history start)
#[derive(Debug, Clone)]
pub(crate) struct Anchor {
    pub slot: Arc<Slot<AvFrame>>,
    pub sequence: u32,
    pub at: Instant,
}

impl Anchor {
    /// The slot, if it still holds the anchored frame
    pub fn live(&self) -> Option<Arc<Slot<AvFrame>>> {
        (self.slot.sequence() == self.sequence && !self.slot.is_writing()).then(|| Arc::clone(&self.slot))
    }
}

/// Subscriber demand for each derived view
#[derive(Debug, Default)]
struct ViewDemand {
    avcc: AtomicUsize,
    rtp: AtomicUsize,
    flv: AtomicUsize,
}

impl ViewDemand {
    fn counters(&self, views: ViewSet) -> impl Iterator<Item = &AtomicUsize> {
        [(views.avcc, &self.avcc), (views.rtp, &self.rtp), (views.flv, &self.flv)]
            .into_iter()
            .filter_map(|(wanted, counter)| wanted.then_some(counter))
    }

    fn add(&self, views: ViewSet) {
        self.counters(views).for_each(|c| {
            c.fetch_add(1, Ordering::AcqRel);
        });
    }

    fn remove(&self, views: ViewSet) {
        self.counters(views).for_each(|c| {
            c.fetch_sub(1, Ordering::AcqRel);
        });
    }

    fn current(&self) -> ViewSet {
        ViewSet {
            avcc: self.avcc.load(Ordering::Acquire) > 0,
            rtp: self.rtp.load(Ordering::Acquire) > 0,
            flv: self.flv.load(Ordering::Acquire) > 0,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TrackShared {
    name: String,
    kind: TrackKind,
    clock_rate: u32,
    payload_type: u8,
    ring: RingHandle<AvFrame>,
    idr: RwLock<Option<Anchor>>,
    history: RwLock<Option<Anchor>>,
    previous: RwLock<Option<Anchor>>,
    decoder: RwLock<DecoderConfig>,
    stats: TrackStats,
    demand: ViewDemand,
    last_write: Mutex<Option<Instant>>,
    published: Notify,
    /// Set when the writer is gone
    pub(crate) closed: AtomicBool,
}

/// Read side of a track; cheap to clone
#[derive(Debug, Clone)]
pub struct TrackHandle {
    shared: Arc<TrackShared>,
}

impl TrackHandle {
    pub(crate) fn new(
        name: &str,
        kind: TrackKind,
        clock_rate: u32,
        payload_type: u8,
        ring: RingHandle<AvFrame>,
    ) -> Self {
        Self {
            shared: Arc::new(TrackShared {
                name: name.to_string(),
                kind,
                clock_rate,
                payload_type,
                ring,
                idr: RwLock::new(None),
                history: RwLock::new(None),
                previous: RwLock::new(None),
                decoder: RwLock::new(DecoderConfig::default()),
                stats: TrackStats::new(),
                demand: ViewDemand::default(),
                last_write: Mutex::new(None),
                published: Notify::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    pub fn is_video(&self) -> bool {
        self.shared.kind.is_video()
    }

    pub fn is_audio(&self) -> bool {
        self.shared.kind.is_audio()
    }

    /// RTP clock rate in Hz
    pub fn clock_rate(&self) -> u32 {
        self.shared.clock_rate
    }

    /// RTP payload type used for the RTP view
    pub fn payload_type(&self) -> u8 {
        self.shared.payload_type
    }

    pub fn ring(&self) -> &RingHandle<AvFrame> {
        &self.shared.ring
    }

    /// Open a raw ring cursor
    pub fn read_ring(&self) -> RingReader<AvFrame> {
        self.shared.ring.reader()
    }

    /// Slot of the most recent IDR, if still retained
    pub fn idr(&self) -> Option<Arc<Slot<AvFrame>>> {
        self.shared.idr.read().as_ref().and_then(Anchor::live)
    }

    /// Oldest frame kept for buffered readers
    pub fn history(&self) -> Option<Arc<Slot<AvFrame>>> {
        self.shared.history.read().as_ref().and_then(Anchor::live)
    }

    /// Copy of the most recently published frame
    pub fn current_frame(&self) -> Option<AvFrame> {
        self.shared.ring.latest().map(|slot| slot.read().detach())
    }

    /// Copy of the frame published before the current one
    pub fn pre_frame(&self) -> Option<AvFrame> {
        let previous = self.shared.previous.read().as_ref().and_then(Anchor::live)?;
        let frame = previous.read().detach();
        Some(frame)
    }

    pub fn decoder_config(&self) -> DecoderConfig {
        self.shared.decoder.read().clone()
    }

    /// Current decoder configuration sequence
    pub fn decoder_seq(&self) -> u32 {
        self.shared.decoder.read().seq
    }

    pub fn stats(&self) -> &TrackStats {
        &self.shared.stats
    }

    /// Time since the last published frame
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.shared
            .last_write
            .lock()
            .map(|at| now.saturating_duration_since(at))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.shared.ring.is_closed()
    }

    pub fn same_track(&self, other: &TrackHandle) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Ready slot whose write time is nearest to `at`
    ///
    /// Searches from the history start (or the latest IDR) to the newest frame.
    pub fn locate(&self, at: Instant) -> Option<Arc<Slot<AvFrame>>> {
        let start = self
            .history()
            .or_else(|| self.idr())
            .or_else(|| self.shared.ring.latest())?;
        let distance = |slot: &Arc<Slot<AvFrame>>| {
            slot.read().written_at.map(|w| {
                if w > at {
                    w.duration_since(at)
                } else {
                    at.duration_since(w)
                }
            })
        };
        self.shared
            .ring
            .walk_from(start)
            .filter_map(|slot| distance(&slot).map(|d| (d, slot)))
            .min_by_key(|(d, _)| *d)
            .map(|(_, slot)| slot)
    }

    /// Register demand for views; dropped guard withdraws it
    pub fn demand(&self, views: ViewSet) -> DemandGuard {
        self.shared.demand.add(views);
        DemandGuard {
            track: self.clone(),
            views,
        }
    }

    /// Views at least one reader currently needs
    pub fn demanded_views(&self) -> ViewSet {
        self.shared.demand.current()
    }

    /// Wait until at least one frame (or an IDR, for `keyframe`) exists
    pub async fn wait_published(&self, keyframe: bool) -> crate::Result<()> {
        loop {
            let notified = self.shared.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let ready = if keyframe {
                self.idr().is_some()
            } else {
                self.shared.ring.latest().is_some()
            };
            if ready {
                return Ok(());
            }
            if self.is_closed() {
                return Err(crate::Error::TrackClosed);
            }
            notified.await;
        }
    }

    pub fn summary(&self) -> TrackSummary {
        let stats = &self.shared.stats;
        TrackSummary {
            name: self.shared.name.clone(),
            codec: self.shared.kind.codec_name(),
            bps: stats.bps(),
            fps: stats.fps(),
            frames: stats.frames(),
            drops: stats.drops() + self.shared.ring.discards(),
            gop: stats.gop(),
            readers: self.shared.ring.readers(),
            ring_size: self.shared.ring.size(),
            sequence: self.shared.ring.latest_sequence(),
        }
    }

    pub(crate) fn shared(&self) -> &TrackShared {
        &self.shared
    }
}

impl TrackShared {
    pub(crate) fn set_idr(&self, anchor: Anchor) {
        *self.idr.write() = Some(anchor);
    }

    pub(crate) fn set_history(&self, anchor: Option<Anchor>) {
        *self.history.write() = anchor;
    }

    pub(crate) fn set_previous(&self, anchor: Option<Anchor>) {
        *self.previous.write() = anchor;
    }

    /// Apply a change to the decoder configuration and bump its sequence
    pub(crate) fn update_decoder(&self, update: impl FnOnce(&mut DecoderConfig)) -> u32 {
        let mut decoder = self.decoder.write();
        update(&mut decoder);
        decoder.seq = decoder.seq.wrapping_add(1);
        decoder.seq
    }

    pub(crate) fn demanded_views(&self) -> ViewSet {
        self.demand.current()
    }

    pub(crate) fn stats(&self) -> &TrackStats {
        &self.stats
    }

    pub(crate) fn mark_published(&self, at: Instant) {
        *self.last_write.lock() = Some(at);
        self.published.notify_waiters();
    }

    /// Wake waiters so they notice the ring closed
    pub(crate) fn wake_all(&self) {
        self.published.notify_waiters();
    }
}

/// Withdraws view demand when dropped
#[derive(Debug)]
pub struct DemandGuard {
    track: TrackHandle,
    views: ViewSet,
}

impl Drop for DemandGuard {
    fn drop(&mut self) {
        self.track.shared.demand.remove(self.views);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RingConfig;
    use crate::ring::RingWriter;

    fn handle() -> (RingWriter<AvFrame>, TrackHandle) {
        let writer = RingWriter::new(8, &RingConfig::default().min_size(2));
        let handle = TrackHandle::new("h264", TrackKind::Video(VideoCodecId::H264), 90_000, 96, writer.handle());
        (writer, handle)
    }

    #[test]
    fn test_demand_counts() {
        let (_writer, track) = handle();
        assert_eq!(track.demanded_views(), ViewSet::NONE);

        let a = track.demand(ViewSet::default().flv());
        let b = track.demand(ViewSet::default().avcc());
        assert!(track.demanded_views().avcc && track.demanded_views().flv);
        drop(a);
        assert!(track.demanded_views().avcc);
        assert!(!track.demanded_views().flv);
        drop(b);
        assert_eq!(track.demanded_views(), ViewSet::NONE);
    }

    #[test]
    fn test_decoder_seq_increases() {
        let (_writer, track) = handle();
        let before = track.decoder_seq();
        let seq = track.shared().update_decoder(|c| c.record = Some(Bytes::from_static(&[1])));
        assert!(seq > before);
        assert_eq!(track.decoder_config().record, Some(Bytes::from_static(&[1])));
    }

    #[test]
    fn test_anchor_invalidated_by_overwrite() {
        let (mut writer, track) = handle();
        writer.value().iframe = true;
        let slot = writer.step();
        track.shared().set_idr(Anchor {
            slot: slot.clone(),
            sequence: slot.sequence(),
            at: now(),
        });
        assert!(track.idr().is_some());

        for _ in 0..8 {
            writer.step();
        }
        // the slot was reused for a later frame
        assert!(track.idr().is_none());
    }

    #[test]
    fn test_locate_nearest() {
        let (mut writer, track) = handle();
        let t0 = Instant::now();
        for i in 0..4u64 {
            writer.value().written_at = Some(t0 + Duration::from_millis(i * 100));
            let slot = writer.step();
            if i == 0 {
                track.shared().set_history(Some(Anchor {
                    sequence: slot.sequence(),
                    slot,
                    at: t0,
                }));
            }
        }
        let slot = track.locate(t0 + Duration::from_millis(190)).unwrap();
        assert_eq!(slot.sequence(), 2);
    }

    #[tokio::test]
    async fn test_wait_published() {
        let (mut writer, track) = handle();
        let waiter = {
            let track = track.clone();
            tokio::spawn(async move { track.wait_published(false).await })
        };
        tokio::task::yield_now().await;
        writer.step();
        track.shared().mark_published(now());
        waiter.await.unwrap().unwrap();
    }
}
