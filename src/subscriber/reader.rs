//! Per-track read cursor with start-position and catch-up policy

use std::sync::Arc;

use crate::config::{ReadMode, SubscribeConfig};
use crate::error::{Error, Result};
use crate::frame::{forward_ticks, AvFrame, TICKS_PER_MS};
use crate::ring::{RingReader, Slot};
use crate::stream::FrameRef;
use crate::track::{DemandGuard, TrackHandle};

/// `a` comes after `b` in wrapping sequence order
fn is_after(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Not attached yet
    Init,
    /// Holding the start IDR; the next read jumps to the live edge seen
    /// when it was taken
    First,
    Normal,
}

/// Reads one track for one subscriber
///
/// In [`ReadMode::Live`] a video reader starts on the latest IDR, then jumps
/// to the live edge, and later jumps forward to the newest IDR whenever it
/// was lapped or fell more than half a ring behind. The subscriber timeline
/// ([`FrameRef::abs_time`]) starts at 1 ms and stays continuous across jumps.
///
/// Cancel safe: dropping a pending [`read_frame`](Self::read_frame) loses at
/// most a frame the reader was about to skip.
#[derive(Debug)]
pub struct TrackReader {
    track: TrackHandle,
    cursor: RingReader<AvFrame>,
    mode: ReadMode,
    iframe_only: bool,
    state: ReadState,
    /// Live edge when the start IDR was taken, with its sequence
    edge: Option<(Arc<Slot<AvFrame>>, u32)>,
    last_dts: Option<u32>,
    /// Subscriber timeline in 90 kHz ticks
    elapsed: u64,
    abs_time: u32,
    /// The next delivered frame follows a jump
    resync: bool,
    decoder_seq: Option<u32>,
    delay: u32,
    skipped: u64,
    _demand: DemandGuard,
}

impl TrackReader {
    pub fn new(track: TrackHandle, config: &SubscribeConfig) -> Self {
        Self {
            cursor: track.read_ring(),
            _demand: track.demand(config.views),
            mode: config.read_mode,
            iframe_only: config.iframe_only && track.is_video(),
            track,
            state: ReadState::Init,
            edge: None,
            last_dts: None,
            elapsed: 0,
            abs_time: 0,
            resync: false,
            decoder_seq: None,
            delay: 0,
            skipped: 0,
        }
    }

    pub fn track(&self) -> &TrackHandle {
        &self.track
    }

    /// Subscriber time of the last frame, in milliseconds
    pub fn abs_time(&self) -> u32 {
        self.abs_time
    }

    /// Frames between the last one read and the newest
    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Frames jumped over so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Sequence of the last frame read
    pub fn sequence(&self) -> Option<u32> {
        self.cursor.sequence()
    }

    /// Next frame for this subscriber
    pub async fn read_frame(&mut self) -> Result<FrameRef> {
        loop {
            match self.state {
                ReadState::Init => {
                    let start = self.start_slot().await?;
                    self.cursor.attach(start).await?;
                    if self.mode == ReadMode::Live && self.track.is_video() {
                        self.edge = self.track.ring().latest().map(|slot| {
                            let sequence = slot.sequence();
                            (slot, sequence)
                        });
                        self.state = ReadState::First;
                    } else {
                        self.state = ReadState::Normal;
                    }
                }
                ReadState::First => {
                    self.state = ReadState::Normal;
                    let current = self.cursor.sequence().ok_or(Error::ReaderDetached)?;
                    let edge = self
                        .edge
                        .take()
                        .and_then(|(slot, sequence)| (slot.sequence() == sequence && !slot.is_writing()).then_some(slot))
                        .or_else(|| self.track.ring().latest());
                    if let Some(edge) = edge {
                        if is_after(edge.sequence(), current) {
                            self.skipped += u64::from(edge.sequence().wrapping_sub(current));
                            self.resync = true;
                            self.cursor.attach(edge).await?;
                        }
                    }
                    continue;
                }
                ReadState::Normal => {
                    let expected = self
                        .cursor
                        .sequence()
                        .ok_or(Error::ReaderDetached)?
                        .wrapping_add(1);
                    self.cursor.read_next().await?;
                    self.catch_up(expected).await?;
                }
            }

            if self.iframe_only && !self.cursor.value().is_some_and(|f| f.iframe) {
                continue;
            }
            return self.deliver();
        }
    }

    /// Where a fresh reader attaches, waiting for the first usable frame
    async fn start_slot(&self) -> Result<Arc<Slot<AvFrame>>> {
        let keyframe = self.mode == ReadMode::Live && self.track.is_video();
        loop {
            self.track.wait_published(keyframe).await?;
            let slot = match self.mode {
                ReadMode::Live if keyframe => self.track.idr(),
                ReadMode::Live | ReadMode::NoJump => self.track.ring().latest(),
                ReadMode::Buffered => self
                    .track
                    .history()
                    .or_else(|| self.track.idr())
                    .or_else(|| self.track.ring().latest()),
            };
            if let Some(slot) = slot {
                return Ok(slot);
            }
        }
    }

    /// After reading `expected`'s successor, jump ahead if lapped or lagging
    async fn catch_up(&mut self, expected: u32) -> Result<()> {
        let got = self.cursor.sequence().ok_or(Error::ReaderDetached)?;
        let lapped = got != expected;
        if lapped {
            self.skipped += u64::from(got.wrapping_sub(expected));
            self.resync = true;
        }
        if self.mode != ReadMode::Live || !self.track.is_video() {
            return Ok(());
        }

        let lag = self
            .track
            .ring()
            .latest_sequence()
            .map_or(0, |latest| latest.wrapping_sub(got));
        let behind = lag as usize > self.track.ring().size() / 2;
        if !lapped && !behind {
            return Ok(());
        }
        let Some(idr) = self.track.idr() else {
            return Ok(());
        };
        if !is_after(idr.sequence(), got) {
            return Ok(());
        }
        tracing::debug!(
            track = %self.track.name(),
            from = got,
            to = idr.sequence(),
            lag,
            "reader behind, jumping to latest idr"
        );
        self.skipped += u64::from(idr.sequence().wrapping_sub(got));
        self.resync = true;
        self.cursor.attach(idr).await
    }

    fn deliver(&mut self) -> Result<FrameRef> {
        let frame = self
            .cursor
            .value()
            .map(|f| f.detach())
            .ok_or(Error::ReaderDetached)?;

        match self.last_dts {
            None => self.elapsed = 0,
            Some(_) if self.resync => {
                // keep the timeline continuous across the jump
                let next = self.abs_time as u64 + frame.delta_time.max(1) as u64;
                self.elapsed = next * TICKS_PER_MS as u64;
            }
            Some(prev) => self.elapsed += forward_ticks(prev, frame.dts) as u64,
        }
        self.resync = false;
        self.last_dts = Some(frame.dts);
        self.abs_time = ((self.elapsed / TICKS_PER_MS as u64) as u32).max(1);

        self.delay = self
            .track
            .ring()
            .latest_sequence()
            .map_or(0, |latest| latest.wrapping_sub(frame.sequence));

        let seq = self.track.decoder_seq();
        let dec_conf_changed = self.decoder_seq != Some(seq);
        self.decoder_seq = Some(seq);

        Ok(FrameRef {
            track: self.track.clone(),
            abs_time: self.abs_time,
            delay: self.delay,
            dec_conf_changed,
            frame,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::config::RingConfig;
    use crate::media::{AudioCodecId, VideoCodecId};
    use crate::track::{AudioTrack, VideoTrack};

    const IDR: &[u8] = &[0, 0, 0, 1, 0x65, 0x88, 0x84];
    const P: &[u8] = &[0, 0, 0, 1, 0x41, 0x9a, 0x02];

    fn video(size: usize) -> VideoTrack {
        VideoTrack::new("video", VideoCodecId::H264, &RingConfig::default().video_size(size).min_size(4))
    }

    /// Frame `i` at 40 ms spacing; IDR every `gop` frames
    fn push(track: &mut VideoTrack, i: u32, gop: u32) {
        let data = if i % gop == 0 { IDR } else { P };
        let ts = i * 40 * TICKS_PER_MS;
        track.write_annexb(ts, Some(ts), &Bytes::from_static(data)).unwrap();
    }

    #[tokio::test]
    async fn test_live_starts_on_idr_then_jumps() {
        let mut track = video(64);
        for i in 0..16 {
            push(&mut track, i, 100);
        }
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default());
        let first = reader.read_frame().await.unwrap();
        assert_eq!(first.frame.sequence, 0);
        assert!(first.frame.iframe);
        assert_eq!(first.abs_time, 1);
        assert!(first.dec_conf_changed);

        push(&mut track, 16, 100);
        let next = reader.read_frame().await.unwrap();
        assert_eq!(next.frame.sequence, 16);
        assert_eq!(next.abs_time, 41);
        assert!(!next.dec_conf_changed);
        assert_eq!(reader.skipped(), 15);
    }

    #[tokio::test]
    async fn test_live_waits_for_idr() {
        let mut track = video(64);
        push(&mut track, 1, 100);
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default());
        let pending = tokio::time::timeout(Duration::from_millis(10), reader.read_frame()).await;
        assert!(pending.is_err());

        push(&mut track, 100, 100);
        let frame = reader.read_frame().await.unwrap();
        assert!(frame.frame.iframe);
        assert_eq!(frame.frame.sequence, 1);
    }

    #[tokio::test]
    async fn test_no_jump_reads_every_frame() {
        let mut track = video(64);
        for i in 0..3 {
            push(&mut track, i, 100);
        }
        let config = SubscribeConfig::default().read_mode(ReadMode::NoJump);
        let mut reader = TrackReader::new(track.handle(), &config);
        assert_eq!(reader.read_frame().await.unwrap().frame.sequence, 2);
        for i in 3..6 {
            push(&mut track, i, 100);
        }
        for expected in 3..6 {
            assert_eq!(reader.read_frame().await.unwrap().frame.sequence, expected);
        }
        assert_eq!(reader.skipped(), 0);
    }

    #[tokio::test]
    async fn test_iframe_only() {
        let mut track = video(64);
        for i in 0..12 {
            push(&mut track, i, 5);
        }
        let config = SubscribeConfig::default().read_mode(ReadMode::NoJump).iframe_only(true);
        let mut reader = TrackReader::new(track.handle(), &config);
        let handle = tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..2 {
                seen.push(reader.read_frame().await.unwrap().frame.sequence);
            }
            seen
        });
        tokio::task::yield_now().await;
        for i in 12..21 {
            push(&mut track, i, 5);
        }
        assert_eq!(handle.await.unwrap(), vec![15, 20]);
    }

    #[tokio::test]
    async fn test_lagging_reader_jumps_to_idr() {
        let mut track = video(64);
        push(&mut track, 0, 20);
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default());
        assert_eq!(reader.read_frame().await.unwrap().frame.sequence, 0);

        for i in 1..50 {
            push(&mut track, i, 20);
        }
        // 48 frames behind a 64 slot ring: jump to the IDR at 40
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.frame.sequence, 40);
        assert!(frame.frame.iframe);
        assert_eq!(frame.delay, 9);
        assert_eq!(frame.abs_time, 41);
        assert_eq!(reader.skipped(), 39);
    }

    #[tokio::test]
    async fn test_decoder_change_flagged_once() {
        let mut track = video(64);
        push(&mut track, 0, 100);
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default().read_mode(ReadMode::NoJump));
        assert!(reader.read_frame().await.unwrap().dec_conf_changed);

        track
            .write_annexb(
                3600,
                Some(3600),
                &Bytes::from_static(&[
                    0, 0, 0, 1, 0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01, 0, 0, 0, 1, 0x68, 0xCE, 0x3C, 0x80,
                ]),
            )
            .unwrap();
        push(&mut track, 2, 100);
        push(&mut track, 3, 100);
        assert!(reader.read_frame().await.unwrap().dec_conf_changed);
        assert!(!reader.read_frame().await.unwrap().dec_conf_changed);
    }

    #[tokio::test]
    async fn test_audio_starts_at_latest() {
        let mut track = AudioTrack::new("audio", AudioCodecId::Pcma, 8000, 1, &RingConfig::default());
        track.write_raw(0, Bytes::from_static(&[1; 160]));
        track.write_raw(1800, Bytes::from_static(&[2; 160]));
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default());
        let frame = reader.read_frame().await.unwrap();
        assert_eq!(frame.frame.sequence, 1);
        assert_eq!(frame.abs_time, 1);
        track.write_raw(3600, Bytes::from_static(&[3; 160]));
        assert_eq!(reader.read_frame().await.unwrap().abs_time, 20);
    }

    #[tokio::test]
    async fn test_timeline_survives_long_gap() {
        let mut track = video(64);
        push(&mut track, 0, 100);
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default().read_mode(ReadMode::NoJump));
        let first = reader.read_frame().await.unwrap();
        assert_eq!(first.abs_time, 1);

        let seven_hours = 7 * 3600 * 90_000;
        track
            .write_annexb(seven_hours, Some(seven_hours), &Bytes::from_static(P))
            .unwrap();
        let second = reader.read_frame().await.unwrap();
        assert_eq!(second.abs_time, 7 * 3600 * 1000);
        assert!(second.frame.abs_time > first.frame.abs_time);
    }

    #[tokio::test]
    async fn test_closed_track_ends_reader() {
        let mut track = video(64);
        push(&mut track, 0, 100);
        let mut reader = TrackReader::new(track.handle(), &SubscribeConfig::default());
        reader.read_frame().await.unwrap();
        drop(track);
        assert!(matches!(reader.read_frame().await, Err(Error::TrackClosed)));
    }
}
