//! Per-track accounting and stream snapshots

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::registry::StreamPath;
use crate::stream::StreamState;

/// Length of the rate window
pub const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Bytes and frames accumulated since `started`
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    bytes: u64,
    frames: u64,
}

/// Counters shared between a track's writer and its observers
///
/// BPS and FPS are recomputed each time a window of at least one second
/// closes; between closes they report the previous window.
#[derive(Debug)]
pub struct TrackStats {
    frames: AtomicU64,
    bytes: AtomicU64,
    drops: AtomicU64,
    bps: AtomicU64,
    fps: AtomicU32,
    gop: AtomicU32,
    window: Mutex<Option<RateWindow>>,
}

impl TrackStats {
    pub fn new() -> Self {
        Self {
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            drops: AtomicU64::new(0),
            bps: AtomicU64::new(0),
            fps: AtomicU32::new(0),
            gop: AtomicU32::new(0),
            window: Mutex::new(None),
        }
    }

    /// Account one published frame of `bytes` payload bytes
    pub fn record_frame(&self, now: Instant, bytes: usize) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);

        let mut window = self.window.lock();
        let w = window.get_or_insert_with(|| RateWindow {
            started: now,
            bytes: 0,
            frames: 0,
        });
        w.bytes += bytes as u64;
        w.frames += 1;

        let elapsed = now.saturating_duration_since(w.started);
        if elapsed >= RATE_WINDOW {
            let ms = elapsed.as_millis().max(1) as u64;
            self.bps.store(w.bytes * 8 * 1000 / ms, Ordering::Relaxed);
            self.fps.store((w.frames * 1000 / ms) as u32, Ordering::Relaxed);
            *w = RateWindow {
                started: now,
                bytes: 0,
                frames: 0,
            };
        }
    }

    pub fn record_drops(&self, count: u64) {
        self.drops.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_gop(&self, gop: u32) {
        self.gop.store(gop, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    pub fn drops(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Bits per second over the last closed window
    pub fn bps(&self) -> u64 {
        self.bps.load(Ordering::Relaxed)
    }

    /// Frames per second over the last closed window
    pub fn fps(&self) -> u32 {
        self.fps.load(Ordering::Relaxed)
    }

    /// Frames between the last two IDRs
    pub fn gop(&self) -> u32 {
        self.gop.load(Ordering::Relaxed)
    }
}

impl Default for TrackStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one track
#[derive(Debug, Clone)]
pub struct TrackSummary {
    pub name: String,
    /// Codec name, `"data"` for data tracks
    pub codec: &'static str,
    pub bps: u64,
    pub fps: u32,
    pub frames: u64,
    pub drops: u64,
    pub gop: u32,
    pub readers: usize,
    pub ring_size: usize,
    /// Sequence of the newest published frame
    pub sequence: Option<u32>,
}

/// Point-in-time view of one stream
#[derive(Debug, Clone)]
pub struct StreamSummary {
    pub path: StreamPath,
    pub state: StreamState,
    pub publisher: Option<u64>,
    pub subscribers: usize,
    pub tracks: Vec<TrackSummary>,
    pub age: Duration,
}

impl StreamSummary {
    /// Total bitrate across tracks
    pub fn bps(&self) -> u64 {
        self.tracks.iter().map(|t| t.bps).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_track_stats_new() {
        let stats = TrackStats::new();
        assert_eq!(stats.frames(), 0);
        assert_eq!(stats.bytes(), 0);
        assert_eq!(stats.drops(), 0);
        assert_eq!(stats.bps(), 0);
        assert_eq!(stats.fps(), 0);
    }

    #[test]
    fn test_rates_after_one_second() {
        let stats = TrackStats::new();
        let t0 = Instant::now();

        // 25 frames of 5000 bytes, 40 ms apart, then one closing the window
        for i in 0..25 {
            stats.record_frame(t0 + Duration::from_millis(i * 40), 5000);
        }
        assert_eq!(stats.bps(), 0);
        stats.record_frame(t0 + Duration::from_millis(1000), 5000);

        // 26 * 5000 bytes * 8 bits / 1 s
        assert_eq!(stats.bps(), 1_040_000);
        assert_eq!(stats.fps(), 26);
        assert_eq!(stats.frames(), 26);
        assert_eq!(stats.bytes(), 130_000);
    }

    #[test]
    fn test_rates_zero_inside_first_window() {
        let stats = TrackStats::new();
        let t0 = Instant::now();
        stats.record_frame(t0, 1_000_000);
        stats.record_frame(t0 + Duration::from_millis(500), 1_000_000);
        assert_eq!(stats.bps(), 0);
        assert_eq!(stats.fps(), 0);
    }

    #[test]
    fn test_drops_and_gop() {
        let stats = TrackStats::new();
        stats.record_drops(3);
        stats.record_drops(2);
        stats.set_gop(50);
        assert_eq!(stats.drops(), 5);
        assert_eq!(stats.gop(), 50);
    }

    #[test]
    fn test_stream_summary_bps() {
        let track = |name: &str, bps| TrackSummary {
            name: name.to_string(),
            codec: "h264",
            bps,
            fps: 25,
            frames: 0,
            drops: 0,
            gop: 0,
            readers: 0,
            ring_size: 256,
            sequence: None,
        };
        let summary = StreamSummary {
            path: StreamPath::parse("live/a").unwrap(),
            state: StreamState::Publishing,
            publisher: Some(1),
            subscribers: 2,
            tracks: vec![track("h264", 2_000_000), track("aac", 128_000)],
            age: Duration::from_secs(5),
        };
        assert_eq!(summary.bps(), 2_128_000);
    }
}
