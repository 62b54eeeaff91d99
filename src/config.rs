//! Engine configuration
//!
//! Plain structs with `Default` values and consuming builder methods. The
//! [`Directory`](crate::registry::Directory) owns one [`EngineConfig`];
//! publishers and subscribers may override their own section per call.

use std::time::Duration;

/// Publisher-side policy
#[derive(Debug, Clone)]
pub struct PublishConfig {
    /// Evict an existing publisher instead of refusing the newcomer
    pub kick_exist: bool,

    /// A track with no writes for this long is removed
    pub publish_timeout: Duration,

    /// How long a stream without subscribers keeps publishing (zero = forever)
    pub wait_close_timeout: Duration,

    /// How long the stream waits for a lost publisher to come back
    pub reconnect_timeout: Duration,

    /// History retained for buffered readers (zero = none)
    pub buffer_time: Duration,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            kick_exist: false,
            publish_timeout: Duration::from_secs(10),
            wait_close_timeout: Duration::ZERO,
            reconnect_timeout: Duration::ZERO,
            buffer_time: Duration::ZERO,
        }
    }
}

impl PublishConfig {
    /// Allow this publisher to kick an incumbent
    pub fn kick_exist(mut self, kick: bool) -> Self {
        self.kick_exist = kick;
        self
    }

    /// Set track idle timeout
    pub fn publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    /// Set the no-subscriber close delay
    pub fn wait_close_timeout(mut self, timeout: Duration) -> Self {
        self.wait_close_timeout = timeout;
        self
    }

    /// Set the reconnect window after publisher loss
    pub fn reconnect_timeout(mut self, timeout: Duration) -> Self {
        self.reconnect_timeout = timeout;
        self
    }

    /// Set history retention for buffered readers
    pub fn buffer_time(mut self, time: Duration) -> Self {
        self.buffer_time = time;
        self
    }
}

/// Where a new reader starts on a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Start at the latest IDR, then jump to the live edge
    #[default]
    Live,
    /// Start at the live edge, no IDR alignment
    NoJump,
    /// Start at the oldest retained frame
    Buffered,
}

/// Payload views a subscriber needs built at flush time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewSet {
    pub avcc: bool,
    pub rtp: bool,
    pub flv: bool,
}

impl ViewSet {
    /// Only the AU list
    pub const NONE: ViewSet = ViewSet {
        avcc: false,
        rtp: false,
        flv: false,
    };

    pub fn avcc(mut self) -> Self {
        self.avcc = true;
        self
    }

    pub fn rtp(mut self) -> Self {
        self.rtp = true;
        self
    }

    /// FLV tags are built from AVCC, so this implies it
    pub fn flv(mut self) -> Self {
        self.flv = true;
        self.avcc = true;
        self
    }
}

/// Subscriber-side preferences
#[derive(Debug, Clone)]
pub struct SubscribeConfig {
    pub sub_audio: bool,
    pub sub_video: bool,

    /// Deliver only IDR frames on video tracks
    pub iframe_only: bool,

    /// How long to wait for a publisher (and for wanted tracks)
    pub wait_timeout: Duration,

    pub read_mode: ReadMode,

    /// Accepted video track names (empty = any)
    pub sub_video_tracks: Vec<String>,

    /// Accepted audio track names (empty = any)
    pub sub_audio_tracks: Vec<String>,

    /// Views to materialize for this subscriber
    pub views: ViewSet,
}

impl Default for SubscribeConfig {
    fn default() -> Self {
        Self {
            sub_audio: true,
            sub_video: true,
            iframe_only: false,
            wait_timeout: Duration::from_secs(10),
            read_mode: ReadMode::Live,
            sub_video_tracks: Vec::new(),
            sub_audio_tracks: Vec::new(),
            views: ViewSet::NONE,
        }
    }
}

impl SubscribeConfig {
    pub fn sub_audio(mut self, enabled: bool) -> Self {
        self.sub_audio = enabled;
        self
    }

    pub fn sub_video(mut self, enabled: bool) -> Self {
        self.sub_video = enabled;
        self
    }

    pub fn iframe_only(mut self, enabled: bool) -> Self {
        self.iframe_only = enabled;
        self
    }

    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub fn read_mode(mut self, mode: ReadMode) -> Self {
        self.read_mode = mode;
        self
    }

    /// Accept only the named video track (may be called repeatedly)
    pub fn video_track(mut self, name: impl Into<String>) -> Self {
        self.sub_video_tracks.push(name.into());
        self
    }

    /// Accept only the named audio track (may be called repeatedly)
    pub fn audio_track(mut self, name: impl Into<String>) -> Self {
        self.sub_audio_tracks.push(name.into());
        self
    }

    pub fn views(mut self, views: ViewSet) -> Self {
        self.views = views;
        self
    }

    /// Whether a video track with this name should be read
    pub fn wants_video(&self, name: &str) -> bool {
        self.sub_video && (self.sub_video_tracks.is_empty() || self.sub_video_tracks.iter().any(|n| n == name))
    }

    /// Whether an audio track with this name should be read
    pub fn wants_audio(&self, name: &str) -> bool {
        self.sub_audio && (self.sub_audio_tracks.is_empty() || self.sub_audio_tracks.iter().any(|n| n == name))
    }
}

/// Ring sizing
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Initial slots for a video track
    pub video_size: usize,
    /// Initial slots for an audio track
    pub audio_size: usize,
    /// Shrinking never goes below this
    pub min_size: usize,
    /// Growth is capped here
    pub max_size: usize,
    /// Reclaimed slots kept for reuse
    pub pool_size: usize,
    /// Payload bytes per RTP packet built by the packetizers
    pub rtp_mtu: usize,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            video_size: 256,
            audio_size: 32,
            min_size: 16,
            max_size: 4096,
            pool_size: 16,
            rtp_mtu: crate::rtp::DEFAULT_MTU,
        }
    }
}

impl RingConfig {
    pub fn video_size(mut self, size: usize) -> Self {
        self.video_size = size.max(2);
        self
    }

    pub fn audio_size(mut self, size: usize) -> Self {
        self.audio_size = size.max(2);
        self
    }

    pub fn min_size(mut self, size: usize) -> Self {
        self.min_size = size.max(2);
        self
    }

    /// Set the growth cap
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    pub fn rtp_mtu(mut self, mtu: usize) -> Self {
        self.rtp_mtu = mtu;
        self
    }
}

/// Everything the directory hands to new streams
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub publish: PublishConfig,
    pub subscribe: SubscribeConfig,
    pub ring: RingConfig,
}

impl EngineConfig {
    pub fn publish(mut self, publish: PublishConfig) -> Self {
        self.publish = publish;
        self
    }

    pub fn subscribe(mut self, subscribe: SubscribeConfig) -> Self {
        self.subscribe = subscribe;
        self
    }

    pub fn ring(mut self, ring: RingConfig) -> Self {
        self.ring = ring;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();

        assert!(!config.publish.kick_exist);
        assert_eq!(config.publish.publish_timeout, Duration::from_secs(10));
        assert_eq!(config.publish.wait_close_timeout, Duration::ZERO);
        assert!(config.subscribe.sub_audio);
        assert!(config.subscribe.sub_video);
        assert_eq!(config.subscribe.read_mode, ReadMode::Live);
        assert_eq!(config.ring.video_size, 256);
        assert_eq!(config.ring.audio_size, 32);
        assert_eq!(config.ring.pool_size, 16);
    }

    #[test]
    fn test_builder_chaining() {
        let config = EngineConfig::default()
            .publish(
                PublishConfig::default()
                    .kick_exist(true)
                    .wait_close_timeout(Duration::from_secs(2)),
            )
            .ring(RingConfig::default().video_size(64).max_size(512));

        assert!(config.publish.kick_exist);
        assert_eq!(config.publish.wait_close_timeout, Duration::from_secs(2));
        assert_eq!(config.ring.video_size, 64);
        assert_eq!(config.ring.max_size, 512);
    }

    #[test]
    fn test_ring_size_floor() {
        let config = RingConfig::default().video_size(0).audio_size(1);
        assert_eq!(config.video_size, 2);
        assert_eq!(config.audio_size, 2);
    }

    #[test]
    fn test_track_filters() {
        let config = SubscribeConfig::default().video_track("h264");
        assert!(config.wants_video("h264"));
        assert!(!config.wants_video("h265"));
        assert!(config.wants_audio("aac"));

        let no_audio = SubscribeConfig::default().sub_audio(false);
        assert!(!no_audio.wants_audio("aac"));
    }

    #[test]
    fn test_flv_view_implies_avcc() {
        let views = ViewSet::default().flv();
        assert!(views.avcc);
        assert!(!views.rtp);
    }
}
