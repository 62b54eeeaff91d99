//! Events delivered to publishers and subscribers

use super::{StreamAction, StreamState};
use crate::frame::AvFrame;
use crate::track::TrackHandle;

/// Core event, matched on by adapters
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Lifecycle transition
    State {
        from: StreamState,
        to: StreamState,
        action: StreamAction,
    },
    /// A publisher track produced its first frame
    TrackAdded(TrackHandle),
    /// A track went away (writer dropped, idle timeout, publisher change)
    TrackRemoved(TrackHandle),
    /// A data track was registered under this name
    DataTrackAdded(String),
    /// This publisher was evicted by a newcomer or released after its
    /// tracks went idle
    Kick,
    /// A frame read by a subscriber's play loop
    FrameAvailable(FrameRef),
    /// The stream closed; no further events follow
    Closed,
}

/// A frame as seen by one subscriber
#[derive(Debug, Clone)]
pub struct FrameRef {
    pub track: TrackHandle,
    pub frame: AvFrame,
    /// Subscriber timeline in milliseconds, starting at 1
    pub abs_time: u32,
    /// Frames between this one and the newest when it was read
    pub delay: u32,
    /// The decoder configuration changed since the previous frame
    pub dec_conf_changed: bool,
}

impl FrameRef {
    pub fn is_video(&self) -> bool {
        self.track.is_video()
    }

    pub fn is_audio(&self) -> bool {
        self.track.is_audio()
    }
}
