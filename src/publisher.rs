//! Publisher handle for protocol adapters
//!
//! An adapter publishes a path, creates its tracks from the returned
//! [`Publisher`] and writes frames into them. Tracks announce themselves on
//! their first frame and withdraw when dropped.
//!
//! # Example
//! ```no_run
//! use bytes::Bytes;
//! use livehub::media::VideoCodecId;
//! use livehub::registry::Directory;
//!
//! # async fn example(directory: Directory, au: Bytes) -> livehub::Result<()> {
//! let publisher = directory.publish("live/cam1", None).await?;
//! let mut video = publisher.create_video_track("h264", VideoCodecId::H264);
//! video.write_annexb(0, None, &au)?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::config::{PublishConfig, RingConfig};
use crate::media::{AudioCodecId, VideoCodecId};
use crate::stream::{StreamEvent, StreamHandle, TrackSink};
use crate::track::{AudioTrack, DataTrack, VideoTrack};

/// A stream's publisher; reports the loss to the stream when dropped
#[derive(Debug)]
pub struct Publisher {
    id: u64,
    stream: StreamHandle,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    config: PublishConfig,
    ring: RingConfig,
    span: tracing::Span,
    stopped: bool,
}

impl Publisher {
    pub(crate) fn new(
        id: u64,
        stream: StreamHandle,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        config: PublishConfig,
        ring: RingConfig,
    ) -> Self {
        let span = tracing::info_span!("publish", stream = %stream.path(), publisher = id);
        Self {
            id,
            stream,
            events,
            config,
            ring,
            span,
            stopped: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub fn config(&self) -> &PublishConfig {
        &self.config
    }

    fn sink(&self) -> TrackSink {
        TrackSink::new(self.stream.clone(), self.id)
    }

    /// New video track bound to this stream
    pub fn create_video_track(&self, name: &str, codec: VideoCodecId) -> VideoTrack {
        let mut track = VideoTrack::new(name, codec, &self.ring);
        track.attach(self.sink(), self.span.clone(), self.config.buffer_time);
        track
    }

    /// New audio track bound to this stream
    pub fn create_audio_track(&self, name: &str, codec: AudioCodecId, sample_rate: u32, channels: u8) -> AudioTrack {
        let mut track = AudioTrack::new(name, codec, sample_rate, channels, &self.ring);
        track.attach(self.sink(), self.span.clone(), self.config.buffer_time);
        track
    }

    /// New data track, registered with the stream right away
    pub fn create_data_track<T: Send + Sync + 'static>(&self, name: &str, size: usize) -> DataTrack<T> {
        let sink = self.sink();
        let mut track = DataTrack::new(name, size, &self.ring);
        sink.announce_data(name, Arc::new(track.handle()));
        track.attach(sink);
        track
    }

    /// Next stream event (state changes, kick, close)
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn try_event(&mut self) -> Option<StreamEvent> {
        self.events.try_recv().ok()
    }

    /// End publishing
    pub fn stop(mut self, reason: impl Into<String>) {
        self.stopped = true;
        let reason = reason.into();
        tracing::info!(parent: &self.span, reason = %reason, "publisher stopped");
        self.stream.publisher_lost(self.id, reason);
    }

    /// Run an adapter's ingest loop in its own task
    ///
    /// `ingest` receives this publisher. However the loop ends (success,
    /// error or panic) the stream is told the publisher is gone.
    pub fn spawn_ingest<F, Fut, E>(self, ingest: F) -> JoinHandle<()>
    where
        F: FnOnce(Publisher) -> Fut,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let stream = self.stream.clone();
        let id = self.id;
        let span = self.span.clone();
        let task = tokio::spawn(ingest(self).instrument(span.clone()));

        let supervise = async move {
            let reason = match task.await {
                Ok(Ok(())) => "ingest finished".to_string(),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "ingest failed");
                    format!("ingest failed: {}", e)
                }
                Err(e) if e.is_panic() => {
                    tracing::error!("ingest panicked");
                    "ingest panicked".to_string()
                }
                Err(_) => "ingest cancelled".to_string(),
            };
            // a no-op when the publisher already reported itself gone
            stream.publisher_lost(id, reason);
        };
        tokio::spawn(supervise.instrument(span))
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        let reason = if std::thread::panicking() {
            "publisher panicked"
        } else {
            "publisher dropped"
        };
        self.stream.publisher_lost(self.id, reason);
    }
}
