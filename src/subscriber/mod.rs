//! Subscriber side: stream membership, track discovery and the play loop
//!
//! A [`Subscriber`] receives the stream's [`StreamEvent`]s and opens a
//! [`TrackReader`] per track it wants. [`Subscriber::play`] multiplexes
//! events with one video and one audio reader and hands everything to a
//! callback, the way egress adapters consume a stream.

mod reader;

use std::ops::ControlFlow;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::Instrument;

pub use reader::TrackReader;

use crate::config::SubscribeConfig;
use crate::error::{Error, Result};
use crate::registry::RegistryError;
use crate::stream::{FrameRef, StreamEvent, StreamHandle};
use crate::track::{DataTrackHandle, TrackHandle};

/// One subscriber's membership in a stream; leaves the stream when dropped
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    stream: StreamHandle,
    config: SubscribeConfig,
    events: mpsc::UnboundedReceiver<StreamEvent>,
    tracks: Vec<TrackHandle>,
    closed: bool,
    span: tracing::Span,
}

impl Subscriber {
    pub(crate) fn new(
        id: u64,
        stream: StreamHandle,
        config: SubscribeConfig,
        events: mpsc::UnboundedReceiver<StreamEvent>,
        tracks: Vec<TrackHandle>,
    ) -> Self {
        let span = tracing::info_span!("subscribe", stream = %stream.path(), subscriber = id);
        Self {
            id,
            stream,
            config,
            events,
            tracks,
            closed: false,
            span,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&self) -> &StreamHandle {
        &self.stream
    }

    pub fn config(&self) -> &SubscribeConfig {
        &self.config
    }

    /// Tracks known from the events consumed so far
    pub fn tracks(&self) -> &[TrackHandle] {
        &self.tracks
    }

    /// Next stream event; `None` once the stream is gone
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.recv().await?;
        self.observe(&event);
        Some(event)
    }

    /// Next stream event if one is queued
    pub fn try_event(&mut self) -> Option<StreamEvent> {
        let event = self.events.try_recv().ok()?;
        self.observe(&event);
        Some(event)
    }

    fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::TrackAdded(track) => {
                self.tracks.retain(|t| t.name() != track.name());
                self.tracks.push(track.clone());
            }
            StreamEvent::TrackRemoved(track) => self.tracks.retain(|t| !t.same_track(track)),
            StreamEvent::Closed => {
                self.closed = true;
                self.tracks.clear();
            }
            _ => {}
        }
    }

    fn pick_video(&self) -> Option<TrackHandle> {
        self.tracks
            .iter()
            .find(|t| t.is_video() && !t.is_closed() && self.config.wants_video(t.name()))
            .cloned()
    }

    fn pick_audio(&self) -> Option<TrackHandle> {
        self.tracks
            .iter()
            .find(|t| t.is_audio() && !t.is_closed() && self.config.wants_audio(t.name()))
            .cloned()
    }

    /// Wait up to the configured `wait_timeout` for a wanted video track
    pub async fn wait_video_track(&mut self) -> Result<TrackHandle> {
        self.wait_track(Self::pick_video, "video track").await
    }

    /// Wait up to the configured `wait_timeout` for a wanted audio track
    pub async fn wait_audio_track(&mut self) -> Result<TrackHandle> {
        self.wait_track(Self::pick_audio, "audio track").await
    }

    async fn wait_track(&mut self, pick: fn(&Self) -> Option<TrackHandle>, what: &'static str) -> Result<TrackHandle> {
        let deadline = Instant::now() + self.config.wait_timeout;
        loop {
            if let Some(track) = pick(self) {
                return Ok(track);
            }
            if self.closed {
                return Err(self.closed_error());
            }
            match tokio::time::timeout_at(deadline, self.next_event()).await {
                Ok(Some(_)) => {}
                Ok(None) => return Err(self.closed_error()),
                Err(_) => return Err(Error::Timeout(what)),
            }
        }
    }

    fn closed_error(&self) -> Error {
        RegistryError::StreamClosed(self.stream.path().clone()).into()
    }

    /// Open a reader on `track` with this subscriber's read policy
    pub fn read_track(&self, track: &TrackHandle) -> TrackReader {
        TrackReader::new(track.clone(), &self.config)
    }

    /// Look up a data track carrying values of type `T`
    pub async fn data_track<T: Send + Sync + 'static>(&self, name: &str) -> Option<DataTrackHandle<T>> {
        let track = self.stream.data_track(name).await?;
        track
            .downcast::<DataTrackHandle<T>>()
            .ok()
            .map(|handle| (*handle).clone())
    }

    /// Deliver events and frames to `on_event` until it breaks or the stream closes
    ///
    /// Reads the first wanted video and audio tracks, switching when a track
    /// is removed or replaced. Frames arrive as [`StreamEvent::FrameAvailable`];
    /// stream events take priority over frames.
    pub async fn play<F>(&mut self, on_event: F) -> Result<()>
    where
        F: FnMut(StreamEvent) -> ControlFlow<()>,
    {
        let span = self.span.clone();
        self.play_loop(on_event).instrument(span).await
    }

    async fn play_loop<F>(&mut self, mut on_event: F) -> Result<()>
    where
        F: FnMut(StreamEvent) -> ControlFlow<()>,
    {
        let mut video: Option<TrackReader> = None;
        let mut audio: Option<TrackReader> = None;
        tracing::debug!("play started");

        loop {
            if self.closed {
                return Ok(());
            }
            if video.is_none() {
                video = self.pick_video().map(|t| self.read_track(&t));
            }
            if audio.is_none() {
                audio = self.pick_audio().map(|t| self.read_track(&t));
            }

            tokio::select! {
                biased;
                event = self.events.recv() => {
                    let Some(event) = event else {
                        return Ok(());
                    };
                    self.observe(&event);
                    drop_stale_reader(&mut video, &event);
                    drop_stale_reader(&mut audio, &event);
                    let last = matches!(event, StreamEvent::Closed);
                    if on_event(event).is_break() || last {
                        return Ok(());
                    }
                }
                frame = read_from(&mut video) => match frame {
                    Ok(frame) => {
                        if on_event(StreamEvent::FrameAvailable(frame)).is_break() {
                            return Ok(());
                        }
                    }
                    Err(Error::TrackClosed) => video = None,
                    Err(e) => return Err(e),
                },
                frame = read_from(&mut audio) => match frame {
                    Ok(frame) => {
                        if on_event(StreamEvent::FrameAvailable(frame)).is_break() {
                            return Ok(());
                        }
                    }
                    Err(Error::TrackClosed) => audio = None,
                    Err(e) => return Err(e),
                },
            }
        }
    }

    /// Leave the stream
    pub fn stop(self) {
        tracing::debug!(parent: &self.span, "subscriber stopped");
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stream.unsubscribe(self.id);
    }
}

/// Drop `reader` when its track went away or was replaced
fn drop_stale_reader(reader: &mut Option<TrackReader>, event: &StreamEvent) {
    let stale = match (reader.as_ref(), event) {
        (Some(r), StreamEvent::TrackRemoved(track)) => r.track().same_track(track),
        (Some(r), StreamEvent::TrackAdded(track)) => {
            r.track().name() == track.name() && !r.track().same_track(track)
        }
        _ => false,
    };
    if stale {
        *reader = None;
    }
}

async fn read_from(reader: &mut Option<TrackReader>) -> Result<FrameRef> {
    match reader {
        Some(reader) => reader.read_frame().await,
        None => std::future::pending().await,
    }
}
