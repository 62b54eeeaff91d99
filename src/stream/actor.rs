//! The per-stream task
//!
//! Every membership or lifecycle change arrives as a [`Command`] on one
//! unbounded channel and is applied in order by a single task, so no stream
//! field needs a lock. Timers (wait-publish, wait-close, close grace and the
//! publishing heartbeat) are driven from the same `select!` loop.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;

use super::{StreamAction, StreamEvent, StreamState};
use crate::config::{EngineConfig, PublishConfig, SubscribeConfig};
use crate::registry::{RegistryError, StreamPath};
use crate::stats::StreamSummary;
use crate::track::TrackHandle;

/// Track idle check period while publishing
pub(crate) const HEARTBEAT: Duration = Duration::from_secs(1);

/// Time a closed stream lingers before it is destroyed
pub(crate) const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Wait-publish delay when neither side asked for a reconnect window
const MIN_RECONNECT_WAIT: Duration = Duration::from_millis(10);

/// Type-erased `DataTrackHandle<T>`
pub(crate) type AnyTrack = Arc<dyn Any + Send + Sync>;

type EventTx = mpsc::UnboundedSender<StreamEvent>;

pub(crate) enum Command {
    Publish {
        id: u64,
        config: PublishConfig,
        events: EventTx,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    PublisherLost {
        id: u64,
        reason: String,
    },
    Subscribe {
        id: u64,
        config: SubscribeConfig,
        events: EventTx,
        reply: oneshot::Sender<Result<Vec<TrackHandle>, RegistryError>>,
    },
    Unsubscribe {
        id: u64,
    },
    AddTrack {
        publisher: u64,
        track: TrackHandle,
    },
    RemoveTrack {
        publisher: u64,
        track: TrackHandle,
    },
    AddDataTrack {
        publisher: u64,
        name: String,
        track: AnyTrack,
    },
    RemoveDataTrack {
        publisher: u64,
        name: String,
    },
    GetDataTrack {
        name: String,
        reply: oneshot::Sender<Option<AnyTrack>>,
    },
    Action(StreamAction),
    Snapshot(oneshot::Sender<StreamSummary>),
}

/// Address of a stream task; cheap to clone
#[derive(Debug, Clone)]
pub struct StreamHandle {
    path: StreamPath,
    id: u64,
    tx: mpsc::UnboundedSender<Command>,
}

impl StreamHandle {
    pub fn path(&self) -> &StreamPath {
        &self.path
    }

    /// Distinguishes successive streams created under one path
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The stream task has exited
    pub fn is_finished(&self) -> bool {
        self.tx.is_closed()
    }

    /// Close the stream now
    pub fn close(&self) {
        self.send(Command::Action(StreamAction::Close));
    }

    /// Current state, members and track statistics
    pub async fn summary(&self) -> Option<StreamSummary> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Snapshot(reply)) {
            return None;
        }
        rx.await.ok()
    }

    pub(crate) fn send(&self, command: Command) -> bool {
        self.tx.send(command).is_ok()
    }

    fn closed(&self) -> RegistryError {
        RegistryError::StreamClosed(self.path.clone())
    }

    pub(crate) async fn publish(&self, id: u64, config: PublishConfig, events: EventTx) -> Result<(), RegistryError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Publish {
            id,
            config,
            events,
            reply,
        }) {
            return Err(self.closed());
        }
        rx.await.unwrap_or_else(|_| Err(self.closed()))
    }

    pub(crate) async fn subscribe(
        &self,
        id: u64,
        config: SubscribeConfig,
        events: EventTx,
    ) -> Result<Vec<TrackHandle>, RegistryError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::Subscribe {
            id,
            config,
            events,
            reply,
        }) {
            return Err(self.closed());
        }
        rx.await.unwrap_or_else(|_| Err(self.closed()))
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.send(Command::Unsubscribe { id });
    }

    pub(crate) fn publisher_lost(&self, id: u64, reason: impl Into<String>) {
        self.send(Command::PublisherLost {
            id,
            reason: reason.into(),
        });
    }

    pub(crate) async fn data_track(&self, name: &str) -> Option<AnyTrack> {
        let (reply, rx) = oneshot::channel();
        if !self.send(Command::GetDataTrack {
            name: name.to_string(),
            reply,
        }) {
            return None;
        }
        rx.await.ok().flatten()
    }
}

/// What a track writer uses to reach its stream
///
/// Carries the publisher id so the stream can ignore tracks of a publisher
/// it has already replaced.
#[derive(Debug, Clone)]
pub(crate) struct TrackSink {
    stream: StreamHandle,
    publisher: u64,
}

impl TrackSink {
    pub(crate) fn new(stream: StreamHandle, publisher: u64) -> Self {
        Self { stream, publisher }
    }

    pub(crate) fn announce(&self, track: TrackHandle) {
        self.stream.send(Command::AddTrack {
            publisher: self.publisher,
            track,
        });
    }

    pub(crate) fn withdraw(&self, track: &TrackHandle) {
        self.stream.send(Command::RemoveTrack {
            publisher: self.publisher,
            track: track.clone(),
        });
    }

    pub(crate) fn announce_data(&self, name: &str, track: AnyTrack) {
        self.stream.send(Command::AddDataTrack {
            publisher: self.publisher,
            name: name.to_string(),
            track,
        });
    }

    pub(crate) fn withdraw_data(&self, name: &str) {
        self.stream.send(Command::RemoveDataTrack {
            publisher: self.publisher,
            name: name.to_string(),
        });
    }
}

struct Member<C> {
    id: u64,
    config: C,
    events: EventTx,
}

pub(crate) struct StreamActor {
    path: StreamPath,
    id: u64,
    state: StreamState,
    created_at: Instant,
    rx: mpsc::UnboundedReceiver<Command>,
    publisher: Option<Member<PublishConfig>>,
    /// Policy of the current (or last) publisher
    publish_config: PublishConfig,
    subscribers: HashMap<u64, Member<SubscribeConfig>>,
    tracks: Vec<TrackHandle>,
    data_tracks: HashMap<String, AnyTrack>,
    deadline: Option<Instant>,
    wait_publish: Duration,
}

impl StreamActor {
    pub(crate) fn new(path: StreamPath, id: u64, config: &EngineConfig, wait_publish: Duration) -> (StreamHandle, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = StreamHandle {
            path: path.clone(),
            id,
            tx,
        };
        let now = Instant::now();
        let actor = Self {
            path,
            id,
            state: StreamState::WaitPublish,
            created_at: now,
            rx,
            publisher: None,
            publish_config: config.publish.clone(),
            subscribers: HashMap::new(),
            tracks: Vec::new(),
            data_tracks: HashMap::new(),
            deadline: Some(now + wait_publish),
            wait_publish,
        };
        (handle, actor)
    }

    pub(crate) async fn run(self) {
        let span = tracing::info_span!("stream", path = %self.path, id = self.id);
        self.run_loop().instrument(span).await
    }

    async fn run_loop(mut self) {
        tracing::info!(wait = ?self.wait_publish, "stream created");
        let mut heartbeat = tokio::time::interval(HEARTBEAT);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut inbox_open = true;

        while self.state != StreamState::Destroyed {
            let deadline = self.deadline;
            tokio::select! {
                command = self.rx.recv(), if inbox_open => match command {
                    Some(command) => self.handle(command),
                    None => {
                        inbox_open = false;
                        self.apply(StreamAction::Close);
                    }
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.deadline = None;
                    self.apply(StreamAction::Timeout);
                }
                _ = heartbeat.tick(), if self.state == StreamState::Publishing => self.on_heartbeat(),
            }
        }
        tracing::info!("stream destroyed");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Publish {
                id,
                config,
                events,
                reply,
            } => {
                let result = self.on_publish(id, config, events);
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted && self.state == StreamState::WaitPublish {
                    self.apply(StreamAction::Publish);
                }
            }
            Command::PublisherLost { id, reason } => self.on_publisher_lost(id, &reason),
            Command::Subscribe {
                id,
                config,
                events,
                reply,
            } => {
                let result = self.on_subscribe(id, config, events);
                let accepted = result.is_ok();
                let _ = reply.send(result);
                if accepted && self.subscribers.len() == 1 && self.state == StreamState::WaitClose {
                    self.apply(StreamAction::FirstEnter);
                }
            }
            Command::Unsubscribe { id } => self.on_unsubscribe(id),
            Command::AddTrack { publisher, track } => self.on_add_track(publisher, track),
            Command::RemoveTrack { publisher, track } => {
                if self.is_publisher(publisher) {
                    self.remove_tracks(|t| t.same_track(&track), "writer closed");
                }
            }
            Command::AddDataTrack {
                publisher,
                name,
                track,
            } => {
                if self.is_publisher(publisher) {
                    tracing::debug!(track = %name, "data track added");
                    self.data_tracks.insert(name.clone(), track);
                    self.broadcast(StreamEvent::DataTrackAdded(name));
                }
            }
            Command::RemoveDataTrack { publisher, name } => {
                if self.is_publisher(publisher) && self.data_tracks.remove(&name).is_some() {
                    tracing::debug!(track = %name, "data track removed");
                }
            }
            Command::GetDataTrack { name, reply } => {
                let _ = reply.send(self.data_tracks.get(&name).cloned());
            }
            Command::Action(action) => {
                self.apply(action);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.summary());
            }
        }
    }

    fn on_publish(&mut self, id: u64, config: PublishConfig, events: EventTx) -> Result<(), RegistryError> {
        if self.state.is_closed() {
            return Err(RegistryError::StreamClosed(self.path.clone()));
        }
        if let Some(existing) = &self.publisher {
            if !config.kick_exist {
                tracing::debug!(publisher = id, existing = existing.id, "publish refused");
                return Err(RegistryError::PublisherExists(self.path.clone()));
            }
            tracing::info!(publisher = id, kicked = existing.id, "publisher kicked");
            let _ = existing.events.send(StreamEvent::Kick);
            self.remove_tracks(|_| true, "publisher kicked");
            self.data_tracks.clear();
        } else {
            tracing::info!(publisher = id, "publisher attached");
        }
        self.publish_config = config.clone();
        self.publisher = Some(Member { id, config, events });
        Ok(())
    }

    fn on_publisher_lost(&mut self, id: u64, reason: &str) {
        if !self.is_publisher(id) {
            tracing::debug!(publisher = id, "loss of a former publisher ignored");
            return;
        }
        self.publisher = None;
        tracing::info!(publisher = id, reason, "publisher lost");
        self.remove_tracks(|_| true, "publisher lost");
        self.data_tracks.clear();
        self.wait_publish = self.reconnect_wait();
        self.apply(StreamAction::PublishLost);
    }

    fn on_subscribe(
        &mut self,
        id: u64,
        config: SubscribeConfig,
        events: EventTx,
    ) -> Result<Vec<TrackHandle>, RegistryError> {
        if self.state.is_closed() {
            return Err(RegistryError::StreamClosed(self.path.clone()));
        }
        if self.state == StreamState::WaitPublish {
            let until = Instant::now() + config.wait_timeout;
            self.deadline = Some(self.deadline.map_or(until, |d| d.max(until)));
        }
        self.subscribers.insert(id, Member { id, config, events });
        tracing::debug!(subscriber = id, subscribers = self.subscribers.len(), "subscriber joined");
        Ok(self.tracks.clone())
    }

    fn on_unsubscribe(&mut self, id: u64) {
        let Some(member) = self.subscribers.remove(&id) else {
            return;
        };
        tracing::debug!(subscriber = member.id, subscribers = self.subscribers.len(), "subscriber left");
        if !self.subscribers.is_empty() {
            return;
        }
        match self.state {
            StreamState::Publishing if self.publish_config.wait_close_timeout.is_zero() => {}
            StreamState::Publishing | StreamState::WaitPublish => {
                self.apply(StreamAction::LastLeave);
            }
            _ => {}
        }
    }

    fn on_add_track(&mut self, publisher: u64, track: TrackHandle) {
        if !self.is_publisher(publisher) {
            tracing::debug!(track = %track.name(), publisher, "track of replaced publisher ignored");
            return;
        }
        let name = track.name().to_string();
        self.remove_tracks(|t| t.name() == name, "replaced");
        tracing::info!(track = %name, codec = track.kind().codec_name(), "track added");
        self.tracks.push(track.clone());
        self.broadcast(StreamEvent::TrackAdded(track));
        if self.state == StreamState::WaitPublish {
            self.apply(StreamAction::Publish);
        }
    }

    fn on_heartbeat(&mut self) {
        let now = crate::track::now();
        let timeout = self.publish_config.publish_timeout;
        let removed = self.remove_tracks(
            |t| t.is_closed() || t.idle_for(now).is_some_and(|idle| idle > timeout),
            "idle",
        );
        if removed > 0 && self.tracks.is_empty() {
            self.wait_publish = self.reconnect_wait();
            self.apply(StreamAction::NoTracks);
            // a publisher whose tracks all went idle no longer owns the stream
            if let Some(publisher) = self.publisher.take() {
                tracing::info!(publisher = publisher.id, "idle publisher released");
                let _ = publisher.events.send(StreamEvent::Kick);
            }
            self.data_tracks.clear();
            return;
        }
        if self.subscribers.is_empty() && !self.publish_config.wait_close_timeout.is_zero() {
            self.apply(StreamAction::LastLeave);
        }
    }

    /// Apply an action through the transition table
    fn apply(&mut self, action: StreamAction) -> bool {
        let Some(to) = self.state.next(action) else {
            tracing::debug!(state = %self.state, ?action, "action ignored");
            return false;
        };
        let from = std::mem::replace(&mut self.state, to);
        tracing::info!(%from, %to, ?action, "state changed");

        let now = Instant::now();
        self.deadline = match to {
            StreamState::WaitPublish => Some(now + self.wait_publish),
            StreamState::WaitClose => Some(now + self.publish_config.wait_close_timeout),
            StreamState::Closed => Some(now + CLOSE_GRACE),
            StreamState::Publishing | StreamState::Destroyed => None,
        };

        let event = StreamEvent::State { from, to, action };
        if let Some(publisher) = &self.publisher {
            let _ = publisher.events.send(event.clone());
        }
        self.broadcast(event);
        if to == StreamState::Closed {
            self.close_members();
        }
        true
    }

    fn close_members(&mut self) {
        if let Some(publisher) = self.publisher.take() {
            let _ = publisher.events.send(StreamEvent::Closed);
        }
        for (_, subscriber) in self.subscribers.drain() {
            let _ = subscriber.events.send(StreamEvent::Closed);
        }
        self.tracks.clear();
        self.data_tracks.clear();
    }

    /// Remove matching tracks, telling subscribers; returns how many went
    fn remove_tracks(&mut self, mut matches: impl FnMut(&TrackHandle) -> bool, reason: &str) -> usize {
        let mut removed = Vec::new();
        self.tracks.retain(|t| {
            if matches(t) {
                removed.push(t.clone());
                false
            } else {
                true
            }
        });
        for track in &removed {
            tracing::info!(track = %track.name(), reason, "track removed");
            self.broadcast(StreamEvent::TrackRemoved(track.clone()));
        }
        removed.len()
    }

    fn broadcast(&self, event: StreamEvent) {
        for subscriber in self.subscribers.values() {
            let _ = subscriber.events.send(event.clone());
        }
    }

    fn is_publisher(&self, id: u64) -> bool {
        self.publisher.as_ref().is_some_and(|p| p.id == id)
    }

    /// How long wait-publish lasts after the publisher went away
    fn reconnect_wait(&self) -> Duration {
        let subscriber_wait = self
            .subscribers
            .values()
            .map(|s| s.config.wait_timeout)
            .max()
            .unwrap_or_default();
        let wait = self.publish_config.reconnect_timeout.max(subscriber_wait);
        if wait.is_zero() {
            MIN_RECONNECT_WAIT
        } else {
            wait
        }
    }

    fn summary(&self) -> StreamSummary {
        StreamSummary {
            path: self.path.clone(),
            state: self.state,
            publisher: self.publisher.as_ref().map(|p| p.id),
            subscribers: self.subscribers.len(),
            tracks: self.tracks.iter().map(TrackHandle::summary).collect(),
            age: self.created_at.elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::config::RingConfig;
    use crate::media::VideoCodecId;
    use crate::track::VideoTrack;

    type EventRx = mpsc::UnboundedReceiver<StreamEvent>;

    fn spawn(wait: Duration) -> (StreamHandle, JoinHandle<()>) {
        let (handle, actor) = StreamActor::new(StreamPath::new("live", "test"), 1, &EngineConfig::default(), wait);
        (handle, tokio::spawn(actor.run()))
    }

    async fn state(stream: &StreamHandle) -> StreamState {
        stream.summary().await.unwrap().state
    }

    async fn publish(stream: &StreamHandle, id: u64, config: PublishConfig) -> (Result<(), RegistryError>, EventRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        (stream.publish(id, config, tx).await, rx)
    }

    async fn subscribe(stream: &StreamHandle, id: u64) -> EventRx {
        let (tx, rx) = mpsc::unbounded_channel();
        stream.subscribe(id, SubscribeConfig::default(), tx).await.unwrap();
        rx
    }

    fn drain(rx: &mut EventRx) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_publish_timeout_destroys() {
        let (stream, task) = spawn(Duration::from_secs(5));
        assert_eq!(state(&stream).await, StreamState::WaitPublish);

        tokio::time::sleep(Duration::from_millis(5100)).await;
        assert_eq!(state(&stream).await, StreamState::Closed);

        tokio::time::sleep(CLOSE_GRACE + Duration::from_millis(100)).await;
        task.await.unwrap();
        assert!(stream.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_and_kick() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        let (result, mut first) = publish(&stream, 10, PublishConfig::default()).await;
        result.unwrap();
        assert_eq!(state(&stream).await, StreamState::Publishing);
        assert!(matches!(
            drain(&mut first).as_slice(),
            [StreamEvent::State {
                to: StreamState::Publishing,
                ..
            }]
        ));

        let (refused, _) = publish(&stream, 11, PublishConfig::default()).await;
        assert!(matches!(refused, Err(RegistryError::PublisherExists(_))));

        let (kicked, _second) = publish(&stream, 12, PublishConfig::default().kick_exist(true)).await;
        kicked.unwrap();
        assert!(matches!(drain(&mut first).as_slice(), [StreamEvent::Kick]));
        let summary = stream.summary().await.unwrap();
        assert_eq!(summary.publisher, Some(12));
        assert_eq!(summary.state, StreamState::Publishing);

        // the kicked publisher's loss report changes nothing
        stream.publisher_lost(10, "socket closed");
        assert_eq!(state(&stream).await, StreamState::Publishing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_window() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        let config = PublishConfig::default().reconnect_timeout(Duration::from_secs(3));
        publish(&stream, 10, config.clone()).await.0.unwrap();

        stream.publisher_lost(10, "eof");
        assert_eq!(state(&stream).await, StreamState::WaitPublish);

        tokio::time::sleep(Duration::from_secs(2)).await;
        publish(&stream, 11, config).await.0.unwrap();
        assert_eq!(state(&stream).await, StreamState::Publishing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loss_without_window_closes() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        publish(&stream, 10, PublishConfig::default()).await.0.unwrap();
        let _events = subscribe(&stream, 20).await;
        stream.unsubscribe(20);
        stream.publisher_lost(10, "eof");
        assert_eq!(state(&stream).await, StreamState::WaitPublish);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(state(&stream).await, StreamState::Closed);

        let (late, _) = publish(&stream, 11, PublishConfig::default()).await;
        assert!(matches!(late, Err(RegistryError::StreamClosed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_close_and_first_enter() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        let config = PublishConfig::default().wait_close_timeout(Duration::from_secs(2));
        publish(&stream, 10, config).await.0.unwrap();

        let _events = subscribe(&stream, 20).await;
        stream.unsubscribe(20);
        assert_eq!(state(&stream).await, StreamState::WaitClose);

        tokio::time::sleep(Duration::from_millis(1900)).await;
        let _events = subscribe(&stream, 21).await;
        assert_eq!(state(&stream).await, StreamState::Publishing);

        stream.unsubscribe(21);
        assert_eq!(state(&stream).await, StreamState::WaitClose);
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(state(&stream).await, StreamState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_track_removed() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        let config = PublishConfig::default().publish_timeout(Duration::from_secs(2));
        publish(&stream, 10, config).await.0.unwrap();
        let mut events = subscribe(&stream, 20).await;

        let mut video = VideoTrack::new("video", VideoCodecId::H264, &RingConfig::default());
        video
            .write_annexb(0, Some(0), &Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]))
            .unwrap();
        stream.send(Command::AddTrack {
            publisher: 10,
            track: video.handle(),
        });
        assert_eq!(stream.summary().await.unwrap().tracks.len(), 1);
        assert!(matches!(drain(&mut events).as_slice(), [StreamEvent::TrackAdded(_)]));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let summary = stream.summary().await.unwrap();
        assert!(summary.tracks.is_empty());
        assert_eq!(summary.state, StreamState::WaitPublish);
        let events = drain(&mut events);
        assert!(matches!(events[0], StreamEvent::TrackRemoved(_)));
        assert!(matches!(
            events[1],
            StreamEvent::State {
                action: StreamAction::NoTracks,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_publisher_released() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        let config = PublishConfig::default()
            .publish_timeout(Duration::from_secs(2))
            .reconnect_timeout(Duration::from_secs(30));
        let (result, mut old) = publish(&stream, 10, config).await;
        result.unwrap();

        let mut video = VideoTrack::new("video", VideoCodecId::H264, &RingConfig::default());
        video
            .write_annexb(0, Some(0), &Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]))
            .unwrap();
        stream.send(Command::AddTrack {
            publisher: 10,
            track: video.handle(),
        });
        assert_eq!(state(&stream).await, StreamState::Publishing);
        drain(&mut old);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        let summary = stream.summary().await.unwrap();
        assert_eq!(summary.state, StreamState::WaitPublish);
        assert_eq!(summary.publisher, None);
        let events = drain(&mut old);
        assert!(matches!(
            events.as_slice(),
            [
                StreamEvent::State {
                    action: StreamAction::NoTracks,
                    ..
                },
                StreamEvent::Kick
            ]
        ));

        // the old writer resuming does not bring its tracks back
        video
            .write_annexb(3600, Some(3600), &Bytes::from_static(&[0, 0, 0, 1, 0x41, 0x9a]))
            .unwrap();
        stream.send(Command::AddTrack {
            publisher: 10,
            track: video.handle(),
        });
        assert_eq!(state(&stream).await, StreamState::WaitPublish);

        let (result, _new) = publish(&stream, 11, PublishConfig::default()).await;
        result.unwrap();
        let mut next = VideoTrack::new("video", VideoCodecId::H264, &RingConfig::default());
        next
            .write_annexb(0, Some(0), &Bytes::from_static(&[0, 0, 0, 1, 0x65, 0x88]))
            .unwrap();
        stream.send(Command::AddTrack {
            publisher: 11,
            track: next.handle(),
        });
        let summary = stream.summary().await.unwrap();
        assert_eq!(summary.state, StreamState::Publishing);
        assert_eq!(summary.publisher, Some(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpublished_stream_closes_on_last_leave() {
        let (stream, _task) = spawn(Duration::from_secs(5));
        let _events = subscribe(&stream, 20).await;
        stream.unsubscribe(20);
        assert_eq!(state(&stream).await, StreamState::Closed);
    }
}
