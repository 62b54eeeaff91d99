//! Stream directory
//!
//! The one place that maps paths to running streams. Publishing or
//! subscribing a path that has no stream creates one; a stream removes
//! itself once destroyed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};

use super::error::RegistryError;
use super::path::StreamPath;
use crate::config::{EngineConfig, PublishConfig, SubscribeConfig};
use crate::publisher::Publisher;
use crate::stats::StreamSummary;
use crate::stream::{StreamActor, StreamHandle};
use crate::subscriber::Subscriber;

#[derive(Debug)]
struct Inner {
    streams: RwLock<HashMap<StreamPath, StreamHandle>>,
    config: EngineConfig,
    /// Stream, publisher and subscriber ids
    next_id: AtomicU64,
}

/// Registry of live streams; cheap to clone, shared by all adapters
///
/// Tests create a private directory per case.
#[derive(Debug, Clone)]
pub struct Directory {
    inner: Arc<Inner>,
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}

impl Directory {
    /// Create a directory with default configuration
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: RwLock::new(HashMap::new()),
                config,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Become the publisher of `path`
    ///
    /// Creates the stream if needed. Fails with
    /// [`RegistryError::PublisherExists`] when the stream has a publisher and
    /// `kick_exist` is off.
    pub async fn publish(&self, path: &str, config: Option<PublishConfig>) -> Result<Publisher, RegistryError> {
        let path = StreamPath::parse(path)?;
        let config = config.unwrap_or_else(|| self.inner.config.publish.clone());
        let id = self.next_id();

        // a stream closing under us is replaced once
        for _ in 0..2 {
            let stream = self.stream_for(&path, self.inner.config.subscribe.wait_timeout).await;
            let (tx, rx) = mpsc::unbounded_channel();
            match stream.publish(id, config.clone(), tx).await {
                Ok(()) => {
                    let ring = self.inner.config.ring.clone();
                    return Ok(Publisher::new(id, stream, rx, config, ring));
                }
                Err(RegistryError::StreamClosed(_)) => self.remove(&path, stream.id()).await,
                Err(e) => return Err(e),
            }
        }
        Err(RegistryError::StreamClosed(path))
    }

    /// Join `path` as a subscriber
    ///
    /// A missing stream is created and waits `wait_timeout` for a publisher.
    pub async fn subscribe(&self, path: &str, config: Option<SubscribeConfig>) -> Result<Subscriber, RegistryError> {
        let path = StreamPath::parse(path)?;
        let config = config.unwrap_or_else(|| self.inner.config.subscribe.clone());
        let id = self.next_id();

        for _ in 0..2 {
            let stream = self.stream_for(&path, config.wait_timeout).await;
            let (tx, rx) = mpsc::unbounded_channel();
            match stream.subscribe(id, config.clone(), tx).await {
                Ok(tracks) => return Ok(Subscriber::new(id, stream, config, rx, tracks)),
                Err(RegistryError::StreamClosed(_)) => self.remove(&path, stream.id()).await,
                Err(e) => return Err(e),
            }
        }
        Err(RegistryError::StreamClosed(path))
    }

    /// Running stream under `path`
    pub async fn get(&self, path: &str) -> Result<StreamHandle, RegistryError> {
        let path = StreamPath::parse(path)?;
        let streams = self.inner.streams.read().await;
        streams.get(&path).cloned().ok_or(RegistryError::NotFound(path))
    }

    pub async fn stream_count(&self) -> usize {
        self.inner.streams.read().await.len()
    }

    /// Snapshot of every stream
    pub async fn summaries(&self) -> Vec<StreamSummary> {
        let streams: Vec<StreamHandle> = self.inner.streams.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(streams.len());
        for stream in streams {
            if let Some(summary) = stream.summary().await {
                summaries.push(summary);
            }
        }
        summaries
    }

    async fn stream_for(&self, path: &StreamPath, wait_publish: Duration) -> StreamHandle {
        let mut streams = self.inner.streams.write().await;
        if let Some(stream) = streams.get(path) {
            if !stream.is_finished() {
                return stream.clone();
            }
        }

        let id = self.next_id();
        let (handle, actor) = StreamActor::new(path.clone(), id, &self.inner.config, wait_publish);
        streams.insert(path.clone(), handle.clone());
        tracing::info!(stream = %path, id, "stream created");

        let directory = Arc::downgrade(&self.inner);
        let path = path.clone();
        tokio::spawn(async move {
            actor.run().await;
            Self::forget(directory, &path, id).await;
        });
        handle
    }

    async fn forget(directory: Weak<Inner>, path: &StreamPath, id: u64) {
        if let Some(inner) = directory.upgrade() {
            Directory { inner }.remove(path, id).await;
        }
    }

    /// Drop the entry for `path` if it still belongs to stream `id`
    pub(crate) async fn remove(&self, path: &StreamPath, id: u64) {
        let mut streams = self.inner.streams.write().await;
        if streams.get(path).is_some_and(|s| s.id() == id) {
            streams.remove(path);
            tracing::debug!(stream = %path, id, remaining = streams.len(), "stream removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::StreamState;

    #[tokio::test]
    async fn test_invalid_path_refused() {
        let directory = Directory::new();
        assert!(matches!(
            directory.publish("nopath", None).await,
            Err(RegistryError::InvalidPath(_))
        ));
        assert!(matches!(
            directory.subscribe("live/../x", None).await,
            Err(RegistryError::InvalidPath(_))
        ));
        assert_eq!(directory.stream_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_publisher_refused() {
        let directory = Directory::new();
        let _first = directory.publish("live/a", None).await.unwrap();
        let second = directory.publish("live/a", None).await;
        assert!(matches!(second, Err(RegistryError::PublisherExists(_))));
        assert_eq!(directory.stream_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscriber_created_stream_waits_its_timeout() {
        let directory = Directory::new();
        let config = SubscribeConfig::default().wait_timeout(Duration::from_secs(2));
        let subscriber = directory.subscribe("live/w", Some(config)).await.unwrap();
        let stream = subscriber.stream().clone();
        assert_eq!(stream.summary().await.unwrap().state, StreamState::WaitPublish);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert_eq!(stream.summary().await.unwrap().state, StreamState::Closed);

        // destroyed after the grace period and gone from the directory
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(matches!(directory.get("live/w").await, Err(RegistryError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_stream_is_replaced() {
        let directory = Directory::new();
        let first = directory.publish("live/r", None).await.unwrap();
        let old = first.stream().clone();
        old.close();
        assert_eq!(old.summary().await.unwrap().state, StreamState::Closed);

        let second = directory.publish("live/r", None).await.unwrap();
        assert_ne!(second.stream().id(), old.id());
        let summaries = directory.summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].state, StreamState::Publishing);
        assert_eq!(summaries[0].publisher, Some(second.id()));
    }
}
