//! Opaque data tracks (metadata, SEI side channels)

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

use super::now;
use crate::config::RingConfig;
use crate::error::{Error, Result};
use crate::frame::DataFrame;
use crate::ring::{RingHandle, RingReader, RingWriter, Slot};
use crate::stream::TrackSink;

struct DataShared<T> {
    name: String,
    ring: RingHandle<DataFrame<T>>,
    pushed: Notify,
    closed: AtomicBool,
}

/// Single writer of a data track
pub struct DataTrack<T: Send + Sync + 'static> {
    shared: Arc<DataShared<T>>,
    writer: RingWriter<DataFrame<T>>,
    sink: Option<TrackSink>,
}

impl<T: Send + Sync + 'static> DataTrack<T> {
    pub fn new(name: &str, size: usize, ring: &RingConfig) -> Self {
        let writer = RingWriter::new(size, ring);
        Self {
            shared: Arc::new(DataShared {
                name: name.to_string(),
                ring: writer.handle(),
                pushed: Notify::new(),
                closed: AtomicBool::new(false),
            }),
            writer,
            sink: None,
        }
    }

    pub(crate) fn attach(&mut self, sink: TrackSink) {
        self.sink = Some(sink);
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Publish a value; returns its sequence
    pub fn push(&mut self, value: T) -> u32 {
        let sequence = self.writer.sequence();
        {
            let mut frame = self.writer.value();
            frame.sequence = sequence;
            frame.written_at = Some(now());
            frame.data = Some(value);
        }
        self.writer.step();
        self.shared.pushed.notify_waiters();
        sequence
    }

    pub fn handle(&self) -> DataTrackHandle<T> {
        DataTrackHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for DataTrack<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.pushed.notify_waiters();
        if let Some(sink) = &self.sink {
            sink.withdraw_data(&self.shared.name);
        }
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for DataTrack<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTrack")
            .field("name", &self.shared.name)
            .field("sequence", &self.writer.sequence())
            .finish_non_exhaustive()
    }
}

/// Read side of a data track
pub struct DataTrackHandle<T> {
    shared: Arc<DataShared<T>>,
}

impl<T> Clone for DataTrackHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for DataTrackHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataTrackHandle")
            .field("name", &self.shared.name)
            .finish_non_exhaustive()
    }
}

impl<T: Send + Sync + 'static> DataTrackHandle<T> {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire) || self.shared.ring.is_closed()
    }

    /// Reader starting at the most recent value
    pub fn reader(&self) -> DataReader<T> {
        DataReader {
            handle: self.clone(),
            cursor: self.shared.ring.reader(),
        }
    }

    async fn wait_latest(&self) -> Result<Arc<Slot<DataFrame<T>>>> {
        loop {
            let notified = self.shared.pushed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(slot) = self.shared.ring.latest() {
                return Ok(slot);
            }
            if self.is_closed() {
                return Err(Error::TrackClosed);
            }
            notified.await;
        }
    }
}

/// Cursor over a data track
pub struct DataReader<T: Send + Sync + 'static> {
    handle: DataTrackHandle<T>,
    cursor: RingReader<DataFrame<T>>,
}

impl<T: Clone + Send + Sync + 'static> DataReader<T> {
    /// Next value; the first call yields the latest one published
    ///
    /// Cancel safe: an interrupted call leaves the cursor where it was.
    pub async fn read(&mut self) -> Result<T> {
        if self.cursor.is_attached() {
            self.cursor.read_next().await?;
        } else {
            let slot = self.handle.wait_latest().await?;
            self.cursor.attach(slot).await?;
        }
        self.cursor
            .value()
            .and_then(|frame| frame.data.clone())
            .ok_or(Error::ReaderDetached)
    }

    /// Sequence of the last value read
    pub fn sequence(&self) -> Option<u32> {
        self.cursor.sequence()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for DataReader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataReader")
            .field("name", &self.handle.shared.name)
            .field("sequence", &self.cursor.sequence())
            .finish()
    }
}
