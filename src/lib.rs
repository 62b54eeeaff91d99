//! # livehub
//!
//! In-process live media broker. Protocol adapters publish audio and video
//! into named streams; any number of subscribers read them back, each at its
//! own pace, without copying payloads.
//!
//! ```text
//!   ingest adapter          Directory            egress adapter
//!  (RTMP, RTSP, ...)           │                (HLS, FLV, WebRTC, ...)
//!         │      publish()     │     subscribe()       │
//!         ├───────────────────►│◄──────────────────────┤
//!         ▼                    ▼                       ▼
//!   VideoTrack ── ring ──► stream task ──events──► TrackReader
//!   AudioTrack                (FSM)                 play()
//! ```
//!
//! - [`ring`]: single-writer, multi-reader frame ring; slow readers never
//!   block the writer
//! - [`track`]: video, audio and data tracks with annex-B, AVCC, RTP and
//!   ADTS ingest and on-demand AVCC, RTP and FLV views
//! - [`stream`]: per-stream lifecycle task
//! - [`registry`]: the [`Directory`](registry::Directory) of streams
//! - [`subscriber`]: IDR-aligned readers and the play loop
//!
//! # Example
//! ```no_run
//! use std::ops::ControlFlow;
//!
//! use livehub::registry::Directory;
//! use livehub::stream::StreamEvent;
//!
//! # async fn example() -> livehub::Result<()> {
//! let directory = Directory::new();
//! let mut subscriber = directory.subscribe("live/cam1", None).await?;
//! subscriber
//!     .play(|event| {
//!         if let StreamEvent::FrameAvailable(frame) = event {
//!             println!("{} ms, {} units", frame.abs_time, frame.frame.units().count());
//!         }
//!         ControlFlow::Continue(())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod frame;
pub mod media;
pub mod publisher;
pub mod registry;
pub mod ring;
pub mod rtp;
pub mod stats;
pub mod stream;
pub mod subscriber;
pub mod track;

pub use config::{EngineConfig, PublishConfig, ReadMode, RingConfig, SubscribeConfig, ViewSet};
pub use error::{Error, Result};
pub use publisher::Publisher;
pub use registry::{Directory, RegistryError, StreamPath};
pub use stream::{FrameRef, StreamEvent, StreamHandle, StreamState};
pub use subscriber::{Subscriber, TrackReader};
pub use track::{AudioTrack, DataTrack, TrackHandle, VideoTrack};
