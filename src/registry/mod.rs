//! Stream registry: path parsing and the directory of live streams
//!
//! # Architecture
//!
//! ```text
//!                         Directory (Arc, cloned per adapter)
//!                    ┌──────────────────────────────────┐
//!                    │ streams: HashMap<StreamPath,     │
//!                    │          StreamHandle>           │
//!                    └───────────────┬──────────────────┘
//!                                    │ mpsc::UnboundedSender<Command>
//!                                    ▼
//!                       stream task (one per path)
//!                    ┌──────────────────────────────────┐
//!                    │ state machine, members, tracks   │
//!                    └──────┬─────────────────┬─────────┘
//!                           │ StreamEvent     │ StreamEvent
//!                           ▼                 ▼
//!                      [Publisher]      [Subscriber] ...
//!                     VideoTrack ──ring──► TrackReader
//! ```
//!
//! Frames never pass through the stream task: publishers write into track
//! rings and subscribers read them directly. `bytes::Bytes` keeps that
//! fan-out reference counted.

mod directory;
mod error;
mod path;

pub use directory::Directory;
pub use error::RegistryError;
pub use path::StreamPath;
