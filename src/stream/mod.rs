//! Streams: a path with one publisher, many subscribers and their tracks
//!
//! Each stream is one task ([`StreamHandle`] is its address) running the
//! lifecycle state machine:
//!
//! ```text
//!                 publish                    last leave
//!  WaitPublish ─────────────► Publishing ──────────────────► WaitClose
//!      ▲  │                   │   ▲                              │
//!      │  │ timeout/close     │   └──────── first enter ─────────┘
//!      │  │ last leave        │ publish lost / no tracks        │ timeout, close,
//!      │  ▼                   ▼                                 │ publish lost
//!      │ Closed ◄──── WaitPublish ◄───┘  close                  │
//!      │  │  ▲──────────────────────────────────────────────────┘
//!      │  │ timeout (1 s)
//!      │  ▼
//!      │ Destroyed
//! ```

mod actor;
mod event;
mod state;

pub use actor::StreamHandle;
pub use event::{FrameRef, StreamEvent};
pub use state::{StreamAction, StreamState};

pub(crate) use actor::{StreamActor, TrackSink};
