//! # tether-engine
//!
//! Playback resilience for live streams. The engine supervises an opaque
//! media pipeline and keeps it playing through flaky origins:
//!
//! - failover across an ordered list of candidate URLs with capped
//!   exponential backoff ([`retry`], [`endpoints`])
//! - buffer presets that escalate when rebuffering gets frequent
//!   ([`buffer_level`])
//! - a watchdog that catches stalls the pipeline never reports ([`watchdog`])
//! - a session actor tying it together behind a small handle ([`session`])
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use tether_engine::pipeline::scripted::ScriptedFactory;
//! use tether_engine::{EngineConfig, SessionHandle};
//!
//! # async fn demo() -> tether_engine::Result<()> {
//! let session = SessionHandle::spawn(EngineConfig::default(), Arc::new(ScriptedFactory::new()))?;
//! let mut events = session.subscribe().expect("session is running");
//! session.set_live_urls(["https://cdn-a.example.com/live.m3u8", "https://cdn-b.example.com/live.m3u8"], false);
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer_level;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod retry;
pub mod session;
pub mod watchdog;

pub use buffer_level::{BufferLevel, BufferTuning};
pub use config::{BufferConfig, EngineConfig, RetryConfig, SessionConfig, WatchdogConfig};
pub use error::{EngineError, Result};
pub use events::{SessionEvent, format_bitrate};
pub use pipeline::{
    MediaPipeline, OpenRequest, PipelineError, PipelineErrorCode, PipelineEvents, PipelineFactory,
    PipelineReadout, PlaybackState,
};
pub use session::{PlaybackMode, SessionHandle, SessionSnapshot, SessionState, SessionStatus};
