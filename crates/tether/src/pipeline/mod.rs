//! Media pipeline collaborator interface.
//!
//! The engine never decodes anything itself. It supervises an opaque player
//! object through [`MediaPipeline`] and receives its asynchronous state
//! changes through a generation-stamped [`PipelineEvents`] sink.

pub mod scripted;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::buffer_level::BufferTuning;
use crate::session::SessionMessage;

/// Playback state reported by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    Buffering,
    Ready,
    Ended,
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Buffering => "buffering",
            Self::Ready => "ready",
            Self::Ended => "ended",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error code carried by pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineErrorCode {
    NetworkConnectionFailed,
    NetworkTimeout,
    IoTimeout,
    IoUnspecified,
    BadHttpStatus,
    MalformedContainer,
    MalformedManifest,
    DecoderInit,
    UnsupportedFormat,
    Unspecified,
}

impl PipelineErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkConnectionFailed => "network_connection_failed",
            Self::NetworkTimeout => "network_timeout",
            Self::IoTimeout => "io_timeout",
            Self::IoUnspecified => "io_unspecified",
            Self::BadHttpStatus => "bad_http_status",
            Self::MalformedContainer => "malformed_container",
            Self::MalformedManifest => "malformed_manifest",
            Self::DecoderInit => "decoder_init",
            Self::UnsupportedFormat => "unsupported_format",
            Self::Unspecified => "unspecified",
        }
    }

    /// Transport and parsing failures are worth a blind retry; decoder and
    /// format failures will fail the same way on every attempt.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkConnectionFailed
            | Self::NetworkTimeout
            | Self::IoTimeout
            | Self::IoUnspecified
            | Self::BadHttpStatus
            | Self::MalformedContainer
            | Self::MalformedManifest => true,
            Self::DecoderInit | Self::UnsupportedFormat | Self::Unspecified => false,
        }
    }
}

impl fmt::Display for PipelineErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure reported by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct PipelineError {
    pub code: PipelineErrorCode,
    pub message: String,
}

impl PipelineError {
    pub fn new(code: PipelineErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.code.is_recoverable()
    }
}

/// Identity of one `open` on one pipeline instance.
///
/// Every open and every rebuilt instance gets a fresh generation. Events
/// stamped with anything but the active generation are stale and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PipelineGeneration(pub u64);

impl PipelineGeneration {
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PipelineGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen-{}", self.0)
    }
}

/// Parameters for opening a source.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub url: String,
    pub is_live: bool,
    /// Target distance from the live edge; `None` for on-demand content.
    pub live_latency_target: Option<Duration>,
    /// Start position, `None` to start from the default position.
    pub start_position: Option<Duration>,
}

/// Point-in-time readout of the pipeline.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PipelineReadout {
    pub state: PlaybackState,
    pub play_when_ready: bool,
    /// The pipeline is currently loading media data.
    pub is_loading: bool,
    /// A media item is set on the pipeline.
    pub has_media_item: bool,
    pub position: Duration,
    pub duration: Option<Duration>,
    pub buffered_position: Duration,
    pub buffered_percentage: u8,
    pub bitrate_bps: u64,
}

impl PipelineReadout {
    pub fn is_actively_playing(&self) -> bool {
        self.state == PlaybackState::Ready && self.play_when_ready
    }

    pub fn is_stalled_loading(&self) -> bool {
        self.has_media_item && (self.is_loading || self.state == PlaybackState::Buffering)
    }
}

/// Event emitted by a pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    StateChanged(PlaybackState),
    Error(PipelineError),
}

/// The supervised player object.
///
/// All commands return immediately; outcomes arrive through the
/// [`PipelineEvents`] sink passed to [`MediaPipeline::open`].
pub trait MediaPipeline: Send + Sync {
    /// Open a source. Subsequent events must be reported through `events`.
    fn open(&self, request: OpenRequest, events: PipelineEvents);

    /// Re-prime the pipeline after a seek, keeping the current source.
    fn prepare(&self);

    fn seek(&self, position: Duration);

    fn stop(&self);

    /// Free decoder and output resources. The instance is unusable afterwards.
    fn release(&self);

    fn set_play_when_ready(&self, play: bool);

    fn volume(&self) -> f32;

    fn set_volume(&self, volume: f32);

    fn readout(&self) -> PipelineReadout;
}

/// Builds pipeline instances configured for a buffer tuning.
pub trait PipelineFactory: Send + Sync {
    fn create(&self, tuning: BufferTuning) -> Arc<dyn MediaPipeline>;
}

/// Generation-stamped event sink handed to a pipeline on `open`.
#[derive(Debug, Clone)]
pub struct PipelineEvents {
    generation: PipelineGeneration,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl PipelineEvents {
    pub(crate) fn new(
        generation: PipelineGeneration,
        tx: mpsc::UnboundedSender<SessionMessage>,
    ) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> PipelineGeneration {
        self.generation
    }

    pub fn state_changed(&self, state: PlaybackState) {
        self.emit(PipelineEvent::StateChanged(state));
    }

    pub fn error(&self, error: PipelineError) {
        self.emit(PipelineEvent::Error(error));
    }

    fn emit(&self, event: PipelineEvent) {
        let message = SessionMessage::Pipeline {
            generation: self.generation,
            event,
        };
        if self.tx.send(message).is_err() {
            debug!(generation = %self.generation, "Pipeline event dropped, session is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        let recoverable = [
            PipelineErrorCode::NetworkConnectionFailed,
            PipelineErrorCode::NetworkTimeout,
            PipelineErrorCode::IoTimeout,
            PipelineErrorCode::IoUnspecified,
            PipelineErrorCode::BadHttpStatus,
            PipelineErrorCode::MalformedContainer,
            PipelineErrorCode::MalformedManifest,
        ];
        for code in recoverable {
            assert!(code.is_recoverable(), "{code} should be recoverable");
        }

        assert!(!PipelineErrorCode::DecoderInit.is_recoverable());
        assert!(!PipelineErrorCode::UnsupportedFormat.is_recoverable());
    }

    #[test]
    fn actively_playing_requires_ready_and_intent() {
        let mut readout = PipelineReadout {
            state: PlaybackState::Ready,
            play_when_ready: true,
            ..Default::default()
        };
        assert!(readout.is_actively_playing());

        readout.play_when_ready = false;
        assert!(!readout.is_actively_playing());

        readout.play_when_ready = true;
        readout.state = PlaybackState::Buffering;
        assert!(!readout.is_actively_playing());
    }

    #[test]
    fn stalled_loading_needs_a_media_item() {
        let readout = PipelineReadout {
            state: PlaybackState::Buffering,
            ..Default::default()
        };
        assert!(!readout.is_stalled_loading());

        let readout = PipelineReadout {
            has_media_item: true,
            ..readout
        };
        assert!(readout.is_stalled_loading());
    }
}
