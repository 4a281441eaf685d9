//! Session lifecycle state and read-only views.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::buffer_level::BufferLevel;
use crate::events::format_bitrate;
use crate::pipeline::{PipelineGeneration, PipelineReadout, PlaybackState};

/// Kind of content being played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    /// Auto-reconnect, buffer escalation and the full watchdog apply.
    Live,
    /// Errors are surfaced, never retried.
    Vod,
}

impl PlaybackMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Vod => "vod",
        }
    }
}

impl fmt::Display for PlaybackMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Uninitialized,
    LiveActive,
    VodActive,
    Stopped,
    /// Terminal; the session ignores every further call.
    Released,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::LiveActive => "live_active",
            Self::VodActive => "vod_active",
            Self::Stopped => "stopped",
            Self::Released => "released",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::LiveActive | Self::VodActive)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of the session fields, published after every change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    pub mode: Option<PlaybackMode>,
    pub buffer_level: BufferLevel,
    pub active_index: Option<usize>,
    pub total_urls: usize,
    pub active_url_label: Option<String>,
    pub generation: Option<PipelineGeneration>,
    /// Attempts on the current URL since it last reached ready.
    pub retry_attempt: u32,
    pub rotation_cycle: u32,
    pub bitrate_bps: u64,
}

impl SessionSnapshot {
    pub fn new(session_id: Uuid, buffer_level: BufferLevel) -> Self {
        Self {
            session_id,
            state: SessionState::Uninitialized,
            mode: None,
            buffer_level,
            active_index: None,
            total_urls: 0,
            active_url_label: None,
            generation: None,
            retry_attempt: 0,
            rotation_cycle: 0,
            bitrate_bps: 0,
        }
    }

    pub fn buffer_level_label(&self) -> &'static str {
        self.buffer_level.label()
    }

    pub fn bitrate(&self) -> String {
        format_bitrate(self.bitrate_bps)
    }
}

/// Snapshot plus a live pipeline readout, as returned by
/// [`SessionHandle::status`](super::SessionHandle::status).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    #[serde(flatten)]
    pub snapshot: SessionSnapshot,
    pub buffer_level_label: String,
    pub bitrate: String,
    pub playback_state: PlaybackState,
    pub position_ms: u64,
    pub duration_ms: Option<u64>,
    pub buffered_percentage: u8,
}

impl SessionStatus {
    pub(crate) fn new(snapshot: SessionSnapshot, readout: &PipelineReadout) -> Self {
        Self {
            buffer_level_label: snapshot.buffer_level_label().to_string(),
            bitrate: snapshot.bitrate(),
            playback_state: readout.state,
            position_ms: readout.position.as_millis() as u64,
            duration_ms: readout.duration.map(|duration| duration.as_millis() as u64),
            buffered_percentage: readout.buffered_percentage,
            snapshot,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn status_combines_snapshot_and_readout() {
        let mut snapshot = SessionSnapshot::new(Uuid::nil(), BufferLevel::High);
        snapshot.bitrate_bps = 2_500_000;
        let readout = PipelineReadout {
            state: PlaybackState::Ready,
            position: Duration::from_millis(12_345),
            buffered_percentage: 40,
            ..Default::default()
        };

        let status = SessionStatus::new(snapshot, &readout);
        assert_eq!(status.buffer_level_label, "High");
        assert_eq!(status.bitrate, "2.5 Mbps");
        assert_eq!(status.position_ms, 12_345);
        assert_eq!(status.duration_ms, None);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["state"], "uninitialized");
        assert_eq!(json["buffer_level"], "high");
        assert_eq!(json["buffered_percentage"], 40);
    }
}
