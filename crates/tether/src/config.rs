//! Engine configuration.
//!
//! Every field defaults to the tuning the engine ships with, so a config file
//! only needs to name what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::buffer_level::BufferLevel;
use crate::error::{EngineError, Result};

/// Retry and failover policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts on one URL before failing over to the next.
    pub max_attempts_per_url: u32,
    /// Delay before the first attempt on a URL.
    pub initial_delay_ms: u64,
    /// Hard cap on the computed delay.
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter, still capped at `max_delay_ms`.
    pub use_jitter: bool,
    /// Start a fresh cycle at the first URL after the last one fails.
    /// When disabled, a wrapped rotation is reported as exhaustion and retrying stops.
    pub restart_rotation: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_url: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 4000,
            backoff_multiplier: 2.0,
            use_jitter: false,
            restart_rotation: true,
        }
    }
}

impl RetryConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Buffer-level escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Level every new live stream starts at.
    pub live_default_level: BufferLevel,
    /// Two rebuffers further apart than this do not accumulate.
    pub rebuffer_window_ms: u64,
    /// Rebuffers within the window needed to escalate.
    pub rebuffer_threshold: u32,
    /// Jump straight to `High` when escalating from `Low` or `Normal`.
    pub skip_ahead: bool,
    pub escalation_debounce_ms: u64,
    /// How long a replaced pipeline instance stays alive before release.
    pub rebuild_grace_ms: u64,
    /// Uninterrupted playback after which the rebuffer tally is cleared.
    pub stability_reset_ms: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            live_default_level: BufferLevel::High,
            rebuffer_window_ms: 60_000,
            rebuffer_threshold: 2,
            skip_ahead: true,
            escalation_debounce_ms: 800,
            rebuild_grace_ms: 1000,
            stability_reset_ms: 120_000,
        }
    }
}

impl BufferConfig {
    pub fn rebuffer_window(&self) -> Duration {
        Duration::from_millis(self.rebuffer_window_ms)
    }

    pub fn escalation_debounce(&self) -> Duration {
        Duration::from_millis(self.escalation_debounce_ms)
    }

    pub fn rebuild_grace(&self) -> Duration {
        Duration::from_millis(self.rebuild_grace_ms)
    }

    pub fn stability_reset(&self) -> Duration {
        Duration::from_millis(self.stability_reset_ms)
    }
}

/// Health monitor tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub tick_interval_ms: u64,
    /// Buffered-position growth below this is treated as noise.
    pub progress_noise_ms: u64,
    pub live_stall_threshold_ms: u64,
    pub vod_stall_threshold_ms: u64,
    /// Run the buffer-stall check for on-demand content too.
    pub vod_enabled: bool,
    /// Minimum spacing between watchdog-triggered recoveries.
    pub reconnect_cooldown_ms: u64,
    /// Consecutive ticks with an unchanged position before playback is frozen.
    pub frozen_ticks: u32,
    /// Consecutive ticks with zero bitrate before the server is considered silent.
    pub zero_bitrate_ticks: u32,
    /// Soft recoveries per stall episode before a full reconnect.
    pub max_soft_recoveries: u32,
    pub soft_recovery_rewind_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3000,
            progress_noise_ms: 500,
            live_stall_threshold_ms: 20_000,
            vod_stall_threshold_ms: 30_000,
            vod_enabled: false,
            reconnect_cooldown_ms: 20_000,
            frozen_ticks: 3,
            zero_bitrate_ticks: 4,
            max_soft_recoveries: 2,
            soft_recovery_rewind_ms: 1500,
        }
    }
}

impl WatchdogConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn progress_noise(&self) -> Duration {
        Duration::from_millis(self.progress_noise_ms)
    }

    pub fn live_stall_threshold(&self) -> Duration {
        Duration::from_millis(self.live_stall_threshold_ms)
    }

    pub fn vod_stall_threshold(&self) -> Duration {
        Duration::from_millis(self.vod_stall_threshold_ms)
    }

    pub fn reconnect_cooldown(&self) -> Duration {
        Duration::from_millis(self.reconnect_cooldown_ms)
    }

    pub fn soft_recovery_rewind(&self) -> Duration {
        Duration::from_millis(self.soft_recovery_rewind_ms)
    }
}

/// Session controller behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Force volume to zero until the pipeline reports ready.
    pub mute_on_connect: bool,
    /// Time between ducking the old channel and swapping the source.
    pub crossfade_ms: u64,
    /// Fraction of the user volume kept while ducking.
    pub crossfade_duck_ratio: f32,
    /// Lifetime of an error banner.
    pub error_clear_ms: u64,
    /// Lifetime of a health advisory.
    pub advisory_clear_ms: u64,
    /// Live-edge latency target passed to the pipeline, `None` to let it decide.
    pub live_latency_target_ms: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mute_on_connect: true,
            crossfade_ms: 300,
            crossfade_duck_ratio: 0.2,
            error_clear_ms: 5000,
            advisory_clear_ms: 3000,
            live_latency_target_ms: Some(5000),
        }
    }
}

impl SessionConfig {
    pub fn crossfade(&self) -> Duration {
        Duration::from_millis(self.crossfade_ms)
    }

    pub fn error_clear(&self) -> Duration {
        Duration::from_millis(self.error_clear_ms)
    }

    pub fn advisory_clear(&self) -> Duration {
        Duration::from_millis(self.advisory_clear_ms)
    }

    pub fn live_latency_target(&self) -> Option<Duration> {
        self.live_latency_target_ms.map(Duration::from_millis)
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub buffer: BufferConfig,
    pub watchdog: WatchdogConfig,
    pub session: SessionConfig,
}

impl EngineConfig {
    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts_per_url == 0 {
            return Err(EngineError::invalid_config(
                "retry.max_attempts_per_url must be at least 1",
            ));
        }
        if self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(EngineError::invalid_config(format!(
                "retry.max_delay_ms ({}) is below retry.initial_delay_ms ({})",
                self.retry.max_delay_ms, self.retry.initial_delay_ms
            )));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(EngineError::invalid_config(
                "retry.backoff_multiplier must be at least 1.0",
            ));
        }
        if self.buffer.rebuffer_threshold == 0 {
            return Err(EngineError::invalid_config(
                "buffer.rebuffer_threshold must be at least 1",
            ));
        }
        if self.watchdog.tick_interval_ms == 0 {
            return Err(EngineError::invalid_config(
                "watchdog.tick_interval_ms must be positive",
            ));
        }
        if self.watchdog.frozen_ticks == 0 || self.watchdog.zero_bitrate_ticks == 0 {
            return Err(EngineError::invalid_config(
                "watchdog tick counts must be at least 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.session.crossfade_duck_ratio) {
            return Err(EngineError::invalid_config(format!(
                "session.crossfade_duck_ratio ({}) must be within [0, 1]",
                self.session.crossfade_duck_ratio
            )));
        }
        Ok(())
    }
}
