//! Buffer-level state machine.
//!
//! Four ordered presets control how much media the pipeline keeps ahead of
//! the play head. Frequent rebuffering escalates the preset; nothing ever
//! lowers it mid-session. Stable playback only clears the tally.
//!
//! # Escalation
//!
//! | Current | `skip_ahead = true` | `skip_ahead = false` |
//! |---------|---------------------|----------------------|
//! | Low     | High                | Normal               |
//! | Normal  | High                | High                 |
//! | High    | Maximum             | Maximum              |
//! | Maximum | -                   | -                    |

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::BufferConfig;

/// Buffer tuning preset.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum BufferLevel {
    Low,
    #[default]
    Normal,
    High,
    Maximum,
}

impl BufferLevel {
    pub const ALL: [BufferLevel; 4] = [Self::Low, Self::Normal, Self::High, Self::Maximum];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Normal => "Normal",
            Self::High => "High",
            Self::Maximum => "Maximum",
        }
    }

    pub fn tuning(&self) -> BufferTuning {
        let (min, max, playback, after_rebuffer) = match self {
            Self::Low => (15_000, 30_000, 1_500, 3_000),
            Self::Normal => (30_000, 60_000, 2_500, 5_000),
            Self::High => (50_000, 120_000, 5_000, 10_000),
            Self::Maximum => (90_000, 240_000, 10_000, 20_000),
        };
        BufferTuning {
            level: *self,
            min_buffer: Duration::from_millis(min),
            max_buffer: Duration::from_millis(max),
            buffer_for_playback: Duration::from_millis(playback),
            buffer_for_playback_after_rebuffer: Duration::from_millis(after_rebuffer),
        }
    }

    /// The level one escalation step above `self`, `None` at the top.
    pub fn next(self, skip_ahead: bool) -> Option<BufferLevel> {
        match self {
            Self::Low if skip_ahead => Some(Self::High),
            Self::Low => Some(Self::Normal),
            Self::Normal => Some(Self::High),
            Self::High => Some(Self::Maximum),
            Self::Maximum => None,
        }
    }
}

impl fmt::Display for BufferLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Buffer durations handed to the pipeline factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferTuning {
    pub level: BufferLevel,
    pub min_buffer: Duration,
    pub max_buffer: Duration,
    pub buffer_for_playback: Duration,
    pub buffer_for_playback_after_rebuffer: Duration,
}

/// Count of closely spaced rebuffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebufferTally {
    count: u32,
    window_started_at: Option<Instant>,
    last_rebuffer_at: Option<Instant>,
}

impl RebufferTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn window_started_at(&self) -> Option<Instant> {
        self.window_started_at
    }

    /// Record a rebuffer and return the updated count.
    ///
    /// A rebuffer further than `window` from the previous one starts over at 1.
    pub fn record(&mut self, now: Instant, window: Duration) -> u32 {
        let within_window = self
            .last_rebuffer_at
            .is_some_and(|last| now.saturating_duration_since(last) <= window);

        if within_window && self.count > 0 {
            self.count += 1;
        } else {
            self.count = 1;
            self.window_started_at = Some(now);
        }
        self.last_rebuffer_at = Some(now);
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// The level to escalate to given the current level and tally, with its tuning.
pub fn escalation(
    current: BufferLevel,
    tally: &RebufferTally,
    config: &BufferConfig,
) -> Option<(BufferLevel, BufferTuning)> {
    if tally.count() < config.rebuffer_threshold {
        return None;
    }
    current
        .next(config.skip_ahead)
        .map(|level| (level, level.tuning()))
}

/// Owner of the current level and its rebuffer tally.
#[derive(Debug, Clone)]
pub struct BufferLevelMachine {
    level: BufferLevel,
    tally: RebufferTally,
    config: BufferConfig,
}

impl BufferLevelMachine {
    pub fn new(config: BufferConfig) -> Self {
        Self {
            level: config.live_default_level,
            tally: RebufferTally::new(),
            config,
        }
    }

    pub fn level(&self) -> BufferLevel {
        self.level
    }

    pub fn tally(&self) -> &RebufferTally {
        &self.tally
    }

    /// Record a rebuffer. Returns the level to escalate to when the tally
    /// crossed its threshold; the tally is cleared in that case.
    pub fn record_rebuffer(&mut self, now: Instant) -> Option<BufferLevel> {
        let count = self.tally.record(now, self.config.rebuffer_window());
        debug!(count, level = %self.level, "Rebuffer recorded");

        let (target, _) = escalation(self.level, &self.tally, &self.config)?;
        self.tally.reset();
        Some(target)
    }

    /// Move up to `target`. Never lowers the level.
    pub fn escalate_to(&mut self, target: BufferLevel) -> bool {
        if target <= self.level {
            return false;
        }
        info!(from = %self.level, to = %target, "Buffer level escalated");
        self.level = target;
        true
    }

    /// Reset for new live content. Returns true if the level changed.
    pub fn reset_for_live(&mut self) -> bool {
        self.tally.reset();
        let target = self.config.live_default_level;
        if self.level == target {
            return false;
        }
        debug!(from = %self.level, to = %target, "Buffer level reset for new stream");
        self.level = target;
        true
    }

    /// Stability reward after uninterrupted playback.
    pub fn reward_stability(&mut self) {
        if self.tally.count() > 0 {
            debug!(count = self.tally.count(), "Stable playback, clearing rebuffer tally");
        }
        self.tally.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn levels_are_ordered() {
        assert!(BufferLevel::Low < BufferLevel::Normal);
        assert!(BufferLevel::Normal < BufferLevel::High);
        assert!(BufferLevel::High < BufferLevel::Maximum);
    }

    #[test]
    fn tuning_grows_with_level() {
        for pair in BufferLevel::ALL.windows(2) {
            let (lower, upper) = (pair[0].tuning(), pair[1].tuning());
            assert!(lower.min_buffer < upper.min_buffer);
            assert!(lower.max_buffer < upper.max_buffer);
            assert!(lower.buffer_for_playback < upper.buffer_for_playback);
        }
    }

    #[test]
    fn skip_ahead_jumps_to_high() {
        assert_eq!(BufferLevel::Low.next(true), Some(BufferLevel::High));
        assert_eq!(BufferLevel::Normal.next(true), Some(BufferLevel::High));
        assert_eq!(BufferLevel::High.next(true), Some(BufferLevel::Maximum));
        assert_eq!(BufferLevel::Maximum.next(true), None);
        assert_eq!(BufferLevel::Low.next(false), Some(BufferLevel::Normal));
    }

    #[test]
    fn tally_accumulates_within_window() {
        let start = Instant::now();
        let mut tally = RebufferTally::new();
        assert_eq!(tally.record(start, secs(60)), 1);
        assert_eq!(tally.record(start + secs(10), secs(60)), 2);
        assert_eq!(tally.record(start + secs(15), secs(60)), 3);
        assert_eq!(tally.window_started_at(), Some(start));
    }

    #[test]
    fn tally_resets_when_spread_out() {
        let start = Instant::now();
        let mut tally = RebufferTally::new();
        tally.record(start, secs(60));
        assert_eq!(tally.record(start + secs(61), secs(60)), 1);
        assert_eq!(tally.window_started_at(), Some(start + secs(61)));
    }

    #[test]
    fn escalation_is_pure() {
        let config = BufferConfig::default();
        let start = Instant::now();
        let mut tally = RebufferTally::new();
        tally.record(start, config.rebuffer_window());
        assert_eq!(escalation(BufferLevel::Normal, &tally, &config), None);

        tally.record(start + secs(5), config.rebuffer_window());
        let (level, tuning) = escalation(BufferLevel::Normal, &tally, &config).unwrap();
        assert_eq!(level, BufferLevel::High);
        assert_eq!(tuning, BufferLevel::High.tuning());
        assert_eq!(escalation(BufferLevel::Maximum, &tally, &config), None);
    }

    #[test]
    fn machine_escalates_once_then_clears_tally() {
        let config = BufferConfig {
            live_default_level: BufferLevel::Normal,
            ..Default::default()
        };
        let mut machine = BufferLevelMachine::new(config);
        let start = Instant::now();

        assert_eq!(machine.record_rebuffer(start), None);
        assert_eq!(machine.record_rebuffer(start + secs(10)), Some(BufferLevel::High));
        assert_eq!(machine.tally().count(), 0);
        assert!(machine.escalate_to(BufferLevel::High));

        // Third rebuffer starts a fresh tally.
        assert_eq!(machine.record_rebuffer(start + secs(15)), None);
        assert_eq!(machine.level(), BufferLevel::High);
    }

    #[test]
    fn spread_out_rebuffers_never_escalate() {
        let mut machine = BufferLevelMachine::new(BufferConfig::default());
        let start = Instant::now();
        assert_eq!(machine.record_rebuffer(start), None);
        assert_eq!(machine.record_rebuffer(start + secs(61)), None);
        assert_eq!(machine.record_rebuffer(start + secs(122)), None);
        assert_eq!(machine.level(), BufferLevel::High);
    }

    #[test]
    fn stability_reward_clears_pending_count() {
        let config = BufferConfig {
            live_default_level: BufferLevel::Normal,
            rebuffer_window_ms: 300_000,
            ..Default::default()
        };
        let mut machine = BufferLevelMachine::new(config);
        let start = Instant::now();

        assert_eq!(machine.record_rebuffer(start), None);
        assert_eq!(machine.tally().count(), 1);
        machine.reward_stability();
        assert_eq!(machine.tally(), &RebufferTally::new());

        assert_eq!(machine.record_rebuffer(start + secs(121)), None);
        assert_eq!(machine.tally().count(), 1);
        assert_eq!(machine.level(), BufferLevel::Normal);
    }

    #[test]
    fn level_never_decreases_through_escalate_to() {
        let mut machine = BufferLevelMachine::new(BufferConfig::default());
        assert!(machine.escalate_to(BufferLevel::Maximum));
        assert!(!machine.escalate_to(BufferLevel::Low));
        assert_eq!(machine.level(), BufferLevel::Maximum);
    }

    #[test]
    fn live_reset_reports_change_only_when_level_moves() {
        let mut machine = BufferLevelMachine::new(BufferConfig::default());
        assert!(!machine.reset_for_live());

        machine.escalate_to(BufferLevel::Maximum);
        assert!(machine.reset_for_live());
        assert_eq!(machine.level(), BufferLevel::High);
    }
}
