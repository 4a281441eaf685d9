//! Per-tick health evaluation.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::state::StallWatchdogState;
use crate::config::WatchdogConfig;
use crate::pipeline::{PipelineGeneration, PipelineReadout};
use crate::session::PlaybackMode;

/// Why the watchdog asked for a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallReason {
    /// Loading without buffered progress past the stall threshold.
    BufferStall,
    /// Playing, but the position stopped moving.
    FrozenPosition,
    /// Playing, but no data is arriving.
    NoData,
}

impl StallReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BufferStall => "buffer_stall",
            Self::FrozenPosition => "frozen_position",
            Self::NoData => "no_data",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::BufferStall => "Stream stalled, reconnecting",
            Self::FrozenPosition => "Playback frozen, reconnecting",
            Self::NoData => "No data received, reconnecting",
        }
    }
}

impl fmt::Display for StallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something the session should do after a watchdog tick.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchdogAction {
    /// Rewind by `rewind` and re-prime the pipeline in place. The session
    /// shows the stall advisory only if it actually recovers.
    SoftRecover { rewind: Duration },
    Reconnect { reason: StallReason },
    /// Transient advisory for the UI.
    HealthIssue { description: String },
    BitrateChanged { bps: u64 },
}

/// Watchdog state machine over successive pipeline readouts.
///
/// Owns the [`StallWatchdogState`] plus the frozen-position and zero-bitrate
/// tick counters. Pure: the caller provides the clock.
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    config: WatchdogConfig,
    stall: StallWatchdogState,
    epoch: Option<u64>,
    generation: Option<PipelineGeneration>,
    last_position: Option<Duration>,
    frozen_ticks: u32,
    zero_bitrate_ticks: u32,
    last_bitrate: Option<u64>,
}

impl HealthMonitor {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            config,
            stall: StallWatchdogState::new(),
            epoch: None,
            generation: None,
            last_position: None,
            frozen_ticks: 0,
            zero_bitrate_ticks: 0,
            last_bitrate: None,
        }
    }

    pub fn stall_state(&self) -> &StallWatchdogState {
        &self.stall
    }

    pub fn frozen_ticks(&self) -> u32 {
        self.frozen_ticks
    }

    pub fn zero_bitrate_ticks(&self) -> u32 {
        self.zero_bitrate_ticks
    }

    /// Point the monitor at the watched pipeline.
    ///
    /// A new `epoch` means new content and clears everything. A new
    /// generation on the same content only clears the per-source counters;
    /// the reconnect cooldown and soft recovery budget survive.
    pub fn track(&mut self, epoch: u64, generation: PipelineGeneration) {
        if self.epoch != Some(epoch) {
            debug!(epoch, "Watchdog reset for new content");
            self.reset();
            self.epoch = Some(epoch);
            self.generation = Some(generation);
            return;
        }
        if self.generation != Some(generation) {
            self.generation = Some(generation);
            self.stall.rebaseline();
            self.last_position = None;
            self.frozen_ticks = 0;
            self.zero_bitrate_ticks = 0;
        }
    }

    pub fn reset(&mut self) {
        self.stall.reset();
        self.epoch = None;
        self.generation = None;
        self.last_position = None;
        self.frozen_ticks = 0;
        self.zero_bitrate_ticks = 0;
        self.last_bitrate = None;
    }

    /// Evaluate one tick.
    pub fn evaluate(
        &mut self,
        now: Instant,
        mode: PlaybackMode,
        readout: &PipelineReadout,
    ) -> Vec<WatchdogAction> {
        let mut actions = Vec::new();

        match mode {
            PlaybackMode::Live => {
                self.check_stall(now, mode, readout, &mut actions);
                let reconnecting = actions
                    .iter()
                    .any(|action| matches!(action, WatchdogAction::Reconnect { .. }));
                self.check_frozen(readout, reconnecting, &mut actions);
                let reconnecting = reconnecting
                    || actions
                        .iter()
                        .any(|action| matches!(action, WatchdogAction::Reconnect { .. }));
                self.check_bitrate(readout, reconnecting, &mut actions);
            }
            PlaybackMode::Vod if self.config.vod_enabled => {
                self.check_stall(now, mode, readout, &mut actions);
            }
            PlaybackMode::Vod => {}
        }

        actions
    }

    fn check_stall(
        &mut self,
        now: Instant,
        mode: PlaybackMode,
        readout: &PipelineReadout,
        actions: &mut Vec<WatchdogAction>,
    ) {
        let noise = self.config.progress_noise();
        if !readout.is_stalled_loading() {
            self.stall.observe(now, readout.buffered_position, noise);
            self.stall.touch(now);
            return;
        }
        if self.stall.observe(now, readout.buffered_position, noise) {
            return;
        }

        let threshold = match mode {
            PlaybackMode::Live => self.config.live_stall_threshold(),
            PlaybackMode::Vod => self.config.vod_stall_threshold(),
        };
        let stalled_for = self.stall.stalled_for(now);
        if stalled_for < threshold || !self.stall.cooldown_elapsed(now, self.config.reconnect_cooldown()) {
            return;
        }

        self.stall.record_recovery(now);
        if self.stall.soft_recovery_attempts() < self.config.max_soft_recoveries {
            let attempt = self.stall.record_soft_recovery();
            info!(
                attempt,
                stalled_ms = stalled_for.as_millis() as u64,
                buffered_ms = readout.buffered_position.as_millis() as u64,
                "Buffer stalled, attempting soft recovery"
            );
            actions.push(WatchdogAction::SoftRecover {
                rewind: self.config.soft_recovery_rewind(),
            });
            return;
        }

        self.stall.reset_soft_recoveries();
        match mode {
            PlaybackMode::Live => {
                warn!(
                    stalled_ms = stalled_for.as_millis() as u64,
                    "Buffer stalled after soft recovery, reconnecting"
                );
                push_reconnect(actions, StallReason::BufferStall);
            }
            PlaybackMode::Vod => {
                warn!(
                    stalled_ms = stalled_for.as_millis() as u64,
                    "Buffer stalled after soft recovery"
                );
                actions.push(WatchdogAction::HealthIssue {
                    description: String::from("Stream stalled"),
                });
            }
        }
    }

    fn check_frozen(
        &mut self,
        readout: &PipelineReadout,
        reconnecting: bool,
        actions: &mut Vec<WatchdogAction>,
    ) {
        let position = readout.position;
        let previous = self.last_position.replace(position);

        if !readout.is_actively_playing() {
            self.frozen_ticks = 0;
            return;
        }
        if previous == Some(position) && position > Duration::ZERO {
            self.frozen_ticks += 1;
        } else {
            self.frozen_ticks = 0;
        }

        if self.frozen_ticks >= self.config.frozen_ticks {
            self.frozen_ticks = 0;
            if !reconnecting {
                warn!(
                    position_ms = position.as_millis() as u64,
                    "Playback position frozen"
                );
                push_reconnect(actions, StallReason::FrozenPosition);
            }
        }
    }

    fn check_bitrate(
        &mut self,
        readout: &PipelineReadout,
        reconnecting: bool,
        actions: &mut Vec<WatchdogAction>,
    ) {
        let bps = readout.bitrate_bps;

        if readout.is_actively_playing() && bps == 0 {
            self.zero_bitrate_ticks += 1;
        } else {
            self.zero_bitrate_ticks = 0;
        }
        if self.zero_bitrate_ticks >= self.config.zero_bitrate_ticks {
            self.zero_bitrate_ticks = 0;
            if !reconnecting {
                warn!(ticks = self.config.zero_bitrate_ticks, "No data received while playing");
                push_reconnect(actions, StallReason::NoData);
            }
        }

        if bps > 0 && self.last_bitrate != Some(bps) {
            self.last_bitrate = Some(bps);
            actions.push(WatchdogAction::BitrateChanged { bps });
        }
    }
}

fn push_reconnect(actions: &mut Vec<WatchdogAction>, reason: StallReason) {
    actions.push(WatchdogAction::HealthIssue {
        description: reason.description().to_string(),
    });
    actions.push(WatchdogAction::Reconnect { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PlaybackState;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn stalled(buffered_ms: u64) -> PipelineReadout {
        PipelineReadout {
            state: PlaybackState::Buffering,
            play_when_ready: true,
            is_loading: true,
            has_media_item: true,
            buffered_position: Duration::from_millis(buffered_ms),
            ..Default::default()
        }
    }

    fn playing(position_ms: u64, bps: u64) -> PipelineReadout {
        PipelineReadout {
            state: PlaybackState::Ready,
            play_when_ready: true,
            has_media_item: true,
            position: Duration::from_millis(position_ms),
            bitrate_bps: bps,
            ..Default::default()
        }
    }

    fn monitor() -> HealthMonitor {
        let mut monitor = HealthMonitor::new(WatchdogConfig::default());
        monitor.track(1, PipelineGeneration(1));
        monitor
    }

    fn is_recovery(action: &WatchdogAction) -> bool {
        matches!(
            action,
            WatchdogAction::SoftRecover { .. } | WatchdogAction::Reconnect { .. }
        )
    }

    /// Run ticks every 3s from `start` until `until` and return the tick
    /// times that produced a recovery action.
    fn recovery_ticks(
        monitor: &mut HealthMonitor,
        start: Instant,
        until: u64,
        readout: &PipelineReadout,
    ) -> Vec<u64> {
        (0..=until)
            .step_by(3)
            .filter(|t| {
                monitor
                    .evaluate(start + secs(*t), PlaybackMode::Live, readout)
                    .iter()
                    .any(is_recovery)
            })
            .collect()
    }

    #[test]
    fn stuck_buffer_recovers_at_21s_and_respects_cooldown() {
        let start = Instant::now();
        let mut monitor = monitor();
        let fired = recovery_ticks(&mut monitor, start, 45, &stalled(120_000));
        assert_eq!(fired, vec![21, 42]);
    }

    #[test]
    fn soft_recovery_twice_then_reconnect() {
        let start = Instant::now();
        let mut monitor = monitor();
        let readout = stalled(120_000);
        let mut kinds = Vec::new();
        for t in (0..=70).step_by(3) {
            for action in monitor.evaluate(start + secs(t), PlaybackMode::Live, &readout) {
                match action {
                    WatchdogAction::SoftRecover { rewind } => {
                        assert_eq!(rewind, Duration::from_millis(1500));
                        kinds.push("soft");
                    }
                    WatchdogAction::Reconnect { reason } => {
                        assert_eq!(reason, StallReason::BufferStall);
                        kinds.push("reconnect");
                    }
                    _ => {}
                }
            }
        }
        assert_eq!(kinds, vec!["soft", "soft", "reconnect"]);
        assert_eq!(monitor.stall_state().soft_recovery_attempts(), 0);
    }

    #[test]
    fn buffered_progress_keeps_watchdog_quiet() {
        let start = Instant::now();
        let mut monitor = monitor();
        for tick in 0..20u64 {
            let actions = monitor.evaluate(
                start + secs(tick * 3),
                PlaybackMode::Live,
                &stalled(10_000 + tick * 600),
            );
            assert!(!actions.iter().any(is_recovery), "tick {tick}");
        }
    }

    #[test]
    fn frozen_position_reconnects_after_three_ticks() {
        let start = Instant::now();
        let mut monitor = monitor();
        let readout = playing(42_000, 900_000);

        for t in [0, 3, 6] {
            let actions = monitor.evaluate(start + secs(t), PlaybackMode::Live, &readout);
            assert!(!actions.iter().any(is_recovery));
        }
        let actions = monitor.evaluate(start + secs(9), PlaybackMode::Live, &readout);
        assert!(actions.contains(&WatchdogAction::Reconnect {
            reason: StallReason::FrozenPosition
        }));
        assert!(actions
            .iter()
            .any(|action| matches!(action, WatchdogAction::HealthIssue { .. })));
        assert_eq!(monitor.frozen_ticks(), 0);
    }

    #[test]
    fn position_zero_is_not_frozen() {
        let start = Instant::now();
        let mut monitor = monitor();
        for t in (0..30).step_by(3) {
            let actions = monitor.evaluate(start + secs(t), PlaybackMode::Live, &playing(0, 500_000));
            assert!(!actions.iter().any(is_recovery));
        }
    }

    #[test]
    fn zero_bitrate_reconnects_after_four_ticks() {
        let start = Instant::now();
        let mut monitor = monitor();
        for tick in 0..3u64 {
            let actions = monitor.evaluate(
                start + secs(tick * 3),
                PlaybackMode::Live,
                &playing(1_000 * (tick + 1), 0),
            );
            assert!(!actions.iter().any(is_recovery));
        }
        let actions = monitor.evaluate(start + secs(9), PlaybackMode::Live, &playing(4_000, 0));
        assert_eq!(
            actions.last(),
            Some(&WatchdogAction::Reconnect {
                reason: StallReason::NoData
            })
        );
    }

    #[test]
    fn bitrate_changes_are_forwarded_once() {
        let start = Instant::now();
        let mut monitor = monitor();
        let first = monitor.evaluate(start, PlaybackMode::Live, &playing(1_000, 800_000));
        assert_eq!(first, vec![WatchdogAction::BitrateChanged { bps: 800_000 }]);
        let same = monitor.evaluate(start + secs(3), PlaybackMode::Live, &playing(4_000, 800_000));
        assert!(same.is_empty());
        let changed = monitor.evaluate(start + secs(6), PlaybackMode::Live, &playing(7_000, 1_200_000));
        assert_eq!(changed, vec![WatchdogAction::BitrateChanged { bps: 1_200_000 }]);
    }

    #[test]
    fn vod_skips_live_checks() {
        let start = Instant::now();
        let mut monitor = monitor();
        for t in (0..60).step_by(3) {
            assert!(monitor
                .evaluate(start + secs(t), PlaybackMode::Vod, &stalled(5_000))
                .is_empty());
            assert!(monitor
                .evaluate(start + secs(t), PlaybackMode::Vod, &playing(5_000, 0))
                .is_empty());
        }
    }

    #[test]
    fn vod_watchdog_uses_longer_threshold_and_never_reconnects() {
        let start = Instant::now();
        let mut monitor = HealthMonitor::new(WatchdogConfig {
            vod_enabled: true,
            ..Default::default()
        });
        monitor.track(1, PipelineGeneration(1));
        let readout = stalled(5_000);

        let mut fired = Vec::new();
        for t in (0..=120).step_by(3) {
            for action in monitor.evaluate(start + secs(t), PlaybackMode::Vod, &readout) {
                assert!(!matches!(action, WatchdogAction::Reconnect { .. }));
                if matches!(action, WatchdogAction::SoftRecover { .. }) {
                    fired.push(t);
                }
            }
        }
        assert_eq!(fired.first(), Some(&30));
    }

    #[test]
    fn new_generation_rebaselines_without_clearing_cooldown() {
        let start = Instant::now();
        let mut monitor = monitor();
        let fired = recovery_ticks(&mut monitor, start, 21, &stalled(120_000));
        assert_eq!(fired, vec![21]);

        monitor.track(1, PipelineGeneration(2));
        assert_eq!(monitor.stall_state().last_buffered_position(), None);
        assert!(monitor.stall_state().last_reconnect_at().is_some());

        monitor.track(2, PipelineGeneration(3));
        assert_eq!(monitor.stall_state(), &StallWatchdogState::new());
    }
}
