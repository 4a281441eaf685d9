//! Buffer-stall bookkeeping.

use std::time::Duration;

use tokio::time::Instant;

/// Progress and cooldown timestamps for buffer-stall detection.
///
/// `last_progress_at` only moves when the buffered position grows by more
/// than the noise threshold, or while the pipeline is not loading at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StallWatchdogState {
    last_buffered_position: Option<Duration>,
    last_progress_at: Option<Instant>,
    last_reconnect_at: Option<Instant>,
    soft_recovery_attempts: u32,
}

impl StallWatchdogState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_buffered_position(&self) -> Option<Duration> {
        self.last_buffered_position
    }

    pub fn last_progress_at(&self) -> Option<Instant> {
        self.last_progress_at
    }

    pub fn last_reconnect_at(&self) -> Option<Instant> {
        self.last_reconnect_at
    }

    pub fn soft_recovery_attempts(&self) -> u32 {
        self.soft_recovery_attempts
    }

    /// Feed the buffered position. Returns true if it counts as progress.
    ///
    /// The first observation sets the baseline. A shrinking position means the
    /// source was reopened, so only the baseline value moves.
    pub fn observe(&mut self, now: Instant, buffered: Duration, noise: Duration) -> bool {
        let Some(last) = self.last_buffered_position else {
            self.last_buffered_position = Some(buffered);
            self.last_progress_at = Some(now);
            return true;
        };

        if buffered > last + noise {
            self.last_buffered_position = Some(buffered);
            self.last_progress_at = Some(now);
            self.soft_recovery_attempts = 0;
            return true;
        }
        if buffered < last {
            self.last_buffered_position = Some(buffered);
        }
        false
    }

    /// The pipeline is not waiting for data; stall time starts counting from now.
    pub fn touch(&mut self, now: Instant) {
        self.last_progress_at = Some(now);
    }

    /// Time since the buffered position last made progress.
    pub fn stalled_for(&self, now: Instant) -> Duration {
        self.last_progress_at
            .map_or(Duration::ZERO, |at| now.saturating_duration_since(at))
    }

    pub fn cooldown_elapsed(&self, now: Instant, cooldown: Duration) -> bool {
        self.last_reconnect_at
            .is_none_or(|at| now.saturating_duration_since(at) >= cooldown)
    }

    /// Stamp a watchdog-triggered recovery for the cooldown.
    pub fn record_recovery(&mut self, now: Instant) {
        self.last_reconnect_at = Some(now);
    }

    pub fn record_soft_recovery(&mut self) -> u32 {
        self.soft_recovery_attempts += 1;
        self.soft_recovery_attempts
    }

    pub fn reset_soft_recoveries(&mut self) {
        self.soft_recovery_attempts = 0;
    }

    /// Forget the baseline after a reopen, keeping cooldown and attempts.
    pub fn rebaseline(&mut self) {
        self.last_buffered_position = None;
        self.last_progress_at = None;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOISE: Duration = Duration::from_millis(500);

    #[test]
    fn first_observation_is_baseline() {
        let now = Instant::now();
        let mut state = StallWatchdogState::new();
        assert!(state.observe(now, Duration::from_secs(120), NOISE));
        assert_eq!(state.last_progress_at(), Some(now));
    }

    #[test]
    fn growth_below_noise_is_not_progress() {
        let start = Instant::now();
        let mut state = StallWatchdogState::new();
        state.observe(start, Duration::from_millis(10_000), NOISE);
        assert!(!state.observe(
            start + Duration::from_secs(3),
            Duration::from_millis(10_400),
            NOISE
        ));
        assert_eq!(state.stalled_for(start + Duration::from_secs(3)), Duration::from_secs(3));

        assert!(state.observe(
            start + Duration::from_secs(6),
            Duration::from_millis(10_600),
            NOISE
        ));
        assert_eq!(state.stalled_for(start + Duration::from_secs(6)), Duration::ZERO);
    }

    #[test]
    fn progress_resets_soft_recoveries() {
        let start = Instant::now();
        let mut state = StallWatchdogState::new();
        state.observe(start, Duration::from_secs(1), NOISE);
        state.record_soft_recovery();
        state.record_soft_recovery();
        assert_eq!(state.soft_recovery_attempts(), 2);
        state.observe(start + Duration::from_secs(3), Duration::from_secs(5), NOISE);
        assert_eq!(state.soft_recovery_attempts(), 0);
    }

    #[test]
    fn cooldown() {
        let start = Instant::now();
        let cooldown = Duration::from_secs(20);
        let mut state = StallWatchdogState::new();
        assert!(state.cooldown_elapsed(start, cooldown));
        state.record_recovery(start);
        assert!(!state.cooldown_elapsed(start + Duration::from_secs(19), cooldown));
        assert!(state.cooldown_elapsed(start + Duration::from_secs(20), cooldown));
    }
}
