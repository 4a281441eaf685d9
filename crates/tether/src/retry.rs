//! Reconnect backoff and endpoint failover.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::endpoints::EndpointSet;
use crate::error::{EngineError, Result};

/// What the controller decided for one reconnect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPlan {
    /// Index of the URL to reopen.
    pub index: usize,
    pub url: String,
    /// Attempt number on that URL, starting at 1.
    pub attempt: u32,
    pub delay: Duration,
    /// The controller moved to a different URL for this attempt.
    pub failed_over: bool,
    /// The rotation restarted from the first URL.
    pub wrapped: bool,
    pub cycle: u32,
}

/// Retry/failover policy over an [`EndpointSet`].
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Delay before attempt `attempt` (1-based) on a URL.
    ///
    /// `initial * multiplier^(attempt-1)`, capped at `max_delay`; jitter never
    /// pushes the delay past the cap.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.config.initial_delay_ms as f64 * self.config.backoff_multiplier.powi(exponent);
        let capped = base.min(self.config.max_delay_ms as f64) as u64;

        let delay_ms = if self.config.use_jitter {
            let jitter = (capped as f64 * 0.25 * rand::random::<f64>()) as u64;
            capped.saturating_add(jitter).min(self.config.max_delay_ms)
        } else {
            capped
        };

        Duration::from_millis(delay_ms)
    }

    /// Count a failed attempt on the current URL and plan the next one.
    ///
    /// After `max_attempts_per_url` attempts the controller fails over to the
    /// next URL; failing past the last URL restarts the rotation at the first.
    pub fn plan(&self, endpoints: &mut EndpointSet) -> Result<RetryPlan> {
        if endpoints.is_empty() {
            return Err(EngineError::NoEndpointsAvailable);
        }

        let mut attempt = endpoints.increment_retry();
        let mut failed_over = false;
        let mut wrapped = false;

        if attempt > self.config.max_attempts_per_url {
            wrapped = endpoints.advance();
            if wrapped && !self.config.restart_rotation {
                warn!(total = endpoints.len(), "Every endpoint failed, rotation stopped");
                return Err(EngineError::EndpointsExhausted {
                    total: endpoints.len(),
                });
            }
            attempt = endpoints.increment_retry();
            failed_over = true;

            if wrapped {
                info!(
                    total = endpoints.len(),
                    cycle = endpoints.cycle(),
                    "Every endpoint failed, restarting rotation from the first"
                );
            } else {
                info!(
                    index = endpoints.current_index(),
                    total = endpoints.len(),
                    "Failing over to next endpoint"
                );
            }
        }

        let delay = self.delay_for_attempt(attempt);
        let url = endpoints.current().unwrap_or_default().to_string();
        debug!(
            index = endpoints.current_index(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnect planned"
        );

        Ok(RetryPlan {
            index: endpoints.current_index(),
            url,
            attempt,
            delay,
            failed_over,
            wrapped,
            cycle: endpoints.cycle(),
        })
    }

    /// Playback reached ready: the current URL is healthy again.
    pub fn on_ready(&self, endpoints: &mut EndpointSet) {
        if endpoints.retry_count() > 0 {
            debug!(
                index = endpoints.current_index(),
                attempts = endpoints.retry_count(),
                "Endpoint recovered"
            );
        }
        endpoints.reset_retry();
    }
}

impl Default for RetryController {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> RetryController {
        RetryController::default()
    }

    #[test]
    fn delays_are_capped_exponential() {
        let retry = controller();
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(1000));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(2000));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(4000));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_millis(4000));
        assert_eq!(retry.delay_for_attempt(u32::MAX), Duration::from_millis(4000));
    }

    #[test]
    fn delays_never_decrease_and_never_exceed_cap() {
        let retry = controller();
        let mut previous = Duration::ZERO;
        for attempt in 1..40 {
            let delay = retry.delay_for_attempt(attempt);
            assert!(delay >= previous);
            assert!(delay <= retry.config().max_delay());
            previous = delay;
        }
    }

    #[test]
    fn jitter_stays_below_cap() {
        let retry = RetryController::new(RetryConfig {
            use_jitter: true,
            ..Default::default()
        });
        for attempt in 1..10 {
            for _ in 0..16 {
                assert!(retry.delay_for_attempt(attempt) <= Duration::from_millis(4000));
            }
        }
        let first = retry.delay_for_attempt(1);
        assert!(first >= Duration::from_millis(1000));
        assert!(first <= Duration::from_millis(1250));
    }

    #[test]
    fn empty_set_is_an_error() {
        let mut endpoints = EndpointSet::new(Vec::<String>::new());
        assert_eq!(
            controller().plan(&mut endpoints),
            Err(EngineError::NoEndpointsAvailable)
        );
    }

    #[test]
    fn fails_over_after_max_attempts() {
        let retry = controller();
        let mut endpoints = EndpointSet::new(["a", "b", "c"]);

        for expected in 1..=3 {
            let plan = retry.plan(&mut endpoints).unwrap();
            assert_eq!(plan.url, "a");
            assert_eq!(plan.attempt, expected);
            assert!(!plan.failed_over);
        }

        let plan = retry.plan(&mut endpoints).unwrap();
        assert_eq!(plan.url, "b");
        assert_eq!(plan.index, 1);
        assert_eq!(plan.attempt, 1);
        assert!(plan.failed_over);
        assert_eq!(plan.delay, Duration::from_millis(1000));
        assert_eq!(endpoints.retry_count(), 1);
    }

    #[test]
    fn rotation_restarts_at_first_url() {
        let retry = controller();
        let mut endpoints = EndpointSet::new(["a", "b"]);

        // Three attempts on a, failover to b, two more on b.
        for _ in 0..6 {
            retry.plan(&mut endpoints).unwrap();
        }
        assert_eq!(endpoints.current(), Some("b"));
        assert_eq!(endpoints.retry_count(), 3);

        let plan = retry.plan(&mut endpoints).unwrap();
        assert_eq!(plan.index, 0);
        assert_eq!(plan.attempt, 1);
        assert!(plan.wrapped);
        assert_eq!(plan.cycle, 1);
    }

    #[test]
    fn single_url_keeps_retrying() {
        let retry = controller();
        let mut endpoints = EndpointSet::single("only");
        for _ in 0..20 {
            let plan = retry.plan(&mut endpoints).unwrap();
            assert_eq!(plan.url, "only");
            assert!(plan.attempt <= 3);
        }
    }

    #[test]
    fn exhaustion_when_rotation_restart_disabled() {
        let retry = RetryController::new(RetryConfig {
            restart_rotation: false,
            ..Default::default()
        });
        let mut endpoints = EndpointSet::new(["a"]);
        for _ in 0..3 {
            retry.plan(&mut endpoints).unwrap();
        }
        assert_eq!(
            retry.plan(&mut endpoints),
            Err(EngineError::EndpointsExhausted { total: 1 })
        );
    }

    #[test]
    fn ready_resets_attempts() {
        let retry = controller();
        let mut endpoints = EndpointSet::new(["a", "b"]);
        retry.plan(&mut endpoints).unwrap();
        retry.plan(&mut endpoints).unwrap();
        retry.on_ready(&mut endpoints);
        assert_eq!(endpoints.retry_count(), 0);
        assert_eq!(retry.plan(&mut endpoints).unwrap().attempt, 1);
    }
}
