//! Watchdog task: ticks the [`HealthMonitor`] against the watched pipeline.

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::monitor::HealthMonitor;
use crate::config::WatchdogConfig;
use crate::pipeline::{MediaPipeline, PipelineGeneration};
use crate::session::{PlaybackMode, SessionMessage};

/// The pipeline the watchdog should observe.
#[derive(Clone)]
pub(crate) struct WatchTarget {
    /// Bumped whenever new content is set.
    pub epoch: u64,
    pub generation: PipelineGeneration,
    pub mode: PlaybackMode,
    pub pipeline: Arc<dyn MediaPipeline>,
    /// A reconnect is scheduled; checks hold until the source is reopened.
    pub reconnect_pending: bool,
}

/// Long-lived task owned by one session.
///
/// The session publishes the current [`WatchTarget`] through a watch channel
/// and receives findings as [`SessionMessage::Watchdog`] messages.
pub(crate) struct WatchdogTask {
    config: WatchdogConfig,
    monitor: HealthMonitor,
    targets: watch::Receiver<Option<WatchTarget>>,
    tx: mpsc::UnboundedSender<SessionMessage>,
}

impl WatchdogTask {
    pub fn new(
        config: WatchdogConfig,
        targets: watch::Receiver<Option<WatchTarget>>,
        tx: mpsc::UnboundedSender<SessionMessage>,
    ) -> Self {
        Self {
            monitor: HealthMonitor::new(config.clone()),
            config,
            targets,
            tx,
        }
    }

    /// Tick until cancelled or the session goes away.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut tick_interval = tokio::time::interval(self.config.tick_interval());
        tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!(
            tick_ms = self.config.tick_interval_ms,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                _ = tick_interval.tick() => {
                    if !self.tick() {
                        break;
                    }
                }
            }
        }

        debug!("Watchdog stopped");
    }

    /// Returns false once the session mailbox is closed.
    fn tick(&mut self) -> bool {
        let target = self.targets.borrow().clone();
        let Some(target) = target else {
            self.monitor.reset();
            return true;
        };

        self.monitor.track(target.epoch, target.generation);
        if target.reconnect_pending {
            trace!(generation = %target.generation, "Reconnect pending, checks held");
            return true;
        }
        let readout = target.pipeline.readout();
        trace!(
            generation = %target.generation,
            state = %readout.state,
            buffered_ms = readout.buffered_position.as_millis() as u64,
            "Watchdog tick"
        );

        for action in self.monitor.evaluate(Instant::now(), target.mode, &readout) {
            let message = SessionMessage::Watchdog {
                generation: target.generation,
                action,
            };
            if self.tx.send(message).is_err() {
                return false;
            }
        }
        true
    }
}
