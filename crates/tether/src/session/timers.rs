//! Cancellable one-shot timers delivered to the session mailbox.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::messages::SessionMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKind {
    /// Delayed reopen after a failure.
    Retry,
    /// Swap to the new source once the volume has been ducked.
    CrossfadeSwap,
    ErrorClear,
    HealthClear,
    /// Uninterrupted ready playback clears the rebuffer tally.
    StabilityReset,
    /// Debounced buffer-level escalation.
    Escalation,
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Retry => "retry",
            Self::CrossfadeSwap => "crossfade_swap",
            Self::ErrorClear => "error_clear",
            Self::HealthClear => "health_clear",
            Self::StabilityReset => "stability_reset",
            Self::Escalation => "escalation",
        };
        f.write_str(name)
    }
}

/// At most one pending timer per [`TimerKind`].
///
/// Each timer is a spawned sleep with its own child token. Rescheduling or
/// cancelling replaces the slot, and [`Timers::fire`] rejects a message whose
/// `seq` no longer matches, so a timer that elapsed just before being
/// cancelled is still ignored.
#[derive(Debug)]
pub(crate) struct Timers {
    tx: mpsc::UnboundedSender<SessionMessage>,
    parent: CancellationToken,
    slots: HashMap<TimerKind, (u64, CancellationToken)>,
    next_seq: u64,
}

impl Timers {
    pub fn new(tx: mpsc::UnboundedSender<SessionMessage>, parent: CancellationToken) -> Self {
        Self {
            tx,
            parent,
            slots: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Schedule `kind`, replacing any pending timer of the same kind.
    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);

        self.next_seq += 1;
        let seq = self.next_seq;
        let token = self.parent.child_token();
        self.slots.insert(kind, (seq, token.clone()));
        trace!(%kind, seq, delay_ms = delay.as_millis() as u64, "Timer scheduled");

        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(SessionMessage::Timer { kind, seq });
                }
            }
        });
    }

    /// Schedule `kind` unless one is already pending. Returns true if scheduled.
    pub fn schedule_if_idle(&mut self, kind: TimerKind, delay: Duration) -> bool {
        if self.is_pending(kind) {
            return false;
        }
        self.schedule(kind, delay);
        true
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some((seq, token)) = self.slots.remove(&kind) {
            trace!(%kind, seq, "Timer cancelled");
            token.cancel();
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, token)) in self.slots.drain() {
            token.cancel();
        }
    }

    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.slots.contains_key(&kind)
    }

    /// Claim an elapsed timer. Returns false for a cancelled or replaced one.
    pub fn fire(&mut self, kind: TimerKind, seq: u64) -> bool {
        match self.slots.get(&kind) {
            Some((current, _)) if *current == seq => {
                self.slots.remove(&kind);
                true
            }
            _ => false,
        }
    }
}
