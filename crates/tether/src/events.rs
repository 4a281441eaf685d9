//! Observable session events.

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

/// Capacity of the broadcast channel. Slow observers lag rather than block.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Events fanned out to UI observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Connect or rebuffer spinner on/off.
    Buffering { buffering: bool },
    /// User-visible error banner; cleared by [`SessionEvent::ErrorCleared`].
    Error { message: String },
    ErrorCleared,
    /// A reconnect has been scheduled.
    Retrying {
        attempt: u32,
        url_label: String,
        cycle: u32,
    },
    BitrateChanged { bps: u64 },
    /// Transient advisory from the watchdog; cleared by [`SessionEvent::HealthIssueCleared`].
    HealthIssue { description: String },
    HealthIssueCleared,
    BufferLevelChanged { label: String },
}

/// Broadcast fan-out of [`SessionEvent`]s.
///
/// Observers subscribe by taking a receiver and unsubscribe by dropping it.
/// Closing the bus ends every subscription. Shared between the session actor,
/// which emits, and its handles, which subscribe.
#[derive(Debug)]
pub struct EventBus {
    tx: RwLock<Option<broadcast::Sender<SessionEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            tx: RwLock::new(Some(tx)),
        }
    }

    /// A receiver for future events; `None` once the bus has been closed.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.tx.read().as_ref().map(broadcast::Sender::subscribe)
    }

    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.tx.read().as_ref() {
            trace!(?event, "Session event");
            // No subscribers is fine.
            let _ = tx.send(event);
        }
    }

    pub fn observer_count(&self) -> usize {
        self.tx
            .read()
            .as_ref()
            .map_or(0, broadcast::Sender::receiver_count)
    }

    /// Drop the sender so every receiver observes the end of the stream.
    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Human readable bitrate, e.g. `850 kbps` or `2.5 Mbps`.
pub fn format_bitrate(bps: u64) -> String {
    if bps >= 1_000_000 {
        format!("{:.1} Mbps", bps as f64 / 1_000_000.0)
    } else if bps >= 1_000 {
        format!("{} kbps", bps / 1_000)
    } else {
        format!("{} bps", bps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitrate_formatting() {
        assert_eq!(format_bitrate(0), "0 bps");
        assert_eq!(format_bitrate(850_000), "850 kbps");
        assert_eq!(format_bitrate(2_500_000), "2.5 Mbps");
    }

    #[tokio::test]
    async fn subscribers_receive_and_close() {
        let bus = EventBus::new();
        let mut first = bus.subscribe().unwrap();
        let second = bus.subscribe().unwrap();
        assert_eq!(bus.observer_count(), 2);

        drop(second);
        assert_eq!(bus.observer_count(), 1);

        bus.emit(SessionEvent::Buffering { buffering: true });
        assert_eq!(
            first.recv().await.unwrap(),
            SessionEvent::Buffering { buffering: true }
        );

        bus.close();
        assert!(bus.subscribe().is_none());
        assert!(matches!(
            first.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(SessionEvent::Retrying {
            attempt: 2,
            url_label: "stream 1/2 (a)".into(),
            cycle: 0,
        })
        .unwrap();
        assert_eq!(json["type"], "retrying");
        assert_eq!(json["attempt"], 2);
    }
}
