use chrono::{Local, Utc};
use serde_json::json;
use tether_engine::{SessionEvent, SessionStatus, format_bitrate};

/// Prints session events as they arrive.
#[derive(Debug, Clone, Copy)]
pub struct EventPrinter {
    json: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn event(&self, event: &SessionEvent) {
        if self.json {
            let line = json!({
                "timestamp": Utc::now().to_rfc3339(),
                "event": event,
            });
            println!("{line}");
        } else {
            println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), describe(event));
        }
    }

    pub fn status(&self, status: &SessionStatus) {
        if self.json {
            let line = json!({
                "timestamp": Utc::now().to_rfc3339(),
                "status": status,
            });
            println!("{line}");
            return;
        }

        let snapshot = &status.snapshot;
        println!();
        println!("Session {}", snapshot.session_id);
        println!("  state:        {}", snapshot.state);
        println!(
            "  stream:       {}",
            snapshot.active_url_label.as_deref().unwrap_or("none")
        );
        println!("  buffer level: {}", status.buffer_level_label);
        println!("  bitrate:      {}", status.bitrate);
        println!("  playback:     {}", status.playback_state);
        println!("  position:     {:.1}s", status.position_ms as f64 / 1000.0);
        println!("  retries:      {} (cycle {})", snapshot.retry_attempt, snapshot.rotation_cycle);
    }
}

/// One-line human description of an event.
pub fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::Buffering { buffering: true } => "buffering...".to_string(),
        SessionEvent::Buffering { buffering: false } => "playing".to_string(),
        SessionEvent::Error { message } => format!("error: {message}"),
        SessionEvent::ErrorCleared => "error cleared".to_string(),
        SessionEvent::Retrying {
            attempt,
            url_label,
            cycle,
        } => {
            if *cycle > 0 {
                format!("retrying {url_label}, attempt {attempt} (cycle {cycle})")
            } else {
                format!("retrying {url_label}, attempt {attempt}")
            }
        }
        SessionEvent::BitrateChanged { bps } => format!("bitrate {}", format_bitrate(*bps)),
        SessionEvent::HealthIssue { description } => format!("health: {description}"),
        SessionEvent::HealthIssueCleared => "health advisory cleared".to_string(),
        SessionEvent::BufferLevelChanged { label } => format!("buffer level -> {label}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_events() {
        assert_eq!(
            describe(&SessionEvent::Retrying {
                attempt: 2,
                url_label: "stream 1/3 (cdn-a.example.com)".into(),
                cycle: 0,
            }),
            "retrying stream 1/3 (cdn-a.example.com), attempt 2"
        );
        assert_eq!(
            describe(&SessionEvent::BitrateChanged { bps: 2_500_000 }),
            "bitrate 2.5 Mbps"
        );
        assert_eq!(
            describe(&SessionEvent::BufferLevelChanged {
                label: "Maximum".into()
            }),
            "buffer level -> Maximum"
        );
    }
}
