//! Built-in failure scenarios run against the scripted pipeline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tether_engine::pipeline::scripted::{OpenOutcome, ScriptedFactory};
use tether_engine::{
    EngineConfig, PipelineError, PipelineErrorCode, PlaybackState, SessionHandle,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::cli::Scenario;
use crate::output::EventPrinter;

const CDN_URLS: [&str; 3] = [
    "https://cdn-a.example.com/live/index.m3u8",
    "https://cdn-b.example.com/live/index.m3u8",
    "https://cdn-c.example.com/live/index.m3u8",
];
const VOD_URL: &str = "https://vod.example.com/archive/1234.mp4?token=expired";

/// Rebuffer cadence of the storm scenario.
const STORM_PERIOD: Duration = Duration::from_secs(7);
const STORM_STALL: Duration = Duration::from_millis(1500);

impl Scenario {
    fn default_duration(&self) -> Duration {
        let secs = match self {
            Self::FlakyCdn => 25,
            Self::StalledBuffer => 70,
            Self::RebufferStorm => 30,
            Self::VodError => 8,
        };
        Duration::from_secs(secs)
    }

    fn factory(&self) -> ScriptedFactory {
        match self {
            Self::FlakyCdn => ScriptedFactory::with_responder(|request| {
                if request.url.contains("cdn-a") {
                    OpenOutcome::Fail(PipelineError::new(
                        PipelineErrorCode::NetworkTimeout,
                        "connect timed out",
                    ))
                } else if request.url.contains("cdn-b") {
                    OpenOutcome::Fail(PipelineError::new(
                        PipelineErrorCode::BadHttpStatus,
                        "503 Service Unavailable",
                    ))
                } else {
                    OpenOutcome::Play {
                        bitrate_bps: 2_500_000,
                    }
                }
            }),
            Self::StalledBuffer => ScriptedFactory::with_responder(|_| OpenOutcome::Stall {
                buffered: Duration::from_secs(45),
            }),
            Self::RebufferStorm => ScriptedFactory::with_responder(|_| OpenOutcome::Play {
                bitrate_bps: 4_000_000,
            }),
            Self::VodError => ScriptedFactory::with_responder(|_| {
                OpenOutcome::Fail(PipelineError::new(
                    PipelineErrorCode::BadHttpStatus,
                    "403 Forbidden: signed URL expired",
                ))
            }),
        }
    }
}

/// Run `scenario` until its duration elapses or Ctrl-C, printing every event.
pub async fn run(
    scenario: Scenario,
    config: EngineConfig,
    duration: Option<Duration>,
    printer: EventPrinter,
) -> Result<()> {
    let duration = duration.unwrap_or_else(|| scenario.default_duration());
    let factory = Arc::new(scenario.factory());
    let session = SessionHandle::spawn(config, factory.clone())?;
    let mut events = session
        .subscribe()
        .context("session closed before the scenario started")?;

    info!(?scenario, secs = duration.as_secs(), session = %session.id(), "Starting scenario");

    let printer_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => printer.event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event output lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match scenario {
        Scenario::VodError => session.set_vod_url(VOD_URL),
        Scenario::RebufferStorm => session.set_live_urls([CDN_URLS[0]], false),
        Scenario::FlakyCdn | Scenario::StalledBuffer => session.set_live_urls(CDN_URLS, false),
    }

    let driver = async {
        if scenario == Scenario::RebufferStorm {
            rebuffer_storm(&factory).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = driver => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    printer.status(&session.status());
    session.release();
    session.closed().await;
    printer_task.await.context("event printer failed")?;
    Ok(())
}

/// Rebuffer the active pipeline periodically.
async fn rebuffer_storm(factory: &ScriptedFactory) {
    let mut ticker = tokio::time::interval(STORM_PERIOD);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(pipeline) = factory.latest() else {
            continue;
        };
        pipeline.emit_state(PlaybackState::Buffering);
        tokio::time::sleep(STORM_STALL).await;
        pipeline.emit_state(PlaybackState::Ready);
    }
}
