//! Public handle to a running session.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info_span};
use uuid::Uuid;

use super::actor::{SessionActor, SessionChannels};
use super::messages::SessionMessage;
use super::state::{SessionSnapshot, SessionStatus};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::events::{EventBus, SessionEvent};
use crate::pipeline::{PipelineFactory, PipelineReadout};
use crate::watchdog::{WatchTarget, WatchdogTask};

/// Cheap, cloneable front end of a session.
///
/// Every command is fire-and-forget: it is queued for the session actor and
/// returns immediately. Once the session has been released, commands are
/// ignored. Dropping the last handle releases the session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<SessionMessage>,
    events: Arc<EventBus>,
    snapshot: watch::Receiver<SessionSnapshot>,
    target: watch::Receiver<Option<WatchTarget>>,
    _guard: Arc<DropGuard>,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("released", &self.is_released())
            .finish()
    }
}

impl SessionHandle {
    /// Validate `config` and spawn the session actor and its watchdog on the
    /// current tokio runtime.
    pub fn spawn(config: EngineConfig, factory: Arc<dyn PipelineFactory>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let id = Uuid::new_v4();
        let (tx, mailbox) = mpsc::unbounded_channel();
        let events = Arc::new(EventBus::new());
        let (snapshot_tx, snapshot) =
            watch::channel(SessionSnapshot::new(id, config.buffer.live_default_level));
        let (target_tx, target) = watch::channel(None);
        let cancel_token = CancellationToken::new();
        let span = info_span!("session", %id);

        let watchdog = WatchdogTask::new(config.watchdog.clone(), target.clone(), tx.clone());
        tokio::spawn(
            watchdog
                .run(cancel_token.child_token())
                .instrument(span.clone()),
        );

        let channels = SessionChannels {
            tx: tx.clone(),
            mailbox,
            events: events.clone(),
            snapshot: snapshot_tx,
            target: target_tx,
        };
        let actor = SessionActor::new(config, factory, channels, cancel_token.clone());
        tokio::spawn(actor.run().instrument(span));

        Ok(Self {
            id,
            tx,
            events,
            snapshot,
            target,
            _guard: Arc::new(cancel_token.drop_guard()),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Play live content from an ordered list of candidate URLs.
    ///
    /// With `crossfade`, a source that is already playing is ducked and
    /// swapped instead of cut.
    pub fn set_live_urls<I, S>(&self, urls: I, crossfade: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls = urls.into_iter().map(Into::into).collect();
        self.send(SessionMessage::SetLiveUrls { urls, crossfade });
    }

    pub fn set_vod_url(&self, url: impl Into<String>) {
        self.send(SessionMessage::SetVodUrl { url: url.into() });
    }

    pub fn pause(&self) {
        self.send(SessionMessage::Pause);
    }

    pub fn resume(&self) {
        self.send(SessionMessage::Resume);
    }

    /// User volume in `[0, 1]`; connect-muting and crossfades restore to it.
    pub fn set_volume(&self, volume: f32) {
        self.send(SessionMessage::SetVolume(volume));
    }

    /// Drop the current content and cancel pending work. Idempotent.
    pub fn stop(&self) {
        self.send(SessionMessage::Stop);
    }

    /// Tear the session down for good.
    pub fn release(&self) {
        self.send(SessionMessage::Release);
    }

    /// Subscribe to session events; `None` after release.
    pub fn subscribe(&self) -> Option<broadcast::Receiver<SessionEvent>> {
        self.events.subscribe()
    }

    /// Latest snapshot published by the actor.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Snapshot plus a fresh readout of the active pipeline.
    pub fn status(&self) -> SessionStatus {
        let snapshot = self.snapshot();
        let pipeline = self
            .target
            .borrow()
            .as_ref()
            .map(|target| target.pipeline.clone());
        let readout = pipeline
            .map(|pipeline| pipeline.readout())
            .unwrap_or_else(PipelineReadout::default);
        SessionStatus::new(snapshot, &readout)
    }

    /// Watch channel of snapshots, for observers that want change notifications.
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_released(&self) -> bool {
        self.tx.is_closed()
    }

    /// Wait until the session actor has exited.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    fn send(&self, message: SessionMessage) {
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            debug!(session = %self.id, ?message, "Session released, call ignored");
        }
    }
}
