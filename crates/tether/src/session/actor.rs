//! The session actor: single owner of every mutable piece of session state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::messages::SessionMessage;
use super::state::{PlaybackMode, SessionSnapshot, SessionState};
use super::timers::{TimerKind, Timers};
use crate::buffer_level::{BufferLevel, BufferLevelMachine};
use crate::config::EngineConfig;
use crate::endpoints::EndpointSet;
use crate::error::EngineError;
use crate::events::{EventBus, SessionEvent};
use crate::pipeline::{
    MediaPipeline, OpenRequest, PipelineError, PipelineEvent, PipelineEvents, PipelineFactory,
    PipelineGeneration, PlaybackState,
};
use crate::retry::RetryController;
use crate::watchdog::{WatchTarget, WatchdogAction};

/// The source currently opened on the pipeline.
#[derive(Debug, Clone, Copy)]
struct ActiveSource {
    generation: PipelineGeneration,
    index: usize,
    state: PlaybackState,
}

/// Channels shared between the actor and its handles.
pub(crate) struct SessionChannels {
    pub tx: mpsc::UnboundedSender<SessionMessage>,
    pub mailbox: mpsc::UnboundedReceiver<SessionMessage>,
    pub events: Arc<EventBus>,
    pub snapshot: watch::Sender<SessionSnapshot>,
    pub target: watch::Sender<Option<WatchTarget>>,
}

pub(crate) struct SessionActor {
    config: Arc<EngineConfig>,
    factory: Arc<dyn PipelineFactory>,

    state: SessionState,
    mode: Option<PlaybackMode>,
    endpoints: EndpointSet,
    retry: RetryController,
    levels: BufferLevelMachine,

    pipeline: Option<Arc<dyn MediaPipeline>>,
    active: Option<ActiveSource>,
    last_generation: PipelineGeneration,
    /// Bumped on every new content so the watchdog starts over.
    epoch: u64,
    pending_escalation: Option<BufferLevel>,

    user_volume: f32,
    connect_muted: bool,
    play_intent: bool,
    bitrate_bps: u64,
    error_visible: bool,
    health_visible: bool,

    tx: mpsc::UnboundedSender<SessionMessage>,
    mailbox: mpsc::UnboundedReceiver<SessionMessage>,
    events: Arc<EventBus>,
    snapshot: watch::Sender<SessionSnapshot>,
    target: watch::Sender<Option<WatchTarget>>,
    timers: Timers,
    cancel_token: CancellationToken,
}

impl SessionActor {
    pub fn new(
        config: Arc<EngineConfig>,
        factory: Arc<dyn PipelineFactory>,
        channels: SessionChannels,
        cancel_token: CancellationToken,
    ) -> Self {
        let SessionChannels {
            tx,
            mailbox,
            events,
            snapshot,
            target,
        } = channels;

        Self {
            retry: RetryController::new(config.retry.clone()),
            levels: BufferLevelMachine::new(config.buffer.clone()),
            timers: Timers::new(tx.clone(), cancel_token.clone()),
            config,
            factory,
            state: SessionState::Uninitialized,
            mode: None,
            endpoints: EndpointSet::default(),
            pipeline: None,
            active: None,
            last_generation: PipelineGeneration(0),
            epoch: 0,
            pending_escalation: None,
            user_volume: 1.0,
            connect_muted: false,
            play_intent: true,
            bitrate_bps: 0,
            error_visible: false,
            health_visible: false,
            tx,
            mailbox,
            events,
            snapshot,
            target,
            cancel_token,
        }
    }

    /// Process messages until released or cancelled.
    pub async fn run(mut self) {
        info!(level = %self.levels.level(), "Session started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    debug!("Session cancelled");
                    break;
                }

                message = self.mailbox.recv() => {
                    let Some(message) = message else {
                        break;
                    };
                    if !self.handle_message(message) {
                        break;
                    }
                    self.publish_snapshot();
                }
            }
        }

        self.shutdown();
        info!("Session released");
    }

    /// Returns false when the actor should exit.
    fn handle_message(&mut self, message: SessionMessage) -> bool {
        match message {
            SessionMessage::SetLiveUrls { urls, crossfade } => self.set_live_urls(urls, crossfade),
            SessionMessage::SetVodUrl { url } => self.set_vod_url(url),
            SessionMessage::Pause => self.set_play_intent(false),
            SessionMessage::Resume => self.set_play_intent(true),
            SessionMessage::SetVolume(volume) => self.set_volume(volume),
            SessionMessage::Stop => self.stop(),
            SessionMessage::Release => return false,
            SessionMessage::Pipeline { generation, event } => {
                self.on_pipeline_event(generation, event)
            }
            SessionMessage::Watchdog { generation, action } => {
                self.on_watchdog(generation, action)
            }
            SessionMessage::Timer { kind, seq } => {
                if self.timers.fire(kind, seq) {
                    self.on_timer(kind);
                } else {
                    trace!(%kind, seq, "Stale timer ignored");
                }
            }
        }
        true
    }

    // Commands

    fn set_live_urls(&mut self, urls: Vec<String>, crossfade: bool) {
        let was_playing = self.is_actively_playing();
        self.begin_content(PlaybackMode::Live, EndpointSet::new(urls));
        info!(urls = self.endpoints.len(), crossfade, "Live content set");

        if self.endpoints.is_empty() {
            self.fail_without_endpoints();
            return;
        }

        let mut rebuilt = false;
        if self.levels.reset_for_live() {
            self.emit_level_changed();
            if self.pipeline.is_some() {
                self.replace_pipeline();
                rebuilt = true;
            }
        }

        if crossfade && was_playing && !rebuilt {
            // The old source keeps playing while ducked, but nothing it
            // reports may act on the new content.
            self.active = None;
            self.target.send_replace(None);
            if let Some(pipeline) = &self.pipeline {
                let ducked = self.user_volume * self.config.session.crossfade_duck_ratio;
                debug!(volume = ducked, "Crossfade: ducking before swap");
                pipeline.set_volume(ducked);
            }
            self.timers
                .schedule(TimerKind::CrossfadeSwap, self.config.session.crossfade());
            return;
        }

        self.open_current(None);
    }

    fn set_vod_url(&mut self, url: String) {
        self.begin_content(PlaybackMode::Vod, EndpointSet::single(url));
        info!("VOD content set");

        if self.endpoints.is_empty() {
            self.fail_without_endpoints();
            return;
        }
        self.open_current(None);
    }

    /// Supersede whatever was playing: pending tasks and visible advisories.
    fn begin_content(&mut self, mode: PlaybackMode, endpoints: EndpointSet) {
        self.timers.cancel_all();
        self.clear_advisories();
        self.pending_escalation = None;
        self.epoch += 1;
        self.bitrate_bps = 0;
        self.play_intent = true;

        self.mode = Some(mode);
        self.state = match mode {
            PlaybackMode::Live => SessionState::LiveActive,
            PlaybackMode::Vod => SessionState::VodActive,
        };
        self.endpoints = endpoints;
    }

    fn fail_without_endpoints(&mut self) {
        warn!("No usable stream URL");
        self.close_source();
        self.emit_error(EngineError::NoEndpointsAvailable.to_string());
    }

    fn set_play_intent(&mut self, play: bool) {
        self.play_intent = play;
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_play_when_ready(play);
        }
        debug!(play, "Play intent changed");
    }

    fn set_volume(&mut self, volume: f32) {
        let volume = if volume.is_nan() {
            0.0
        } else {
            volume.clamp(0.0, 1.0)
        };
        self.user_volume = volume;

        let ducking = self.timers.is_pending(TimerKind::CrossfadeSwap);
        if !self.connect_muted && !ducking {
            if let Some(pipeline) = &self.pipeline {
                pipeline.set_volume(volume);
            }
        }
    }

    fn stop(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.timers.cancel_all();
        self.clear_advisories();
        self.pending_escalation = None;
        self.close_source();
        self.unmute();
        self.endpoints = EndpointSet::default();
        self.mode = None;
        self.state = SessionState::Stopped;
        info!("Session stopped");
    }

    fn shutdown(&mut self) {
        self.timers.cancel_all();
        self.pending_escalation = None;
        self.active = None;
        self.target.send_replace(None);
        self.cancel_token.cancel();

        if let Some(pipeline) = self.pipeline.take() {
            pipeline.stop();
            pipeline.release();
        }
        self.events.close();
        self.endpoints = EndpointSet::default();
        self.mode = None;
        self.state = SessionState::Released;
        self.publish_snapshot();
    }

    // Pipeline

    fn ensure_pipeline(&mut self) -> Arc<dyn MediaPipeline> {
        if let Some(pipeline) = &self.pipeline {
            return pipeline.clone();
        }
        let pipeline = self.factory.create(self.levels.level().tuning());
        debug!(level = %self.levels.level(), "Pipeline created");
        self.pipeline = Some(pipeline.clone());
        pipeline
    }

    /// Swap in a fresh instance at the current level. The old one is fenced
    /// off immediately and released after the rebuild grace period.
    fn replace_pipeline(&mut self) {
        self.active = None;
        if let Some(old) = self.pipeline.take() {
            let grace = self.config.buffer.rebuild_grace();
            let token = self.cancel_token.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = token.cancelled() => {}
                    _ = tokio::time::sleep(grace) => {}
                }
                old.stop();
                old.release();
            });
        }
        self.ensure_pipeline();
    }

    /// Open the current endpoint under a fresh generation.
    fn open_current(&mut self, start_position: Option<Duration>) {
        let Some(url) = self.endpoints.current().map(str::to_string) else {
            return;
        };
        let Some(mode) = self.mode else {
            return;
        };
        let pipeline = self.ensure_pipeline();

        self.last_generation = self.last_generation.next();
        let generation = self.last_generation;
        let index = self.endpoints.current_index();
        self.active = Some(ActiveSource {
            generation,
            index,
            state: PlaybackState::Idle,
        });
        self.timers.cancel(TimerKind::StabilityReset);

        if self.config.session.mute_on_connect {
            self.connect_muted = true;
            pipeline.set_volume(0.0);
        } else {
            pipeline.set_volume(self.user_volume);
        }
        pipeline.set_play_when_ready(self.play_intent);

        let is_live = mode == PlaybackMode::Live;
        let request = OpenRequest {
            url,
            is_live,
            live_latency_target: if is_live {
                self.config.session.live_latency_target()
            } else {
                None
            },
            start_position,
        };
        info!(
            %generation,
            url_index = index,
            url = %request.url,
            start_ms = start_position.map(|p| p.as_millis() as u64),
            "Opening stream"
        );
        pipeline.open(request, PipelineEvents::new(generation, self.tx.clone()));

        self.target.send_replace(Some(WatchTarget {
            epoch: self.epoch,
            generation,
            mode,
            pipeline,
            reconnect_pending: false,
        }));
    }

    fn close_source(&mut self) {
        self.active = None;
        self.target.send_replace(None);
        if let Some(pipeline) = &self.pipeline {
            pipeline.stop();
        }
    }

    fn set_reconnect_pending(&self, pending: bool) {
        self.target.send_if_modified(|target| match target {
            Some(target) if target.reconnect_pending != pending => {
                target.reconnect_pending = pending;
                true
            }
            _ => false,
        });
    }

    fn is_actively_playing(&self) -> bool {
        self.play_intent
            && self
                .active
                .is_some_and(|active| active.state == PlaybackState::Ready)
    }

    fn current_generation(&self) -> Option<PipelineGeneration> {
        self.active.map(|active| active.generation)
    }

    fn unmute(&mut self) {
        if !self.connect_muted {
            return;
        }
        self.connect_muted = false;
        if let Some(pipeline) = &self.pipeline {
            pipeline.set_volume(self.user_volume);
        }
    }

    fn on_pipeline_event(&mut self, generation: PipelineGeneration, event: PipelineEvent) {
        let Some(active) = self.active.as_mut() else {
            trace!(%generation, "Pipeline event without an active source");
            return;
        };
        if active.generation != generation {
            debug!(
                %generation,
                active = %active.generation,
                "Stale pipeline event dropped"
            );
            return;
        }

        match event {
            PipelineEvent::StateChanged(state) => {
                let previous = std::mem::replace(&mut active.state, state);
                if previous != state {
                    self.on_state_changed(previous, state);
                }
            }
            PipelineEvent::Error(error) => self.on_pipeline_error(error),
        }
    }

    fn on_state_changed(&mut self, previous: PlaybackState, state: PlaybackState) {
        debug!(from = %previous, to = %state, "Pipeline state changed");

        match state {
            PlaybackState::Buffering => {
                self.events.emit(SessionEvent::Buffering { buffering: true });
                self.timers.cancel(TimerKind::StabilityReset);
                if self.config.session.mute_on_connect && !self.connect_muted {
                    self.connect_muted = true;
                    if let Some(pipeline) = &self.pipeline {
                        pipeline.set_volume(0.0);
                    }
                }
                if self.mode == Some(PlaybackMode::Live) && previous == PlaybackState::Ready {
                    self.on_rebuffer();
                }
            }
            PlaybackState::Ready => {
                self.events.emit(SessionEvent::Buffering { buffering: false });
                self.timers.cancel(TimerKind::Retry);
                self.set_reconnect_pending(false);
                self.retry.on_ready(&mut self.endpoints);
                self.unmute();
                self.timers.schedule(
                    TimerKind::StabilityReset,
                    self.config.buffer.stability_reset(),
                );
            }
            PlaybackState::Ended => {
                self.timers.cancel(TimerKind::StabilityReset);
                if self.mode == Some(PlaybackMode::Live) {
                    info!("Live stream ended unexpectedly");
                    self.reconnect();
                }
            }
            PlaybackState::Idle => {}
        }
    }

    fn on_rebuffer(&mut self) {
        let Some(target) = self.levels.record_rebuffer(Instant::now()) else {
            return;
        };
        self.pending_escalation = Some(self.pending_escalation.map_or(target, |p| p.max(target)));
        if self
            .timers
            .schedule_if_idle(TimerKind::Escalation, self.config.buffer.escalation_debounce())
        {
            debug!(target = %target, "Buffer escalation scheduled");
        }
    }

    fn on_pipeline_error(&mut self, error: PipelineError) {
        if !error.is_recoverable() {
            warn!(code = %error.code, message = %error.message, "Unrecoverable pipeline error");
            self.events.emit(SessionEvent::Buffering { buffering: false });
            self.emit_error(EngineError::pipeline(error.code, error.message).to_string());
            return;
        }

        match self.mode {
            Some(PlaybackMode::Live) => {
                info!(code = %error.code, message = %error.message, "Recoverable pipeline error");
                self.reconnect();
            }
            Some(PlaybackMode::Vod) => {
                warn!(code = %error.code, message = %error.message, "VOD playback failed");
                self.events.emit(SessionEvent::Buffering { buffering: false });
                self.emit_error(EngineError::pipeline(error.code, error.message).to_string());
            }
            None => {}
        }
    }

    // Recovery

    /// Plan and schedule a full reopen. Live only; coalesces while a retry
    /// is already pending.
    fn reconnect(&mut self) {
        if self.mode != Some(PlaybackMode::Live) {
            debug!("Reconnect ignored outside live playback");
            return;
        }
        if self.timers.is_pending(TimerKind::Retry) {
            debug!("Reconnect already scheduled");
            return;
        }

        match self.retry.plan(&mut self.endpoints) {
            Ok(plan) => {
                if plan.wrapped {
                    self.emit_error(format!(
                        "All {} streams failed, restarting from the first",
                        self.endpoints.len()
                    ));
                }
                let url_label = self.endpoints.label(plan.index);
                info!(
                    attempt = plan.attempt,
                    url_index = plan.index,
                    cycle = plan.cycle,
                    delay_ms = plan.delay.as_millis() as u64,
                    "Reconnecting"
                );
                self.events.emit(SessionEvent::Retrying {
                    attempt: plan.attempt,
                    url_label,
                    cycle: plan.cycle,
                });
                self.timers.schedule(TimerKind::Retry, plan.delay);
                self.set_reconnect_pending(true);
            }
            Err(error) => {
                warn!(%error, "Reconnect impossible");
                self.close_source();
                self.emit_error(error.to_string());
            }
        }
    }

    /// Rewind slightly and re-prime in place.
    fn soft_recover(&mut self, rewind: Duration) {
        if self.timers.is_pending(TimerKind::Retry) {
            debug!("Soft recovery skipped, reconnect pending");
            return;
        }
        let Some(pipeline) = &self.pipeline else {
            return;
        };

        let position = pipeline.readout().position;
        let target = position.saturating_sub(rewind);
        info!(
            position_ms = position.as_millis() as u64,
            target_ms = target.as_millis() as u64,
            "Soft recovery"
        );
        pipeline.set_play_when_ready(false);
        pipeline.seek(target);
        pipeline.prepare();
        pipeline.set_play_when_ready(self.play_intent);
        self.emit_health_issue(String::from("Stream stalled, recovering"));
    }

    fn on_watchdog(&mut self, generation: PipelineGeneration, action: WatchdogAction) {
        if self.current_generation() != Some(generation) {
            trace!(%generation, ?action, "Stale watchdog action dropped");
            return;
        }

        match action {
            WatchdogAction::SoftRecover { rewind } => self.soft_recover(rewind),
            WatchdogAction::Reconnect { reason } => {
                info!(%reason, "Watchdog requested reconnect");
                self.reconnect();
            }
            WatchdogAction::HealthIssue { description } => self.emit_health_issue(description),
            WatchdogAction::BitrateChanged { bps } => {
                self.bitrate_bps = bps;
                self.events.emit(SessionEvent::BitrateChanged { bps });
            }
        }
    }

    fn on_timer(&mut self, kind: TimerKind) {
        trace!(%kind, "Timer fired");
        match kind {
            TimerKind::Retry => {
                if self.mode == Some(PlaybackMode::Live) {
                    self.open_current(None);
                }
            }
            TimerKind::CrossfadeSwap => {
                self.open_current(None);
            }
            TimerKind::ErrorClear => {
                self.error_visible = false;
                self.events.emit(SessionEvent::ErrorCleared);
            }
            TimerKind::HealthClear => {
                self.health_visible = false;
                self.events.emit(SessionEvent::HealthIssueCleared);
            }
            TimerKind::StabilityReset => self.levels.reward_stability(),
            TimerKind::Escalation => self.apply_escalation(),
        }
    }

    /// Debounce elapsed: move up and rebuild at the current position.
    fn apply_escalation(&mut self) {
        let Some(target) = self.pending_escalation.take() else {
            return;
        };
        if self.mode != Some(PlaybackMode::Live) || self.active.is_none() {
            return;
        }
        if !self.levels.escalate_to(target) {
            return;
        }
        self.emit_level_changed();

        let position = self
            .pipeline
            .as_ref()
            .map(|pipeline| pipeline.readout().position);
        self.replace_pipeline();
        self.open_current(position);
    }

    // Events

    fn emit_error(&mut self, message: String) {
        self.error_visible = true;
        self.events.emit(SessionEvent::Error { message });
        self.timers
            .schedule(TimerKind::ErrorClear, self.config.session.error_clear());
    }

    fn emit_health_issue(&mut self, description: String) {
        self.health_visible = true;
        self.events.emit(SessionEvent::HealthIssue { description });
        self.timers
            .schedule(TimerKind::HealthClear, self.config.session.advisory_clear());
    }

    fn emit_level_changed(&self) {
        self.events.emit(SessionEvent::BufferLevelChanged {
            label: self.levels.level().label().to_string(),
        });
    }

    /// Clear banners whose auto-clear timers were just cancelled.
    fn clear_advisories(&mut self) {
        if std::mem::take(&mut self.error_visible) {
            self.events.emit(SessionEvent::ErrorCleared);
        }
        if std::mem::take(&mut self.health_visible) {
            self.events.emit(SessionEvent::HealthIssueCleared);
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = SessionSnapshot {
            session_id: self.snapshot.borrow().session_id,
            state: self.state,
            mode: self.mode,
            buffer_level: self.levels.level(),
            active_index: self.active.map(|active| active.index),
            total_urls: self.endpoints.len(),
            active_url_label: self
                .active
                .map(|active| self.endpoints.label(active.index)),
            generation: self.current_generation(),
            retry_attempt: self.endpoints.retry_count(),
            rotation_cycle: self.endpoints.cycle(),
            bitrate_bps: self.bitrate_bps,
        };
        self.snapshot.send_replace(snapshot);
    }
}
