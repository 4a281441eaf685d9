//! In-memory pipeline driven by a script.
//!
//! [`ScriptedPipeline`] records every command it receives and reports the
//! states its [`OpenOutcome`] responder dictates. It backs the engine tests
//! and the `tether simulate` scenarios.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::{
    MediaPipeline, OpenRequest, PipelineError, PipelineEvents, PipelineFactory, PipelineGeneration,
    PipelineReadout, PlaybackState,
};
use crate::buffer_level::BufferTuning;

/// A command received by a [`ScriptedPipeline`].
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineCall {
    Open(OpenRequest),
    Prepare,
    Seek(Duration),
    Stop,
    Release,
    SetPlayWhenReady(bool),
    SetVolume(f32),
}

/// How a scripted pipeline reacts to `open`.
#[derive(Debug, Clone, PartialEq)]
pub enum OpenOutcome {
    /// Report nothing; the caller drives states by hand.
    Manual,
    /// Buffer, then play at the given bitrate.
    Play { bitrate_bps: u64 },
    /// Buffer, then fail.
    Fail(PipelineError),
    /// Buffer forever with the buffered position stuck.
    Stall { buffered: Duration },
    /// Buffer, play, then report the end of the stream.
    End,
}

type Responder = Arc<dyn Fn(&OpenRequest) -> OpenOutcome + Send + Sync>;

#[derive(Debug)]
struct ScriptedInner {
    calls: Vec<PipelineCall>,
    events: Option<PipelineEvents>,
    readout: PipelineReadout,
    volume: f32,
    released: bool,
}

/// A [`MediaPipeline`] that plays nothing and remembers everything.
pub struct ScriptedPipeline {
    id: usize,
    tuning: BufferTuning,
    responder: Option<Responder>,
    inner: Mutex<ScriptedInner>,
}

impl fmt::Debug for ScriptedPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedPipeline")
            .field("id", &self.id)
            .field("tuning", &self.tuning)
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl ScriptedPipeline {
    pub fn new(id: usize, tuning: BufferTuning) -> Self {
        Self {
            id,
            tuning,
            responder: None,
            inner: Mutex::new(ScriptedInner {
                calls: Vec::new(),
                events: None,
                readout: PipelineReadout::default(),
                volume: 1.0,
                released: false,
            }),
        }
    }

    fn with_responder(mut self, responder: Option<Responder>) -> Self {
        self.responder = responder;
        self
    }

    /// Creation order within the factory, starting at 0.
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn tuning(&self) -> BufferTuning {
        self.tuning
    }

    pub fn calls(&self) -> Vec<PipelineCall> {
        self.inner.lock().calls.clone()
    }

    /// URLs passed to `open`, in order.
    pub fn opened_urls(&self) -> Vec<String> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PipelineCall::Open(request) => Some(request.url.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.opened_urls().len()
    }

    pub fn last_open(&self) -> Option<OpenRequest> {
        self.inner.lock().calls.iter().rev().find_map(|call| match call {
            PipelineCall::Open(request) => Some(request.clone()),
            _ => None,
        })
    }

    pub fn seeks(&self) -> Vec<Duration> {
        self.inner
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                PipelineCall::Seek(position) => Some(*position),
                _ => None,
            })
            .collect()
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().released
    }

    /// Generation of the sink from the latest `open`.
    pub fn generation(&self) -> Option<PipelineGeneration> {
        self.inner.lock().events.as_ref().map(PipelineEvents::generation)
    }

    /// Sink from the latest `open`; clones keep reporting with that generation.
    pub fn events(&self) -> Option<PipelineEvents> {
        self.inner.lock().events.clone()
    }

    /// Report a state change through the latest sink.
    pub fn emit_state(&self, state: PlaybackState) {
        let events = {
            let mut inner = self.inner.lock();
            inner.readout.state = state;
            inner.events.clone()
        };
        if let Some(events) = events {
            events.state_changed(state);
        }
    }

    pub fn emit_error(&self, error: PipelineError) {
        let events = self.inner.lock().events.clone();
        if let Some(events) = events {
            events.error(error);
        }
    }

    /// Replace the readout returned to the watchdog and status queries.
    pub fn set_readout(&self, readout: PipelineReadout) {
        self.inner.lock().readout = readout;
    }

    pub fn update_readout(&self, update: impl FnOnce(&mut PipelineReadout)) {
        update(&mut self.inner.lock().readout);
    }

    fn respond(&self, request: &OpenRequest, events: &PipelineEvents) {
        let Some(responder) = &self.responder else {
            return;
        };
        let outcome = responder(request);
        trace!(id = self.id, url = %request.url, ?outcome, "Scripted open");

        match outcome {
            OpenOutcome::Manual => {}
            OpenOutcome::Play { bitrate_bps } => {
                self.update_readout(|readout| {
                    readout.state = PlaybackState::Ready;
                    readout.is_loading = false;
                    readout.bitrate_bps = bitrate_bps;
                });
                events.state_changed(PlaybackState::Buffering);
                events.state_changed(PlaybackState::Ready);
            }
            OpenOutcome::Fail(error) => {
                self.update_readout(|readout| {
                    readout.state = PlaybackState::Idle;
                    readout.is_loading = false;
                });
                events.state_changed(PlaybackState::Buffering);
                events.error(error);
            }
            OpenOutcome::Stall { buffered } => {
                self.update_readout(|readout| {
                    readout.state = PlaybackState::Buffering;
                    readout.is_loading = true;
                    readout.buffered_position = buffered;
                    readout.bitrate_bps = 0;
                });
                events.state_changed(PlaybackState::Buffering);
            }
            OpenOutcome::End => {
                self.update_readout(|readout| {
                    readout.state = PlaybackState::Ended;
                    readout.is_loading = false;
                });
                events.state_changed(PlaybackState::Buffering);
                events.state_changed(PlaybackState::Ready);
                events.state_changed(PlaybackState::Ended);
            }
        }
    }
}

impl MediaPipeline for ScriptedPipeline {
    fn open(&self, request: OpenRequest, events: PipelineEvents) {
        {
            let mut inner = self.inner.lock();
            inner.calls.push(PipelineCall::Open(request.clone()));
            inner.events = Some(events.clone());
            inner.readout = PipelineReadout {
                play_when_ready: inner.readout.play_when_ready,
                has_media_item: true,
                position: request.start_position.unwrap_or_default(),
                ..Default::default()
            };
        }
        self.respond(&request, &events);
    }

    fn prepare(&self) {
        self.inner.lock().calls.push(PipelineCall::Prepare);
    }

    fn seek(&self, position: Duration) {
        let mut inner = self.inner.lock();
        inner.calls.push(PipelineCall::Seek(position));
        inner.readout.position = position;
    }

    fn stop(&self) {
        let mut inner = self.inner.lock();
        inner.calls.push(PipelineCall::Stop);
        inner.readout.state = PlaybackState::Idle;
        inner.readout.is_loading = false;
        inner.readout.has_media_item = false;
    }

    fn release(&self) {
        let mut inner = self.inner.lock();
        inner.calls.push(PipelineCall::Release);
        inner.released = true;
        inner.events = None;
    }

    fn set_play_when_ready(&self, play: bool) {
        let mut inner = self.inner.lock();
        inner.calls.push(PipelineCall::SetPlayWhenReady(play));
        inner.readout.play_when_ready = play;
    }

    fn volume(&self) -> f32 {
        self.inner.lock().volume
    }

    fn set_volume(&self, volume: f32) {
        let mut inner = self.inner.lock();
        inner.calls.push(PipelineCall::SetVolume(volume));
        inner.volume = volume;
    }

    fn readout(&self) -> PipelineReadout {
        self.inner.lock().readout.clone()
    }
}

/// Factory handing out [`ScriptedPipeline`]s and keeping them for inspection.
#[derive(Default)]
pub struct ScriptedFactory {
    responder: Option<Responder>,
    created: Mutex<Vec<Arc<ScriptedPipeline>>>,
}

impl fmt::Debug for ScriptedFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedFactory")
            .field("created", &self.created.lock().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedFactory {
    /// Pipelines that wait for the caller to report every state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipelines that react to `open` as `responder` decides.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&OpenRequest) -> OpenOutcome + Send + Sync + 'static,
    {
        Self {
            responder: Some(Arc::new(responder)),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn pipelines(&self) -> Vec<Arc<ScriptedPipeline>> {
        self.created.lock().clone()
    }

    pub fn latest(&self) -> Option<Arc<ScriptedPipeline>> {
        self.created.lock().last().cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn tunings(&self) -> Vec<BufferTuning> {
        self.created.lock().iter().map(|pipeline| pipeline.tuning()).collect()
    }
}

impl PipelineFactory for ScriptedFactory {
    fn create(&self, tuning: BufferTuning) -> Arc<dyn MediaPipeline> {
        let mut created = self.created.lock();
        let pipeline = Arc::new(
            ScriptedPipeline::new(created.len(), tuning).with_responder(self.responder.clone()),
        );
        created.push(pipeline.clone());
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::buffer_level::BufferLevel;
    use crate::pipeline::{PipelineErrorCode, PipelineEvent};
    use crate::session::SessionMessage;

    fn request(url: &str) -> OpenRequest {
        OpenRequest {
            url: url.to_string(),
            is_live: true,
            live_latency_target: None,
            start_position: None,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SessionMessage>) -> Vec<(PipelineGeneration, PipelineEvent)> {
        let mut events = Vec::new();
        while let Ok(message) = rx.try_recv() {
            if let SessionMessage::Pipeline { generation, event } = message {
                events.push((generation, event));
            }
        }
        events
    }

    #[test]
    fn records_calls_and_stamps_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = ScriptedFactory::new();
        factory.create(BufferLevel::High.tuning());
        let pipeline = factory.latest().unwrap();

        pipeline.open(request("a"), PipelineEvents::new(PipelineGeneration(4), tx));
        pipeline.seek(Duration::from_secs(3));
        pipeline.emit_state(PlaybackState::Ready);

        assert_eq!(pipeline.opened_urls(), vec!["a".to_string()]);
        assert_eq!(pipeline.seeks(), vec![Duration::from_secs(3)]);
        assert_eq!(pipeline.readout().state, PlaybackState::Ready);
        assert_eq!(
            drain(&mut rx),
            vec![(
                PipelineGeneration(4),
                PipelineEvent::StateChanged(PlaybackState::Ready)
            )]
        );
    }

    #[test]
    fn responder_drives_failure() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = ScriptedFactory::with_responder(|request| {
            if request.url == "bad" {
                OpenOutcome::Fail(PipelineError::new(PipelineErrorCode::BadHttpStatus, "404"))
            } else {
                OpenOutcome::Play { bitrate_bps: 800_000 }
            }
        });
        let pipeline = factory.create(BufferLevel::Normal.tuning());

        pipeline.open(request("bad"), PipelineEvents::new(PipelineGeneration(1), tx.clone()));
        let events = drain(&mut rx);
        assert!(matches!(events.last(), Some((_, PipelineEvent::Error(_)))));

        pipeline.open(request("good"), PipelineEvents::new(PipelineGeneration(2), tx));
        let events = drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&(
                PipelineGeneration(2),
                PipelineEvent::StateChanged(PlaybackState::Ready)
            ))
        );
        assert_eq!(pipeline.readout().bitrate_bps, 800_000);
        assert!(!pipeline.readout().is_stalled_loading());
        assert_eq!(factory.tunings(), vec![BufferLevel::Normal.tuning()]);
    }
}
