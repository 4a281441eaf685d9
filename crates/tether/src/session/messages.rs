//! Session actor mailbox.

use crate::pipeline::{PipelineEvent, PipelineGeneration};
use crate::watchdog::WatchdogAction;

use super::timers::TimerKind;

/// Everything the session actor reacts to.
///
/// Commands come from [`SessionHandle`](super::SessionHandle); pipeline and
/// watchdog messages carry the generation they were produced for, so the
/// actor can drop anything from a superseded source.
#[derive(Debug)]
pub(crate) enum SessionMessage {
    SetLiveUrls { urls: Vec<String>, crossfade: bool },
    SetVodUrl { url: String },
    Pause,
    Resume,
    SetVolume(f32),
    Stop,
    Release,
    Pipeline {
        generation: PipelineGeneration,
        event: PipelineEvent,
    },
    Watchdog {
        generation: PipelineGeneration,
        action: WatchdogAction,
    },
    /// A scheduled timer elapsed; `seq` identifies the scheduling.
    Timer { kind: TimerKind, seq: u64 },
}
