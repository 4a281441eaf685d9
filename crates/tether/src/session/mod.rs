//! Session controller.
//!
//! A session is an actor task that owns the endpoint set, retry controller,
//! buffer-level machine and the active pipeline. Everything that can change
//! session state arrives through its mailbox:
//!
//! - commands from [`SessionHandle`]
//! - pipeline events, stamped with the generation of the open that produced them
//! - watchdog actions, stamped the same way
//! - elapsed timers (retry, crossfade, auto-clear, stability reset, escalation)
//!
//! Observers never touch that state. They receive [`SessionEvent`]s from the
//! event bus and immutable [`SessionSnapshot`]s.
//!
//! [`SessionEvent`]: crate::events::SessionEvent

mod actor;
mod handle;
mod messages;
mod state;
mod timers;

pub use handle::SessionHandle;
pub(crate) use messages::SessionMessage;
pub use state::{PlaybackMode, SessionSnapshot, SessionState, SessionStatus};
