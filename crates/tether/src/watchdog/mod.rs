//! Health monitor watchdog.
//!
//! A fixed-interval tick inspects the pipeline readout and turns silent
//! failures into recovery actions:
//!
//! - buffer stall: loading without buffered progress past a threshold leads
//!   to a soft recovery (rewind and re-prime), then a full reconnect
//! - frozen position: playing but the position stopped moving
//! - zero bitrate: playing but no data arriving
//!
//! The decision logic lives in the pure [`HealthMonitor`]; the spawned task
//! only feeds it readouts and forwards its [`WatchdogAction`]s.

mod monitor;
mod state;
mod task;

pub use monitor::{HealthMonitor, StallReason, WatchdogAction};
pub use state::StallWatchdogState;
pub(crate) use task::{WatchTarget, WatchdogTask};
