//! The event pipeline: delay queues, origins, watch bookkeeping, scheduling.
//!
//! This module is organized into focused submodules:
//! - `delay` - per-origin delay queues and the collapse algebra
//! - `origin` - origins, their configuration, and the registry
//! - `inlet` - the restricted event view handed to actions
//! - `watch` - watch descriptor table and recursive watch installation
//! - `dispatch` - fan-out of wire events into per-origin enqueues
//! - `scheduler` - tick scheduling, alarm computation, child reaping
//! - `runner` - the callback facade the host drives

pub mod delay;
pub mod dispatch;
pub mod inlet;
pub mod origin;
pub mod runner;
pub mod scheduler;
pub mod watch;

pub use delay::{Delay, DelayQueue};
pub use inlet::Inlet;
pub use origin::{Action, Origin, OriginConfig, OriginRegistry, Pid, ProcessTable, StartupAction};
pub use runner::{Phase, Runner, StartupPlan};
pub use watch::WatchTable;
