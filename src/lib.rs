//! mirrorsync: live directory mirroring daemon.
//!
//! Watches one or more source trees for filesystem changes, coalesces the
//! resulting events through per-origin delay queues, and drives external
//! sync commands to reflect the changes at each origin's target.

pub mod cli;
pub mod config;
pub mod host;
pub mod pipeline;
pub mod process;
