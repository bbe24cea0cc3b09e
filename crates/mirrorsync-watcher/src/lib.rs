//! Watch backend plumbing for mirrorsync.
//!
//! The pipeline core only ever talks to a [`WatchRegistrar`]: something that
//! can register a directory for watching, enumerate subdirectories, and
//! resolve paths. This crate provides that abstraction plus the production
//! implementation backed by the `notify` crate, which allocates watch
//! descriptors and translates raw `notify` events into the pipeline's wire
//! events.

pub mod bridge;
pub mod registrar;

pub use bridge::{NotifyRegistrar, Translated, WdMap};
pub use registrar::{WatchEvent, WatchId, WatchRegistrar};
