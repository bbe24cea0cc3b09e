//! Watch descriptor bookkeeping and recursive watch installation.

use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, error};

use mirrorsync_types::EventKind;
use mirrorsync_watcher::{WatchId, WatchRegistrar};

use crate::pipeline::origin::OriginRegistry;

/// Maps a watch descriptor to every (origin, relative path) subscribed to it.
///
/// The same absolute directory reached from two source roots yields one
/// descriptor with two subscriptions. Entries are never removed while the
/// daemon runs; a deleted directory's descriptor simply goes quiet and late
/// events for it are dropped by the dispatcher.
#[derive(Debug, Default)]
pub struct WatchTable {
    entries: HashMap<WatchId, Vec<(usize, String)>>,
}

impl WatchTable {
    pub fn new() -> Self {
        WatchTable::default()
    }

    pub fn register(&mut self, wd: WatchId, origin_idx: usize, rel: String) {
        self.entries.entry(wd).or_default().push((origin_idx, rel));
    }

    pub fn lookup(&self, wd: WatchId) -> Option<&[(usize, String)]> {
        self.entries.get(&wd).map(|v| v.as_slice())
    }

    /// Number of distinct descriptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear()
    }
}

/// Install a watch on one directory of an origin and descend into its
/// current subdirectories.
///
/// `rel` is the directory's path relative to the origin's source root: empty
/// for the root itself, otherwise ending with `/`. Registration failure logs
/// an error and skips the subtree; the rest of the tree keeps working.
///
/// Warmstart origins (no startup command) enqueue an undelayed `Create` for
/// each directory so the first ticks reconcile whatever changed while the
/// daemon was down.
pub fn watch_directory(
    registry: &mut OriginRegistry,
    table: &mut WatchTable,
    registrar: &mut dyn WatchRegistrar,
    origin_idx: usize,
    rel: &str,
    now: Instant,
) {
    let abs = registry.get(origin_idx).source().join(rel);

    let Some(wd) = registrar.add_watch(&abs) else {
        error!("cannot watch {}; skipping subtree", abs.display());
        return;
    };
    table.register(wd, origin_idx, rel.to_string());
    debug!("watching {} as wd {}", abs.display(), wd);

    {
        let origin = registry.get_mut(origin_idx);
        if origin.config().startup.is_none() {
            origin.enqueue_undelayed(EventKind::Create, now, rel.to_string());
        }
    }

    for name in registrar.sub_dirs(&abs) {
        let child = format!("{rel}{name}/");
        watch_directory(registry, table, registrar, origin_idx, &child, now);
    }
}
