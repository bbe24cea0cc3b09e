//! Origins: one configured source tree bound to one target identifier.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::debug;

use mirrorsync_types::{CollapseTable, ConfigError, ConfigResult, EventKind};
use mirrorsync_watcher::WatchRegistrar;

use crate::pipeline::delay::{Delay, DelayQueue};
use crate::pipeline::inlet::Inlet;

/// Child process identifier as returned by actions.
pub type Pid = u32;

/// A user-supplied action: receives the event view, spawns whatever external
/// command mirrors it, and returns the child's pid, or `None` when spawning
/// failed.
pub type Action = Box<dyn FnMut(&Inlet<'_>) -> Option<Pid>>;

/// A startup command: receives source root and target identifier, spawns the
/// initial full sync, and returns the child's pid.
pub type StartupAction = Box<dyn FnMut(&Path, &str) -> Option<Pid>>;

/// Fully-resolved per-origin configuration.
///
/// Option resolution (entry over defaults over builtins) happens in the
/// config layer; by the time an `OriginConfig` exists every field is final.
pub struct OriginConfig {
    /// Debounce: events wait this long before becoming eligible to fire
    pub delay: Duration,
    /// Cap on concurrently running child processes
    pub max_processes: usize,
    /// Cap on action invocations started within one scheduler tick
    pub max_actions: usize,
    /// Whether the action understands paired moves; without this, a `Move`
    /// is decomposed into `Delete` + `Create` at enqueue time
    pub move_handler: bool,
    pub collapse: CollapseTable,
    pub action: Action,
    pub startup: Option<StartupAction>,
}

/// In-flight children of one origin, keyed by pid.
#[derive(Debug, Default)]
pub struct ProcessTable {
    inner: HashMap<Pid, Delay>,
}

impl ProcessTable {
    pub fn insert(&mut self, pid: Pid, delay: Delay) {
        self.inner.insert(pid, delay);
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Delay> {
        self.inner.remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn clear(&mut self) {
        self.inner.clear()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Pid, &Delay)> {
        self.inner.iter()
    }
}

/// One source tree mirrored to one target.
pub struct Origin {
    source: PathBuf,
    target: String,
    config: OriginConfig,
    delays: DelayQueue,
    processes: ProcessTable,
}

impl Origin {
    pub fn new(source: PathBuf, target: String, config: OriginConfig) -> Self {
        Origin {
            source,
            target,
            config,
            delays: DelayQueue::new(),
            processes: ProcessTable::default(),
        }
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn config(&self) -> &OriginConfig {
        &self.config
    }

    pub fn delays(&self) -> &DelayQueue {
        &self.delays
    }

    pub fn delays_mut(&mut self) -> &mut DelayQueue {
        &mut self.delays
    }

    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    pub fn processes_mut(&mut self) -> &mut ProcessTable {
        &mut self.processes
    }

    /// Whether another child may be spawned right now.
    pub fn has_capacity(&self) -> bool {
        self.processes.len() < self.config.max_processes
    }

    pub(crate) fn set_source(&mut self, source: PathBuf) {
        self.source = source;
    }

    /// Drop queued delays and forget in-flight children, for initialization.
    pub(crate) fn reset(&mut self) {
        self.delays.clear();
        self.processes.clear();
    }

    /// Accept one event with the configured debounce applied.
    ///
    /// A `Move` on an origin whose action has no move handling decomposes
    /// into `Delete` of the old path followed by `Create` of the new one.
    pub fn enqueue(&mut self, kind: EventKind, now: Instant, path: String, path2: Option<String>) {
        if kind == EventKind::Move && !self.config.move_handler {
            debug!("decomposing move {} -> {:?} for {}", path, path2, self.target);
            self.enqueue(EventKind::Delete, now, path, None);
            if let Some(dest) = path2 {
                self.enqueue(EventKind::Create, now, dest, None);
            }
            return;
        }
        let deadline = now + self.config.delay;
        self.delays
            .insert(&self.config.collapse, kind, deadline, path, path2);
    }

    /// Accept one event with no debounce; fires at the next tick.
    ///
    /// Used for the synthesized `Create` events of a warmstart, where waiting
    /// out a debounce would only postpone the reconciliation sync.
    pub fn enqueue_undelayed(&mut self, kind: EventKind, now: Instant, path: String) {
        self.delays
            .insert(&self.config.collapse, kind, now, path, None);
    }

    /// Run the action for one popped delay, returning the child pid.
    pub(crate) fn invoke_action(&mut self, delay: &Delay) -> Option<Pid> {
        let inlet = Inlet::new(&self.source, &self.target, delay);
        (self.config.action)(&inlet)
    }

    /// Run the startup command, if one is configured.
    ///
    /// Returns `None` when the origin has no startup command (warmstart),
    /// `Some(pid)` otherwise.
    pub(crate) fn run_startup(&mut self) -> Option<Option<Pid>> {
        let startup = self.config.startup.as_mut()?;
        Some(startup(&self.source, &self.target))
    }
}

/// Ordered set of all configured origins.
///
/// Append-only during configuration, fixed in membership afterwards. Origins
/// are addressed by index; iteration follows configuration order.
#[derive(Default)]
pub struct OriginRegistry {
    origins: Vec<Origin>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        OriginRegistry::default()
    }

    /// Resolve `source` and append a new origin.
    ///
    /// An unresolvable source is a configuration error; the caller aborts.
    pub fn add(
        &mut self,
        source: &Path,
        target: impl Into<String>,
        config: OriginConfig,
        registrar: &dyn WatchRegistrar,
    ) -> ConfigResult<()> {
        let canon = registrar
            .real_dir(source)
            .ok_or_else(|| ConfigError::UnresolvableSource {
                path: source.to_path_buf(),
            })?;
        self.origins.push(Origin::new(canon, target.into(), config));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    pub fn get(&self, idx: usize) -> &Origin {
        &self.origins[idx]
    }

    pub fn get_mut(&mut self, idx: usize) -> &mut Origin {
        &mut self.origins[idx]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Origin> {
        self.origins.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Origin> {
        self.origins.iter_mut()
    }
}
