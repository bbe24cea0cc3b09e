//! Bridge from raw `notify` events to pipeline wire events.
//!
//! `notify` delivers absolute paths; the pipeline wants (descriptor, name)
//! pairs. The bridge keeps a directory-to-descriptor map, allocates
//! descriptors on registration, and resolves each event path back to the
//! descriptor of its parent directory. Rename events are re-expressed in the
//! pipeline's vocabulary: a same-directory rename becomes one `Move`, a
//! cross-directory rename splits into `MoveFrom` and `MoveTo`.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, EventKind as NotifyKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mirrorsync_types::EventKind;

use crate::registrar::{WatchEvent, WatchId, WatchRegistrar};

/// Directory-to-descriptor map with sequential allocation.
#[derive(Debug, Default)]
pub struct WdMap {
    by_dir: HashMap<PathBuf, WatchId>,
    next: WatchId,
}

/// Outcome of translating one raw event.
#[derive(Debug, Default)]
pub struct Translated {
    pub events: Vec<WatchEvent>,
    /// The backend's event queue overflowed and a rescan is needed.
    pub overflow: bool,
}

impl WdMap {
    pub fn new() -> Self {
        WdMap {
            by_dir: HashMap::new(),
            next: 1,
        }
    }

    pub fn get(&self, dir: &Path) -> Option<WatchId> {
        self.by_dir.get(dir).copied()
    }

    /// Allocate a descriptor for `dir`, or return the existing one.
    pub fn allocate(&mut self, dir: PathBuf) -> WatchId {
        if let Some(wd) = self.by_dir.get(&dir) {
            return *wd;
        }
        let wd = self.next;
        self.next += 1;
        self.by_dir.insert(dir, wd);
        wd
    }

    pub fn len(&self) -> usize {
        self.by_dir.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_dir.is_empty()
    }

    /// Translate one raw `notify` event into zero or more wire events.
    ///
    /// Paths whose parent directory is not watched are dropped with a debug
    /// log; that covers events racing in before their directory's watch was
    /// installed.
    pub fn translate(&self, event: &Event) -> Translated {
        let mut out = Translated::default();

        if event.need_rescan() {
            out.overflow = true;
            return out;
        }

        match &event.kind {
            NotifyKind::Create(kind) => {
                for path in &event.paths {
                    let is_dir = match kind {
                        CreateKind::Folder => true,
                        CreateKind::File => false,
                        _ => path.is_dir(),
                    };
                    self.push_simple(&mut out, EventKind::Create, is_dir, path);
                }
            }
            NotifyKind::Remove(kind) => {
                for path in &event.paths {
                    // The path is already gone; only the backend knows whether
                    // it was a directory.
                    let is_dir = matches!(kind, RemoveKind::Folder);
                    self.push_simple(&mut out, EventKind::Delete, is_dir, path);
                }
            }
            NotifyKind::Modify(ModifyKind::Metadata(_)) => {
                for path in &event.paths {
                    self.push_simple(&mut out, EventKind::Attrib, path.is_dir(), path);
                }
            }
            NotifyKind::Modify(ModifyKind::Name(mode)) => {
                self.translate_rename(&mut out, *mode, &event.paths);
            }
            NotifyKind::Modify(_) => {
                for path in &event.paths {
                    self.push_simple(&mut out, EventKind::Modify, path.is_dir(), path);
                }
            }
            NotifyKind::Access(_) | NotifyKind::Any | NotifyKind::Other => {}
        }

        out
    }

    fn translate_rename(&self, out: &mut Translated, mode: RenameMode, paths: &[PathBuf]) {
        match mode {
            RenameMode::From => {
                if let Some(path) = paths.first() {
                    self.push_simple(out, EventKind::MoveFrom, false, path);
                }
            }
            RenameMode::To => {
                if let Some(path) = paths.first() {
                    self.push_simple(out, EventKind::MoveTo, path.is_dir(), path);
                }
            }
            RenameMode::Both => {
                let (Some(from), Some(to)) = (paths.first(), paths.get(1)) else {
                    return;
                };
                let from_wd = from.parent().and_then(|d| self.get(d));
                let to_wd = to.parent().and_then(|d| self.get(d));
                match (from_wd, to_wd) {
                    (Some(a), Some(b)) if a == b => {
                        // Same directory on both sides: one paired move
                        let (Some(name), Some(name2)) = (entry_name(from), entry_name(to)) else {
                            return;
                        };
                        out.events.push(WatchEvent {
                            kind: EventKind::Move,
                            wd: a,
                            is_dir: to.is_dir(),
                            name,
                            name2: Some(name2),
                        });
                    }
                    _ => {
                        // Different directories (or one side unwatched):
                        // deliver whichever halves we can address
                        self.push_simple(out, EventKind::MoveFrom, false, from);
                        self.push_simple(out, EventKind::MoveTo, to.is_dir(), to);
                    }
                }
            }
            RenameMode::Any | RenameMode::Other => {
                // Backend could not tell the direction; go by what exists now
                for path in paths {
                    if path.exists() {
                        self.push_simple(out, EventKind::Create, path.is_dir(), path);
                    } else {
                        self.push_simple(out, EventKind::Delete, false, path);
                    }
                }
            }
        }
    }

    fn push_simple(&self, out: &mut Translated, kind: EventKind, is_dir: bool, path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        let Some(wd) = self.get(parent) else {
            debug!("dropping {} for unwatched directory {}", kind, parent.display());
            return;
        };
        let Some(name) = entry_name(path) else {
            return;
        };
        out.events.push(WatchEvent {
            kind,
            wd,
            is_dir,
            name,
            name2: None,
        });
    }
}

fn entry_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

/// Production registrar: a `notify` watcher plus the descriptor map.
///
/// Raw events are forwarded from the watcher's callback thread over the
/// supplied channel; the owning event loop calls [`NotifyRegistrar::translate`]
/// on its own thread, so the descriptor map needs no locking.
pub struct NotifyRegistrar {
    watcher: RecommendedWatcher,
    map: WdMap,
}

impl NotifyRegistrar {
    pub fn new(tx: mpsc::Sender<notify::Result<Event>>) -> notify::Result<Self> {
        let watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.blocking_send(res);
            },
            Config::default(),
        )?;
        Ok(NotifyRegistrar {
            watcher,
            map: WdMap::new(),
        })
    }

    pub fn translate(&self, event: &Event) -> Translated {
        self.map.translate(event)
    }

    /// Number of distinct directories currently watched.
    pub fn watch_count(&self) -> usize {
        self.map.len()
    }
}

impl WatchRegistrar for NotifyRegistrar {
    fn add_watch(&mut self, abs: &Path) -> Option<WatchId> {
        if let Some(wd) = self.map.get(abs) {
            return Some(wd);
        }
        match self.watcher.watch(abs, RecursiveMode::NonRecursive) {
            Ok(()) => Some(self.map.allocate(abs.to_path_buf())),
            Err(e) => {
                warn!("failed to watch {}: {}", abs.display(), e);
                None
            }
        }
    }

    fn sub_dirs(&self, abs: &Path) -> Vec<String> {
        let Ok(entries) = fs::read_dir(abs) else {
            return Vec::new();
        };
        let mut dirs = Vec::new();
        for entry in entries.flatten() {
            // file_type does not follow symlinks, so symlinked trees are not descended
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        dirs.sort();
        dirs
    }

    fn real_dir(&self, path: &Path) -> Option<PathBuf> {
        let canon = fs::canonicalize(path).ok()?;
        canon.is_dir().then_some(canon)
    }
}
