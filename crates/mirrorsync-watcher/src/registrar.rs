//! The registrar abstraction the pipeline watches directories through.

use std::path::{Path, PathBuf};

use mirrorsync_types::EventKind;

/// Opaque identifier for one watched directory.
///
/// Descriptors are allocated by the registrar and never reused. A deleted
/// directory keeps its descriptor; the backend just stops delivering events
/// for it and the pipeline drops anything that still arrives.
pub type WatchId = i32;

/// One translated filesystem event, addressed by watch descriptor.
///
/// `name` is the entry name within the watched directory, without any path
/// separators. `name2` is set only for `Move`: the destination name within
/// the same directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub wd: WatchId,
    pub is_dir: bool,
    pub name: String,
    pub name2: Option<String>,
}

/// Watch registration and directory enumeration.
///
/// The production implementation wraps `notify`; tests substitute an
/// in-memory tree so the pipeline can be exercised without a filesystem.
pub trait WatchRegistrar {
    /// Register `abs` for watching and return its descriptor, or `None` when
    /// the backend refuses (permissions, watch limit). Registering the same
    /// directory twice returns the same descriptor.
    fn add_watch(&mut self, abs: &Path) -> Option<WatchId>;

    /// Names of the immediate subdirectories of `abs`. Symlinks are not
    /// followed. Enumeration failure reads as an empty directory.
    fn sub_dirs(&self, abs: &Path) -> Vec<String>;

    /// Resolve `path` to a canonical absolute directory, or `None` when it
    /// does not exist or is not a directory.
    fn real_dir(&self, path: &Path) -> Option<PathBuf>;
}
