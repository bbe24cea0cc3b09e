//! The narrow view handed to user actions.

use std::path::{Path, PathBuf};

use mirrorsync_types::EventKind;

use crate::pipeline::delay::Delay;

/// What an action is allowed to see of one pending event: the event kind, the
/// path under the source root, and the same path appended to the target
/// identifier. Nothing else of the origin or queue is reachable, and the
/// borrow keeps an action from retaining the view past its invocation.
pub struct Inlet<'a> {
    source_root: &'a Path,
    target: &'a str,
    delay: &'a Delay,
}

impl<'a> Inlet<'a> {
    pub(crate) fn new(source_root: &'a Path, target: &'a str, delay: &'a Delay) -> Self {
        Inlet {
            source_root,
            target,
            delay,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.delay.kind
    }

    /// Path relative to the source root; directories end with `/`.
    pub fn path(&self) -> &str {
        &self.delay.path
    }

    /// Move destination, when the event is a paired move.
    pub fn path2(&self) -> Option<&str> {
        self.delay.path2.as_deref()
    }

    /// Absolute path of the event under the source root.
    pub fn source_path(&self) -> PathBuf {
        self.source_root.join(&self.delay.path)
    }

    /// Absolute path of the move destination under the source root.
    pub fn source_path2(&self) -> Option<PathBuf> {
        self.delay.path2.as_deref().map(|p| self.source_root.join(p))
    }

    /// The opaque target identifier with the relative path appended.
    pub fn target_path(&self) -> String {
        format!("{}{}", self.target, self.delay.path)
    }

    /// Target identifier plus the move destination path.
    pub fn target_path2(&self) -> Option<String> {
        self.delay
            .path2
            .as_deref()
            .map(|p| format!("{}{}", self.target, p))
    }
}
