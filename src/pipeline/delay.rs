//! Per-origin delay queues.
//!
//! A delay is one pending filesystem event waiting out its debounce deadline.
//! The queue is two structures kept in step: the arrival-ordered sequence
//! (head fires next) and a path index used to find the delay a newer event
//! on the same path should combine with. Combining follows the collapse
//! table; move kinds never combine and are stacked behind the older delay,
//! where they are findable only by scanning the sequence.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use tracing::{debug, info};

use mirrorsync_types::{CollapseTable, EventKind, Outcome};

/// Stable identity of a delay within its queue.
pub type DelayId = u64;

/// One pending event.
///
/// `kind` is the only field that changes after insertion: a collapse rewrites
/// it in place and a mutual cancellation tombstones it to `EventKind::None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delay {
    pub kind: EventKind,
    /// Path relative to the origin's source root; directories end with `/`
    pub path: String,
    /// Move destination, relative like `path`
    pub path2: Option<String>,
    pub deadline: Instant,
}

/// Arrival-ordered queue of delays with a path index for collapsing.
#[derive(Debug, Default)]
pub struct DelayQueue {
    seq: VecDeque<DelayId>,
    delays: HashMap<DelayId, Delay>,
    by_path: HashMap<String, DelayId>,
    next_id: DelayId,
}

impl DelayQueue {
    pub fn new() -> Self {
        DelayQueue::default()
    }

    /// Insert a new event, combining with any pending delay on the same path.
    ///
    /// Never fails. Feeding the tombstone kind is a programming error and
    /// panics.
    pub fn insert(
        &mut self,
        table: &CollapseTable,
        kind: EventKind,
        deadline: Instant,
        path: String,
        path2: Option<String>,
    ) {
        assert!(
            kind != EventKind::None,
            "tombstone kind cannot be enqueued (path {path})"
        );

        let Some(&old_id) = self.by_path.get(&path) else {
            self.push_new(kind, deadline, path, path2, true);
            return;
        };

        let old_kind = self.delays[&old_id].kind;
        if kind.is_move() || old_kind.is_move() {
            // Moves never merge; keep both so from/to pairing survives. The
            // index stays on the older delay, the newer is reachable by scan.
            info!("stacking {} on pending {} for {}", kind, old_kind, path);
            self.push_new(kind, deadline, path, path2, false);
            return;
        }

        match table.lookup(old_kind, kind) {
            Outcome::Cancel => {
                debug!("{} cancels pending {} for {}", kind, old_kind, path);
                if let Some(old) = self.delays.get_mut(&old_id) {
                    old.kind = EventKind::None;
                }
                self.by_path.remove(&path);
            }
            Outcome::Stack => {
                debug!("stacking {} on pending {} for {}", kind, old_kind, path);
                self.push_new(kind, deadline, path, path2, false);
            }
            Outcome::Replace(collapsed) => {
                debug!(
                    "collapsing {} into pending {} for {} as {}",
                    kind, old_kind, path, collapsed
                );
                // The older delay keeps its position and deadline
                if let Some(old) = self.delays.get_mut(&old_id) {
                    old.kind = collapsed;
                }
            }
        }
    }

    fn push_new(
        &mut self,
        kind: EventKind,
        deadline: Instant,
        path: String,
        path2: Option<String>,
        index: bool,
    ) {
        let id = self.next_id;
        self.next_id += 1;
        if index {
            self.by_path.insert(path.clone(), id);
        }
        self.delays.insert(
            id,
            Delay {
                kind,
                path,
                path2,
                deadline,
            },
        );
        self.seq.push_back(id);
    }

    /// The next delay to fire, skipping tombstones.
    pub fn head(&self) -> Option<&Delay> {
        self.seq
            .iter()
            .filter_map(|id| self.delays.get(id))
            .find(|d| d.kind != EventKind::None)
    }

    /// Remove and return the head delay, discarding tombstones on the way.
    pub fn pop_head(&mut self) -> Option<Delay> {
        while let Some(id) = self.seq.pop_front() {
            let Some(delay) = self.delays.remove(&id) else {
                continue;
            };
            if delay.kind == EventKind::None {
                continue;
            }
            if self.by_path.get(&delay.path) == Some(&id) {
                self.by_path.remove(&delay.path);
            }
            return Some(delay);
        }
        None
    }

    /// Count of live (non-tombstone) delays.
    pub fn pending(&self) -> usize {
        self.delays
            .values()
            .filter(|d| d.kind != EventKind::None)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }

    /// Live delays in firing order, for status reporting.
    pub fn iter_pending(&self) -> impl Iterator<Item = &Delay> {
        self.seq
            .iter()
            .filter_map(|id| self.delays.get(id))
            .filter(|d| d.kind != EventKind::None)
    }

    /// Drop everything, for re-initialization.
    pub fn clear(&mut self) {
        self.seq.clear();
        self.delays.clear();
        self.by_path.clear();
    }

    #[cfg(test)]
    fn assert_consistent(&self) {
        for (path, id) in &self.by_path {
            let delay = self.delays.get(id).expect("index points at a live delay");
            assert_eq!(&delay.path, path);
            assert_ne!(delay.kind, EventKind::None, "index never points at a tombstone");
            assert!(self.seq.contains(id));
        }
    }
}
