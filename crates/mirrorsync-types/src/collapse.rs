//! The collapse algebra: what happens when a second event arrives for a path
//! that already has a pending delay.

use std::collections::HashMap;
use std::str::FromStr;

use crate::event::EventKind;

/// Result of combining an older pending event with a newer one on the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Replace the older delay's kind in place; the newer event is dropped.
    /// The older delay keeps its queue position and deadline.
    Replace(EventKind),
    /// The two events annihilate; neither survives.
    Cancel,
    /// Keep both, the newer one behind the older.
    Stack,
}

impl FromStr for Outcome {
    type Err = String;

    /// Config-file spelling: `"cancel"`, `"stack"`, or a collapsible kind name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cancel" => Ok(Outcome::Cancel),
            "stack" => Ok(Outcome::Stack),
            other => {
                let kind = EventKind::from_str(other).map_err(|e| e.to_string())?;
                if kind.is_move() {
                    return Err(format!("move kind {} cannot be a collapse result", kind));
                }
                Ok(Outcome::Replace(kind))
            }
        }
    }
}

/// Total mapping `(older kind, newer kind) -> Outcome` over the collapsible
/// kinds. Any pair involving a move kind is forced to [`Outcome::Stack`]
/// regardless of table contents, so the from/to pairing is never merged away.
#[derive(Debug, Clone)]
pub struct CollapseTable {
    cells: HashMap<(EventKind, EventKind), Outcome>,
}

impl CollapseTable {
    /// Look up the outcome for an older/newer pair.
    ///
    /// Panics if called with a pair outside the table; the default table is
    /// total over the collapsible kinds and overrides can only replace cells,
    /// so this fires only on a programming error.
    pub fn lookup(&self, older: EventKind, newer: EventKind) -> Outcome {
        if older.is_move() || newer.is_move() {
            return Outcome::Stack;
        }
        *self
            .cells
            .get(&(older, newer))
            .unwrap_or_else(|| panic!("collapse table has no cell for ({older}, {newer})"))
    }

    /// Build a table from the default matrix plus per-cell overrides, as they
    /// appear in the config file: `{ "Create": { "Delete": "stack" } }`.
    pub fn with_overrides(
        spec: &HashMap<String, HashMap<String, String>>,
    ) -> Result<Self, String> {
        let mut table = Self::default();
        for (older_name, row) in spec {
            let older = parse_collapsible(older_name)?;
            for (newer_name, outcome) in row {
                let newer = parse_collapsible(newer_name)?;
                let outcome: Outcome = outcome.parse()?;
                table.cells.insert((older, newer), outcome);
            }
        }
        Ok(table)
    }
}

fn parse_collapsible(name: &str) -> Result<EventKind, String> {
    let kind = EventKind::from_str(name).map_err(|e| e.to_string())?;
    if kind.is_move() {
        return Err(format!(
            "collapse rules for move kind {} cannot be overridden; moves always stack",
            kind
        ));
    }
    Ok(kind)
}

impl Default for CollapseTable {
    /// The stock matrix. Reading across a row gives the outcome when `newer`
    /// arrives on top of `older`:
    ///
    /// | older \ newer | Attrib | Modify | Create | Delete |
    /// |---------------|--------|--------|--------|--------|
    /// | Attrib        | Attrib | Modify | Create | Delete |
    /// | Modify        | Modify | Modify | Create | Delete |
    /// | Create        | Create | Create | Create | cancel |
    /// | Delete        | Delete | Delete | Modify | Delete |
    fn default() -> Self {
        use EventKind::{Attrib, Create, Delete, Modify};
        use Outcome::{Cancel, Replace};

        let mut cells = HashMap::new();
        let mut row = |older: EventKind, outcomes: [Outcome; 4]| {
            for (newer, outcome) in [Attrib, Modify, Create, Delete].into_iter().zip(outcomes) {
                cells.insert((older, newer), outcome);
            }
        };

        row(Attrib, [Replace(Attrib), Replace(Modify), Replace(Create), Replace(Delete)]);
        row(Modify, [Replace(Modify), Replace(Modify), Replace(Create), Replace(Delete)]);
        row(Create, [Replace(Create), Replace(Create), Replace(Create), Cancel]);
        row(Delete, [Replace(Delete), Replace(Delete), Replace(Modify), Replace(Delete)]);

        CollapseTable { cells }
    }
}
