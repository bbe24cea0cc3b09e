//! Translation of wire events into per-origin enqueues.

use std::time::Instant;

use tracing::info;

use mirrorsync_types::EventKind;
use mirrorsync_watcher::{WatchEvent, WatchRegistrar};

use crate::pipeline::origin::OriginRegistry;
use crate::pipeline::watch::{watch_directory, WatchTable};

/// Fan one wire event out to every origin subscribed to its descriptor.
///
/// Events for descriptors the table does not know are dropped; that is the
/// normal fate of events still in flight for a directory that was deleted.
/// A directory appearing under a watched path (created, moved in) gets its
/// subtree watched immediately so nothing below it is missed.
pub fn on_event(
    registry: &mut OriginRegistry,
    table: &mut WatchTable,
    registrar: &mut dyn WatchRegistrar,
    event: &WatchEvent,
    now: Instant,
) {
    let Some(pairs) = table.lookup(event.wd) else {
        info!("dropping {} for stale watch descriptor {}", event.kind, event.wd);
        return;
    };
    // Recursive watch installation below mutates the table, so detach the
    // subscription list first.
    let pairs: Vec<(usize, String)> = pairs.to_vec();

    let name = decorate(&event.name, event.is_dir);
    let name2 = event.name2.as_deref().map(|n| decorate(n, event.is_dir));

    for (origin_idx, rel) in pairs {
        let path = format!("{rel}{name}");
        let path2 = name2.as_ref().map(|n2| format!("{rel}{n2}"));

        registry
            .get_mut(origin_idx)
            .enqueue(event.kind, now, path.clone(), path2.clone());

        if event.is_dir {
            match event.kind {
                EventKind::Create | EventKind::MoveTo => {
                    watch_directory(registry, table, registrar, origin_idx, &path, now);
                }
                EventKind::Move => {
                    if let Some(dest) = &path2 {
                        watch_directory(registry, table, registrar, origin_idx, dest, now);
                    }
                }
                _ => {}
            }
        }
    }
}

fn decorate(name: &str, is_dir: bool) -> String {
    if is_dir {
        format!("{name}/")
    } else {
        name.to_string()
    }
}
