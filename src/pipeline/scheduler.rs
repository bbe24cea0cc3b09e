//! The per-tick scheduler: fires ripe delays into actions and reaps children.

use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::pipeline::origin::{OriginRegistry, Pid};

/// Run one scheduling pass over all origins, in registry order.
///
/// For each origin with free process capacity whose head delay is due, pop
/// the delay and invoke the action; a returned pid occupies a process slot
/// until [`collect_process`] frees it. At most `max_actions` invocations are
/// started per origin per tick.
pub fn tick(registry: &mut OriginRegistry, now: Instant) {
    for origin in registry.iter_mut() {
        let mut started = 0;
        while started < origin.config().max_actions {
            if !origin.has_capacity() {
                break;
            }
            let due = matches!(origin.delays().head(), Some(d) if d.deadline <= now);
            if !due {
                break;
            }
            let delay = origin.delays_mut().pop_head().expect("head was just observed");

            match origin.invoke_action(&delay) {
                Some(pid) if pid > 0 => {
                    debug!("spawned pid {} for {} {}", pid, delay.kind, delay.path);
                    origin.processes_mut().insert(pid, delay);
                }
                _ => {
                    // The action's own responsibility from here; no retry
                    warn!("action failed to start for {} {}", delay.kind, delay.path);
                }
            }
            started += 1;
        }
    }
}

/// The earliest deadline the host should sleep until.
///
/// Only origins that could actually run something contribute: an origin with
/// all process slots occupied is excluded, so a saturated origin does not
/// keep the host spinning.
pub fn earliest_alarm(registry: &OriginRegistry) -> Option<Instant> {
    registry
        .iter()
        .filter(|origin| origin.has_capacity())
        .filter_map(|origin| origin.delays().head().map(|d| d.deadline))
        .min()
}

/// Account for a finished child and free its process slot.
///
/// A non-zero exit is reported and forgotten; retrying is the action's
/// business, not the pipeline's. Returns whether the pid belonged to any
/// origin.
pub fn collect_process(registry: &mut OriginRegistry, pid: Pid, exitcode: i32) -> bool {
    for origin in registry.iter_mut() {
        if let Some(delay) = origin.processes_mut().remove(pid) {
            if exitcode == 0 {
                info!(
                    "child {} finished: {} {} -> {}",
                    pid,
                    delay.kind,
                    delay.path,
                    origin.target()
                );
            } else {
                error!(
                    "child {} for {} {} -> {} exited with code {}",
                    pid,
                    delay.kind,
                    delay.path,
                    origin.target(),
                    exitcode
                );
            }
            return true;
        }
    }
    warn!("collected unknown child pid {}", pid);
    false
}
