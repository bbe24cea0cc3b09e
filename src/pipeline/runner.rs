//! The runner: the pipeline state machine the host drives through callbacks.
//!
//! All pipeline state lives here and is only ever touched from the host's
//! single event-loop task. The host calls `on_event` for each translated
//! watch event, `on_alarm` when the earliest deadline passes, and
//! `collect_process` when a child exits; between callbacks it sleeps no
//! longer than `earliest_alarm` allows.

use std::io::{self, Write};
use std::time::Instant;

use tracing::info;

use mirrorsync_types::{ConfigError, ConfigResult};
use mirrorsync_watcher::{WatchEvent, WatchRegistrar};

use crate::pipeline::dispatch;
use crate::pipeline::origin::{OriginRegistry, Pid};
use crate::pipeline::scheduler;
use crate::pipeline::watch::{watch_directory, WatchTable};

/// Lifecycle phase of the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Origins configured, watches not yet installed
    Configured,
    /// Watches installed, startup commands still running
    Startup,
    /// Normal operation
    Running,
}

/// What `initialize` hands back for the host to supervise: the pids of all
/// startup commands, in registry order. Empty means warmstart; the runner is
/// already running.
#[derive(Debug)]
pub struct StartupPlan {
    pub pids: Vec<Pid>,
}

pub struct Runner {
    registry: OriginRegistry,
    watches: WatchTable,
    phase: Phase,
}

impl Runner {
    pub fn new(registry: OriginRegistry) -> Self {
        Runner {
            registry,
            watches: WatchTable::new(),
            phase: Phase::Configured,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == Phase::Running
    }

    pub fn registry(&self) -> &OriginRegistry {
        &self.registry
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Install watches and launch startup commands.
    ///
    /// Re-resolves every source, resets queues and process tables, then walks
    /// each source tree installing watches (warmstart origins enqueue their
    /// reconciliation `Create`s along the way). Startup commands are spawned
    /// in registry order; the host must wait for all returned pids and call
    /// [`Runner::startup_complete`] once every one exited successfully.
    pub fn initialize(
        &mut self,
        registrar: &mut dyn WatchRegistrar,
        now: Instant,
    ) -> ConfigResult<StartupPlan> {
        if self.registry.is_empty() {
            return Err(ConfigError::NothingToWatch);
        }

        for origin in self.registry.iter_mut() {
            let canon = registrar.real_dir(origin.source()).ok_or_else(|| {
                ConfigError::UnresolvableSource {
                    path: origin.source().to_path_buf(),
                }
            })?;
            origin.set_source(canon);
            origin.reset();
        }

        self.watches.clear();
        for idx in 0..self.registry.len() {
            watch_directory(&mut self.registry, &mut self.watches, registrar, idx, "", now);
        }

        let mut pids = Vec::new();
        for origin in self.registry.iter_mut() {
            let target = origin.target().to_string();
            if let Some(result) = origin.run_startup() {
                match result {
                    Some(pid) if pid > 0 => {
                        info!("startup for {} running as pid {}", target, pid);
                        pids.push(pid);
                    }
                    _ => return Err(ConfigError::StartupSpawn { target }),
                }
            }
        }

        if pids.is_empty() {
            info!("warmstart: no startup commands, entering normal operation");
            self.phase = Phase::Running;
        } else {
            self.phase = Phase::Startup;
        }
        Ok(StartupPlan { pids })
    }

    /// All startup commands exited successfully; begin normal operation.
    pub fn startup_complete(&mut self) {
        info!("startup commands finished, entering normal operation");
        self.phase = Phase::Running;
    }

    /// One translated filesystem event arrived.
    pub fn on_event(
        &mut self,
        registrar: &mut dyn WatchRegistrar,
        event: &WatchEvent,
        now: Instant,
    ) {
        dispatch::on_event(&mut self.registry, &mut self.watches, registrar, event, now);
    }

    /// The earliest deadline passed; run a scheduling pass.
    pub fn on_alarm(&mut self, now: Instant) {
        if self.phase == Phase::Running {
            scheduler::tick(&mut self.registry, now);
        }
    }

    /// When the host should wake up next, if anything is pending.
    pub fn earliest_alarm(&self) -> Option<Instant> {
        if self.phase == Phase::Running {
            scheduler::earliest_alarm(&self.registry)
        } else {
            None
        }
    }

    /// A child of some origin exited.
    pub fn collect_process(&mut self, pid: Pid, exitcode: i32) -> bool {
        scheduler::collect_process(&mut self.registry, pid, exitcode)
    }

    /// Write a human-readable snapshot of queues, processes, and watches.
    pub fn status_report(&self, now: Instant, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "mirrorsync status report")?;
        writeln!(out)?;
        for origin in self.registry.iter() {
            writeln!(
                out,
                "origin {} -> {}",
                origin.source().display(),
                origin.target()
            )?;
            writeln!(out, "  pending delays: {}", origin.delays().pending())?;
            for delay in origin.delays().iter_pending() {
                let due = delay.deadline.saturating_duration_since(now);
                if due.is_zero() {
                    writeln!(out, "    {} {} (due now)", delay.kind, delay.path)?;
                } else {
                    writeln!(
                        out,
                        "    {} {} (due in {:.1}s)",
                        delay.kind,
                        delay.path,
                        due.as_secs_f64()
                    )?;
                }
            }
            writeln!(
                out,
                "  processes: {}/{}",
                origin.processes().len(),
                origin.config().max_processes
            )?;
            for (pid, delay) in origin.processes().iter() {
                writeln!(out, "    pid {} running {} {}", pid, delay.kind, delay.path)?;
            }
        }
        writeln!(out)?;
        writeln!(out, "watched directories: {}", self.watches.len())?;
        Ok(())
    }
}
