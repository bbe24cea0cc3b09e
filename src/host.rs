//! The blocking event-loop host that drives the runner.
//!
//! One task owns the runner, the registrar, and both inbound channels, and
//! multiplexes: translated watch events, child exits, the earliest-alarm
//! sleep, the periodic status write, and shutdown signals. Every callback
//! into the runner completes before the next one starts, so the pipeline
//! never sees concurrent mutation.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::Instant as TokioInstant;
use tracing::{error, info, warn};

use mirrorsync_types::ConfigResult;
use mirrorsync_watcher::NotifyRegistrar;

use crate::config::{CommandSpec, OverflowPolicy, ResolvedSync};
use crate::pipeline::{Action, OriginConfig, OriginRegistry, Runner, StartupAction, StartupPlan};
use crate::process::{spawn_supervised, ChildExit};

/// Graceful termination.
pub const EXIT_SUCCESS: i32 = 0;
/// Configuration error or failed startup command.
pub const EXIT_CONFIG: i32 = 1;
/// Watch backend event queue overflowed.
pub const EXIT_OVERFLOW: i32 = 2;

/// How often the status file is rewritten while running.
const STATUS_INTERVAL: Duration = Duration::from_secs(10);

/// Fallback sleep horizon when no delay is pending.
const IDLE_SLEEP: Duration = Duration::from_secs(3600);

/// Build the origin registry from resolved config entries, wiring command
/// templates into pipeline actions.
pub fn build_origins(
    resolved: &[ResolvedSync],
    registrar: &NotifyRegistrar,
    exits: &mpsc::UnboundedSender<ChildExit>,
) -> ConfigResult<OriginRegistry> {
    let mut registry = OriginRegistry::new();
    for entry in resolved {
        let config = OriginConfig {
            delay: entry.delay,
            max_processes: entry.max_processes,
            max_actions: entry.max_actions,
            move_handler: entry.move_handler,
            collapse: entry.collapse.clone(),
            action: make_action(entry.action.clone(), entry.target.clone(), exits.clone()),
            startup: entry
                .startup
                .clone()
                .map(|spec| make_startup(spec, entry.target.clone(), exits.clone())),
        };
        registry.add(&entry.source, entry.target.as_str(), config, registrar)?;
    }
    Ok(registry)
}

/// Turn an action command template into a pipeline action.
fn make_action(
    spec: CommandSpec,
    label: String,
    exits: mpsc::UnboundedSender<ChildExit>,
) -> Action {
    Box::new(move |inlet| {
        let source_buf = inlet.source_path();
        let source = source_buf.to_string_lossy();
        let target = inlet.target_path();
        let source2 = inlet
            .source_path2()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();
        let target2 = inlet.target_path2().unwrap_or_default();
        let event = inlet.kind().to_string();

        let args = spec.render_args(&[
            ("source", source.as_ref()),
            ("target", target.as_str()),
            ("source2", source2.as_str()),
            ("target2", target2.as_str()),
            ("event", event.as_str()),
            ("path", inlet.path()),
        ]);
        spawn_supervised(&spec.command, &args, &label, exits.clone())
    })
}

/// Turn a startup command template into a pipeline startup action.
fn make_startup(
    spec: CommandSpec,
    label: String,
    exits: mpsc::UnboundedSender<ChildExit>,
) -> StartupAction {
    Box::new(move |source, target| {
        let source = source.to_string_lossy();
        let args = spec.render_args(&[("source", source.as_ref()), ("target", target)]);
        spawn_supervised(&spec.command, &args, &label, exits.clone())
    })
}

/// Wait for either SIGINT (Ctrl+C) or SIGTERM.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");

    tokio::select! {
        _ = sigint.recv() => {
            info!("received SIGINT");
        }
        _ = sigterm.recv() => {
            info!("received SIGTERM");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to register Ctrl+C handler");
    info!("received Ctrl+C");
}

pub struct Host {
    runner: Runner,
    registrar: NotifyRegistrar,
    watch_rx: mpsc::Receiver<notify::Result<notify::Event>>,
    exits_rx: mpsc::UnboundedReceiver<ChildExit>,
    statusfile: Option<PathBuf>,
    overflow: OverflowPolicy,
    /// Startup command pids not yet collected
    startup_pending: HashSet<crate::pipeline::Pid>,
}

impl Host {
    pub fn new(
        runner: Runner,
        registrar: NotifyRegistrar,
        watch_rx: mpsc::Receiver<notify::Result<notify::Event>>,
        exits_rx: mpsc::UnboundedReceiver<ChildExit>,
        statusfile: Option<PathBuf>,
        overflow: OverflowPolicy,
        plan: &StartupPlan,
    ) -> Self {
        Host {
            runner,
            registrar,
            watch_rx,
            exits_rx,
            statusfile,
            overflow,
            startup_pending: plan.pids.iter().copied().collect(),
        }
    }

    /// Run until shutdown; returns the process exit code.
    pub async fn run(mut self) -> i32 {
        let mut status_interval = tokio::time::interval(STATUS_INTERVAL);
        status_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let alarm = self.runner.earliest_alarm();
            let alarm_deadline = alarm
                .map(TokioInstant::from_std)
                .unwrap_or_else(|| TokioInstant::now() + IDLE_SLEEP);

            tokio::select! {
                maybe = self.watch_rx.recv() => {
                    match maybe {
                        Some(Ok(event)) => {
                            if let Some(code) = self.handle_watch_event(&event) {
                                return code;
                            }
                        }
                        Some(Err(e)) => {
                            warn!("watch backend error: {}", e);
                        }
                        None => {
                            error!("watch event channel closed unexpectedly");
                            return EXIT_OVERFLOW;
                        }
                    }
                }
                Some(exit) = self.exits_rx.recv() => {
                    if let Some(code) = self.handle_child_exit(exit) {
                        return code;
                    }
                }
                _ = tokio::time::sleep_until(alarm_deadline), if alarm.is_some() => {
                    self.runner.on_alarm(Instant::now());
                }
                _ = status_interval.tick() => {
                    self.write_status();
                }
                _ = wait_for_shutdown_signal() => {
                    info!("shutting down");
                    return EXIT_SUCCESS;
                }
            }
        }
    }

    fn handle_watch_event(&mut self, event: &notify::Event) -> Option<i32> {
        let translated = self.registrar.translate(event);
        if translated.overflow {
            match self.overflow {
                OverflowPolicy::Exit => {
                    error!("watch event queue overflowed; mirror state can no longer be trusted");
                    return Some(EXIT_OVERFLOW);
                }
                OverflowPolicy::Ignore => {
                    warn!("watch event queue overflowed; events were lost and the mirror may be stale");
                }
            }
        }
        let now = Instant::now();
        for ev in &translated.events {
            self.runner.on_event(&mut self.registrar, ev, now);
        }
        None
    }

    fn handle_child_exit(&mut self, exit: ChildExit) -> Option<i32> {
        if self.startup_pending.remove(&exit.pid) {
            if exit.code != 0 {
                error!(
                    "startup command (pid {}) exited with code {}",
                    exit.pid, exit.code
                );
                return Some(EXIT_CONFIG);
            }
            info!("startup command (pid {}) finished", exit.pid);
            if self.startup_pending.is_empty() {
                self.runner.startup_complete();
            }
            return None;
        }
        self.runner.collect_process(exit.pid, exit.code);
        None
    }

    fn write_status(&self) {
        let Some(path) = &self.statusfile else {
            return;
        };
        let mut buf = Vec::new();
        if let Err(e) = self.runner.status_report(Instant::now(), &mut buf) {
            warn!("failed to render status report: {}", e);
            return;
        }
        if let Err(e) = std::fs::write(path, &buf) {
            warn!("failed to write status file {}: {}", path.display(), e);
        }
    }
}
