//! Child process spawning for actions and startup commands.
//!
//! Every external command goes through one helper that pipes and relays
//! stdout/stderr with a `[target]` prefix, puts the child in its own process
//! group, and registers a waiter task that reports the exit back to the
//! event loop.

#[cfg(unix)]
#[allow(unused_imports)]
use std::os::unix::process::CommandExt;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::pipeline::Pid;

/// Exit notification delivered to the event loop when a child finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: Pid,
    pub code: i32,
}

/// Spawn an external command with the daemon's standard child setup.
///
/// - stdout/stderr are piped and relayed line by line with a `[label]` prefix
/// - the child gets its own process group so stray grandchildren can be
///   signalled together
/// - on Linux the child requests SIGTERM if the daemon dies
pub fn spawn_command(program: &str, args: &[String], label: &str) -> Result<Child, String> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    // Children outlive the daemon; on shutdown the init system reaps them
    cmd.kill_on_drop(false);

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            libc::setpgid(0, 0);
            #[cfg(target_os = "linux")]
            libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM);
            Ok(())
        });
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| format!("failed to spawn {}: {}", program, e))?;

    spawn_output_relays(&mut child, label);
    Ok(child)
}

/// Spawn a command and hand its exit to the event loop over `exits`.
///
/// Returns the child's pid, or `None` when spawning failed. The returned
/// pid is the only handle the pipeline keeps; the waiter task owns the
/// `Child` until it exits.
pub fn spawn_supervised(
    program: &str,
    args: &[String],
    label: &str,
    exits: mpsc::UnboundedSender<ChildExit>,
) -> Option<Pid> {
    let mut child = match spawn_command(program, args, label) {
        Ok(child) => child,
        Err(e) => {
            warn!("{}", e);
            return None;
        }
    };
    let pid = child.id()?;

    tokio::spawn(async move {
        let code = match child.wait().await {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!("failed to wait for pid {}: {}", pid, e);
                -1
            }
        };
        let _ = exits.send(ChildExit { pid, code });
    });

    Some(pid)
}

/// Relay child stdout/stderr with a `[label]` prefix.
fn spawn_output_relays(child: &mut Child, label: &str) {
    if let Some(stdout) = child.stdout.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let reader = BufReader::new(stdout);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!("[{}] {}", label, line);
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let label = label.to_string();
        tokio::spawn(async move {
            let reader = BufReader::new(stderr);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!("[{}] {}", label, line);
            }
        });
    }
}
