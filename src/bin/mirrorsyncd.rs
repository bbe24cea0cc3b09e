//! mirrorsyncd: live directory mirroring daemon.
//!
//! Watches the source trees named in the config file and drives external
//! sync commands (typically rsync) to mirror changes to each target.

use std::fs::File;
use std::str::FromStr;
use std::time::Instant;

use clap::Parser;
use fs2::FileExt;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mirrorsync::cli::Args;
use mirrorsync::config::{DaemonConfig, LogLevel};
use mirrorsync::host::{build_origins, Host, EXIT_CONFIG};
use mirrorsync::pipeline::Runner;
use mirrorsync_watcher::NotifyRegistrar;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Config is loaded before tracing is up: the log level may come from the
    // file itself. Load errors go to stderr directly.
    let config = match DaemonConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("mirrorsyncd: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };
    let resolved = match config.resolve() {
        Ok(r) => r,
        Err(e) => {
            eprintln!("mirrorsyncd: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let cli_level = match args.log_level.as_deref().map(LogLevel::from_str).transpose() {
        Ok(level) => level,
        Err(reason) => {
            eprintln!("mirrorsyncd: {}", reason);
            std::process::exit(EXIT_CONFIG);
        }
    };
    // Precedence: --log-level, then RUST_LOG, then settings.loglevel
    let filter = cli_level
        .map(|level| tracing_subscriber::EnvFilter::new(level.env_filter()))
        .or_else(|| tracing_subscriber::EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| {
            config
                .loglevel()
                .ok()
                .flatten()
                .map(LogLevel::env_filter)
                .unwrap_or("info")
                .into()
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("starting mirrorsyncd");
    tracing::info!("config file: {:?}", args.config);

    // One daemon at a time; concurrent mirrors of the same trees would race
    let lock_path = std::env::temp_dir().join("mirrorsyncd.lock");
    let _lock_file = match File::create(&lock_path) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!("failed to create lock file at {:?}: {}", lock_path, e);
            std::process::exit(EXIT_CONFIG);
        }
    };
    if let Err(e) = _lock_file.try_lock_exclusive() {
        tracing::error!(
            "another mirrorsyncd is already running (lock file: {:?}): {}",
            lock_path,
            e
        );
        std::process::exit(EXIT_CONFIG);
    }

    let (watch_tx, watch_rx) = mpsc::channel(1024);
    let (exits_tx, exits_rx) = mpsc::unbounded_channel();

    let mut registrar = match NotifyRegistrar::new(watch_tx) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("failed to create watch backend: {}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let registry = match build_origins(&resolved, &registrar, &exits_tx) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };

    let mut runner = Runner::new(registry);
    let plan = match runner.initialize(&mut registrar, Instant::now()) {
        Ok(plan) => plan,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(EXIT_CONFIG);
        }
    };
    tracing::info!(
        "watching {} directories across {} origins",
        runner.watch_count(),
        runner.registry().len()
    );
    if !plan.pids.is_empty() {
        tracing::info!("waiting for {} startup command(s)", plan.pids.len());
    }

    let statusfile = args
        .status_file
        .clone()
        .or_else(|| config.settings.statusfile.clone());

    let host = Host::new(
        runner,
        registrar,
        watch_rx,
        exits_rx,
        statusfile,
        config.settings.overflow,
        &plan,
    );
    let code = host.run().await;
    std::process::exit(code);
}
