use clap::Parser;
use std::path::PathBuf;

/// CLI arguments for the mirrorsync daemon
#[derive(Parser, Debug)]
#[command(name = "mirrorsyncd")]
#[command(about = "Live directory mirroring daemon", long_about = None)]
pub struct Args {
    /// Path to the JSON configuration file
    #[arg(value_name = "CONFIG")]
    pub config: PathBuf,

    /// Override the configured log level (DEBUG, NORMAL, VERBOSE, ERROR)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Override the configured status file path
    #[arg(long, value_name = "FILE")]
    pub status_file: Option<PathBuf>,
}
