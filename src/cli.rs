use clap::Parser;
use std::path::PathBuf;

/// mirrorpick – select files under a directory and mirror them into an index
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root to scan (defaults to CWD)
    #[arg(value_name = "DIR", default_value = ".")]
    pub root: PathBuf,

    /// Comma-separated file-types to include (extension only, no dot).
    #[arg(long, value_delimiter = ',', value_name = "EXTENSIONS")]
    pub types: Vec<String>,

    /// Include files ignored by .gitignore
    #[arg(long)]
    pub include_ignored: bool,

    /// Glob patterns selecting files to index (e.g., "src/**/*.rs").
    /// Paths are relative to the root directory.
    /// Can be specified multiple times using --select <PATTERN_1> --select <PATTERN_2> ...
    #[arg(long, value_name = "PATTERN")]
    pub select: Vec<String>,

    /// Print the file ids the selection expands to and exit without rebuilding.
    #[arg(long)]
    pub expand_only: bool,

    /// Report every file as indexed as soon as the rebuild returns,
    /// instead of simulating step-by-step processing.
    #[arg(long)]
    pub instant: bool,

    /// TOML file with poll_interval_ms, suppression_window_ms, grace_period_ms, page_size.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the poll interval (milliseconds).
    #[arg(long, value_name = "MS")]
    pub poll_ms: Option<u64>,

    /// Override the suppression window (milliseconds).
    #[arg(long, value_name = "MS")]
    pub suppress_ms: Option<u64>,

    /// Override the grace period (milliseconds).
    #[arg(long, value_name = "MS")]
    pub grace_ms: Option<u64>,
}
