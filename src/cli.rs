//! CLI argument parser.
//!
//! Provides a one-shot command-line mode that runs a single audio operation
//! through the cache and worker pool, and the switch into daemon mode.

use std::path::{Path, PathBuf};

use clap::{Parser, ValueEnum};

use crate::config::DaemonConfig;

/// Operations available in CLI mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OpArg {
    /// Peak-normalize to --target-db and write a WAV file
    #[default]
    Normalize,
    /// Apply --fade-in / --fade-out and write a WAV file
    Fade,
    /// Print min/max waveform peaks as JSON
    Waveform,
    /// Print windows louder than --threshold as JSON
    Peaks,
}

impl OpArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpArg::Normalize => "normalize",
            OpArg::Fade => "fade",
            OpArg::Waveform => "waveform",
            OpArg::Peaks => "peaks",
        }
    }

    /// Returns true if the operation produces audio rather than JSON.
    pub fn writes_audio(&self) -> bool {
        matches!(self, OpArg::Normalize | OpArg::Fade)
    }
}

/// mixdesk-daemon: cached audio processing with a worker pool
#[derive(Parser, Debug)]
#[command(name = "mixdesk-daemon")]
#[command(about = "Audio cache and worker pool daemon for the mixdesk editor")]
#[command(version)]
pub struct Cli {
    /// Input WAV file
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Operation to run on the input
    #[arg(long, value_enum, default_value_t = OpArg::Normalize)]
    pub op: OpArg,

    /// Output WAV file path (normalize and fade only)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Normalization target in dBFS
    #[arg(long, default_value = "-3.0", allow_negative_numbers = true)]
    pub target_db: f32,

    /// Fade-in length in seconds
    #[arg(long, default_value = "0.0")]
    pub fade_in: f32,

    /// Fade-out length in seconds
    #[arg(long, default_value = "0.0")]
    pub fade_out: f32,

    /// Number of waveform buckets
    #[arg(long, default_value = "1000", value_parser = clap::value_parser!(u32).range(1..))]
    pub width: u32,

    /// Peak detection threshold in dBFS
    #[arg(long, default_value = "-20.0", allow_negative_numbers = true)]
    pub threshold: f32,

    /// Persistent cache directory (overrides MIXDESK_CACHE_PATH)
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Maximum worker threads (overrides MIXDESK_MAX_WORKERS)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Run in daemon mode (JSON-RPC over stdio)
    #[arg(long)]
    pub daemon: bool,
}

impl Cli {
    /// Parses command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Returns true if running in CLI mode (not daemon mode).
    pub fn is_cli_mode(&self) -> bool {
        !self.daemon && self.input.is_some()
    }

    /// Returns true if running in daemon mode.
    pub fn is_daemon_mode(&self) -> bool {
        self.daemon
    }

    /// Returns the effective output path.
    ///
    /// Defaults to `<input stem>-<op>.wav` next to the input, or
    /// "output.wav" in the current directory without an input.
    pub fn output_path(&self) -> PathBuf {
        if let Some(ref path) = self.output {
            return path.clone();
        }
        match self.input.as_deref() {
            Some(input) => derived_output(input, self.op),
            None => PathBuf::from("output.wav"),
        }
    }

    /// Applies command-line overrides on top of environment configuration.
    pub fn apply_to(&self, config: &mut DaemonConfig) {
        if let Some(ref dir) = self.cache_dir {
            config.cache_path = Some(dir.clone());
        }
        if let Some(workers) = self.workers {
            config.pool.max_workers = workers;
        }
    }
}

fn derived_output(input: &Path, op: OpArg) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    input.with_file_name(format!("{}-{}.wav", stem, op.as_str()))
}
