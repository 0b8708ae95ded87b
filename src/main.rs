//! mixdesk-daemon: audio cache and worker pool for the mixdesk editor.
//!
//! This binary can run in two modes:
//! - CLI mode: run one operation on a WAV file
//! - Daemon mode: JSON-RPC server over stdio

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing_subscriber::EnvFilter;

use mixdesk_daemon::audio::dsp::{FadeOptions, PeakOptions, WaveformOptions};
use mixdesk_daemon::audio::write_wav;
use mixdesk_daemon::cache::CacheManager;
use mixdesk_daemon::cli::{Cli, OpArg};
use mixdesk_daemon::config::DaemonConfig;
use mixdesk_daemon::error::{DaemonError, ErrorCode, Result};
use mixdesk_daemon::pool::WorkerPool;
use mixdesk_daemon::rpc::{run_server, ServerState};
use mixdesk_daemon::service::AudioService;
use mixdesk_daemon::types::fingerprint;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries JSON-RPC in daemon mode.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse_args();

    let mut config = DaemonConfig::from_env();
    cli.apply_to(&mut config);
    if let Some(problem) = config.validate() {
        return Err(DaemonError::new(
            ErrorCode::InvalidPayload,
            format!("Invalid configuration: {}", problem),
        ));
    }

    if cli.is_daemon_mode() {
        run_daemon_mode(config).await
    } else if cli.is_cli_mode() {
        run_cli_mode(&cli, config).await
    } else {
        print_usage();
        Ok(())
    }
}

/// Runs one audio operation and exits.
async fn run_cli_mode(cli: &Cli, config: DaemonConfig) -> Result<()> {
    let Some(input) = cli.input.as_deref() else {
        print_usage();
        return Ok(());
    };

    eprintln!("=== mixdesk-daemon CLI ===");
    eprintln!("Input: {}", input.display());
    eprintln!("Operation: {}", cli.op.as_str());
    if cli.op.writes_audio() {
        eprintln!("Output: {}", cli.output_path().display());
    }
    eprintln!("Cache: {}", config.effective_cache_path().display());
    eprintln!();

    let bytes = tokio::fs::read(input).await.map_err(|e| {
        DaemonError::with_source(
            ErrorCode::InvalidAudio,
            format!("Failed to read {}", input.display()),
            e,
        )
    })?;
    let audio_id = fingerprint(&bytes);

    let cache = Arc::new(CacheManager::open(&config).await);
    let pool = Arc::new(WorkerPool::with_audio_processor(config.pool.clone()));
    let service = AudioService::new(Arc::clone(&cache), Arc::clone(&pool));

    let start_time = Instant::now();
    let outcome = run_op(cli, &service, input, &audio_id, bytes).await;

    pool.shutdown().await;
    cache.shutdown();
    outcome?;

    let stats = cache.stats().await;
    eprintln!();
    eprintln!("Done in {:.2}s", start_time.elapsed().as_secs_f32());
    eprintln!(
        "  Cache: {} hits, {} misses",
        stats.hit_count, stats.miss_count
    );
    Ok(())
}

async fn run_op(
    cli: &Cli,
    service: &AudioService,
    input: &Path,
    audio_id: &str,
    bytes: Vec<u8>,
) -> Result<()> {
    let audio = service.decode(bytes).await?;
    eprintln!(
        "Decoded: {} channel(s), {} Hz, {:.2}s",
        audio.number_of_channels, audio.sample_rate, audio.duration
    );

    match cli.op {
        OpArg::Normalize => {
            let (channels, normalized) = service
                .normalize(&audio.channel_data, cli.target_db)
                .await?;
            eprintln!("Applied gain: {:+.2} dB", normalized.gain_db);
            save(cli, input, &channels, audio.sample_rate)
        }
        OpArg::Fade => {
            let options = FadeOptions {
                fade_in_duration: cli.fade_in,
                fade_out_duration: cli.fade_out,
                sample_rate: audio.sample_rate,
                ..FadeOptions::default()
            };
            let channels = service.fade(&audio.channel_data, options).await?;
            save(cli, input, &channels, audio.sample_rate)
        }
        OpArg::Waveform => {
            let options = WaveformOptions {
                width: cli.width as usize,
                sample_rate: audio.sample_rate,
                ..WaveformOptions::default()
            };
            let waveform = service.waveform(audio_id, audio.mono(), options).await?;
            print_json(&waveform)
        }
        OpArg::Peaks => {
            let options = PeakOptions {
                threshold: cli.threshold,
                sample_rate: audio.sample_rate,
                ..PeakOptions::default()
            };
            let peaks = service.peaks(audio.mono(), options).await?;
            eprintln!("Found {} peak window(s)", peaks.len());
            print_json(&peaks)
        }
    }
}

fn save(cli: &Cli, input: &Path, channels: &[Vec<f32>], sample_rate: u32) -> Result<()> {
    let output_path = cli.output_path();
    if output_path == input {
        return Err(DaemonError::invalid_payload(
            "output path must differ from the input",
        ));
    }
    write_wav(channels, &output_path, sample_rate)?;
    eprintln!("Saved to: {}", output_path.display());
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| DaemonError::with_source(ErrorCode::InvalidPayload, "Failed to encode output", e))?;
    println!("{}", json);
    Ok(())
}

/// Runs the daemon mode (JSON-RPC server over stdio).
async fn run_daemon_mode(config: DaemonConfig) -> Result<()> {
    tracing::info!(
        cache = %config.effective_cache_path().display(),
        max_workers = config.pool.max_workers,
        "Starting mixdesk-daemon"
    );
    let state = ServerState::new(config).await;
    run_server(state).await
}

fn print_usage() {
    eprintln!("mixdesk-daemon: cached audio processing with a worker pool");
    eprintln!();
    eprintln!("Usage:");
    eprintln!("  Normalize to -1 dBFS:");
    eprintln!("    mixdesk-daemon --input take.wav --op normalize --target-db -1 --output take-norm.wav");
    eprintln!();
    eprintln!("  Fade in and out:");
    eprintln!("    mixdesk-daemon --input take.wav --op fade --fade-in 0.5 --fade-out 2");
    eprintln!();
    eprintln!("  Waveform or peaks as JSON:");
    eprintln!("    mixdesk-daemon --input take.wav --op waveform --width 800");
    eprintln!();
    eprintln!("  Daemon mode (JSON-RPC server):");
    eprintln!("    mixdesk-daemon --daemon");
    eprintln!();
    eprintln!("Run 'mixdesk-daemon --help' for full options.");
}
