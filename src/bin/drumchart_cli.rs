use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use drumchart::analysis::confidence::{DetectionStats, IssueTag};
use drumchart::analysis::quantizer::QuantizationGrid;
use drumchart::audio::wav::{read_wav, write_wav};
use drumchart::chart::ChartDraft;
use drumchart::config::AppConfig;
use drumchart::debug::pipeline_tracer;
use drumchart::generation::{
    CancellationToken, DebugOverlay, GenerationCoordinator, GenerationParams, GenerationResult,
    StallMonitor,
};
use drumchart::separation::{FileStemIsolator, PassthroughIsolator, StemIsolator};
use drumchart::testing::fixtures::{basic_beat, click_track, render_pattern, FIXTURE_SAMPLE_RATE};
use futures::StreamExt;
use serde::Serialize;

#[derive(Parser, Debug)]
#[command(
    name = "drumchart",
    about = "Generate rhythm-game chart drafts from drum audio"
)]
struct Cli {
    /// JSON config file (defaults to assets/drumchart_config.json when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log debug output and pipeline traces to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyse a WAV file and write a chart draft as JSON
    Generate {
        #[arg(long)]
        input: PathBuf,
        /// Output path; stdout when omitted
        #[arg(long)]
        output: Option<PathBuf>,
        /// Pre-separated drum stem to use instead of the full mix
        #[arg(long)]
        stem: Option<PathBuf>,
        /// Onset sensitivity 0-100
        #[arg(long)]
        sensitivity: Option<u8>,
        /// Grid: quarter, eighth, sixteenth, triplet, thirty_second (or 1/4, 1/8 ...)
        #[arg(long)]
        grid: Option<QuantizationGrid>,
        /// Use this BPM instead of the estimate
        #[arg(long)]
        bpm: Option<f64>,
        /// Shift the whole chart so the first beat lands here (seconds)
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<f64>,
        /// Editor snap step in seconds
        #[arg(long)]
        step: Option<f64>,
        #[arg(long)]
        title: Option<String>,
        /// Include the onset envelope and raw peaks in the output
        #[arg(long)]
        debug_overlay: bool,
        /// Write the run's diagnostic log here
        #[arg(long)]
        diagnostics: Option<PathBuf>,
        /// Cancel the run after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
    /// Render a synthetic test signal to WAV
    Synth {
        #[arg(long, value_enum, default_value_t = SynthKind::Click)]
        kind: SynthKind,
        #[arg(long)]
        output: PathBuf,
        #[arg(long, default_value_t = 120.0)]
        bpm: f64,
        /// Clicks for `click`, bars for `pattern`
        #[arg(long, default_value_t = 16)]
        count: usize,
    },
    /// Print the effective configuration
    Config,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum SynthKind {
    Click,
    Pattern,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
    if verbose {
        pipeline_tracer::enable();
    } else {
        pipeline_tracer::init();
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => AppConfig::try_load_from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(AppConfig::load()),
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate {
            input,
            output,
            stem,
            sensitivity,
            grid,
            bpm,
            offset,
            step,
            title,
            debug_overlay,
            diagnostics,
            timeout_secs,
        } => {
            let request = GenerateRequest {
                input,
                output,
                stem,
                sensitivity,
                grid,
                bpm,
                offset,
                step,
                title,
                debug_overlay,
                diagnostics,
                timeout: timeout_secs.map(Duration::from_secs),
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            runtime.block_on(run_generate(config, request))
        }
        Commands::Synth {
            kind,
            output,
            bpm,
            count,
        } => run_synth(kind, &output, bpm, count),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::from(0))
        }
    }
}

struct GenerateRequest {
    input: PathBuf,
    output: Option<PathBuf>,
    stem: Option<PathBuf>,
    sensitivity: Option<u8>,
    grid: Option<QuantizationGrid>,
    bpm: Option<f64>,
    offset: Option<f64>,
    step: Option<f64>,
    title: Option<String>,
    debug_overlay: bool,
    diagnostics: Option<PathBuf>,
    timeout: Option<Duration>,
}

async fn run_generate(config: AppConfig, request: GenerateRequest) -> Result<ExitCode> {
    let audio = read_wav(&request.input)
        .with_context(|| format!("reading {}", request.input.display()))?;
    let isolator: Arc<dyn StemIsolator> = match &request.stem {
        Some(path) => Arc::new(FileStemIsolator::new(path)),
        None => Arc::new(PassthroughIsolator),
    };
    let stall_threshold = Duration::from_millis(config.generation.stall_threshold_ms);
    let coordinator = GenerationCoordinator::new(config, isolator)?;

    let mut builder = GenerationParams::builder(audio, coordinator.defaults())
        .debug_overlay(request.debug_overlay);
    if let Some(sensitivity) = request.sensitivity {
        builder = builder.sensitivity(sensitivity);
    }
    if let Some(grid) = request.grid {
        builder = builder.grid(grid);
    }
    if let Some(bpm) = request.bpm {
        builder = builder.forced_bpm(bpm);
    }
    if let Some(offset) = request.offset {
        builder = builder.forced_offset_seconds(offset);
    }
    if let Some(step) = request.step {
        builder = builder.forced_step_seconds(step);
    }

    let token = CancellationToken::new();
    let mut handle = coordinator.spawn(builder.build(), token.clone())?;
    if let Some(timeout) = request.timeout {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            token.cancel();
        });
    }

    if let Some(mut progress) = handle.take_progress() {
        let mut monitor = StallMonitor::new(stall_threshold);
        loop {
            match tokio::time::timeout(stall_threshold, progress.next()).await {
                Ok(Some(event)) => {
                    monitor.observe(&event);
                    if !event.is_heartbeat {
                        eprintln!(
                            "[{:>6} ms] {}{}",
                            event.elapsed_ms,
                            event.stage_label,
                            event
                                .message
                                .as_deref()
                                .map(|m| format!(": {}", m))
                                .unwrap_or_default()
                        );
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let status = monitor.status();
                    if status.stalled {
                        eprintln!(
                            "warning: no progress for {} ms (last stage {:?})",
                            status.silent_for.as_millis(),
                            monitor.last_stage()
                        );
                    }
                }
            }
        }
    }

    let result = handle.result().await;
    if let Some(path) = &request.diagnostics {
        fs::write(path, result.diagnostics().to_json()?)
            .with_context(|| format!("writing {}", path.display()))?;
    }

    match result {
        GenerationResult::Success(success) => {
            let success = *success;
            let mut draft = success.draft;
            draft.metadata.title = request.title.unwrap_or_else(|| {
                request
                    .input
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| draft.metadata.title.clone())
            });
            for warning in &success.warnings {
                eprintln!("warning: {}", warning.message());
            }
            let report = DraftReport {
                draft: &draft,
                stats: &success.stats,
                warnings: &success.warnings,
                debug_overlay: success.debug_overlay.as_ref(),
            };
            let json = serde_json::to_string_pretty(&report)?;
            match &request.output {
                Some(path) => {
                    fs::write(path, json).with_context(|| format!("writing {}", path.display()))?
                }
                None => println!("{json}"),
            }
            Ok(ExitCode::from(0))
        }
        GenerationResult::Cancelled { at_stage, .. } => {
            eprintln!(
                "Generation cancelled{}",
                at_stage
                    .map(|s| format!(" during {}", s.display_name()))
                    .unwrap_or_default()
            );
            Ok(ExitCode::from(3))
        }
        GenerationResult::Failed(failure) => {
            eprintln!(
                "Generation failed (code {}): {}",
                failure.code(),
                failure.reason()
            );
            Ok(ExitCode::from(2))
        }
    }
}

fn run_synth(kind: SynthKind, output: &Path, bpm: f64, count: usize) -> Result<ExitCode> {
    if !(bpm.is_finite() && bpm > 0.0) {
        bail!("bpm must be positive, got {}", bpm);
    }
    let audio = match kind {
        SynthKind::Click => click_track(bpm, count, FIXTURE_SAMPLE_RATE),
        SynthKind::Pattern => render_pattern(&basic_beat(count), bpm, FIXTURE_SAMPLE_RATE),
    };
    write_wav(output, &audio).with_context(|| format!("writing {}", output.display()))?;
    eprintln!(
        "Wrote {:.2}s of {:?} audio to {}",
        audio.duration_seconds(),
        kind,
        output.display()
    );
    Ok(ExitCode::from(0))
}

#[derive(Serialize)]
struct DraftReport<'a> {
    draft: &'a ChartDraft,
    stats: &'a DetectionStats,
    warnings: &'a [IssueTag],
    #[serde(skip_serializing_if = "Option::is_none")]
    debug_overlay: Option<&'a DebugOverlay>,
}
