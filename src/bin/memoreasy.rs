use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use memoreasy::compositor::MediaCompositor;
use memoreasy::config::{ConfigLoader, ResolvedConfig};
use memoreasy::downloader::{BatchDownloader, BatchOutcome, plan};
use memoreasy::error::MemorError;
use memoreasy::export::{parse_memories, read_export};
use memoreasy::fetch::HttpMediaSource;
use memoreasy::layout::OutputLayout;
use memoreasy::metadata::ExifToolWriter;
use memoreasy::output::{self, ConsoleProgress, JsonOutput, OutputMode};
use memoreasy::tools::ToolPaths;

const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "memoreasy")]
#[command(
    about = "Download your Snapchat memories and restore their capture dates and locations"
)]
#[command(version, author)]
struct Cli {
    /// The memories_history.html file from a Snapchat data export
    #[arg(long, short)]
    input: Option<PathBuf>,

    /// Directory that receives the downloaded memories
    #[arg(long, short)]
    output: Option<PathBuf>,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    non_interactive: bool,

    /// Parse the export and report what would be downloaded
    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    exiftool: Option<PathBuf>,

    #[arg(long)]
    ffmpeg: Option<PathBuf>,

    #[arg(long)]
    ffprobe: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(outcome) if outcome.cancelled => ExitCode::from(EXIT_INTERRUPTED),
        Ok(_) => ExitCode::SUCCESS,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(err) = report.downcast_ref::<MemorError>() {
                return ExitCode::from(map_exit_code(err));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &MemorError) -> u8 {
    match error {
        MemorError::InvalidInput(_)
        | MemorError::Parse(_)
        | MemorError::ConfigRead(_)
        | MemorError::ConfigParse(_) => 2,
        MemorError::Dependency(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<BatchOutcome> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    apply_overrides(&mut config, &cli)?;
    if let Some(source) = &config.source {
        info!(path = %source.display(), "using config file");
    }

    let html = read_export(&config.input)?;
    let parsed = parse_memories(&html)?;
    let output_dir = Utf8PathBuf::from_path_buf(config.output_dir.clone()).map_err(|path| {
        MemorError::InvalidInput(format!("output path is not UTF-8: {}", path.display()))
    })?;
    let layout = OutputLayout::new(output_dir);

    if cli.dry_run {
        let report = plan(&layout, &parsed.records);
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_plan(&report).into_diagnostic()?,
            OutputMode::Interactive => output::print_plan(&report),
        }
        return Ok(BatchOutcome {
            total: report.total,
            ..BatchOutcome::default()
        });
    }

    let tools = ToolPaths::discover(&config.tools);
    let missing = tools.missing();
    if !missing.is_empty() {
        warn!(
            "missing tools: {}; metadata and overlays will be skipped where they are needed",
            missing.join(", ")
        );
    }

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || cancel.store(true, Ordering::SeqCst)).into_diagnostic()?;
    }

    let source = HttpMediaSource::new(config.connect_timeout, config.request_timeout)?;
    let writer = ExifToolWriter::new(&tools);
    let compositor = MediaCompositor::new(&tools, config.video_timeout);
    let downloader = BatchDownloader::new(layout, source, writer, compositor, config.policy)
        .with_cancel_flag(cancel);

    match output_mode {
        OutputMode::NonInteractive => {
            let outcome = downloader.run(&parsed.records, &JsonOutput)?;
            JsonOutput::print_outcome(&outcome).into_diagnostic()?;
            Ok(outcome)
        }
        OutputMode::Interactive => {
            let outcome = downloader.run(&parsed.records, &ConsoleProgress)?;
            output::print_summary(&outcome);
            Ok(outcome)
        }
    }
}

fn apply_overrides(config: &mut ResolvedConfig, cli: &Cli) -> Result<(), MemorError> {
    if let Some(input) = &cli.input {
        config.input = input.clone();
    }
    if let Some(output) = &cli.output {
        config.output_dir = output.clone();
    }
    if let Some(max_attempts) = cli.max_attempts {
        if max_attempts == 0 {
            return Err(MemorError::ConfigParse(
                "--max-attempts must be at least 1".to_string(),
            ));
        }
        config.policy.max_attempts = max_attempts;
    }
    if cli.exiftool.is_some() {
        config.tools.exiftool = cli.exiftool.clone();
    }
    if cli.ffmpeg.is_some() {
        config.tools.ffmpeg = cli.ffmpeg.clone();
    }
    if cli.ffprobe.is_some() {
        config.tools.ffprobe = cli.ffprobe.clone();
    }
    Ok(())
}
