use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use star_etl::pipeline::{write_json, VALIDATION_REPORT_FILE};
use star_etl::{write_outputs, LocalDatasetSource, Pipeline, PipelineConfig, RawInput, SqliteSink};

const LOG_FILE: &str = "pipeline.log";

#[derive(Parser, Debug)]
#[command(author, version, about = "Ecommerce sales ETL into a star-schema warehouse", long_about = None)]
struct Cli {
    /// TOML configuration file (defaults, then this file, then environment)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full pipeline
    Run(RunArgs),
    /// Validate the current warehouse without loading anything
    Validate,
}

#[derive(Args, Debug, Default)]
struct RunArgs {
    /// Dataset identifier, e.g. owner/name
    #[arg(long)]
    dataset: Option<String>,

    /// File inside the dataset (first CSV when omitted)
    #[arg(long)]
    file: Option<String>,

    /// Directory holding downloaded datasets
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Rows per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Outlier threshold in standard deviations
    #[arg(long)]
    std_devs: Option<f64>,

    #[arg(long)]
    database_dir: Option<PathBuf>,

    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Re-process a staged run instead of fetching the dataset
    #[arg(long, value_name = "RUN_ID")]
    from_raw: Option<String>,
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(dataset) = &self.dataset {
            config.dataset.identifier = dataset.clone();
        }
        if let Some(file) = &self.file {
            config.dataset.file_name = Some(file.clone());
        }
        if let Some(dir) = &self.data_dir {
            config.dataset.data_dir = dir.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        if let Some(std_devs) = self.std_devs {
            config.outliers.std_devs = std_devs;
        }
        if let Some(dir) = &self.database_dir {
            config.database_dir = dir.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let mut config = PipelineConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Command::Run(args) = &cli.command {
        args.apply(&mut config);
        config.validate().context("invalid command-line override")?;
    }

    init_tracing(&config.log_level, &config.output_dir)?;

    match cli.command {
        Command::Run(args) => run(config, args.from_raw),
        Command::Validate => validate_warehouse(config),
    }
}

/// Console output plus a plain-text copy in `<output_dir>/pipeline.log`.
fn init_tracing(level: &str, output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create output directory {}", output_dir.display()))?;
    let log_path = output_dir.join(LOG_FILE);
    let log_file = File::create(&log_path)
        .with_context(|| format!("failed to create log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(log_file)))
        .init();
    Ok(())
}

fn open_pipeline(config: PipelineConfig) -> Result<Pipeline<SqliteSink, LocalDatasetSource>> {
    let sink = SqliteSink::open(&config.database_dir, &config.schemas.all())
        .with_context(|| format!("failed to open warehouse at {}", config.database_dir.display()))?;

    let mut source = LocalDatasetSource::new(config.dataset.data_dir.clone());
    if let Some(credentials) = &config.dataset.credentials_file {
        source = source.with_credentials(credentials.clone());
    }
    Ok(Pipeline::new(config, sink, source))
}

fn run(config: PipelineConfig, from_raw: Option<String>) -> Result<()> {
    let output_dir = config.output_dir.clone();
    let input = match from_raw {
        Some(run_id) => RawInput::Replay(run_id),
        None => RawInput::Fetch,
    };
    info!(version = star_etl::VERSION, ?input, "starting pipeline");

    let mut pipeline = open_pipeline(config)?;
    let outcome = pipeline.run(input).context("pipeline run failed")?;
    let written = write_outputs(&output_dir, &outcome).context("failed to write run outputs")?;

    let summary = &outcome.summary;
    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("✓ Run {}", summary.run_id);
    println!("✓ {}", outcome.quality.summary());
    println!(
        "✓ {} facts loaded ({} skipped), dimensions {:?}",
        summary.facts_written, summary.facts_skipped, summary.dimension_sizes
    );
    for stage in &summary.stages {
        println!("   {:<16} {:>8} ms  {:>8} → {:<8}", stage.stage, stage.millis, stage.rows_in, stage.rows_out);
    }
    report_validation(&outcome.validation);
    for path in written {
        println!("📄 {}", path.display());
    }
    Ok(())
}

fn validate_warehouse(config: PipelineConfig) -> Result<()> {
    let output_dir = config.output_dir.clone();
    let pipeline = open_pipeline(config)?;
    let report = pipeline.validate_only().context("validation failed to run")?;
    let path = write_json(&output_dir, VALIDATION_REPORT_FILE, "validation report", &report)?;

    report_validation(&report);
    println!("📄 {}", path.display());
    Ok(())
}

fn report_validation(report: &star_etl::ValidationReport) {
    if report.passed() {
        println!("✅ Validation: {}", report.summary());
        return;
    }
    println!("⚠️  Validation: {}", report.summary());
    for failure in report.failures() {
        warn!(check = %failure.check, offending = failure.offending, "{}", failure.message);
        println!("   ✗ {}", failure);
    }
}
