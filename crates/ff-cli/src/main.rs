//! fracfit CLI

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ff_calib::{JsonFileStore, Pipeline, RunConfig, RunContext, SystematicsDriver, read_run_config};
use ff_inference::FitStatistic;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fracfit")]
#[command(about = "fracfit - template fraction fits for mis-ID scale factors and photon purity")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Electron mis-ID scale factor per systematic variation
    Misid(RunArgs),

    /// Photon purity per systematic variation
    Purity(RunArgs),

    /// Print version
    Version,
}

#[derive(Args)]
struct RunArgs {
    /// Histogram store (JSON)
    #[arg(short, long)]
    input: PathBuf,

    /// Run configuration (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Comma-separated systematic labels. Overrides the configuration.
    #[arg(long, value_delimiter = ',')]
    systematics: Option<Vec<String>>,

    /// Fit statistic: likelihood or chi2
    #[arg(long)]
    statistic: Option<FitStatistic>,

    /// Keep per-fit summaries out of the info log
    #[arg(long)]
    quiet: bool,

    /// Also write the result table as pretty JSON
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Misid(args) => cmd_run(Pipeline::MisId, &args),
        Commands::Purity(args) => cmd_run(Pipeline::Purity, &args),
        Commands::Version => {
            println!("fracfit {}", ff_core::VERSION);
            Ok(())
        }
    }
}

fn load_config(pipeline: Pipeline, args: &RunArgs) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => read_run_config(path)
            .with_context(|| format!("reading configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    // The subcommand picks the pipeline.
    config.pipeline = pipeline;
    if let Some(labels) = &args.systematics {
        config.systematics = labels.clone();
    }
    if let Some(statistic) = args.statistic {
        config.statistic = statistic;
    }
    config.quiet |= args.quiet;
    config.validate()?;
    Ok(config)
}

fn cmd_run(pipeline: Pipeline, args: &RunArgs) -> Result<()> {
    let config = load_config(pipeline, args)?;
    let store = JsonFileStore::open(&args.input)
        .with_context(|| format!("opening histogram store {}", args.input.display()))?;

    let driver = SystematicsDriver::from_config(&config)?;
    let mut ctx = RunContext::new(store, pipeline);
    let outcome = driver.run(&mut ctx);

    let table = ctx.into_results();
    if !table.is_empty() {
        print!("{table}");
    }
    if let Err(err) = outcome {
        tracing::error!(completed = table.len(), "run aborted");
        return Err(err.into());
    }

    tracing::info!(
        pipeline = %pipeline,
        entries = table.len(),
        failed = table.failed_labels().len(),
        "run complete"
    );

    if let Some(path) = &args.output {
        write_json(path, serde_json::to_value(&table)?)?;
    }
    Ok(())
}

fn write_json(path: &PathBuf, value: serde_json::Value) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(&value)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
