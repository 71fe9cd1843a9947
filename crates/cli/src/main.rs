//! WLE report command line interface
//!
//! Runs the weight-lifting exercise classification pipeline, or any prefix
//! of it, from the command line.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wle_gbdt::GbdtTrainer;
use wle_pipeline::features::ExclusionReason;
use wle_pipeline::{Pipeline, PipelineConfig};

#[derive(Parser)]
#[command(name = "wle-report")]
#[command(about = "Weight-lifting exercise classification report", long_about = None)]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the whole pipeline and write the report
    Run {
        #[command(flatten)]
        data: DataArgs,

        /// Directory for report.json and predictions.csv
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load, partition and print the selected predictors
    Features {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Cross-validate the grid and print the selected point
    Tune {
        #[command(flatten)]
        data: DataArgs,
    },
    /// Print the effective configuration as TOML
    Config {
        #[command(flatten)]
        data: DataArgs,

        /// Also save the configuration to this file
        #[arg(short, long)]
        write: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
struct DataArgs {
    /// Labeled training CSV
    #[arg(long)]
    training: Option<PathBuf>,

    /// Unlabeled evaluation CSV
    #[arg(long)]
    evaluation: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seed for partitioning, folds and row subsampling
    #[arg(long)]
    seed: Option<u64>,

    /// Tuning threads, 0 = all cores
    #[arg(long)]
    threads: Option<usize>,

    /// Number of cross-validation folds
    #[arg(long)]
    folds: Option<usize>,
}

impl DataArgs {
    /// Defaults, then the config file, then the environment, then flags
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        config
            .apply_env()
            .context("Invalid environment override")?;
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(path) = &self.training {
            config.data.training_path = path.clone();
        }
        if let Some(path) = &self.evaluation {
            config.data.evaluation_path = path.clone();
        }
        if let Some(seed) = self.seed {
            config.partition.seed = seed;
        }
        if let Some(threads) = self.threads {
            config.tuning.threads = threads;
        }
        if let Some(folds) = self.folds {
            config.tuning.folds = folds;
        }
    }
}

fn init_logging(cli: &Cli, config: &PipelineConfig) -> Result<()> {
    let level = if let Some(level) = &cli.log_level {
        level.clone()
    } else if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data = match &cli.command {
        Commands::Run { data, .. }
        | Commands::Features { data }
        | Commands::Tune { data }
        | Commands::Config { data, .. } => data.clone(),
    };
    let config = data.resolve()?;
    init_logging(&cli, &config)?;

    match &cli.command {
        Commands::Run { output, .. } => run(config, output.as_deref()),
        Commands::Features { .. } => features(config),
        Commands::Tune { .. } => tune(config),
        Commands::Config { write, .. } => {
            config.validate().context("Invalid configuration")?;
            print!("{}", config.to_toml()?);
            if let Some(path) = write {
                config
                    .save_to_file(path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Configuration saved to {}", path.display());
            }
            Ok(())
        }
    }
}

fn pipeline(config: PipelineConfig) -> Result<Pipeline<GbdtTrainer>> {
    Pipeline::new(config, GbdtTrainer::new()).context("Invalid configuration")
}

fn run(config: PipelineConfig, output: Option<&Path>) -> Result<()> {
    info!("WLE report v{}", env!("CARGO_PKG_VERSION"));
    let pipeline = pipeline(config)?;
    let report = pipeline.run().context("Pipeline run failed")?;
    println!("{report}");

    if let Some(dir) = output {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

        let report_path = dir.join("report.json");
        fs::write(&report_path, report.to_json()?)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;

        let predictions_path = dir.join("predictions.csv");
        let file = fs::File::create(&predictions_path)
            .with_context(|| format!("Failed to create {}", predictions_path.display()))?;
        report
            .write_predictions(file)
            .with_context(|| format!("Failed to write {}", predictions_path.display()))?;

        info!("Report written to {}", dir.display());
    }
    Ok(())
}

fn features(config: PipelineConfig) -> Result<()> {
    let pipeline = pipeline(config)?;
    let (training, evaluation) = pipeline.load_tables()?;
    let prepared = pipeline.prepare(&training, &evaluation)?;

    println!(
        "{} predictors ({} training rows, {} validation rows)",
        prepared.selection.predictors.len(),
        prepared.partition.train.len(),
        prepared.partition.validation.len()
    );
    for name in &prepared.selection.predictors {
        println!("  {name}");
    }
    println!("{} excluded", prepared.selection.excluded.len());
    for excluded in &prepared.selection.excluded {
        let reason = match &excluded.reason {
            ExclusionReason::MostlyMissing { fraction } => {
                format!("{:.1}% missing", fraction * 100.0)
            }
            ExclusionReason::Identifier => "identifier".to_string(),
            ExclusionReason::Label => "label".to_string(),
        };
        println!("  {} ({reason})", excluded.column);
    }
    Ok(())
}

fn tune(config: PipelineConfig) -> Result<()> {
    let pipeline = pipeline(config)?;
    let (training, evaluation) = pipeline.load_tables()?;
    let outcome = pipeline
        .tune_with_tables(&training, &evaluation)
        .context("Tuning failed")?;

    println!("{}", outcome.tuning);
    println!(
        "Selected: {} with mean {}",
        outcome.selected.point, outcome.selected.mean
    );
    Ok(())
}
