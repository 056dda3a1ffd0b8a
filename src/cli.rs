//! Command-line interface for strategy sessions.

use stratlab::analytics::ResultFormatter;
use stratlab::clusters::derive_clusters;
use stratlab::config::SessionConfig;
use stratlab::data::{load_returns_csv, write_levels};
use stratlab::engine::Backtest;
use stratlab::indicator::IndicatorRegistry;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;
use tabled::{builder::Builder, settings::Style};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Stratlab - parameter sweeps over indicator families, aggregated into portfolios.
#[derive(Parser)]
#[command(name = "stratlab")]
#[command(version)]
#[command(about = "Strategy-grid backtesting with hierarchical portfolio aggregation")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a session from a configuration file
    Run {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,

        /// Path to the CSV return table
        #[arg(short, long)]
        data: PathBuf,

        /// Write one CSV per aggregation level into this directory
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },

    /// List the built-in indicators
    Indicators,

    /// Group assets by return correlation
    Clusters {
        /// Path to the CSV return table
        #[arg(short, long)]
        data: PathBuf,

        /// Maximum number of clusters
        #[arg(short, long, default_value = "4")]
        max_clusters: usize,
    },

    /// Write an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "stratlab.toml")]
        output: PathBuf,
    },

    /// Resolve a configuration without running it
    Validate {
        /// Path to the TOML configuration
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) -> Result<()> {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .context("failed to set tracing subscriber")
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging()?;

    match &cli.command {
        Commands::Run {
            config,
            data,
            output_dir,
        } => run_session(config, data, output_dir.as_ref(), cli.output),
        Commands::Indicators => {
            print_indicators();
            Ok(())
        }
        Commands::Clusters { data, max_clusters } => print_clusters(data, *max_clusters, cli.output),
        Commands::Init { output } => init_config(output),
        Commands::Validate { config } => validate_config(config),
    }
}

fn run_session(
    config_path: &PathBuf,
    data_path: &PathBuf,
    output_dir: Option<&PathBuf>,
    output: OutputFormat,
) -> Result<()> {
    let config = SessionConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let returns = load_returns_csv(data_path)
        .with_context(|| format!("loading {}", data_path.display()))?;

    let session = Backtest::new(config).show_progress(matches!(output, OutputFormat::Text));
    let result = session.run(&returns)?;
    info!(
        "{} strategy columns over {} dates",
        result.strategies.returns().cols(),
        result.strategies.dates().len()
    );

    let annualization = session.config().volatility.annualization;
    match output {
        OutputFormat::Text => ResultFormatter::print_report(&result.levels, annualization),
        OutputFormat::Json => println!("{}", ResultFormatter::to_json(&result.levels, annualization)),
    }

    if let Some(dir) = output_dir {
        let written = write_levels(&result.levels, dir)?;
        println!(
            "{} Wrote {} files to {}",
            "✓".green(),
            written.len(),
            dir.display()
        );
    }
    Ok(())
}

fn print_indicators() {
    let registry = IndicatorRegistry::builtin();
    let mut builder = Builder::new();
    builder.push_record(["Indicator", "Shape", "Parameters", "Description"]);
    for name in registry.names() {
        if let Ok(indicator) = registry.create(&name) {
            let shape = indicator.shape();
            builder.push_record([
                name.clone(),
                shape.to_string(),
                shape.parameter_names().join(", "),
                indicator.description().to_string(),
            ]);
        }
    }
    println!("\nAvailable Indicators:\n");
    println!("{}", builder.build().with(Style::rounded()));
}

fn print_clusters(data_path: &PathBuf, max_clusters: usize, output: OutputFormat) -> Result<()> {
    let returns = load_returns_csv(data_path)?;
    let groups = derive_clusters(returns.values(), returns.assets(), max_clusters)?;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&groups)?),
        OutputFormat::Text => {
            let mut builder = Builder::new();
            builder.push_record(["Cluster", "Assets"]);
            for (id, members) in &groups {
                builder.push_record([format!("cluster_{}", id), members.join(", ")]);
            }
            println!("{}", builder.build().with(Style::rounded()));
        }
    }
    Ok(())
}

fn init_config(output: &PathBuf) -> Result<()> {
    fs::write(output, SessionConfig::example())?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to choose assets and indicators, then run:");
    println!(
        "  stratlab run -c {} -d returns.csv",
        output.display()
    );
    Ok(())
}

fn validate_config(config_path: &PathBuf) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config = SessionConfig::load(config_path)?;
    let definitions = config.resolve_indicators(&IndicatorRegistry::builtin())?;
    let assets = config.active_assets()?;

    let mut builder = Builder::new();
    builder.push_record(["Indicator", "Shape", "Combinations"]);
    for definition in &definitions {
        builder.push_record([
            definition.name().to_string(),
            definition.shape().to_string(),
            definition.combo_count().to_string(),
        ]);
    }
    println!("{}", builder.build().with(Style::rounded()));

    let combos: usize = definitions.iter().map(|d| d.combo_count()).sum();
    println!("\n  Active assets:     {}", assets.join(", "));
    println!("  Strategy columns:  {}", combos * assets.len());
    println!("\nValidation: {}", "PASSED".green().bold());
    Ok(())
}
