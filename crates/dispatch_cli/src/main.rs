use std::error::Error;
use std::path::PathBuf;
use std::process::exit;

use clap::{Parser, Subcommand};
use dispatch_core::DispatchConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod report;
mod scenario;

use report::ScenarioReport;
use scenario::{Scenario, ScenarioParams};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "dispatch",
    about = "Ride dispatch and settlement engine",
    long_about = "Drives a seeded ride-hailing scenario through the dispatch engine:\n\
                  intake, matching, pickup verification, completion, settlement and reviews."
)]
struct Cli {
    /// Log filter used when RUST_LOG is not set (e.g. `info`, `dispatch_core=debug`)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a seeded demo scenario and print a JSON report
    Run {
        /// JSON config file; missing sections use defaults
        #[arg(long, env = "DISPATCH_CONFIG")]
        config: Option<PathBuf>,
        /// Random seed for positions, classes and tags
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Number of ride requests
        #[arg(long, default_value_t = 200)]
        riders: usize,
        /// Number of captains on duty at the start
        #[arg(long, default_value_t = 60)]
        captains: usize,
    },
    /// Print the effective configuration as JSON
    Config {
        /// JSON config file to merge over the defaults
        #[arg(long, env = "DISPATCH_CONFIG")]
        config: Option<PathBuf>,
    },
}

// ── helpers ────────────────────────────────────────────────────────

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<DispatchConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => {
            info!(path = %path.display(), "loading config");
            DispatchConfig::from_path(path)?
        }
        None => DispatchConfig::default(),
    };
    Ok(config)
}

fn run(seed: u64, riders: usize, captains: usize, config: DispatchConfig) -> Result<(), Box<dyn Error>> {
    let params = ScenarioParams::default()
        .with_seed(seed)
        .with_riders(riders)
        .with_captains(captains);
    info!(seed, riders, captains, "starting scenario");
    let mut scenario = Scenario::build(config, params)?;
    scenario.run()?;
    let report = ScenarioReport::collect(seed, &scenario.dispatcher, &scenario.stats);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = match cli.command {
        Commands::Run {
            config,
            seed,
            riders,
            captains,
        } => load_config(config.as_ref()).and_then(|config| run(seed, riders, captains, config)),
        Commands::Config { config } => load_config(config.as_ref()).and_then(|config| {
            println!("{}", config.to_json_pretty()?);
            Ok(())
        }),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        exit(1);
    }
}
