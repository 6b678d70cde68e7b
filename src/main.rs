//! # Tide Coupler Application Entry Point
//!
//! This binary runs one coupled simulation between the reference hydro model
//! and the hydrograph surrogate, writing the boundary file the hydro model
//! reads and a JSON report of the run.
//!
//! ```text
//! tide-coupler <MODE> <BOUNDARY> [--config coupler.toml] [--report out.json] [--plot]
//! ```
//!
//! `MODE` is one of `ndA`, `Adn`, `ndAdn`, `AdndA`; `BOUNDARY` is the 1-based
//! boundary string id. Malformed arguments exit with status -1.

// Test modules
#[cfg(test)]
mod tests;

use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::time::Instant;
use tide_coupler_lib::collective::SerialReducer;
use tide_coupler_lib::config::CouplerConfig;
use tide_coupler_lib::exchange::SeriesFileSink;
use tide_coupler_lib::renderer::draw_ascii;
use tide_coupler_lib::report::{PhaseTimings, RunReport};
use tide_coupler_lib::scheduler::CouplingScheduler;
use tide_coupler_lib::synthetic::{HydrographSurrogate, ReservoirHydro};
use tide_coupler_lib::CouplingMode;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Exit status for malformed command lines
const EXIT_BAD_ARGS: i32 = -1;

/// Couple a hydrodynamic model with a surrogate predictor
#[derive(Parser, Debug)]
#[command(name = "tide-coupler")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Hydro/surrogate coupling scheduler", long_about = None)]
struct Cli {
    /// Coupling mode: ndA, Adn, ndAdn or AdndA
    mode: String,

    /// Coupled boundary string (1-based)
    boundary: usize,

    /// Configuration file
    #[arg(short, long, default_value = tide_coupler_lib::config::CONFIG_FILE)]
    config: PathBuf,

    /// Report file (overrides the configured one)
    #[arg(short, long)]
    report: Option<PathBuf>,

    /// Plot the exchanged boundary values when done
    #[arg(long)]
    plot: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn log_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Main application entry point.
fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(), // --help / --version
        Err(e) => {
            eprintln!("{}", e);
            process::exit(EXIT_BAD_ARGS);
        }
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level(&cli.log_level))
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Logging unavailable: {}", e);
    }

    let config = CouplerConfig::load_from_path(&cli.config);
    let mode = match check_arguments(&cli, &config) {
        Ok(mode) => mode,
        Err(code) => process::exit(code),
    };

    if let Err(e) = run(&cli, mode, &config) {
        error!("Coupled run failed: {:#}", e);
        process::exit(1);
    }
}

/// Resolve the coupling mode and check the boundary id, or give the exit code.
fn check_arguments(cli: &Cli, config: &CouplerConfig) -> Result<CouplingMode, i32> {
    let mode = cli.mode.parse::<CouplingMode>().map_err(|e| {
        error!("{}", e);
        EXIT_BAD_ARGS
    })?;
    config.boundary(cli.boundary).map_err(|e| {
        error!("{}", e);
        EXIT_BAD_ARGS
    })?;
    Ok(mode)
}

fn run(cli: &Cli, mode: CouplingMode, config: &CouplerConfig) -> anyhow::Result<()> {
    let init_start = Instant::now();
    let settings = config.settings(cli.boundary)?;
    let boundary = config.boundary(cli.boundary)?;
    info!(
        "Coupling on boundary {} '{}' ({} nodes, {} m)",
        cli.boundary, boundary.name, boundary.node_count, boundary.length_m
    );

    let hydro = ReservoirHydro::new(config.hydro.clone(), boundary, 0, 1);
    let surrogate = HydrographSurrogate::new(config.surrogate.clone(), 0);
    let sink = SeriesFileSink::new(&config.output.boundary_file, settings.series_length);

    let mut scheduler = CouplingScheduler::new(
        mode,
        settings,
        SerialReducer,
        Box::new(hydro),
        Box::new(surrogate),
        Box::new(sink),
    );
    scheduler
        .initialize()
        .context("initialising the boundary exchange")?;
    let init_elapsed = init_start.elapsed();

    let run_start = Instant::now();
    let summary = scheduler.run().context("running the coupled loop")?;
    let run_elapsed = run_start.elapsed();

    let finalize_start = Instant::now();
    if !summary.warnings.is_empty() {
        warn!("{} exchange warnings during the run", summary.warnings.len());
    }
    if cli.plot {
        draw_ascii(&summary.history);
    }
    let report_path = cli
        .report
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.output.report_file));
    let timings = PhaseTimings::new(init_elapsed, run_elapsed, finalize_start.elapsed());
    let report = RunReport::new(summary, cli.boundary, boundary.name.clone(), timings, Utc::now());
    report
        .save(&report_path)
        .with_context(|| format!("writing report to {}", report_path.display()))?;

    info!(
        "Init {:.3} s, run {:.3} s, finalize {:.3} s; report written to {}",
        report.timings.init_seconds,
        report.timings.run_seconds,
        report.timings.finalize_seconds,
        report_path.display()
    );
    Ok(())
}
