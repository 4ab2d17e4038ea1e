use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use summit::norm::{self, NormReport};
use summit::{Config, Controller, InstanceKind, Outcome, RunReport};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "summit",
    about = "Drive a benchmark until its throughput reaches a destination"
)]
struct Args {
    /// Path to the YAML configuration
    #[arg(short, long, default_value = "summit.yml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the iteration loop for a single instance kind
    Run {
        /// Instance kind to test (defaults to the first configured kind)
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Find the peak throughput of every configured instance kind
    Norm {
        /// Write the peak records to this file as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Test all kinds concurrently
        #[arg(long)]
        parallel: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;

    match args.command {
        Command::Run { kind } => run(&config, kind),
        Command::Norm { output, parallel } => run_norm(&config, output, parallel),
    }
}

fn run(config: &Config, kind: Option<String>) -> Result<()> {
    let kind = match kind {
        Some(name) => InstanceKind::new(name),
        None => config.kinds[0].clone(),
    };
    ensure!(
        config.kinds.contains(&kind),
        "instance kind `{kind}` is not configured"
    );

    let mut controller = Controller::new(
        kind,
        config.run.clone(),
        config.driver()?,
        config.analyzer()?,
    )?;
    let report = controller.launch();
    print_history(&report);
    Ok(())
}

fn run_norm(config: &Config, output: Option<PathBuf>, parallel: bool) -> Result<()> {
    let factory = |_: &InstanceKind| -> summit::error::Result<_> {
        Ok((config.driver()?, config.analyzer()?))
    };
    let report = if parallel {
        norm::test_norm_parallel(config, factory)?
    } else {
        norm::test_norm(config, factory)?
    };
    print_peaks(&report);

    if let Some(path) = output {
        report
            .save(&path)
            .with_context(|| format!("failed to save peaks to {}", path.display()))?;
        tracing::info!("peaks written to {}", path.display());
    }
    Ok(())
}

fn print_history(report: &RunReport) {
    println!(
        "{:<6} {:>10} {:>9} {:>14}",
        "iter", "load", "attempts", "throughput"
    );
    for result in &report.history {
        let throughput = match result.outcome {
            Outcome::Completed { throughput } => format!("{throughput:.2}"),
            Outcome::Failed { ref reason } => format!("failed: {reason}"),
            Outcome::Aborted { ref reason } => format!("aborted: {reason}"),
        };
        println!(
            "{:<6} {:>10} {:>9} {:>14}",
            result.case.iteration, result.case.load, result.attempts, throughput
        );
    }

    println!("\n{}: {}", report.kind, report.stop);
    if let Some(peak) = report.peak() {
        println!(
            "peak: {:.2} at load {} (iteration {})",
            peak.throughput().unwrap_or_default(),
            peak.case.load,
            peak.case.iteration
        );
    }
    if report.estimate.end != usize::MAX {
        println!(
            "peak load lies in {}..{}",
            report.estimate.start, report.estimate.end
        );
    }
}

fn print_peaks(report: &NormReport) {
    println!(
        "{:<16} {:>10} {:>14} {:>11}  stop",
        "kind", "load", "throughput", "iterations"
    );
    for record in &report.records {
        let (load, throughput) = match record.peak {
            Some(ref peak) => (peak.load.to_string(), format!("{:.2}", peak.throughput)),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<16} {:>10} {:>14} {:>11}  {}",
            record.kind.as_str(),
            load,
            throughput,
            record.iterations,
            record.stop
        );
    }
}
