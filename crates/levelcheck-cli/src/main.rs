//! levelcheck - level-driven checks for a Rust workspace
//!
//! `levelcheck [LEVEL]` runs every check category the level reaches:
//!
//! - `0` / `style`: rustfmt and clippy
//! - `1` / `functionality`: unit and doc tests
//! - `2` / `host`: full build and test pass on this machine
//! - `3` / `cross`: functionality tests inside each target's container
//!
//! Exits 0 only when every attempted check passed.

use anyhow::{Context, Result};
use clap::Parser;
use levelcheck_ci::{
    init_tracing, Interrupt, InterruptHandle, LevelGate, Orchestrator, RunOutcome, RunReport,
    RunRequest, TestLevel, TokioSupervisor, DEFAULT_CONFIG_FILE,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};

#[derive(Parser, Debug)]
#[command(name = "levelcheck")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run style, functionality, host and cross-target checks by level", long_about = None)]
struct Cli {
    /// Test level: 0-3 or style, functionality, host, cross
    #[arg(default_value = "host")]
    level: TestLevel,

    /// Configuration file
    #[arg(short, long, env = "LEVELCHECK_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Cross targets to run at once
    #[arg(short, long, default_value_t = 1)]
    jobs: usize,

    /// Include targets marked niche
    #[arg(long)]
    niche: bool,

    /// Level gate: inclusive (>=) or exclusive (>)
    #[arg(long)]
    gate: Option<LevelGate>,

    /// Highest level this run accepts
    #[arg(long)]
    ceiling: Option<TestLevel>,

    /// Write the JSON run report to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn request(&self) -> RunRequest {
        let mut request = RunRequest::new(self.level, &self.config)
            .with_jobs(self.jobs)
            .with_niche(self.niche);
        if let Some(gate) = self.gate {
            request = request.with_gate(gate);
        }
        if let Some(ceiling) = self.ceiling {
            request = request.with_ceiling(ceiling);
        }
        request
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match run(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode> {
    let (handle, interrupt) = Interrupt::channel();
    tokio::spawn(forward_signals(handle));

    let supervisor = Arc::new(TokioSupervisor::new(interrupt.clone()));
    let mut orchestrator = Orchestrator::new(supervisor, interrupt);

    let report = match orchestrator.run(&cli.request()).await {
        RunOutcome::Completed(report) => report,
        RunOutcome::Aborted(e) => return Err(e.into()),
    };

    print_summary(&report);
    if let Some(path) = &cli.report {
        write_report(&report, path)?;
    }

    Ok(match report.exit_code() {
        0 => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Run ID: {}", report.run_id);
    for line in report.summary_lines() {
        println!("  {}", line);
    }
}

fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    let json = report.to_json().context("Failed to serialize run report")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write run report to {:?}", path))?;
    info!("Run report written to {:?}", path);
    Ok(())
}

/// Fire the run interrupt on Ctrl+C or SIGTERM.
async fn forward_signals(handle: InterruptHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, interrupting run"),
        _ = terminate => warn!("Received terminate signal, interrupting run"),
    }
    handle.trigger();
}
