use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use wifi_sweep_abstract::{
    OutputFormat, PhyOverride, RunNaming, SweepConfig, SweepOverride, WifiStandard,
};
use wifi_sweep_simulator::analysis::{self, RunMetrics};
use wifi_sweep_simulator::{SingleRunConfig, make_run_id, run_single, run_sweep};

#[derive(Parser, Debug)]
#[command(author, version, about = "WiFi parameter sweep simulator")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every (standard, distance, users) combination.
    Sweep(SweepArgs),
    /// Run one coordinator and one endpoint.
    Single(SingleArgs),
    /// Summarize `.sca` result files.
    Analyze(AnalyzeArgs),
}

#[derive(clap::Args, Debug)]
struct SweepArgs {
    /// Load sweep settings from a TOML file.
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, value_delimiter = ',')]
    standards: Option<Vec<WifiStandard>>,
    #[arg(long, value_delimiter = ',')]
    distances: Option<Vec<f64>>,
    #[arg(long, value_delimiter = ',')]
    users: Option<Vec<u32>>,

    /// Simulated seconds per run.
    #[arg(long)]
    sim_time: Option<f64>,
    /// Target bit rate per flow in kbps.
    #[arg(long)]
    bit_rate: Option<f64>,

    #[arg(long)]
    output_dir: Option<PathBuf>,
    #[arg(long)]
    format: Option<OutputFormat>,
    /// `with-run-id` or `tuple-only`.
    #[arg(long)]
    naming: Option<RunNaming>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    seed: Option<u64>,

    /// Reuse a run identifier instead of generating one.
    #[arg(long)]
    run: Option<String>,

    /// Write a JSON summary of the finished sweep.
    #[arg(long)]
    summary_out: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct SingleArgs {
    /// Distance apart to place the nodes, in meters.
    #[arg(long, default_value_t = 50.0)]
    distance: f64,
    #[arg(long, default_value_t = OutputFormat::Omnet)]
    format: OutputFormat,
    #[arg(long, default_value_t = 20.0)]
    sim_time: f64,
    /// Target bit rate in kbps; without it packets go out every 0.05 s.
    #[arg(long)]
    bit_rate: Option<f64>,
    #[arg(long, default_value = "80211ax")]
    standard: WifiStandard,
    #[arg(long)]
    experiment: Option<String>,
    #[arg(long)]
    strategy: Option<String>,
    #[arg(long)]
    run: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct AnalyzeArgs {
    #[arg(required = true)]
    files: Vec<PathBuf>,
    /// Simulated seconds the files cover.
    #[arg(long, default_value_t = 20.0)]
    sim_time: f64,
    #[arg(long)]
    csv_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("wifi-sweep starting…");

    match args.command {
        Command::Sweep(sweep) => run_sweep_command(sweep),
        Command::Single(single) => run_single_command(single),
        Command::Analyze(analyze) => run_analyze_command(analyze),
    }
}

impl SweepArgs {
    fn to_override(&self) -> SweepOverride {
        SweepOverride {
            standards: self.standards.clone(),
            distances: self.distances.clone(),
            user_counts: self.users.clone(),
            sim_time_secs: self.sim_time,
            bit_rate_kbps: self.bit_rate,
            author: self.author.clone(),
            output_dir: self.output_dir.clone(),
            format: self.format,
            naming: self.naming,
            phy: self.seed.map(|seed| PhyOverride {
                seed: Some(seed),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn run_sweep_command(args: SweepArgs) -> Result<()> {
    let mut config = SweepConfig::default();
    if let Some(path) = &args.config {
        load_override(path)?.apply_to(&mut config);
    }
    args.to_override().apply_to(&mut config);

    let run_id = args.run.clone().unwrap_or_else(make_run_id);
    let summary = run_sweep(&config, &run_id)?;

    for failure in &summary.failures {
        warn!("{} failed: {}", failure.tuple, failure.error);
    }
    if let Some(path) = &args.summary_out {
        let data =
            serde_json::to_vec_pretty(&summary).context("Failed to serialize sweep summary")?;
        fs::write(path, &data)
            .with_context(|| format!("Failed to write summary file {}", path.display()))?;
    }
    Ok(())
}

fn run_single_command(args: SingleArgs) -> Result<()> {
    let mut config = SingleRunConfig {
        distance: args.distance,
        format: args.format,
        sim_time_secs: args.sim_time,
        bit_rate_kbps: args.bit_rate,
        standard: args.standard,
        ..Default::default()
    };
    if let Some(experiment) = args.experiment {
        config.experiment = experiment;
    }
    if let Some(strategy) = args.strategy {
        config.strategy = strategy;
    }
    if let Some(run) = args.run {
        config.run_id = run;
    }
    if let Some(author) = args.author {
        config.author = author;
    }
    if let Some(dir) = args.output_dir {
        config.output_dir = dir;
    }

    let report = run_single(&config)?;
    info!(
        "Simulation completed: {} frames sent, {} delivered",
        report.engine.frames_sent, report.engine.frames_delivered
    );
    Ok(())
}

fn run_analyze_command(args: AnalyzeArgs) -> Result<()> {
    let mut rows: Vec<RunMetrics> = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let metrics = analysis::analyze_file(path, args.sim_time)
            .with_context(|| format!("Failed to analyze {}", path.display()))?;
        info!(
            "{}: offered {:.2} kbps, got {:.2} kbps, delay {:.3} ms [{:.3}, {:.3}], loss {:.4}",
            metrics.file,
            metrics.bit_rate_kbps,
            metrics.throughput_kbps,
            metrics.avg_delay_ms,
            metrics.min_delay_ms,
            metrics.max_delay_ms,
            metrics.packet_loss_ratio
        );
        rows.push(metrics);
    }

    if let Some(path) = &args.csv_out {
        let file = fs::File::create(path)
            .with_context(|| format!("Failed to create CSV file {}", path.display()))?;
        analysis::write_csv(file, &rows)
            .with_context(|| format!("Failed to write CSV file {}", path.display()))?;
        info!("Summary written to {}", path.display());
    }
    Ok(())
}

fn load_override(path: &Path) -> Result<SweepOverride> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: SweepOverride = toml::from_str(&content).context("Failed to parse config file")?;
    Ok(config)
}
