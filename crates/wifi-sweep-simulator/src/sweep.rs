//! The sweep driver: one fresh simulation per run tuple, plus the single-run mode.

use crate::apps::{DEFAULT_INTERVAL, Receiver, Sender};
use crate::engine::Simulator;
use crate::output::writer_for;
use crate::stats::{
    CounterCalculator, DataCollector, PacketSizeMinMaxAvgTotalCalculator,
    TimeMinMaxAvgTotalCalculator,
};
use crate::topology::Topology;
use crate::trace::{RunReport, TraceSource};
use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs;
use std::net::SocketAddrV4;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{error, info, warn};
use wifi_sweep_abstract::time;
use wifi_sweep_abstract::{
    OutputFormat, PhyConfig, RunNaming, RunTuple, SimTime, SweepConfig, WifiStandard,
    send_interval,
};

/// Flow `i` (1-based) of a sweep run uses port `SWEEP_BASE_PORT + i` on both ends.
pub const SWEEP_BASE_PORT: u16 = 1000;
/// The single-run flow listens here.
pub const SINGLE_RUN_PORT: u16 = 1000;

/// `run-<unix seconds>`, shared by every file of one sweep.
pub fn make_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("run-{secs}")
}

#[derive(Debug, Clone, Serialize)]
pub struct RunFailure {
    pub tuple: RunTuple,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepSummary {
    pub run_id: String,
    pub completed: Vec<RunReport>,
    pub failures: Vec<RunFailure>,
}

impl SweepSummary {
    pub fn total(&self) -> usize {
        self.completed.len() + self.failures.len()
    }
}

/// Everything needed to execute and persist one simulation.
struct RunPlan<'a> {
    tuple: RunTuple,
    interval: SimTime,
    packet_size: u32,
    max_packets: u32,
    stop: SimTime,
    experiment: &'a str,
    strategy: &'a str,
    input: String,
    run_label: String,
    metadata: Vec<(&'a str, String)>,
    prefix: String,
    format: OutputFormat,
    output_dir: &'a Path,
    phy: &'a PhyConfig,
    first_port: u16,
    packet_size_stat: bool,
}

fn execute(plan: RunPlan<'_>) -> Result<RunReport> {
    let tuple = plan.tuple;
    let mut sim = Simulator::new(plan.phy.clone());
    let topology = Topology::build(&mut sim, tuple.standard, tuple.distance, tuple.users)
        .with_context(|| format!("Failed to build topology for {tuple}"))?;
    let coordinator = topology.coordinator;

    let mut collector = DataCollector::new();
    collector.describe_run(plan.experiment, plan.strategy, plan.input, plan.run_label);
    collector.set_description(tuple.to_string());
    for (key, value) in plan.metadata {
        collector.add_metadata(key, value);
    }

    collector.add_calculator(
        TraceSource::MacTx(coordinator),
        Box::new(CounterCalculator::new("wifi-tx-frames", coordinator.to_string())),
    );
    for &endpoint in &topology.endpoints {
        collector.add_calculator(
            TraceSource::MacRx(endpoint),
            Box::new(CounterCalculator::new("wifi-rx-frames", endpoint.to_string())),
        );
    }

    for (i, &endpoint) in topology.endpoints.iter().enumerate() {
        let port = plan.first_port + i as u16;
        let address = topology
            .endpoint_address(i)
            .with_context(|| format!("{endpoint} has no address"))?;
        let sender = Sender::new(
            port,
            SocketAddrV4::new(address, port),
            plan.packet_size,
            plan.interval,
            plan.max_packets,
        );
        let tx_app = sim.install_application(coordinator, port, Box::new(sender), 0)?;
        let rx_app = sim.install_application(endpoint, port, Box::new(Receiver::default()), 0)?;

        collector.add_calculator(
            TraceSource::AppTx {
                node: coordinator,
                app: tx_app,
            },
            Box::new(CounterCalculator::new("sender-tx-packets", coordinator.to_string())),
        );
        let rx_source = TraceSource::AppRx {
            node: endpoint,
            app: rx_app,
        };
        collector.add_calculator(
            rx_source,
            Box::new(CounterCalculator::new("receiver-rx-packets", endpoint.to_string())),
        );
        collector.add_calculator(
            rx_source,
            Box::new(TimeMinMaxAvgTotalCalculator::new("delay", ".")),
        );
    }

    if plan.packet_size_stat {
        collector.add_calculator(
            TraceSource::AnyAppTx(coordinator),
            Box::new(PacketSizeMinMaxAvgTotalCalculator::new(
                "tx-pkt-size",
                coordinator.to_string(),
            )),
        );
    }

    sim.stop(plan.stop);
    sim.run(&mut collector);
    let engine = sim.report();
    info!(
        "{}: {} of {} packets received",
        tuple,
        collector.scalar_total("receiver-rx-packets"),
        collector.scalar_total("sender-tx-packets")
    );
    if engine.queue_drops > 0 || engine.phy_drops > 0 {
        warn!(
            "{}: {} frames dropped at the queue, {} lost on the channel",
            tuple, engine.queue_drops, engine.phy_drops
        );
    }

    let mut writer = writer_for(plan.format, plan.output_dir);
    writer.set_file_prefix(&plan.prefix);
    let output = writer
        .output(&collector)
        .with_context(|| format!("Failed to write results for {tuple}"))?;

    Ok(RunReport {
        tuple: None,
        output,
        engine,
    })
}

/// Run one tuple of `config` and write its result file.
pub fn run_tuple(config: &SweepConfig, run_id: &str, tuple: &RunTuple) -> Result<RunReport> {
    let interval = send_interval(config.packet_size, config.bit_rate_kbps)?;
    let (prefix, run_label) = match config.naming {
        RunNaming::WithRunId => (
            tuple.file_prefix(&config.file_stem, Some(run_id)),
            run_id.to_string(),
        ),
        RunNaming::TupleOnly => (tuple.file_prefix(&config.file_stem, None), String::new()),
    };

    let plan = RunPlan {
        tuple: *tuple,
        interval,
        packet_size: config.packet_size,
        max_packets: config.max_packets,
        stop: time::from_secs_f64(config.sim_time_secs),
        experiment: &config.experiment,
        strategy: &config.strategy,
        input: tuple.input_label(),
        run_label,
        metadata: vec![("author", config.author.clone())],
        prefix,
        format: config.format,
        output_dir: &config.output_dir,
        phy: &config.phy,
        first_port: SWEEP_BASE_PORT + 1,
        packet_size_stat: false,
    };
    let report = execute(plan)?;
    Ok(RunReport {
        tuple: Some(*tuple),
        ..report
    })
}

/// Create `dir` if needed and make sure result files can be written into it.
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;
    tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Output directory {} is not writable", dir.display()))?;
    Ok(())
}

/// Validate `config`, then run every tuple in order.
pub fn run_sweep(config: &SweepConfig, run_id: &str) -> Result<SweepSummary> {
    sweep_with(config, run_id, |tuple| run_tuple(config, run_id, tuple))
}

/// Drive the sweep loop with a caller-supplied runner. A runner error is
/// recorded against its tuple and the sweep moves on.
pub fn sweep_with<F>(config: &SweepConfig, run_id: &str, mut runner: F) -> Result<SweepSummary>
where
    F: FnMut(&RunTuple) -> Result<RunReport>,
{
    config.validate().context("Invalid sweep configuration")?;
    prepare_output_dir(&config.output_dir)?;

    let tuples = config.tuples();
    info!("Starting sweep {} with {} runs", run_id, tuples.len());

    let mut summary = SweepSummary {
        run_id: run_id.to_string(),
        completed: Vec::new(),
        failures: Vec::new(),
    };
    let mut current: Option<WifiStandard> = None;

    for tuple in tuples {
        if current != Some(tuple.standard) {
            if let Some(done) = current {
                info!("WiFi standard {} testing completed", done);
            }
            info!("Testing standard: {}", tuple.standard);
            current = Some(tuple.standard);
        }
        info!("  Distance: {}m, Users: {}", tuple.distance, tuple.users);

        match runner(&tuple) {
            Ok(report) => {
                info!("  Output saved: {}", report.output.display());
                summary.completed.push(report);
            }
            Err(err) => {
                error!("  Run {} failed: {:#}", tuple, err);
                summary.failures.push(RunFailure {
                    tuple,
                    error: format!("{err:#}"),
                });
            }
        }
    }
    if let Some(done) = current {
        info!("WiFi standard {} testing completed", done);
    }

    info!(
        "Sweep {} finished: {} of {} runs written",
        run_id,
        summary.completed.len(),
        summary.total()
    );
    Ok(summary)
}

/// One coordinator, one endpoint, parameters from the command line.
#[derive(Debug, Clone)]
pub struct SingleRunConfig {
    pub distance: f64,
    pub format: OutputFormat,
    pub sim_time_secs: f64,
    /// `None` keeps the default 0.05 s interval
    pub bit_rate_kbps: Option<f64>,
    pub standard: WifiStandard,
    pub experiment: String,
    pub strategy: String,
    pub run_id: String,
    pub author: String,
    pub packet_size: u32,
    pub max_packets: u32,
    pub file_stem: String,
    pub output_dir: PathBuf,
    pub phy: PhyConfig,
}

pub const SINGLE_DEFAULT_DISTANCE: f64 = 50.0;
pub const SINGLE_DEFAULT_SIM_TIME: f64 = 20.0;

impl Default for SingleRunConfig {
    fn default() -> Self {
        let sweep = SweepConfig::default();
        Self {
            distance: SINGLE_DEFAULT_DISTANCE,
            format: OutputFormat::Omnet,
            sim_time_secs: SINGLE_DEFAULT_SIM_TIME,
            bit_rate_kbps: None,
            standard: WifiStandard::Ieee80211ax,
            experiment: sweep.experiment,
            strategy: sweep.strategy,
            run_id: make_run_id(),
            author: sweep.author,
            packet_size: sweep.packet_size,
            max_packets: sweep.max_packets,
            file_stem: sweep.file_stem,
            output_dir: sweep.output_dir,
            phy: sweep.phy,
        }
    }
}

impl SingleRunConfig {
    /// File prefix naming only the parameters that differ from their defaults.
    pub fn file_prefix(&self) -> String {
        let mut prefix = self.file_stem.clone();
        let mut custom = false;
        if let Some(kbps) = self.bit_rate_kbps {
            prefix.push_str(&format!("-{}kbps", kbps.trunc() as i64));
            custom = true;
        }
        if self.distance != SINGLE_DEFAULT_DISTANCE {
            prefix.push_str(&format!("-{}m", self.distance.trunc() as i64));
            custom = true;
        }
        if self.sim_time_secs != SINGLE_DEFAULT_SIM_TIME {
            prefix.push_str(&format!("-{}s", self.sim_time_secs.trunc() as i64));
            custom = true;
        }
        if self.format != OutputFormat::Omnet {
            prefix.push_str(&format!("-{}", self.format));
            custom = true;
        }
        if !custom {
            prefix.push_str("-default");
        }
        prefix
    }

    pub fn interval(&self) -> Result<SimTime> {
        match self.bit_rate_kbps {
            Some(kbps) => Ok(send_interval(self.packet_size, kbps)?),
            None => Ok(DEFAULT_INTERVAL),
        }
    }
}

pub fn run_single(config: &SingleRunConfig) -> Result<RunReport> {
    if !config.distance.is_finite() || config.distance < 0.0 {
        bail!("distance {} must be a finite, non-negative number of meters", config.distance);
    }
    if !(config.sim_time_secs.is_finite() && config.sim_time_secs > 0.0) {
        bail!("simulation time {} s must be positive", config.sim_time_secs);
    }
    if config.packet_size == 0 || config.max_packets == 0 {
        bail!("packet size and packet cap must be positive");
    }
    let interval = config.interval()?;
    prepare_output_dir(&config.output_dir)?;

    match config.bit_rate_kbps {
        Some(kbps) => info!(
            "Distance: {}m, SimTime: {}s, Format: {}, BitRate: {} Kbps",
            config.distance, config.sim_time_secs, config.format, kbps
        ),
        None => info!(
            "Distance: {}m, SimTime: {}s, Format: {} (using default transmission interval)",
            config.distance, config.sim_time_secs, config.format
        ),
    }

    let tuple = RunTuple::new(config.standard, config.distance, 1);
    let plan = RunPlan {
        tuple,
        interval,
        packet_size: config.packet_size,
        max_packets: config.max_packets,
        stop: time::from_secs_f64(config.sim_time_secs),
        experiment: &config.experiment,
        strategy: &config.strategy,
        input: config.distance.to_string(),
        run_label: String::new(),
        metadata: vec![
            ("author", config.author.clone()),
            ("run", config.run_id.clone()),
        ],
        prefix: config.file_prefix(),
        format: config.format,
        output_dir: &config.output_dir,
        phy: &config.phy,
        first_port: SINGLE_RUN_PORT,
        packet_size_stat: true,
    };
    let report = execute(plan)?;
    info!("Statistics output saved to {}", report.output.display());
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_has_prefix() {
        let id = make_run_id();
        assert!(id.starts_with("run-"));
        assert!(id[4..].parse::<u64>().is_ok());
    }

    #[test]
    fn single_prefix_names_only_custom_parameters() {
        let mut config = SingleRunConfig::default();
        assert_eq!(config.file_prefix(), "DataOfUser1-default");

        config.bit_rate_kbps = Some(1000.0);
        assert_eq!(config.file_prefix(), "DataOfUser1-1000kbps");

        config.distance = 75.5;
        config.sim_time_secs = 5.0;
        config.format = OutputFormat::Json;
        assert_eq!(config.file_prefix(), "DataOfUser1-1000kbps-75m-5s-json");
    }

    #[test]
    fn single_interval_falls_back_to_default() {
        let mut config = SingleRunConfig::default();
        assert_eq!(config.interval().unwrap(), DEFAULT_INTERVAL);
        config.bit_rate_kbps = Some(5000.0);
        assert_eq!(config.interval().unwrap(), 1_600_000);
        config.bit_rate_kbps = Some(0.0);
        assert!(config.interval().is_err());
    }

    #[test]
    fn single_run_writes_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = SingleRunConfig {
            sim_time_secs: 20.0,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let report = run_single(&config).unwrap();
        assert_eq!(
            report.output,
            dir.path().join("DataOfUser1-default.sca")
        );
        assert!(report.tuple.is_none());

        let text = fs::read_to_string(&report.output).unwrap();
        assert!(text.starts_with("run \n"));
        assert!(text.contains("attr measurement \"50\""));
        assert!(text.contains("statistic node[0] tx-pkt-size"));
        // 0.05 s interval over 20 s, both ends inclusive.
        assert!(text.contains("scalar node[0] sender-tx-packets 401"));
    }

    #[test]
    fn sweep_tuple_uses_run_id_in_name_and_label() {
        let dir = tempfile::tempdir().unwrap();
        let config = SweepConfig {
            sim_time_secs: 0.1,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let tuple = RunTuple::new(WifiStandard::Ieee80211ax, 30.0, 10);
        let report = run_tuple(&config, "run-42", &tuple).unwrap();
        assert_eq!(
            report.output.file_name().unwrap(),
            "DataOfUser1-run-42-30m-10users-WiFi6_80211ax-run-42.sca"
        );
        assert_eq!(report.engine.nodes, 11);

        let text = fs::read_to_string(&report.output).unwrap();
        assert_eq!(text.matches("sender-tx-packets").count(), 10);
        assert!(text.contains("scalar node[10] receiver-rx-packets"));
        assert!(text.contains("attr \"author\" \"wifi-sweep\""));
    }

    #[test]
    fn sweep_stops_before_running_when_output_is_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("results");
        fs::write(&blocker, b"").unwrap();
        let config = SweepConfig {
            output_dir: blocker,
            ..Default::default()
        };

        let mut calls = 0;
        let result = sweep_with(&config, "run-1", |_| {
            calls += 1;
            bail!("runner should not be reached")
        });
        assert!(result.is_err());
        assert_eq!(calls, 0);
    }

    #[cfg(unix)]
    #[test]
    fn read_only_output_dir_is_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("locked");
        fs::create_dir(&out).unwrap();
        fs::set_permissions(&out, fs::Permissions::from_mode(0o555)).unwrap();

        // Privileged users bypass directory permissions.
        let writable = tempfile::NamedTempFile::new_in(&out).is_ok();
        let result = prepare_output_dir(&out);
        fs::set_permissions(&out, fs::Permissions::from_mode(0o755)).unwrap();
        if !writable {
            let err = result.unwrap_err();
            assert!(format!("{err:#}").contains("not writable"));
        }
    }

    #[test]
    fn prepare_output_dir_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("a").join("b");
        prepare_output_dir(&out).unwrap();
        assert!(out.is_dir());
        assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
    }

    #[test]
    fn tuple_only_naming_drops_the_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = SweepConfig {
            sim_time_secs: 0.1,
            naming: RunNaming::TupleOnly,
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let tuple = RunTuple::new(WifiStandard::Ieee80211be, 0.0, 1);
        let report = run_tuple(&config, "run-42", &tuple).unwrap();
        assert_eq!(
            report.output.file_name().unwrap(),
            "DataOfUser1-0m-1users-WiFi7_80211be.sca"
        );
    }
}
