use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

use crate::time::{self, SimTime};

/// Endpoints that fit in the /24 subnet once the coordinator has taken the first host address.
pub const MAX_USERS: u32 = 253;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("sweep axis `{0}` is empty")]
    EmptyAxis(&'static str),
    #[error("sweep axis `{axis}` lists `{value}` more than once")]
    DuplicateAxisValue { axis: &'static str, value: String },
    #[error("distance {0} must be a finite, non-negative number of meters")]
    InvalidDistance(f64),
    #[error("distances {first} and {second} truncate to the same file name component")]
    DistanceCollision { first: f64, second: f64 },
    #[error("user count {0} must be between 1 and {max}", max = MAX_USERS)]
    InvalidUserCount(u32),
    #[error("bit rate {0} kbps must be positive")]
    InvalidBitRate(f64),
    #[error("simulation time {0} s must be positive")]
    InvalidDuration(f64),
    #[error("packet size must be positive")]
    InvalidPacketSize,
    #[error("packet cap must be positive")]
    InvalidPacketCap,
    #[error("unknown WiFi standard `{0}`")]
    UnknownStandard(String),
    #[error("unknown output format `{0}` (expected `omnet` or `json`)")]
    UnknownFormat(String),
    #[error("unknown naming scheme `{0}` (expected `with-run-id` or `tuple-only`)")]
    UnknownNaming(String),
}

/// Rate ladders are 20 MHz, single spatial stream, long guard interval.
const HT_RATES_MBPS: &[f64] = &[6.5, 13.0, 19.5, 26.0, 39.0, 52.0, 58.5, 65.0];
const VHT_RATES_MBPS: &[f64] = &[6.5, 13.0, 19.5, 26.0, 39.0, 52.0, 58.5, 65.0, 78.0];
const HE_RATES_MBPS: &[f64] = &[
    8.6, 17.2, 25.8, 34.4, 51.6, 68.8, 77.4, 86.0, 103.2, 114.7, 129.0, 143.4,
];
const EHT_RATES_MBPS: &[f64] = &[
    8.6, 17.2, 25.8, 34.4, 51.6, 68.8, 77.4, 86.0, 103.2, 114.7, 129.0, 143.4, 154.9, 172.1,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum WifiStandard {
    Ieee80211n,
    Ieee80211ac,
    Ieee80211ax,
    Ieee80211be,
}

impl WifiStandard {
    /// Name used in file names, run labels and logs.
    pub fn label(&self) -> &'static str {
        match self {
            WifiStandard::Ieee80211n => "WiFi4_80211n",
            WifiStandard::Ieee80211ac => "WiFi5_80211ac",
            WifiStandard::Ieee80211ax => "WiFi6_80211ax",
            WifiStandard::Ieee80211be => "WiFi7_80211be",
        }
    }

    /// PHY rates in Mbps indexed by MCS.
    pub fn mcs_rates_mbps(&self) -> &'static [f64] {
        match self {
            WifiStandard::Ieee80211n => HT_RATES_MBPS,
            WifiStandard::Ieee80211ac => VHT_RATES_MBPS,
            WifiStandard::Ieee80211ax => HE_RATES_MBPS,
            WifiStandard::Ieee80211be => EHT_RATES_MBPS,
        }
    }

    /// PHY preamble and header duration.
    pub fn preamble(&self) -> SimTime {
        match self {
            WifiStandard::Ieee80211n => time::micros(36),
            WifiStandard::Ieee80211ac => time::micros(40),
            WifiStandard::Ieee80211ax | WifiStandard::Ieee80211be => time::micros(48),
        }
    }
}

impl fmt::Display for WifiStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for WifiStandard {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let short = normalized.rsplit('_').next().unwrap_or(&normalized);
        match short.trim_start_matches("802.11").trim_start_matches("80211") {
            "n" | "wifi4" => Ok(WifiStandard::Ieee80211n),
            "ac" | "wifi5" => Ok(WifiStandard::Ieee80211ac),
            "ax" | "wifi6" => Ok(WifiStandard::Ieee80211ax),
            "be" | "wifi7" => Ok(WifiStandard::Ieee80211be),
            _ => Err(ConfigError::UnknownStandard(s.to_string())),
        }
    }
}

impl TryFrom<String> for WifiStandard {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<WifiStandard> for String {
    fn from(value: WifiStandard) -> Self {
        value.label().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// OMNeT++-style `.sca` scalar file
    #[default]
    Omnet,
    Json,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Omnet => "sca",
            OutputFormat::Json => "json",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Omnet => f.write_str("omnet"),
            OutputFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "omnet" | "sca" => Ok(OutputFormat::Omnet),
            "json" => Ok(OutputFormat::Json),
            _ => Err(ConfigError::UnknownFormat(s.to_string())),
        }
    }
}

/// Whether output file names carry the sweep's run identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunNaming {
    #[default]
    WithRunId,
    /// Names depend on the tuple only; repeated sweeps overwrite earlier files.
    TupleOnly,
}

impl FromStr for RunNaming {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "with-run-id" => Ok(RunNaming::WithRunId),
            "tuple-only" => Ok(RunNaming::TupleOnly),
            _ => Err(ConfigError::UnknownNaming(s.to_string())),
        }
    }
}

/// Radio parameters shared by every device in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhyConfig {
    pub tx_power_dbm: f64,
    pub rx_sensitivity_dbm: f64,
    pub noise_floor_dbm: f64,
    /// Frames a device may hold while waiting for the medium
    pub queue_limit: usize,
    pub seed: u64,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            tx_power_dbm: 40.0,
            rx_sensitivity_dbm: -96.0,
            noise_floor_dbm: -94.0,
            queue_limit: 500,
            seed: 1,
        }
    }
}

/// One (standard, distance, user count) combination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunTuple {
    pub standard: WifiStandard,
    pub distance: f64,
    pub users: u32,
}

impl RunTuple {
    pub fn new(standard: WifiStandard, distance: f64, users: u32) -> Self {
        Self {
            standard,
            distance,
            users,
        }
    }

    /// Distance as it appears in file names: truncated to whole meters.
    pub fn distance_meters(&self) -> i64 {
        self.distance.trunc() as i64
    }

    /// Input label recorded in the run description, e.g. `dist30_users10_WiFi6_80211ax`.
    pub fn input_label(&self) -> String {
        format!(
            "dist{}_users{}_{}",
            self.distance,
            self.users,
            self.standard.label()
        )
    }

    /// Output file prefix; the writer appends the run label and extension.
    pub fn file_prefix(&self, stem: &str, run_id: Option<&str>) -> String {
        let tail = format!(
            "{}m-{}users-{}",
            self.distance_meters(),
            self.users,
            self.standard.label()
        );
        match run_id {
            Some(id) => format!("{stem}-{id}-{tail}"),
            None => format!("{stem}-{tail}"),
        }
    }
}

impl fmt::Display for RunTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}m x {} users",
            self.standard, self.distance, self.users
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepConfig {
    pub standards: Vec<WifiStandard>,
    pub distances: Vec<f64>,
    pub user_counts: Vec<u32>,
    pub sim_time_secs: f64,
    pub bit_rate_kbps: f64,
    pub packet_size: u32,
    pub max_packets: u32,
    pub experiment: String,
    pub strategy: String,
    pub author: String,
    pub file_stem: String,
    pub output_dir: PathBuf,
    pub format: OutputFormat,
    pub naming: RunNaming,
    pub phy: PhyConfig,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            standards: vec![WifiStandard::Ieee80211ax, WifiStandard::Ieee80211be],
            distances: vec![0.0, 30.0, 60.0, 90.0, 120.0, 150.0],
            user_counts: vec![1, 10, 20, 50],
            sim_time_secs: 20.0,
            bit_rate_kbps: 5000.0,
            packet_size: 1000,
            max_packets: 100_000_000,
            experiment: "wifi-example-sim".to_string(),
            strategy: "wifi-default".to_string(),
            author: "wifi-sweep".to_string(),
            file_stem: "DataOfUser1".to_string(),
            output_dir: PathBuf::from("."),
            format: OutputFormat::Omnet,
            naming: RunNaming::WithRunId,
            phy: PhyConfig::default(),
        }
    }
}

impl SweepConfig {
    /// Reject configurations that would produce meaningless runs or colliding file names.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.standards.is_empty() {
            return Err(ConfigError::EmptyAxis("standards"));
        }
        let mut seen_standards = HashSet::new();
        for standard in &self.standards {
            if !seen_standards.insert(*standard) {
                return Err(ConfigError::DuplicateAxisValue {
                    axis: "standards",
                    value: standard.to_string(),
                });
            }
        }

        if self.distances.is_empty() {
            return Err(ConfigError::EmptyAxis("distances"));
        }
        let mut truncated: Vec<(i64, f64)> = Vec::with_capacity(self.distances.len());
        for &distance in &self.distances {
            if !distance.is_finite() || distance < 0.0 {
                return Err(ConfigError::InvalidDistance(distance));
            }
            let meters = distance.trunc() as i64;
            if let Some(&(_, first)) = truncated.iter().find(|(m, _)| *m == meters) {
                return Err(ConfigError::DistanceCollision {
                    first,
                    second: distance,
                });
            }
            truncated.push((meters, distance));
        }

        if self.user_counts.is_empty() {
            return Err(ConfigError::EmptyAxis("user_counts"));
        }
        let mut seen_users = HashSet::new();
        for &users in &self.user_counts {
            if users == 0 || users > MAX_USERS {
                return Err(ConfigError::InvalidUserCount(users));
            }
            if !seen_users.insert(users) {
                return Err(ConfigError::DuplicateAxisValue {
                    axis: "user_counts",
                    value: users.to_string(),
                });
            }
        }

        if !(self.sim_time_secs.is_finite() && self.sim_time_secs > 0.0) {
            return Err(ConfigError::InvalidDuration(self.sim_time_secs));
        }
        if self.packet_size == 0 {
            return Err(ConfigError::InvalidPacketSize);
        }
        if self.max_packets == 0 {
            return Err(ConfigError::InvalidPacketCap);
        }
        send_interval(self.packet_size, self.bit_rate_kbps)?;
        Ok(())
    }

    /// All run tuples in execution order: standard, then distance, then user count.
    pub fn tuples(&self) -> Vec<RunTuple> {
        let mut tuples = Vec::with_capacity(
            self.standards.len() * self.distances.len() * self.user_counts.len(),
        );
        for &standard in &self.standards {
            for &distance in &self.distances {
                for &users in &self.user_counts {
                    tuples.push(RunTuple::new(standard, distance, users));
                }
            }
        }
        tuples
    }
}

/// Time between packets for a constant bit rate flow:
/// `packet_size * 8 / (bit_rate_kbps * 1000)` seconds.
pub fn send_interval(packet_size: u32, bit_rate_kbps: f64) -> Result<SimTime, ConfigError> {
    if !(bit_rate_kbps.is_finite() && bit_rate_kbps > 0.0) {
        return Err(ConfigError::InvalidBitRate(bit_rate_kbps));
    }
    if packet_size == 0 {
        return Err(ConfigError::InvalidPacketSize);
    }
    let bits_per_packet = packet_size as f64 * 8.0;
    let bit_rate_bps = bit_rate_kbps * 1000.0;
    Ok(time::from_secs_f64(bits_per_packet / bit_rate_bps))
}
