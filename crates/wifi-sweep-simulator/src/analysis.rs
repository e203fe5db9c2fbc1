//! Post-processing of `.sca` result files into throughput, delay and loss figures.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Packet size assumed when a file carries no size statistic.
pub const DEFAULT_PACKET_SIZE: f64 = 1000.0;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to read {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("{}: {source}", path.display())]
    InFile {
        path: PathBuf,
        #[source]
        source: Box<AnalysisError>,
    },
    #[error("simulation time {0} s must be positive")]
    InvalidSimTime(f64),
    #[error("failed to write CSV summary")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scalar {
    pub context: String,
    pub name: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statistic {
    pub context: String,
    pub name: String,
    pub fields: Vec<(String, f64)>,
}

impl Statistic {
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Parsed content of one scalar file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarFile {
    pub run: String,
    pub attrs: Vec<(String, String)>,
    pub scalars: Vec<Scalar>,
    pub statistics: Vec<Statistic>,
}

impl ScalarFile {
    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value of the scalar `name`, across contexts.
    pub fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = f64> + 'a {
        self.scalars
            .iter()
            .filter(move |s| s.name == name)
            .map(|s| s.value)
    }

    pub fn sum(&self, name: &str) -> f64 {
        self.values(name).sum()
    }
}

/// Split on whitespace, keeping double-quoted runs together with the quotes removed.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut has_token = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                has_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if has_token {
                    tokens.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        tokens.push(current);
    }
    tokens
}

fn number(token: &str, line: usize) -> Result<f64, AnalysisError> {
    token.parse::<f64>().map_err(|_| AnalysisError::Malformed {
        line,
        reason: format!("`{token}` is not a number"),
    })
}

pub fn parse_sca(text: &str) -> Result<ScalarFile, AnalysisError> {
    let mut file = ScalarFile::default();

    for (index, raw) in text.lines().enumerate() {
        let line = index + 1;
        let tokens = tokenize(raw.trim());
        let Some(kind) = tokens.first() else {
            continue;
        };
        match kind.as_str() {
            "run" => {
                file.run = tokens.get(1).cloned().unwrap_or_default();
            }
            "attr" => {
                let [_, key, value] = tokens.as_slice() else {
                    return Err(AnalysisError::Malformed {
                        line,
                        reason: "attr needs a key and a value".to_string(),
                    });
                };
                file.attrs.push((key.clone(), value.clone()));
            }
            "scalar" => {
                let [_, context, name, value, ..] = tokens.as_slice() else {
                    return Err(AnalysisError::Malformed {
                        line,
                        reason: "scalar needs a context, a name and a value".to_string(),
                    });
                };
                file.scalars.push(Scalar {
                    context: context.clone(),
                    name: name.clone(),
                    value: number(value, line)?,
                });
            }
            "statistic" => {
                let [_, context, name, ..] = tokens.as_slice() else {
                    return Err(AnalysisError::Malformed {
                        line,
                        reason: "statistic needs a context and a name".to_string(),
                    });
                };
                file.statistics.push(Statistic {
                    context: context.clone(),
                    name: name.clone(),
                    fields: Vec::new(),
                });
            }
            "field" => {
                let [_, name, value, ..] = tokens.as_slice() else {
                    return Err(AnalysisError::Malformed {
                        line,
                        reason: "field needs a name and a value".to_string(),
                    });
                };
                let value = number(value, line)?;
                let Some(statistic) = file.statistics.last_mut() else {
                    return Err(AnalysisError::Malformed {
                        line,
                        reason: "field outside of a statistic".to_string(),
                    });
                };
                statistic.fields.push((name.clone(), value));
            }
            other => debug!("line {}: skipping `{}` record", line, other),
        }
    }
    Ok(file)
}

pub fn read_sca(path: &Path) -> Result<ScalarFile, AnalysisError> {
    let text = fs::read_to_string(path).map_err(|source| AnalysisError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_sca(&text).map_err(|source| AnalysisError::InFile {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

/// Distance, user count and standard recovered from a `dist<d>_users<n>_<std>` label.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub distance: f64,
    pub users: u32,
    pub standard: String,
}

pub fn parse_measurement(label: &str) -> Option<Measurement> {
    let rest = label.strip_prefix("dist")?;
    let (distance, rest) = rest.split_once("_users")?;
    let (users, standard) = rest.split_once('_')?;
    Some(Measurement {
        distance: distance.parse().ok()?,
        users: users.parse().ok()?,
        standard: standard.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetrics {
    pub file: String,
    pub standard: Option<String>,
    pub distance_m: Option<f64>,
    pub users: Option<u32>,
    pub tx_packets: u64,
    pub rx_packets: u64,
    pub avg_packet_size: f64,
    /// Offered load: what the senders handed to the network
    pub bit_rate_kbps: f64,
    pub throughput_kbps: f64,
    pub avg_delay_ms: f64,
    pub max_delay_ms: f64,
    pub min_delay_ms: f64,
    pub packet_loss_ratio: f64,
}

/// One flow's `delay-*` scalars, in the order the collector writes them.
#[derive(Debug, Clone, Default, PartialEq)]
struct DelayFlow {
    count: f64,
    average: f64,
    max: f64,
    min: f64,
}

fn delay_flows(file: &ScalarFile) -> Vec<DelayFlow> {
    let mut flows: Vec<DelayFlow> = Vec::new();
    for scalar in &file.scalars {
        let Some(field) = scalar.name.strip_prefix("delay-") else {
            continue;
        };
        if field == "count" {
            flows.push(DelayFlow {
                count: scalar.value,
                ..Default::default()
            });
            continue;
        }
        let Some(flow) = flows.last_mut() else {
            continue;
        };
        match field {
            "average" => flow.average = scalar.value,
            "max" => flow.max = scalar.value,
            "min" => flow.min = scalar.value,
            _ => {}
        }
    }
    flows
}

/// Throughput, delay and loss for one parsed file over `sim_time_secs`.
pub fn compute_metrics(
    name: &str,
    file: &ScalarFile,
    sim_time_secs: f64,
) -> Result<RunMetrics, AnalysisError> {
    if !(sim_time_secs.is_finite() && sim_time_secs > 0.0) {
        return Err(AnalysisError::InvalidSimTime(sim_time_secs));
    }

    let tx = file.sum("sender-tx-packets");
    let rx = file.sum("receiver-rx-packets");
    let avg_size = file
        .statistics
        .iter()
        .find_map(|s| s.field("mean"))
        .filter(|mean| *mean > 0.0)
        .unwrap_or(DEFAULT_PACKET_SIZE);

    // Flows that never received anything report zeros and are left out.
    let flows: Vec<DelayFlow> = delay_flows(file)
        .into_iter()
        .filter(|f| f.count > 0.0)
        .collect();
    let received: f64 = flows.iter().map(|f| f.count).sum();
    let avg_delay_ns = if received > 0.0 {
        flows.iter().map(|f| f.average * f.count).sum::<f64>() / received
    } else {
        0.0
    };
    let max_delay_ns = flows.iter().map(|f| f.max).fold(0.0, f64::max);
    let min_delay_ns = flows
        .iter()
        .map(|f| f.min)
        .reduce(f64::min)
        .unwrap_or(0.0);

    let loss = if tx > 0.0 { (tx - rx) / tx } else { 0.0 };
    let measurement = file.attr("measurement").and_then(parse_measurement);
    let kbps = |packets: f64| packets * avg_size * 8.0 / sim_time_secs / 1000.0;

    Ok(RunMetrics {
        file: name.to_string(),
        standard: measurement.as_ref().map(|m| m.standard.clone()),
        distance_m: measurement.as_ref().map(|m| m.distance),
        users: measurement.as_ref().map(|m| m.users),
        tx_packets: tx as u64,
        rx_packets: rx as u64,
        avg_packet_size: avg_size,
        bit_rate_kbps: kbps(tx),
        throughput_kbps: kbps(rx),
        avg_delay_ms: avg_delay_ns / 1e6,
        max_delay_ms: max_delay_ns / 1e6,
        min_delay_ms: min_delay_ns / 1e6,
        packet_loss_ratio: loss,
    })
}

pub fn analyze_file(path: &Path, sim_time_secs: f64) -> Result<RunMetrics, AnalysisError> {
    let file = read_sca(path)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    compute_metrics(&name, &file, sim_time_secs)
}

pub fn write_csv<W: std::io::Write>(
    writer: W,
    metrics: &[RunMetrics],
) -> Result<(), AnalysisError> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in metrics {
        csv.serialize(row)?;
    }
    csv.flush().map_err(csv::Error::from)?;
    Ok(())
}
