//! Writers that persist a [`DataCollector`] to disk.

use crate::stats::{DataCollector, OutputCallback, Record, ScalarValue, StatisticalSummary};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use wifi_sweep_abstract::OutputFormat;

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("failed to write {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize {}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub trait DataOutput {
    fn set_file_prefix(&mut self, prefix: &str);
    fn file_prefix(&self) -> &str;
    fn extension(&self) -> &'static str;
    fn directory(&self) -> &Path;

    /// Write the collector and return the path of the file produced.
    fn output(&self, collector: &DataCollector) -> Result<PathBuf, OutputError>;

    /// `<dir>/<prefix>-<run label>.<ext>`, or `<dir>/<prefix>.<ext>` when the label is empty.
    fn output_path(&self, run_label: &str) -> PathBuf {
        let name = if run_label.is_empty() {
            format!("{}.{}", self.file_prefix(), self.extension())
        } else {
            format!("{}-{}.{}", self.file_prefix(), run_label, self.extension())
        };
        self.directory().join(name)
    }
}

pub fn writer_for(format: OutputFormat, directory: impl Into<PathBuf>) -> Box<dyn DataOutput> {
    let directory = directory.into();
    match format {
        OutputFormat::Omnet => Box::new(OmnetDataOutput::new(directory)),
        OutputFormat::Json => Box::new(JsonDataOutput::new(directory)),
    }
}

/// OMNeT++-style scalar file.
pub struct OmnetDataOutput {
    directory: PathBuf,
    prefix: String,
}

impl OmnetDataOutput {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "data".to_string(),
        }
    }
}

#[derive(Default)]
struct ScaLines(Vec<String>);

impl OutputCallback for ScaLines {
    fn singleton(&mut self, context: &str, name: &str, value: ScalarValue) {
        self.0.push(format!("scalar {} {} {}", context_or_dot(context), name, value));
    }

    fn statistic(&mut self, context: &str, name: &str, summary: &StatisticalSummary) {
        self.0
            .push(format!("statistic {} {}", context_or_dot(context), name));
        self.0.push(format!("field count {}", summary.count));
        self.0.push(format!("field sum {}", summary.sum));
        self.0.push(format!("field mean {}", summary.mean));
        self.0.push(format!("field min {}", summary.min));
        self.0.push(format!("field max {}", summary.max));
        self.0.push(format!("field sqrsum {}", summary.sqrsum));
        self.0.push(format!("field stddev {}", summary.stddev));
    }
}

fn context_or_dot(context: &str) -> &str {
    if context.is_empty() { "." } else { context }
}

impl DataOutput for OmnetDataOutput {
    fn set_file_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.to_string();
    }

    fn file_prefix(&self) -> &str {
        &self.prefix
    }

    fn extension(&self) -> &'static str {
        OutputFormat::Omnet.extension()
    }

    fn directory(&self) -> &Path {
        &self.directory
    }

    fn output(&self, collector: &DataCollector) -> Result<PathBuf, OutputError> {
        let path = self.output_path(collector.run_label());
        let io_err = |source| OutputError::Io {
            path: path.clone(),
            source,
        };

        let mut lines = vec![
            format!("run {}", collector.run_label()),
            format!("attr experiment \"{}\"", collector.experiment()),
            format!("attr strategy \"{}\"", collector.strategy()),
            format!("attr measurement \"{}\"", collector.input()),
            format!("attr description \"{}\"", collector.description()),
        ];
        for (key, value) in collector.metadata() {
            lines.push(format!("attr \"{key}\" \"{value}\""));
        }
        lines.push(String::new());

        let mut body = ScaLines::default();
        collector.output(&mut body);
        lines.extend(body.0);

        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        for line in &lines {
            writeln!(writer, "{line}").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;
        Ok(path)
    }
}

#[derive(Serialize)]
struct JsonDocument<'a> {
    run: &'a str,
    experiment: &'a str,
    strategy: &'a str,
    measurement: &'a str,
    description: &'a str,
    metadata: BTreeMap<&'a str, &'a str>,
    records: Vec<Record>,
}

/// Same content as the scalar file, as one pretty-printed JSON document.
pub struct JsonDataOutput {
    directory: PathBuf,
    prefix: String,
}

impl JsonDataOutput {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            prefix: "data".to_string(),
        }
    }
}

impl DataOutput for JsonDataOutput {
    fn set_file_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.to_string();
    }

    fn file_prefix(&self) -> &str {
        &self.prefix
    }

    fn extension(&self) -> &'static str {
        OutputFormat::Json.extension()
    }

    fn directory(&self) -> &Path {
        &self.directory
    }

    fn output(&self, collector: &DataCollector) -> Result<PathBuf, OutputError> {
        let path = self.output_path(collector.run_label());
        let document = JsonDocument {
            run: collector.run_label(),
            experiment: collector.experiment(),
            strategy: collector.strategy(),
            measurement: collector.input(),
            description: collector.description(),
            metadata: collector
                .metadata()
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect(),
            records: collector.records(),
        };

        let file = File::create(&path).map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &document).map_err(|source| {
            OutputError::Json {
                path: path.clone(),
                source,
            }
        })?;
        writer.flush().map_err(|source| OutputError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }
}
