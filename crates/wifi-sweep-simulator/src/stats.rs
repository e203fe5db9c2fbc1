//! Per-run statistics: calculators fed by trace events and the collector that owns them.

use crate::trace::{TraceEvent, TraceSink, TraceSource};
use serde::Serialize;
use std::fmt;
use wifi_sweep_abstract::SimTime;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Integer(u64),
    Real(f64),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Integer(v) => write!(f, "{v}"),
            ScalarValue::Real(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatisticalSummary {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub sqrsum: f64,
    pub stddev: f64,
}

impl StatisticalSummary {
    pub fn update(&mut self, value: f64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum += value;
        self.sqrsum += value * value;

        let n = self.count as f64;
        self.mean = self.sum / n;
        self.stddev = if self.count > 1 {
            ((self.sqrsum - self.sum * self.sum / n) / (n - 1.0))
                .max(0.0)
                .sqrt()
        } else {
            0.0
        };
    }
}

/// Receives the values a calculator reports when its collector is written out.
pub trait OutputCallback {
    fn singleton(&mut self, context: &str, name: &str, value: ScalarValue);
    fn statistic(&mut self, context: &str, name: &str, summary: &StatisticalSummary);
}

pub trait DataCalculator {
    fn key(&self) -> &str;
    fn context(&self) -> &str;
    fn update(&mut self, now: SimTime, event: &TraceEvent);
    fn output(&self, callback: &mut dyn OutputCallback);
}

/// Counts every event it is fed.
pub struct CounterCalculator {
    key: String,
    context: String,
    count: u64,
}

impl CounterCalculator {
    pub fn new(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            context: context.into(),
            count: 0,
        }
    }
}

impl DataCalculator for CounterCalculator {
    fn key(&self) -> &str {
        &self.key
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn update(&mut self, _now: SimTime, _event: &TraceEvent) {
        self.count += 1;
    }

    fn output(&self, callback: &mut dyn OutputCallback) {
        callback.singleton(&self.context, &self.key, ScalarValue::Integer(self.count));
    }
}

/// Min/max/average/total of application receive delays, reported in nanoseconds.
pub struct TimeMinMaxAvgTotalCalculator {
    key: String,
    context: String,
    count: u64,
    total: SimTime,
    min: SimTime,
    max: SimTime,
}

impl TimeMinMaxAvgTotalCalculator {
    pub fn new(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            context: context.into(),
            count: 0,
            total: 0,
            min: 0,
            max: 0,
        }
    }

    pub fn record(&mut self, delay: SimTime) {
        if self.count == 0 {
            self.min = delay;
            self.max = delay;
        } else {
            self.min = self.min.min(delay);
            self.max = self.max.max(delay);
        }
        self.count += 1;
        self.total += delay;
    }

    pub fn average(&self) -> SimTime {
        if self.count == 0 {
            0
        } else {
            self.total / self.count
        }
    }
}

impl DataCalculator for TimeMinMaxAvgTotalCalculator {
    fn key(&self) -> &str {
        &self.key
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn update(&mut self, _now: SimTime, event: &TraceEvent) {
        if let TraceEvent::AppRx { delay, .. } = event {
            self.record(*delay);
        }
    }

    fn output(&self, callback: &mut dyn OutputCallback) {
        let fields = [
            ("count", self.count),
            ("total", self.total),
            ("average", self.average()),
            ("max", self.max),
            ("min", self.min),
        ];
        for (suffix, value) in fields {
            callback.singleton(
                &self.context,
                &format!("{}-{}", self.key, suffix),
                ScalarValue::Integer(value),
            );
        }
    }
}

/// Size statistics of the packets or frames it is fed.
pub struct PacketSizeMinMaxAvgTotalCalculator {
    key: String,
    context: String,
    summary: StatisticalSummary,
}

impl PacketSizeMinMaxAvgTotalCalculator {
    pub fn new(key: impl Into<String>, context: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            context: context.into(),
            summary: StatisticalSummary::default(),
        }
    }
}

impl DataCalculator for PacketSizeMinMaxAvgTotalCalculator {
    fn key(&self) -> &str {
        &self.key
    }

    fn context(&self) -> &str {
        &self.context
    }

    fn update(&mut self, _now: SimTime, event: &TraceEvent) {
        let bytes = match event {
            TraceEvent::MacTx { bytes, .. }
            | TraceEvent::MacRx { bytes, .. }
            | TraceEvent::AppTx { bytes, .. }
            | TraceEvent::AppRx { bytes, .. } => *bytes,
            TraceEvent::MacTxDrop { .. } | TraceEvent::PhyRxDrop { .. } => return,
        };
        self.summary.update(f64::from(bytes));
    }

    fn output(&self, callback: &mut dyn OutputCallback) {
        callback.statistic(&self.context, &self.key, &self.summary);
    }
}

struct Binding {
    source: TraceSource,
    calculator: Box<dyn DataCalculator>,
}

/// Everything recorded about one run: its description, free-form metadata
/// and the calculators subscribed to the engine's trace events.
#[derive(Default)]
pub struct DataCollector {
    experiment: String,
    strategy: String,
    input: String,
    run_label: String,
    description: String,
    metadata: Vec<(String, String)>,
    bindings: Vec<Binding>,
}

impl DataCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn describe_run(
        &mut self,
        experiment: impl Into<String>,
        strategy: impl Into<String>,
        input: impl Into<String>,
        run_label: impl Into<String>,
    ) {
        self.experiment = experiment.into();
        self.strategy = strategy.into();
        self.input = input.into();
        self.run_label = run_label.into();
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.push((key.into(), value.into()));
    }

    /// Subscribe `calculator` to the events selected by `source`.
    pub fn add_calculator(&mut self, source: TraceSource, calculator: Box<dyn DataCalculator>) {
        self.bindings.push(Binding { source, calculator });
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    pub fn strategy(&self) -> &str {
        &self.strategy
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn run_label(&self) -> &str {
        &self.run_label
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn metadata(&self) -> &[(String, String)] {
        &self.metadata
    }

    /// Report every calculator, in the order they were added.
    pub fn output(&self, callback: &mut dyn OutputCallback) {
        for binding in &self.bindings {
            binding.calculator.output(callback);
        }
    }

    pub fn records(&self) -> Vec<Record> {
        let mut records = RecordList::default();
        self.output(&mut records);
        records.0
    }

    /// Value of the first integer scalar named `name` under `context`.
    pub fn scalar(&self, context: &str, name: &str) -> Option<u64> {
        self.records().into_iter().find_map(|r| match r {
            Record::Scalar {
                context: c,
                name: n,
                value: ScalarValue::Integer(v),
            } if c == context && n == name => Some(v),
            _ => None,
        })
    }

    /// Sum of every integer scalar named `name`, across contexts.
    pub fn scalar_total(&self, name: &str) -> u64 {
        self.records()
            .into_iter()
            .filter_map(|r| match r {
                Record::Scalar {
                    name: n,
                    value: ScalarValue::Integer(v),
                    ..
                } if n == name => Some(v),
                _ => None,
            })
            .sum()
    }
}

impl TraceSink for DataCollector {
    fn on_trace(&mut self, now: SimTime, event: &TraceEvent) {
        for binding in &mut self.bindings {
            if binding.source.matches(event) {
                binding.calculator.update(now, event);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Record {
    Scalar {
        context: String,
        name: String,
        value: ScalarValue,
    },
    Statistic {
        context: String,
        name: String,
        summary: StatisticalSummary,
    },
}

#[derive(Default)]
struct RecordList(Vec<Record>);

impl OutputCallback for RecordList {
    fn singleton(&mut self, context: &str, name: &str, value: ScalarValue) {
        self.0.push(Record::Scalar {
            context: context.to_string(),
            name: name.to_string(),
            value,
        });
    }

    fn statistic(&mut self, context: &str, name: &str, summary: &StatisticalSummary) {
        self.0.push(Record::Statistic {
            context: context.to_string(),
            name: name.to_string(),
            summary: summary.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::NodeId;

    fn rx(node: u32, delay: SimTime) -> TraceEvent {
        TraceEvent::AppRx {
            node: NodeId(node),
            app: 0,
            bytes: 1000,
            delay,
        }
    }

    #[test]
    fn calculators_only_see_their_source() {
        let mut collector = DataCollector::new();
        collector.add_calculator(
            TraceSource::MacTx(NodeId(0)),
            Box::new(CounterCalculator::new("wifi-tx-frames", "node[0]")),
        );
        collector.add_calculator(
            TraceSource::AppRx {
                node: NodeId(1),
                app: 0,
            },
            Box::new(CounterCalculator::new("receiver-rx-packets", "node[1]")),
        );
        collector.add_calculator(
            TraceSource::AppRx {
                node: NodeId(2),
                app: 0,
            },
            Box::new(CounterCalculator::new("receiver-rx-packets", "node[2]")),
        );

        let tx = TraceEvent::MacTx {
            node: NodeId(0),
            bytes: 1000,
        };
        collector.on_trace(0, &tx);
        collector.on_trace(1, &tx);
        collector.on_trace(2, &rx(1, 10));
        collector.on_trace(3, &TraceEvent::MacTx {
            node: NodeId(1),
            bytes: 1000,
        });

        assert_eq!(collector.scalar("node[0]", "wifi-tx-frames"), Some(2));
        assert_eq!(collector.scalar("node[1]", "receiver-rx-packets"), Some(1));
        assert_eq!(collector.scalar("node[2]", "receiver-rx-packets"), Some(0));
        assert_eq!(collector.scalar_total("receiver-rx-packets"), 1);
    }

    #[test]
    fn delay_calculator_reports_five_fields() {
        let mut calc = TimeMinMaxAvgTotalCalculator::new("delay", ".");
        for delay in [300, 100, 200] {
            calc.update(0, &rx(1, delay));
        }
        calc.update(0, &TraceEvent::MacTxDrop { node: NodeId(0) });

        let mut records = RecordList::default();
        calc.output(&mut records);
        let values: Vec<(String, ScalarValue)> = records
            .0
            .into_iter()
            .map(|r| match r {
                Record::Scalar { name, value, .. } => (name, value),
                Record::Statistic { name, .. } => (name, ScalarValue::Integer(u64::MAX)),
            })
            .collect();
        assert_eq!(
            values,
            vec![
                ("delay-count".to_string(), ScalarValue::Integer(3)),
                ("delay-total".to_string(), ScalarValue::Integer(600)),
                ("delay-average".to_string(), ScalarValue::Integer(200)),
                ("delay-max".to_string(), ScalarValue::Integer(300)),
                ("delay-min".to_string(), ScalarValue::Integer(100)),
            ]
        );
    }

    #[test]
    fn empty_delay_calculator_reports_zeros() {
        let calc = TimeMinMaxAvgTotalCalculator::new("delay", ".");
        assert_eq!(calc.average(), 0);
    }

    #[test]
    fn summary_tracks_spread() {
        let mut summary = StatisticalSummary::default();
        for v in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            summary.update(v);
        }
        assert_eq!(summary.count, 8);
        assert_eq!(summary.mean, 5.0);
        assert_eq!(summary.min, 2.0);
        assert_eq!(summary.max, 9.0);
        assert!((summary.stddev - 2.138089935299395).abs() < 1e-9);
    }
}
