pub mod analysis;
pub mod apps;
pub mod channel;
pub mod engine;
pub mod output;
pub mod stats;
pub mod sweep;
pub mod topology;
pub mod trace;

pub use engine::Simulator;
pub use output::{DataOutput, OutputError, writer_for};
pub use stats::DataCollector;
pub use sweep::{
    RunFailure, SingleRunConfig, SweepSummary, make_run_id, run_single, run_sweep, run_tuple,
    sweep_with,
};
pub use topology::{Topology, TopologyError};
pub use trace::{EngineReport, NodeId, RunReport, TraceEvent, TraceSink, TraceSource};
