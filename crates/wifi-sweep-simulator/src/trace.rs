use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use wifi_sweep_abstract::{RunTuple, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node[{}]", self.0)
    }
}

/// Signals raised by the engine while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// The MAC accepted a frame from the upper layer for transmission.
    MacTx { node: NodeId, bytes: u32 },
    /// The MAC passed a received frame up the local stack.
    MacRx { node: NodeId, bytes: u32 },
    /// The device queue was full and the frame was discarded.
    MacTxDrop { node: NodeId },
    /// A frame reached `node` below the receiver's sensitivity.
    PhyRxDrop { node: NodeId },
    /// Application `app` on `node` sent a packet.
    AppTx { node: NodeId, app: usize, bytes: u32 },
    /// Application `app` on `node` received a packet `delay` after it was sent.
    AppRx {
        node: NodeId,
        app: usize,
        bytes: u32,
        delay: SimTime,
    },
}

/// Selects which trace events a subscriber is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceSource {
    MacTx(NodeId),
    MacRx(NodeId),
    AppTx { node: NodeId, app: usize },
    /// Transmissions from every application on a node.
    AnyAppTx(NodeId),
    AppRx { node: NodeId, app: usize },
}

impl TraceSource {
    pub fn matches(&self, event: &TraceEvent) -> bool {
        match (self, event) {
            (TraceSource::MacTx(n), TraceEvent::MacTx { node, .. }) => n == node,
            (TraceSource::MacRx(n), TraceEvent::MacRx { node, .. }) => n == node,
            (TraceSource::AppTx { node: n, app: a }, TraceEvent::AppTx { node, app, .. }) => {
                n == node && a == app
            }
            (TraceSource::AnyAppTx(n), TraceEvent::AppTx { node, .. }) => n == node,
            (TraceSource::AppRx { node: n, app: a }, TraceEvent::AppRx { node, app, .. }) => {
                n == node && a == app
            }
            _ => false,
        }
    }
}

/// Receives every trace event raised during a run.
pub trait TraceSink {
    fn on_trace(&mut self, now: SimTime, event: &TraceEvent);
}

impl TraceSink for () {
    fn on_trace(&mut self, _now: SimTime, _event: &TraceEvent) {}
}

impl TraceSink for Vec<(SimTime, TraceEvent)> {
    fn on_trace(&mut self, now: SimTime, event: &TraceEvent) {
        self.push((now, event.clone()));
    }
}

/// Engine-side counters for one run, independent of any attached collector.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineReport {
    pub duration_ns: SimTime,
    pub events_processed: u64,
    pub nodes: usize,
    pub frames_sent: u64,
    pub frames_delivered: u64,
    pub queue_drops: u64,
    pub phy_drops: u64,
    pub unroutable: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// `None` for single-run mode
    pub tuple: Option<RunTuple>,
    pub output: PathBuf,
    pub engine: EngineReport,
}
