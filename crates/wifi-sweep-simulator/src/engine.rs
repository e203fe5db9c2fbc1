use crate::channel;
use crate::topology::TopologyError;
use crate::trace::{EngineReport, NodeId, TraceEvent, TraceSink};
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::debug;
use wifi_sweep_abstract::{
    AppContext, Application, Packet, PhyConfig, SimTime, Vector3, WifiStandard,
};

#[derive(Debug)]
enum EventType {
    AppStart {
        node: NodeId,
        app: usize,
    },
    TimerExpiry {
        node: NodeId,
        app: usize,
        timer_id: u32,
    },
    /// The shared medium becomes idle.
    TransmissionEnd,
    FrameArrival {
        frame: Frame,
    },
}

#[derive(Debug)]
struct Frame {
    src: NodeId,
    dst: NodeId,
    packet: Packet,
}

#[derive(Debug)]
struct Event {
    time: SimTime,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// Actions buffered during an application callback
#[derive(Default)]
struct ActionBuffer {
    outgoing_packets: Vec<(SocketAddrV4, Packet)>,
    timers_start: Vec<(SimTime, u32)>, // (delay, id)
    logs: Vec<String>,
}

/// Context implementation passed to applications
struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: SimTime,
}

impl<'a> AppContext for ScopedContext<'a> {
    fn send_to(&mut self, destination: SocketAddrV4, packet: Packet) {
        self.buffer.outgoing_packets.push((destination, packet));
    }

    fn start_timer(&mut self, delay: SimTime, timer_id: u32) {
        self.buffer.timers_start.push((delay, timer_id));
    }

    fn now(&self) -> SimTime {
        self.now
    }

    fn log(&mut self, message: &str) {
        self.buffer.logs.push(message.to_string());
    }
}

struct Device {
    standard: WifiStandard,
    queue: VecDeque<Frame>,
}

struct InstalledApp {
    port: u16,
    app: Box<dyn Application>,
}

#[derive(Default)]
struct Node {
    position: Vector3,
    device: Option<Device>,
    address: Option<Ipv4Addr>,
    apps: Vec<InstalledApp>,
}

/// Event-driven simulation of nodes sharing one ad-hoc WiFi channel.
///
/// A `Simulator` owns its clock, nodes and applications. Dropping it tears
/// the whole run down; nothing survives into the next instance.
pub struct Simulator {
    time: SimTime,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,
    stop_time: Option<SimTime>,

    phy: PhyConfig,
    rng: rand::rngs::StdRng,

    nodes: Vec<Node>,
    /// Address to node resolution, filled as addresses are assigned
    routes: HashMap<Ipv4Addr, NodeId>,

    medium_busy: bool,
    /// Round-robin cursor over devices contending for the medium
    next_device: usize,

    report: EngineReport,
}

impl Simulator {
    pub fn new(phy: PhyConfig) -> Self {
        let rng = rand::rngs::StdRng::seed_from_u64(phy.seed);

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            stop_time: None,
            phy,
            rng,
            nodes: Vec::new(),
            routes: HashMap::new(),
            medium_busy: false,
            next_device: 0,
            report: EngineReport::default(),
        }
    }

    pub fn create_nodes(&mut self, count: usize) -> Vec<NodeId> {
        let first = self.nodes.len();
        self.nodes.extend((0..count).map(|_| Node::default()));
        (first..first + count).map(|i| NodeId(i as u32)).collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut Node, TopologyError> {
        self.nodes
            .get_mut(node.index())
            .ok_or(TopologyError::UnknownNode(node))
    }

    pub fn install_device(
        &mut self,
        node: NodeId,
        standard: WifiStandard,
    ) -> Result<(), TopologyError> {
        let entry = self.node_mut(node)?;
        if entry.device.is_some() {
            return Err(TopologyError::DeviceExists(node));
        }
        entry.device = Some(Device {
            standard,
            queue: VecDeque::new(),
        });
        Ok(())
    }

    pub fn device_standard(&self, node: NodeId) -> Option<WifiStandard> {
        self.nodes
            .get(node.index())
            .and_then(|n| n.device.as_ref())
            .map(|d| d.standard)
    }

    pub fn set_position(&mut self, node: NodeId, position: Vector3) -> Result<(), TopologyError> {
        self.node_mut(node)?.position = position;
        Ok(())
    }

    pub fn position(&self, node: NodeId) -> Option<Vector3> {
        self.nodes.get(node.index()).map(|n| n.position)
    }

    pub fn assign_address(&mut self, node: NodeId, address: Ipv4Addr) -> Result<(), TopologyError> {
        if self.routes.contains_key(&address) {
            return Err(TopologyError::AddressInUse(address));
        }
        let entry = self.node_mut(node)?;
        if entry.device.is_none() {
            return Err(TopologyError::NoDevice { node, address });
        }
        entry.address = Some(address);
        self.routes.insert(address, node);
        Ok(())
    }

    pub fn address(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.nodes.get(node.index()).and_then(|n| n.address)
    }

    /// Install an application bound to `port` on `node`; returns its index on that node.
    pub fn install_application(
        &mut self,
        node: NodeId,
        port: u16,
        app: Box<dyn Application>,
        start: SimTime,
    ) -> Result<usize, TopologyError> {
        let entry = self.node_mut(node)?;
        if entry.apps.iter().any(|a| a.port == port) {
            return Err(TopologyError::PortInUse { node, port });
        }
        entry.apps.push(InstalledApp { port, app });
        let index = entry.apps.len() - 1;
        self.push_event(start, EventType::AppStart { node, app: index });
        Ok(index)
    }

    /// Events scheduled after `at` are never processed.
    pub fn stop(&mut self, at: SimTime) {
        self.stop_time = Some(at);
    }

    pub fn now(&self) -> SimTime {
        self.time
    }

    pub fn peek_next_event_time(&self) -> Option<SimTime> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    pub fn report(&self) -> EngineReport {
        EngineReport {
            duration_ns: self.time,
            nodes: self.nodes.len(),
            ..self.report.clone()
        }
    }

    fn push_event(&mut self, time: SimTime, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Run until the event queue drains or the stop time is reached.
    pub fn run(&mut self, sink: &mut dyn TraceSink) {
        while let Some(next) = self.peek_next_event_time() {
            if self.stop_time.is_some_and(|stop| next > stop) {
                break;
            }
            self.step(sink);
        }
        if let Some(stop) = self.stop_time {
            self.time = self.time.max(stop);
        }
    }

    /// Process the next event. Returns true if an event was processed, false if queue is empty.
    pub fn step(&mut self, sink: &mut dyn TraceSink) -> bool {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return false,
        };

        self.time = event.time;
        self.report.events_processed += 1;

        match event.event_type {
            EventType::AppStart { node, app } => {
                self.dispatch(node, app, sink, |a, ctx| a.start(ctx));
            }
            EventType::TimerExpiry {
                node,
                app,
                timer_id,
            } => {
                self.dispatch(node, app, sink, |a, ctx| a.on_timer(ctx, timer_id));
            }
            EventType::TransmissionEnd => {
                self.medium_busy = false;
                self.start_transmission(sink);
            }
            EventType::FrameArrival { frame } => {
                self.receive_frame(frame, sink);
            }
        }
        true
    }

    fn dispatch<F>(&mut self, node: NodeId, app: usize, sink: &mut dyn TraceSink, callback: F)
    where
        F: FnOnce(&mut dyn Application, &mut dyn AppContext),
    {
        let now = self.time;
        let mut buffer = ActionBuffer::default();
        {
            let Some(installed) = self
                .nodes
                .get_mut(node.index())
                .and_then(|n| n.apps.get_mut(app))
            else {
                debug!("{} has no application #{}", node, app);
                return;
            };
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now,
            };
            callback(installed.app.as_mut(), &mut ctx);
        }
        self.process_actions(node, app, buffer, sink);
    }

    fn process_actions(
        &mut self,
        node: NodeId,
        app: usize,
        buffer: ActionBuffer,
        sink: &mut dyn TraceSink,
    ) {
        for log in buffer.logs {
            debug!("[{}] {}", node, log);
        }

        for (delay, timer_id) in buffer.timers_start {
            self.push_event(
                self.time.saturating_add(delay),
                EventType::TimerExpiry {
                    node,
                    app,
                    timer_id,
                },
            );
        }

        for (destination, mut packet) in buffer.outgoing_packets {
            packet.dst_port = destination.port();
            sink.on_trace(
                self.time,
                &TraceEvent::AppTx {
                    node,
                    app,
                    bytes: packet.size,
                },
            );
            self.enqueue(node, destination, packet, sink);
        }
    }

    fn enqueue(
        &mut self,
        src: NodeId,
        destination: SocketAddrV4,
        packet: Packet,
        sink: &mut dyn TraceSink,
    ) {
        let Some(&dst) = self.routes.get(destination.ip()) else {
            self.report.unroutable += 1;
            debug!("[{}] no route to {}", src, destination);
            return;
        };
        let now = self.time;
        let limit = self.phy.queue_limit;
        let bytes = packet.size;

        let Some(device) = self
            .nodes
            .get_mut(src.index())
            .and_then(|n| n.device.as_mut())
        else {
            self.report.unroutable += 1;
            debug!("[{}] has no device, dropping packet", src);
            return;
        };

        sink.on_trace(now, &TraceEvent::MacTx { node: src, bytes });
        if device.queue.len() >= limit {
            self.report.queue_drops += 1;
            sink.on_trace(now, &TraceEvent::MacTxDrop { node: src });
            return;
        }
        device.queue.push_back(Frame { src, dst, packet });

        if !self.medium_busy {
            self.start_transmission(sink);
        }
    }

    /// Grant the idle medium to the next device with a queued frame.
    fn start_transmission(&mut self, sink: &mut dyn TraceSink) {
        if self.medium_busy || self.nodes.is_empty() {
            return;
        }
        let count = self.nodes.len();
        let Some(src_index) = (0..count)
            .map(|offset| (self.next_device + offset) % count)
            .find(|&i| {
                self.nodes[i]
                    .device
                    .as_ref()
                    .is_some_and(|d| !d.queue.is_empty())
            })
        else {
            return;
        };
        self.next_device = (src_index + 1) % count;

        let (frame, standard, from) = {
            let node = &mut self.nodes[src_index];
            let Some(device) = node.device.as_mut() else {
                return;
            };
            let Some(frame) = device.queue.pop_front() else {
                return;
            };
            (frame, device.standard, node.position)
        };
        let to = self
            .nodes
            .get(frame.dst.index())
            .map_or(from, |n| n.position);

        let rx_power = channel::rx_power_dbm(self.phy.tx_power_dbm, &from, &to);
        let snr = rx_power - self.phy.noise_floor_dbm;
        let rate = channel::select_rate_mbps(standard, snr);
        let rate_used = rate
            .or_else(|| standard.mcs_rates_mbps().first().copied())
            .unwrap_or(1.0);

        let backoff = SimTime::from(self.rng.random_range(0..=channel::CW_MIN)) * channel::SLOT;
        let end = self
            .time
            .saturating_add(backoff)
            .saturating_add(channel::airtime(standard, frame.packet.size, rate_used));

        self.medium_busy = true;
        self.report.frames_sent += 1;
        self.push_event(end, EventType::TransmissionEnd);

        if rate.is_some() && rx_power >= self.phy.rx_sensitivity_dbm {
            debug!(
                "{} -> {} seq={} at {:.1} Mbps (rx {:.1} dBm)",
                frame.src, frame.dst, frame.packet.seq, rate_used, rx_power
            );
            let arrival = end.saturating_add(channel::propagation_delay(&from, &to));
            self.push_event(arrival, EventType::FrameArrival { frame });
        } else {
            self.report.phy_drops += 1;
            debug!(
                "{} -> {} seq={} lost (rx {:.1} dBm)",
                frame.src, frame.dst, frame.packet.seq, rx_power
            );
            sink.on_trace(self.time, &TraceEvent::PhyRxDrop { node: frame.dst });
        }
    }

    fn receive_frame(&mut self, frame: Frame, sink: &mut dyn TraceSink) {
        let Frame { dst, packet, .. } = frame;
        let bytes = packet.size;
        self.report.frames_delivered += 1;
        sink.on_trace(self.time, &TraceEvent::MacRx { node: dst, bytes });

        let port = packet.dst_port;
        let Some(app) = self
            .nodes
            .get(dst.index())
            .and_then(|n| n.apps.iter().position(|a| a.port == port))
        else {
            debug!("{} has no application on port {}", dst, port);
            return;
        };

        let delay = self.time.saturating_sub(packet.timestamp);
        sink.on_trace(
            self.time,
            &TraceEvent::AppRx {
                node: dst,
                app,
                bytes,
                delay,
            },
        );
        self.dispatch(dst, app, sink, move |a, ctx| a.on_packet(ctx, packet));
    }
}

#[cfg(test)]
mod tests {
    use super::Simulator;
    use crate::trace::{NodeId, TraceEvent};
    use std::net::{Ipv4Addr, SocketAddrV4};
    use wifi_sweep_abstract::time::NANOS_PER_MILLI;
    use wifi_sweep_abstract::{
        AppContext, Application, Packet, PhyConfig, SimTime, Vector3, WifiStandard,
    };

    struct Burst {
        destination: SocketAddrV4,
        count: u32,
    }

    impl Application for Burst {
        fn start(&mut self, ctx: &mut dyn AppContext) {
            for seq in 0..self.count {
                let packet = Packet::new(9, 0, seq, 1000, ctx.now());
                ctx.send_to(self.destination, packet);
            }
        }

        fn on_packet(&mut self, _ctx: &mut dyn AppContext, _packet: Packet) {}
    }

    struct Ticker {
        destination: SocketAddrV4,
        interval: SimTime,
        seq: u32,
    }

    impl Application for Ticker {
        fn start(&mut self, ctx: &mut dyn AppContext) {
            self.on_timer(ctx, 0);
        }

        fn on_timer(&mut self, ctx: &mut dyn AppContext, _timer_id: u32) {
            ctx.send_to(
                self.destination,
                Packet::new(9, 0, self.seq, 100, ctx.now()),
            );
            self.seq += 1;
            ctx.start_timer(self.interval, 0);
        }

        fn on_packet(&mut self, _ctx: &mut dyn AppContext, _packet: Packet) {}
    }

    struct Sink;

    impl Application for Sink {
        fn on_packet(&mut self, ctx: &mut dyn AppContext, packet: Packet) {
            ctx.log(&format!("got seq {}", packet.seq));
        }
    }

    fn pair(phy: PhyConfig, distance: f64) -> (Simulator, NodeId, NodeId) {
        let mut sim = Simulator::new(phy);
        let nodes = sim.create_nodes(2);
        for (i, node) in nodes.iter().enumerate() {
            sim.install_device(*node, WifiStandard::Ieee80211ax).unwrap();
            sim.assign_address(*node, Ipv4Addr::new(10, 0, 0, i as u8 + 1))
                .unwrap();
        }
        sim.set_position(nodes[1], Vector3::new(0.0, distance, 0.0))
            .unwrap();
        (sim, nodes[0], nodes[1])
    }

    fn count(trace: &[(SimTime, TraceEvent)], pred: impl Fn(&TraceEvent) -> bool) -> usize {
        trace.iter().filter(|(_, e)| pred(e)).count()
    }

    #[test]
    fn packets_are_delivered_with_positive_delay() {
        let (mut sim, a, b) = pair(PhyConfig::default(), 30.0);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1001);
        let burst = Burst {
            destination: dest,
            count: 3,
        };
        sim.install_application(a, 9, Box::new(burst), 0).unwrap();
        sim.install_application(b, 1001, Box::new(Sink), 0).unwrap();

        let mut trace = Vec::new();
        sim.run(&mut trace);

        let sent = count(&trace, |e| matches!(e, TraceEvent::MacTx { node, .. } if *node == a));
        let received = count(&trace, |e| matches!(e, TraceEvent::MacRx { node, .. } if *node == b));
        assert_eq!(sent, 3);
        assert_eq!(received, 3);
        let delays: Vec<SimTime> = trace
            .iter()
            .filter_map(|(_, e)| match e {
                TraceEvent::AppRx { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect();
        assert_eq!(delays.len(), 3);
        assert!(delays.iter().all(|d| *d > 0));
        // Frames share one medium, so later frames wait longer.
        assert!(delays[2] > delays[0]);
        assert_eq!(sim.report().frames_delivered, 3);
    }

    #[test]
    fn stop_time_bounds_the_run() {
        let (mut sim, a, b) = pair(PhyConfig::default(), 0.0);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1001);
        sim.install_application(
            a,
            9,
            Box::new(Ticker {
                destination: dest,
                interval: NANOS_PER_MILLI,
                seq: 0,
            }),
            0,
        )
        .unwrap();
        sim.install_application(b, 1001, Box::new(Sink), 0).unwrap();
        sim.stop(10 * NANOS_PER_MILLI);

        let mut trace = Vec::new();
        sim.run(&mut trace);

        // Sends at 0, 1, ..., 10 ms inclusive.
        assert_eq!(count(&trace, |e| matches!(e, TraceEvent::AppTx { .. })), 11);
        assert_eq!(sim.now(), 10 * NANOS_PER_MILLI);
        assert!(trace.iter().all(|(t, _)| *t <= 10 * NANOS_PER_MILLI));
        assert!(sim.remaining_events() > 0);
    }

    #[test]
    fn timers_past_the_end_of_time_saturate() {
        let (mut sim, a, b) = pair(PhyConfig::default(), 0.0);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1001);
        let ticker = Ticker {
            destination: dest,
            interval: SimTime::MAX,
            seq: 0,
        };
        sim.install_application(a, 9, Box::new(ticker), NANOS_PER_MILLI).unwrap();
        sim.install_application(b, 1001, Box::new(Sink), 0).unwrap();
        sim.stop(10 * NANOS_PER_MILLI);

        let mut trace = Vec::new();
        sim.run(&mut trace);

        assert_eq!(count(&trace, |e| matches!(e, TraceEvent::AppTx { .. })), 1);
        assert_eq!(count(&trace, |e| matches!(e, TraceEvent::AppRx { .. })), 1);
        assert_eq!(sim.peek_next_event_time(), Some(SimTime::MAX));
    }

    #[test]
    fn full_queue_drops_frames() {
        let phy = PhyConfig {
            queue_limit: 1,
            ..Default::default()
        };
        let (mut sim, a, b) = pair(phy, 10.0);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1001);
        let burst = Burst {
            destination: dest,
            count: 5,
        };
        sim.install_application(a, 9, Box::new(burst), 0).unwrap();
        sim.install_application(b, 1001, Box::new(Sink), 0).unwrap();

        let mut trace = Vec::new();
        sim.run(&mut trace);

        // The first frame goes straight to the medium and the second waits.
        assert_eq!(
            count(&trace, |e| matches!(e, TraceEvent::MacTxDrop { .. })),
            3
        );
        assert_eq!(count(&trace, |e| matches!(e, TraceEvent::AppRx { .. })), 2);
        assert_eq!(sim.report().queue_drops, 3);
    }

    #[test]
    fn out_of_range_frames_are_lost() {
        let phy = PhyConfig {
            tx_power_dbm: -40.0,
            ..Default::default()
        };
        let (mut sim, a, b) = pair(phy, 150.0);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 2), 1001);
        let burst = Burst {
            destination: dest,
            count: 2,
        };
        sim.install_application(a, 9, Box::new(burst), 0).unwrap();
        sim.install_application(b, 1001, Box::new(Sink), 0).unwrap();

        let mut trace = Vec::new();
        sim.run(&mut trace);

        assert_eq!(
            count(&trace, |e| matches!(e, TraceEvent::PhyRxDrop { .. })),
            2
        );
        assert_eq!(count(&trace, |e| matches!(e, TraceEvent::MacRx { .. })), 0);
    }

    #[test]
    fn unknown_destinations_are_not_routed() {
        let (mut sim, a, _b) = pair(PhyConfig::default(), 10.0);
        let dest = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 99), 1001);
        let burst = Burst {
            destination: dest,
            count: 1,
        };
        sim.install_application(a, 9, Box::new(burst), 0).unwrap();

        let mut trace = Vec::new();
        sim.run(&mut trace);

        assert_eq!(sim.report().unroutable, 1);
        assert_eq!(count(&trace, |e| matches!(e, TraceEvent::MacTx { .. })), 0);
    }

    #[test]
    fn ports_and_addresses_are_exclusive() {
        let (mut sim, a, b) = pair(PhyConfig::default(), 10.0);
        sim.install_application(b, 1001, Box::new(Sink), 0).unwrap();
        assert!(sim.install_application(b, 1001, Box::new(Sink), 0).is_err());
        assert!(sim.assign_address(a, Ipv4Addr::new(10, 0, 0, 2)).is_err());
        assert!(sim.install_device(a, WifiStandard::Ieee80211be).is_err());
    }
}
