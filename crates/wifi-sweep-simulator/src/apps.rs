use std::net::SocketAddrV4;
use wifi_sweep_abstract::{AppContext, Application, Packet, SimTime};

const SEND_TIMER: u32 = 1;

/// Default gap between packets when no target bit rate is configured.
pub const DEFAULT_INTERVAL: SimTime = 50_000_000;

/// Constant bit rate source: one fixed-size packet every `interval` until
/// `max_packets` have been sent.
pub struct Sender {
    port: u16,
    destination: SocketAddrV4,
    packet_size: u32,
    interval: SimTime,
    max_packets: u32,
    sent: u32,
}

impl Sender {
    pub fn new(
        port: u16,
        destination: SocketAddrV4,
        packet_size: u32,
        interval: SimTime,
        max_packets: u32,
    ) -> Self {
        Self {
            port,
            destination,
            packet_size,
            interval,
            max_packets,
            sent: 0,
        }
    }

    fn send_packet(&mut self, ctx: &mut dyn AppContext) {
        if self.sent >= self.max_packets {
            return;
        }
        let packet = Packet::new(
            self.port,
            self.destination.port(),
            self.sent,
            self.packet_size,
            ctx.now(),
        );
        ctx.send_to(self.destination, packet);
        self.sent += 1;

        if self.sent < self.max_packets {
            ctx.start_timer(self.interval, SEND_TIMER);
        } else {
            ctx.log(&format!("sender finished after {} packets", self.sent));
        }
    }
}

impl Application for Sender {
    fn start(&mut self, ctx: &mut dyn AppContext) {
        ctx.log(&format!(
            "sending {} byte packets to {} every {} ns",
            self.packet_size, self.destination, self.interval
        ));
        self.send_packet(ctx);
    }

    fn on_timer(&mut self, ctx: &mut dyn AppContext, timer_id: u32) {
        if timer_id == SEND_TIMER {
            self.send_packet(ctx);
        }
    }

    fn on_packet(&mut self, _ctx: &mut dyn AppContext, _packet: Packet) {}
}

/// Packet sink. Receive counts and delays are observed through the engine's
/// application receive trace; the sink only tracks ordering.
#[derive(Default)]
pub struct Receiver {
    last_seq: Option<u32>,
}

impl Application for Receiver {
    fn on_packet(&mut self, ctx: &mut dyn AppContext, packet: Packet) {
        if let Some(last) = self.last_seq
            && packet.seq <= last
        {
            ctx.log(&format!(
                "out of order packet seq={} after seq={}",
                packet.seq, last
            ));
        }
        self.last_seq = Some(packet.seq);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[derive(Default)]
    struct RecordingContext {
        now: SimTime,
        sent: Vec<(SocketAddrV4, Packet)>,
        timers: Vec<(SimTime, u32)>,
    }

    impl AppContext for RecordingContext {
        fn send_to(&mut self, destination: SocketAddrV4, packet: Packet) {
            self.sent.push((destination, packet));
        }

        fn start_timer(&mut self, delay: SimTime, timer_id: u32) {
            self.timers.push((delay, timer_id));
        }

        fn now(&self) -> SimTime {
            self.now
        }
    }

    #[test]
    fn sender_rearms_until_cap() {
        let dest = SocketAddrV4::new(Ipv4Addr::new(192, 168, 0, 2), 1001);
        let mut sender = Sender::new(1001, dest, 1000, 1_600_000, 2);
        let mut ctx = RecordingContext::default();

        sender.start(&mut ctx);
        assert_eq!(ctx.sent.len(), 1);
        assert_eq!(ctx.timers, vec![(1_600_000, SEND_TIMER)]);

        ctx.now = 1_600_000;
        sender.on_timer(&mut ctx, SEND_TIMER);
        assert_eq!(ctx.sent.len(), 2);
        assert_eq!(ctx.timers.len(), 1);

        sender.on_timer(&mut ctx, SEND_TIMER);
        assert_eq!(ctx.sent.len(), 2);

        let (to, packet) = &ctx.sent[1];
        assert_eq!(*to, dest);
        assert_eq!(packet.seq, 1);
        assert_eq!(packet.size, 1000);
        assert_eq!(packet.timestamp, 1_600_000);
        assert_eq!(packet.dst_port, 1001);
    }
}
