use std::net::SocketAddrV4;

use crate::packet::Packet;
use crate::time::SimTime;

/// The capability the engine hands to an application while one of its
/// callbacks is running. Actions are buffered and applied once the callback returns.
pub trait AppContext {
    /// Hand a packet to the local network stack for delivery to `destination`.
    fn send_to(&mut self, destination: SocketAddrV4, packet: Packet);

    /// Start a timer that fires `delay` nanoseconds from now.
    fn start_timer(&mut self, delay: SimTime, timer_id: u32);

    /// Current simulation time in nanoseconds.
    fn now(&self) -> SimTime;

    /// Log a message through the engine's debug output.
    fn log(&mut self, _message: &str) {}
}

/// Traffic generators and consumers installed on simulated nodes.
pub trait Application {
    /// Called once at the application's start time.
    fn start(&mut self, _ctx: &mut dyn AppContext) {}

    /// Called when a timer started by this application expires.
    fn on_timer(&mut self, _ctx: &mut dyn AppContext, _timer_id: u32) {}

    /// Called when a packet addressed to this application's port arrives.
    fn on_packet(&mut self, ctx: &mut dyn AppContext, packet: Packet);
}
