use serde::{Deserialize, Serialize};

use crate::time::SimTime;

/// An application-layer datagram. Only the payload size travels through the
/// simulated network; the payload bytes themselves are never materialized.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Packet {
    pub src_port: u16,
    pub dst_port: u16,
    /// Per-flow sequence number assigned by the sender
    pub seq: u32,
    /// Payload size in bytes
    pub size: u32,
    /// Time the sender handed the packet to the network, used for delay tracking
    pub timestamp: SimTime,
}

impl Packet {
    pub fn new(src_port: u16, dst_port: u16, seq: u32, size: u32, timestamp: SimTime) -> Self {
        Self {
            src_port,
            dst_port,
            seq,
            size,
            timestamp,
        }
    }
}
