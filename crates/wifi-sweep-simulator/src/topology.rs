//! Node creation, addressing and placement for one coordinator and its endpoints.

use crate::engine::Simulator;
use crate::trace::NodeId;
use std::f64::consts::PI;
use std::net::Ipv4Addr;
use thiserror::Error;
use tracing::debug;
use wifi_sweep_abstract::{Vector3, WifiStandard};

pub const BASE_NETWORK: Ipv4Addr = Ipv4Addr::new(192, 168, 0, 0);
pub const BASE_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

#[derive(Debug, Error, PartialEq)]
pub enum TopologyError {
    #[error("{0} does not exist")]
    UnknownNode(NodeId),
    #[error("{0} already has a device installed")]
    DeviceExists(NodeId),
    #[error("{node} has no device to bind {address} to")]
    NoDevice { node: NodeId, address: Ipv4Addr },
    #[error("address {0} is already assigned")]
    AddressInUse(Ipv4Addr),
    #[error("subnet {network}/{mask} has no free host addresses")]
    SubnetExhausted { network: Ipv4Addr, mask: Ipv4Addr },
    #[error("port {port} is already bound on {node}")]
    PortInUse { node: NodeId, port: u16 },
}

/// Hands out host addresses of one subnet in increasing order, starting at `.1`.
#[derive(Debug, Clone)]
pub struct Ipv4AddressHelper {
    network: u32,
    mask: u32,
    next_host: u32,
}

impl Ipv4AddressHelper {
    pub fn new(network: Ipv4Addr, mask: Ipv4Addr) -> Self {
        let mask = u32::from(mask);
        Self {
            network: u32::from(network) & mask,
            mask,
            next_host: 1,
        }
    }

    pub fn next_address(&mut self) -> Result<Ipv4Addr, TopologyError> {
        let broadcast_host = !self.mask;
        if self.next_host >= broadcast_host {
            return Err(TopologyError::SubnetExhausted {
                network: Ipv4Addr::from(self.network),
                mask: Ipv4Addr::from(self.mask),
            });
        }
        let address = Ipv4Addr::from(self.network | self.next_host);
        self.next_host += 1;
        Ok(address)
    }
}

impl Default for Ipv4AddressHelper {
    fn default() -> Self {
        Self::new(BASE_NETWORK, BASE_MASK)
    }
}

/// Endpoint positions around a coordinator at the origin.
///
/// A lone endpoint sits at `(0, distance, 0)`. Several endpoints are spread
/// evenly on a circle of radius `distance`, endpoint `i` at angle `2π·i/k`.
pub fn endpoint_positions(distance: f64, users: u32) -> Vec<Vector3> {
    if users == 1 {
        return vec![Vector3::new(0.0, distance, 0.0)];
    }
    (0..users)
        .map(|i| {
            let angle = 2.0 * PI * f64::from(i) / f64::from(users);
            Vector3::new(distance * angle.cos(), distance * angle.sin(), 0.0)
        })
        .collect()
}

/// The nodes of one run: node 0 is the coordinator, nodes 1..=k the endpoints.
#[derive(Debug, Clone)]
pub struct Topology {
    pub coordinator: NodeId,
    pub endpoints: Vec<NodeId>,
    /// Addresses in assignment order, coordinator first
    pub addresses: Vec<Ipv4Addr>,
}

impl Topology {
    pub fn build(
        sim: &mut Simulator,
        standard: WifiStandard,
        distance: f64,
        users: u32,
    ) -> Result<Self, TopologyError> {
        let nodes = sim.create_nodes(users as usize + 1);
        for &node in &nodes {
            sim.install_device(node, standard)?;
        }

        let mut helper = Ipv4AddressHelper::default();
        let mut addresses = Vec::with_capacity(nodes.len());
        for &node in &nodes {
            let address = helper.next_address()?;
            sim.assign_address(node, address)?;
            addresses.push(address);
        }

        let coordinator = nodes[0];
        let endpoints = nodes[1..].to_vec();
        sim.set_position(coordinator, Vector3::ORIGIN)?;
        for (node, position) in endpoints
            .iter()
            .zip(endpoint_positions(distance, users))
        {
            sim.set_position(*node, position)?;
            debug!("{} placed at {}", node, position);
        }

        Ok(Self {
            coordinator,
            endpoints,
            addresses,
        })
    }

    pub fn coordinator_address(&self) -> Ipv4Addr {
        self.addresses[0]
    }

    /// Address of the `i`-th endpoint (0-based).
    pub fn endpoint_address(&self, i: usize) -> Option<Ipv4Addr> {
        self.addresses.get(i + 1).copied()
    }
}
