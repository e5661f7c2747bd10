//! Optical Inter-Satellite Link Simulation Core
//!
//! Discrete-event model of a Walker-constellation laser network: Keplerian
//! satellites carrying four directional optical terminals, permanent
//! intra-plane ring links, temporary inter-plane ladder links that break in
//! the polar region, and a framed link layer with queueing, a transmit
//! state machine and Friis power-budget reception.
//!
//! All nodes, devices and channels are owned by the [`Constellation`] arena
//! and addressed by index ids; attach/detach only flips `Option<Id>`
//! references, never ownership. Simulation is driven by an
//! [`event_sim::Simulator<Constellation>`]: build with
//! [`ConstellationBuilder`], then `sim.run(&mut constellation)`.

use std::fmt;

pub mod builder;
pub mod channel;
pub mod config;
pub mod constellation;
pub mod device;
pub mod frame;
pub mod maintainer;
pub mod trace;

pub use builder::{BuildError, ConstellationBuilder, ConstellationType, WalkerParams};
pub use channel::{ChannelKind, LatitudeGate, OpticalChannel};
pub use config::{DeviceConfig, SimConfig, WizardConfig};
pub use constellation::{Constellation, LinkEvent, ReadyBreakEvent};
pub use device::{DataRate, Direction, OpticalDevice, ReceivedFrame, TxState};
pub use frame::{Frame, MacAddr, PacketKind};
pub use trace::{TraceBus, TraceCounter, TraceKind, TraceRecord};

/// Index of a satellite node in the constellation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// Index of an optical terminal in the constellation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub usize);

/// Index of a channel in the constellation arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev#{}", self.0)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// What a name in the flat namespace resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Node(NodeId),
    Device(DeviceId),
}
