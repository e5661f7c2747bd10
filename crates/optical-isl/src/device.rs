//! Optical terminal (per-port network device) state.
//!
//! Each satellite carries four directional laser terminals. A device owns
//! its MAC identity, optics parameters, a drop-tail egress queue and the
//! two-state transmit machine; the constellation arena drives the actual
//! send/receive pipeline because it spans device, channel and mobility.

use crate::config::DeviceConfig;
use crate::frame::{Frame, MacAddr, PacketKind};
use crate::{ChannelId, NodeId};
use bytes::Bytes;
use event_sim::Time;
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Pointing direction of a terminal; doubles as the device index on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Right,
    Left,
    Forward,
    Backward,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Right,
        Direction::Left,
        Direction::Forward,
        Direction::Backward,
    ];

    pub fn index(&self) -> usize {
        match self {
            Direction::Right => 0,
            Direction::Left => 1,
            Direction::Forward => 2,
            Direction::Backward => 3,
        }
    }

    /// Single-letter suffix used in device names (`eth{R,L,F,B}`).
    pub fn letter(&self) -> char {
        match self {
            Direction::Right => 'R',
            Direction::Left => 'L',
            Direction::Forward => 'F',
            Direction::Backward => 'B',
        }
    }
}

/// Transmit machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Ready,
    Busy,
}

// ============================================================================
// Data rate
// ============================================================================

#[derive(Error, Debug)]
#[error("Invalid data rate: {0:?}")]
pub struct InvalidDataRate(String);

/// Link data rate in bits per second, parseable from strings like
/// "1Gbps", "100Mbps" or "32768b/s".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRate(pub u64);

impl DataRate {
    pub const fn bps(rate: u64) -> Self {
        DataRate(rate)
    }

    /// Serialization time of `bytes` octets at this rate.
    pub fn tx_time(&self, bytes: usize) -> Time {
        Time::from_secs_f64(bytes as f64 * 8.0 / self.0 as f64)
    }
}

impl FromStr for DataRate {
    type Err = InvalidDataRate;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = s
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(s.len());
        let (digits, suffix) = s.split_at(split);
        let value: f64 = digits
            .parse()
            .map_err(|_| InvalidDataRate(s.to_string()))?;
        let scale = match suffix {
            "" | "b/s" | "bps" => 1.0,
            "kb/s" | "kbps" | "Kbps" => 1e3,
            "Mb/s" | "Mbps" => 1e6,
            "Gb/s" | "Gbps" => 1e9,
            _ => return Err(InvalidDataRate(s.to_string())),
        };
        Ok(DataRate((value * scale) as u64))
    }
}

impl fmt::Display for DataRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bps = self.0;
        if bps >= 1_000_000_000 && bps % 1_000_000_000 == 0 {
            write!(f, "{}Gbps", bps / 1_000_000_000)
        } else if bps >= 1_000_000 && bps % 1_000_000 == 0 {
            write!(f, "{}Mbps", bps / 1_000_000)
        } else if bps >= 1_000 && bps % 1_000 == 0 {
            write!(f, "{}Kbps", bps / 1_000)
        } else {
            write!(f, "{}b/s", bps)
        }
    }
}

impl serde::Serialize for DataRate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for DataRate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = <String as serde::Deserialize>::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Device
// ============================================================================

/// A frame handed up to a receive callback.
#[derive(Debug, Clone)]
pub struct ReceivedFrame {
    pub time: Time,
    pub frame: Frame,
    pub kind: PacketKind,
}

type RxCallback = Box<dyn FnMut(&ReceivedFrame)>;
type LinkChangeCallback = Box<dyn FnMut(bool)>;

/// One directional laser terminal.
pub struct OpticalDevice {
    name: String,
    node: NodeId,
    direction: Direction,
    address: MacAddr,
    data_rate: DataRate,
    mtu: u16,

    state: TxState,
    current: Option<Bytes>,
    queue: VecDeque<Bytes>,
    queue_cap: usize,

    channel: Option<ChannelId>,
    link_up: bool,

    wavelength_m: f64,
    tx_power_dbm: f64,
    tx_gain_db: f64,
    rx_gain_db: f64,
    rx_sensitivity_dbm: f64,

    rx_callback: Option<RxCallback>,
    promisc_callback: Option<RxCallback>,
    link_change_callbacks: Vec<LinkChangeCallback>,
}

impl OpticalDevice {
    pub fn new(
        name: String,
        node: NodeId,
        direction: Direction,
        address: MacAddr,
        config: &DeviceConfig,
    ) -> Self {
        Self {
            name,
            node,
            direction,
            address,
            data_rate: config.data_rate,
            mtu: config.mtu,
            state: TxState::Ready,
            current: None,
            queue: VecDeque::new(),
            queue_cap: config.queue_len,
            channel: None,
            link_up: false,
            wavelength_m: config.lambda_nm * 1e-9,
            tx_power_dbm: config.tx_power_dbm,
            tx_gain_db: config.tx_gain_db,
            rx_gain_db: config.rx_gain_db,
            rx_sensitivity_dbm: config.rx_sensitivity_dbm,
            rx_callback: None,
            promisc_callback: None,
            link_change_callbacks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn address(&self) -> MacAddr {
        self.address
    }

    pub fn data_rate(&self) -> DataRate {
        self.data_rate
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    pub fn tx_state(&self) -> TxState {
        self.state
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn is_link_up(&self) -> bool {
        self.link_up
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn wavelength_m(&self) -> f64 {
        self.wavelength_m
    }

    pub fn tx_power_dbm(&self) -> f64 {
        self.tx_power_dbm
    }

    pub fn tx_gain_db(&self) -> f64 {
        self.tx_gain_db
    }

    pub fn rx_gain_db(&self) -> f64 {
        self.rx_gain_db
    }

    pub fn rx_sensitivity_dbm(&self) -> f64 {
        self.rx_sensitivity_dbm
    }

    /// Point this device at a channel; the link comes up and link-change
    /// callbacks fire with `true`.
    pub(crate) fn attach(&mut self, channel: ChannelId) {
        self.channel = Some(channel);
        self.link_up = true;
        self.notify_link_change();
    }

    /// Drop the channel reference; the link goes down and link-change
    /// callbacks fire with `false`.
    pub(crate) fn detach(&mut self) {
        self.channel = None;
        self.link_up = false;
        self.notify_link_change();
    }

    fn notify_link_change(&mut self) {
        let up = self.link_up;
        for cb in &mut self.link_change_callbacks {
            cb(up);
        }
    }

    /// Drop-tail enqueue; false when the queue is full.
    pub(crate) fn enqueue(&mut self, frame: Bytes) -> bool {
        if self.queue.len() >= self.queue_cap {
            return false;
        }
        self.queue.push_back(frame);
        true
    }

    pub(crate) fn dequeue(&mut self) -> Option<Bytes> {
        self.queue.pop_front()
    }

    pub(crate) fn begin_transmit(&mut self, frame: Bytes) {
        self.state = TxState::Busy;
        self.current = Some(frame);
    }

    pub(crate) fn finish_transmit(&mut self) -> Option<Bytes> {
        self.state = TxState::Ready;
        self.current.take()
    }

    pub fn set_receive_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&ReceivedFrame) + 'static,
    {
        self.rx_callback = Some(Box::new(cb));
    }

    pub fn set_promisc_callback<F>(&mut self, cb: F)
    where
        F: FnMut(&ReceivedFrame) + 'static,
    {
        self.promisc_callback = Some(Box::new(cb));
    }

    pub fn add_link_change_callback<F>(&mut self, cb: F)
    where
        F: FnMut(bool) + 'static,
    {
        self.link_change_callbacks.push(Box::new(cb));
    }

    pub(crate) fn has_promisc_callback(&self) -> bool {
        self.promisc_callback.is_some()
    }

    pub(crate) fn invoke_promisc_callback(&mut self, ev: &ReceivedFrame) {
        if let Some(cb) = self.promisc_callback.as_mut() {
            cb(ev);
        }
    }

    pub(crate) fn invoke_rx_callback(&mut self, ev: &ReceivedFrame) {
        if let Some(cb) = self.rx_callback.as_mut() {
            cb(ev);
        }
    }
}

impl fmt::Debug for OpticalDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpticalDevice")
            .field("name", &self.name)
            .field("direction", &self.direction)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("link_up", &self.link_up)
            .field("channel", &self.channel)
            .field("queue_len", &self.queue.len())
            .finish()
    }
}
