//! Constellation arena and the link-layer pipeline.
//!
//! The [`Constellation`] owns every node, device and channel and is the
//! state type driven by `Simulator<Constellation>`. Cross-entity operations
//! (send, transmit state machine, channel delivery, link maintenance) are
//! methods here, so the borrow story stays local: entities refer to each
//! other only through index ids.

use crate::builder::WalkerParams;
use crate::channel::{
    friis_rx_power_dbm, propagation_delay, LatitudeGate, OpticalChannel,
};
use crate::device::{OpticalDevice, ReceivedFrame, TxState};
use crate::frame::{self, MacAddr, PacketKind};
use crate::trace::{TraceBus, TraceKind, TraceRecord};
use crate::{ChannelId, DeviceId, Entity, NodeId};
use bytes::Bytes;
use event_sim::{Simulator, Time};
use orbital_mechanics::{Mobility, SatelliteMobility, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};

/// One satellite: identity, orbit, and its four terminals in
/// {RIGHT, LEFT, FORWARD, BACKWARD} order.
pub struct SatNode {
    pub(crate) name: String,
    pub(crate) mobility: SatelliteMobility,
    pub(crate) devices: [DeviceId; 4],
}

/// Bernoulli per-frame receive corruption, deterministically seeded.
pub(crate) struct ReceiveErrorModel {
    rate: f64,
    rng: StdRng,
}

impl ReceiveErrorModel {
    pub(crate) fn new(rate: f64, seed: u64) -> Self {
        Self {
            rate,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn is_corrupt(&mut self) -> bool {
        self.rate > 0.0 && self.rng.gen::<f64>() < self.rate
    }
}

// ============================================================================
// Observability hooks
// ============================================================================

/// Payload of the connect/disconnect hooks.
#[derive(Debug, Clone)]
pub struct LinkEvent {
    pub time: Time,
    pub channel: ChannelId,
    pub a: DeviceId,
    pub b: DeviceId,
    pub a_name: String,
    pub b_name: String,
    pub a_latitude_deg: f64,
    pub b_latitude_deg: f64,
}

/// Payload of the ready-break hook.
#[derive(Debug, Clone)]
pub struct ReadyBreakEvent {
    pub time: Time,
    pub channel: ChannelId,
    pub a_name: String,
    pub b_name: String,
    /// `sin(lat_limit) − max(sin(lat_a), sin(lat_b))`
    pub headroom_sin: f64,
}

#[derive(Default)]
pub(crate) struct LinkHooks {
    pub(crate) connect: Option<Box<dyn FnMut(&LinkEvent)>>,
    pub(crate) disconnect: Option<Box<dyn FnMut(&LinkEvent)>>,
    pub(crate) ready_break: Option<Box<dyn FnMut(&ReadyBreakEvent)>>,
}

// ============================================================================
// Constellation
// ============================================================================

pub struct Constellation {
    pub(crate) params: WalkerParams,
    pub(crate) nodes: Vec<SatNode>,
    pub(crate) devices: Vec<OpticalDevice>,
    pub(crate) channels: Vec<OpticalChannel>,
    pub(crate) names: HashMap<String, Entity>,

    /// Detached temporary channels, reused LIFO.
    pub(crate) spare: Vec<ChannelId>,
    pub(crate) broken_left: HashSet<DeviceId>,
    pub(crate) broken_right: HashSet<DeviceId>,
    pub(crate) polar: HashSet<NodeId>,

    pub(crate) lat_limit_sin: f64,
    pub(crate) update_interval: Time,
    pub(crate) hooks: LinkHooks,
    pub traces: TraceBus,
    pub(crate) error_model: ReceiveErrorModel,
    pub(crate) checksum_enabled: bool,
    pub(crate) best_match: usize,
}

impl Constellation {
    // ------------------------------------------------------------------
    // Lookup and geometry
    // ------------------------------------------------------------------

    pub fn params(&self) -> &WalkerParams {
        &self.params
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_devices(&self) -> usize {
        self.devices.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn node_name(&self, node: NodeId) -> &str {
        &self.nodes[node.0].name
    }

    pub fn node_devices(&self, node: NodeId) -> [DeviceId; 4] {
        self.nodes[node.0].devices
    }

    pub fn device(&self, device: DeviceId) -> &OpticalDevice {
        &self.devices[device.0]
    }

    pub fn device_mut(&mut self, device: DeviceId) -> &mut OpticalDevice {
        &mut self.devices[device.0]
    }

    pub fn channel(&self, channel: ChannelId) -> &OpticalChannel {
        &self.channels[channel.0]
    }

    pub fn lookup(&self, name: &str) -> Option<Entity> {
        self.names.get(name).copied()
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        match self.names.get(name) {
            Some(Entity::Node(id)) => Some(*id),
            _ => None,
        }
    }

    pub fn device_by_name(&self, name: &str) -> Option<DeviceId> {
        match self.names.get(name) {
            Some(Entity::Device(id)) => Some(*id),
            _ => None,
        }
    }

    /// DELTA only: plane P−1 slot whose anomaly best matches plane 0 slot 0.
    pub fn best_match(&self) -> usize {
        self.best_match
    }

    pub fn spare_pool(&self) -> &[ChannelId] {
        &self.spare
    }

    pub fn broken_left(&self) -> &HashSet<DeviceId> {
        &self.broken_left
    }

    pub fn broken_right(&self) -> &HashSet<DeviceId> {
        &self.broken_right
    }

    pub fn is_polar(&self, node: NodeId) -> bool {
        self.polar.contains(&node)
    }

    pub fn lat_limit_sin(&self) -> f64 {
        self.lat_limit_sin
    }

    pub fn update_interval(&self) -> Time {
        self.update_interval
    }

    pub fn attached_temporary_count(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.is_temporary() && c.is_attached())
            .count()
    }

    pub fn node_position(&mut self, node: NodeId, at: Time) -> Vec3 {
        self.nodes[node.0].mobility.position_at(at.as_secs_f64())
    }

    pub fn node_velocity(&mut self, node: NodeId, at: Time) -> Vec3 {
        self.nodes[node.0].mobility.velocity_at(at.as_secs_f64())
    }

    pub(crate) fn node_latitude_sin(&mut self, node: NodeId, at: Time) -> f64 {
        self.nodes[node.0].mobility.latitude_sine_at(at.as_secs_f64())
    }

    pub fn node_latitude_deg(&mut self, node: NodeId, at: Time) -> f64 {
        self.node_latitude_sin(node, at).asin().to_degrees()
    }

    pub(crate) fn device_latitude_sin(&mut self, device: DeviceId, at: Time) -> f64 {
        let node = self.devices[device.0].node();
        self.node_latitude_sin(node, at)
    }

    pub fn device_latitude_deg(&mut self, device: DeviceId, at: Time) -> f64 {
        self.device_latitude_sin(device, at).asin().to_degrees()
    }

    fn device_distance_m(&mut self, a: DeviceId, b: DeviceId, at: Time) -> f64 {
        let na = self.devices[a.0].node();
        let nb = self.devices[b.0].node();
        let pa = self.node_position(na, at);
        let pb = self.node_position(nb, at);
        pa.distance_to(&pb)
    }

    pub(crate) fn trace(&mut self, time: Time, device: DeviceId, kind: TraceKind, bytes: usize) {
        let record = TraceRecord {
            time,
            device,
            kind,
            bytes,
        };
        self.traces.emit(&record);
    }

    // ------------------------------------------------------------------
    // Hook firing
    // ------------------------------------------------------------------

    pub(crate) fn link_event(
        &mut self,
        a: DeviceId,
        b: DeviceId,
        channel: ChannelId,
        now: Time,
    ) -> LinkEvent {
        let a_latitude_deg = self.device_latitude_deg(a, now);
        let b_latitude_deg = self.device_latitude_deg(b, now);
        LinkEvent {
            time: now,
            channel,
            a,
            b,
            a_name: self.devices[a.0].name().to_string(),
            b_name: self.devices[b.0].name().to_string(),
            a_latitude_deg,
            b_latitude_deg,
        }
    }

    pub(crate) fn fire_connect(&mut self, a: DeviceId, b: DeviceId, channel: ChannelId, now: Time) {
        let ev = self.link_event(a, b, channel, now);
        if let Some(cb) = self.hooks.connect.as_mut() {
            cb(&ev);
        }
    }

    pub(crate) fn fire_disconnect(
        &mut self,
        a: DeviceId,
        b: DeviceId,
        channel: ChannelId,
        now: Time,
    ) {
        let ev = self.link_event(a, b, channel, now);
        if let Some(cb) = self.hooks.disconnect.as_mut() {
            cb(&ev);
        }
    }

    pub(crate) fn fire_ready_break(
        &mut self,
        channel: ChannelId,
        a: DeviceId,
        b: DeviceId,
        headroom_sin: f64,
        now: Time,
    ) {
        let ev = ReadyBreakEvent {
            time: now,
            channel,
            a_name: self.devices[a.0].name().to_string(),
            b_name: self.devices[b.0].name().to_string(),
            headroom_sin,
        };
        if let Some(cb) = self.hooks.ready_break.as_mut() {
            cb(&ev);
        }
    }

    /// Replace the connect hook.
    pub fn on_connect<F: FnMut(&LinkEvent) + 'static>(&mut self, cb: F) {
        self.hooks.connect = Some(Box::new(cb));
    }

    /// Replace the disconnect hook.
    pub fn on_disconnect<F: FnMut(&LinkEvent) + 'static>(&mut self, cb: F) {
        self.hooks.disconnect = Some(Box::new(cb));
    }

    /// Replace the ready-break hook.
    pub fn on_ready_break<F: FnMut(&ReadyBreakEvent) + 'static>(&mut self, cb: F) {
        self.hooks.ready_break = Some(Box::new(cb));
    }

    // ------------------------------------------------------------------
    // Transmit path
    // ------------------------------------------------------------------

    /// Frame `payload` and hand it to `device` for transmission.
    ///
    /// Returns false when the frame was dropped (link down, no channel, or
    /// queue overflow); every drop fires `MacTxDrop`. Never blocks: if the
    /// transmitter is busy the frame waits in the egress queue.
    pub fn send(
        &mut self,
        device: DeviceId,
        payload: &[u8],
        dst: MacAddr,
        protocol: u16,
        sim: &mut Simulator<Constellation>,
    ) -> bool {
        let now = sim.now();
        let dev = &self.devices[device.0];
        if !dev.is_link_up() || dev.channel().is_none() {
            tracing::debug!(device = dev.name(), "link down drop");
            self.trace(now, device, TraceKind::MacTxDrop, payload.len());
            return false;
        }

        self.trace(now, device, TraceKind::MacTx, payload.len());

        let wire = frame::encode_dix(
            self.devices[device.0].address(),
            dst,
            protocol,
            payload,
            self.checksum_enabled,
        );
        let wire_len = wire.len();

        if !self.devices[device.0].enqueue(wire) {
            tracing::debug!(device = self.devices[device.0].name(), "overflow drop");
            self.trace(now, device, TraceKind::MacTxDrop, wire_len);
            return false;
        }

        if self.devices[device.0].tx_state() == TxState::Ready {
            if let Some(next) = self.devices[device.0].dequeue() {
                self.trace(now, device, TraceKind::Sniffer, next.len());
                self.trace(now, device, TraceKind::PromiscSniffer, next.len());
                return self.transmit_start(device, next, sim);
            }
        }
        true
    }

    /// Begin serializing one frame: READY → BUSY, schedule the completion
    /// after size/rate, and offer the frame to the channel.
    fn transmit_start(
        &mut self,
        device: DeviceId,
        wire: Bytes,
        sim: &mut Simulator<Constellation>,
    ) -> bool {
        let now = sim.now();
        debug_assert_eq!(self.devices[device.0].tx_state(), TxState::Ready);

        let wire_len = wire.len();
        self.devices[device.0].begin_transmit(wire.clone());
        self.trace(now, device, TraceKind::PhyTxBegin, wire_len);

        let tx_time = self.devices[device.0].data_rate().tx_time(wire_len);
        sim.schedule(tx_time, move |c: &mut Constellation, sim| {
            c.transmit_complete(device, sim)
        });

        let Some(channel) = self.devices[device.0].channel() else {
            self.trace(now, device, TraceKind::PhyTxDrop, wire_len);
            return false;
        };
        let sent = self.channel_send(channel, device, wire, tx_time, sim);
        if !sent {
            self.trace(now, device, TraceKind::PhyTxDrop, wire_len);
        }
        sent
    }

    /// Scheduled continuation of `transmit_start`. Runs even if the device
    /// was detached meanwhile; a missing channel only means the next queued
    /// frame is dropped at the phy when it restarts.
    fn transmit_complete(&mut self, device: DeviceId, sim: &mut Simulator<Constellation>) {
        let now = sim.now();
        debug_assert_eq!(self.devices[device.0].tx_state(), TxState::Busy);

        if let Some(done) = self.devices[device.0].finish_transmit() {
            self.trace(now, device, TraceKind::PhyTxEnd, done.len());
        }

        if let Some(next) = self.devices[device.0].dequeue() {
            self.trace(now, device, TraceKind::Sniffer, next.len());
            self.trace(now, device, TraceKind::PromiscSniffer, next.len());
            self.transmit_start(device, next, sim);
        }
    }

    // ------------------------------------------------------------------
    // Channel
    // ------------------------------------------------------------------

    /// Push a frame into a channel: latitude-gate temporary links, then
    /// schedule delivery on the peer after propagation + serialization.
    fn channel_send(
        &mut self,
        channel: ChannelId,
        sender: DeviceId,
        wire: Bytes,
        tx_time: Time,
        sim: &mut Simulator<Constellation>,
    ) -> bool {
        let now = sim.now();
        let Some(receiver) = self.channels[channel.0].peer(sender) else {
            return false;
        };

        if self.channels[channel.0].is_temporary() {
            let [Some(slot0), Some(slot1)] = self.channels[channel.0].slots() else {
                return false;
            };
            let l0 = self.device_latitude_sin(slot0, now);
            let l1 = self.device_latitude_sin(slot1, now);
            match self.channels[channel.0].latitude_gate(l0, l1) {
                LatitudeGate::Fail => {
                    self.disconnect(slot0, slot1, channel, now);
                    return false;
                }
                LatitudeGate::ReadyBreak(headroom) => {
                    self.fire_ready_break(channel, slot0, slot1, headroom, now);
                }
                LatitudeGate::Pass => {}
            }
        }

        let distance = self.device_distance_m(sender, receiver, now);
        let delay = propagation_delay(distance);
        let context = self.devices[receiver.0].node().0 as u32;
        sim.schedule_with_context(context, delay + tx_time, move |c: &mut Constellation, sim| {
            c.channel_receive(sender, receiver, wire, sim)
        });
        true
    }

    /// Scheduled delivery: apply the Friis budget at the instantaneous
    /// distance and hand the frame to the receiver if it clears the
    /// sensitivity threshold. Under-budget frames vanish with only a log
    /// line — the receiver never saw a photon.
    fn channel_receive(
        &mut self,
        sender: DeviceId,
        receiver: DeviceId,
        wire: Bytes,
        sim: &mut Simulator<Constellation>,
    ) {
        let now = sim.now();
        let distance = self.device_distance_m(sender, receiver, now);
        let rx_power = friis_rx_power_dbm(
            self.devices[sender.0].tx_power_dbm(),
            self.devices[sender.0].tx_gain_db(),
            self.devices[receiver.0].rx_gain_db(),
            self.devices[sender.0].wavelength_m(),
            distance,
        );
        if rx_power < self.devices[receiver.0].rx_sensitivity_dbm() {
            tracing::debug!(
                receiver = self.devices[receiver.0].name(),
                rx_power_dbm = rx_power,
                distance_m = distance,
                "insufficient receive power"
            );
            return;
        }
        self.receive(receiver, wire, sim);
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Link-layer reception on `device`.
    pub fn receive(&mut self, device: DeviceId, wire: Bytes, sim: &mut Simulator<Constellation>) {
        let now = sim.now();
        if !self.devices[device.0].is_link_up() {
            tracing::debug!(device = self.devices[device.0].name(), "rx link down drop");
            self.trace(now, device, TraceKind::MacRxDrop, wire.len());
            return;
        }

        self.trace(now, device, TraceKind::PhyRxEnd, wire.len());

        if self.error_model.is_corrupt() {
            self.trace(now, device, TraceKind::PhyRxDrop, wire.len());
            return;
        }

        let decoded = match frame::decode(&wire, self.checksum_enabled) {
            Ok(f) => f,
            Err(err) => {
                tracing::debug!(device = self.devices[device.0].name(), %err, "rx decode drop");
                self.trace(now, device, TraceKind::PhyRxDrop, wire.len());
                return;
            }
        };

        let kind = frame::classify(decoded.dst, self.devices[device.0].address());
        let ev = ReceivedFrame {
            time: now,
            frame: decoded,
            kind,
        };

        self.trace(now, device, TraceKind::PromiscSniffer, wire.len());
        self.trace(now, device, TraceKind::MacPromiscRx, wire.len());
        if self.devices[device.0].has_promisc_callback() {
            self.devices[device.0].invoke_promisc_callback(&ev);
        }

        if kind != PacketKind::OtherHost {
            self.trace(now, device, TraceKind::MacRx, wire.len());
            self.trace(now, device, TraceKind::Sniffer, wire.len());
            self.devices[device.0].invoke_rx_callback(&ev);
        }
    }
}
