//! Polar-region link maintenance.
//!
//! A periodic tick walks every node in ascending id order. Nodes climbing
//! above the latitude limit break their inter-plane links (RIGHT first,
//! then LEFT); nodes dropping back reconnect toward plane-adjacent
//! neighbors that are themselves outside the polar region. Broken channels
//! wait in a LIFO spare pool and endpoints are remembered in the
//! `broken_right`/`broken_left` sets keyed by terminal direction.

use crate::device::Direction;
use crate::{ChannelId, Constellation, DeviceId, NodeId};
use event_sim::{Simulator, Time};

impl Constellation {
    /// One maintenance pass; reschedules itself every update interval.
    pub(crate) fn maintenance_tick(&mut self, sim: &mut Simulator<Constellation>) {
        let now = sim.now();
        let per_plane = self.params.sats_per_plane();
        let planes = self.params.planes;

        for idx in 0..self.nodes.len() {
            let node = NodeId(idx);
            let lat_sin = self.node_latitude_sin(node, now);

            if lat_sin > self.lat_limit_sin && !self.polar.contains(&node) {
                self.enter_polar(node, now);
            } else if lat_sin <= self.lat_limit_sin && self.polar.contains(&node) {
                self.exit_polar(node, per_plane, planes, now);
            }
        }

        let interval = self.update_interval;
        sim.schedule(interval, |c: &mut Constellation, sim| c.maintenance_tick(sim));
    }

    fn enter_polar(&mut self, node: NodeId, now: Time) {
        self.polar.insert(node);
        tracing::debug!(node = %self.nodes[node.0].name, time = %now, "polar entry");
        for direction in [Direction::Right, Direction::Left] {
            let device = self.nodes[node.0].devices[direction.index()];
            if let Some(channel) = self.devices[device.0].channel() {
                if let Some(peer) = self.channels[channel.0].peer(device) {
                    self.disconnect(peer, device, channel, now);
                }
            }
        }
    }

    fn exit_polar(&mut self, node: NodeId, per_plane: usize, planes: usize, now: Time) {
        self.polar.remove(&node);
        tracing::debug!(node = %self.nodes[node.0].name, time = %now, "polar exit");

        let idx = node.0;
        let plane = idx / per_plane;
        let mut neighbors = [None, None];
        if plane != 0 {
            let adj = idx - per_plane;
            if !self.polar.contains(&NodeId(adj)) {
                neighbors[0] = Some(adj);
            }
        }
        if plane != planes - 1 {
            let adj = idx + per_plane;
            if !self.polar.contains(&NodeId(adj)) {
                neighbors[1] = Some(adj);
            }
        }

        for adj in neighbors.into_iter().flatten() {
            let adj_right = self.nodes[adj].devices[Direction::Right.index()];
            if self.broken_right.contains(&adj_right) {
                let own_left = self.nodes[idx].devices[Direction::Left.index()];
                self.connect(adj_right, own_left, now);
            }
            let adj_left = self.nodes[adj].devices[Direction::Left.index()];
            if self.broken_left.contains(&adj_left) {
                let own_right = self.nodes[idx].devices[Direction::Right.index()];
                self.connect(adj_left, own_right, now);
            }
        }
    }

    /// Tear a temporary link down: detach both terminals and the channel,
    /// park the channel in the spare pool, remember the endpoints by
    /// direction, and fire the disconnect hook.
    pub(crate) fn disconnect(
        &mut self,
        a: DeviceId,
        b: DeviceId,
        channel: ChannelId,
        now: Time,
    ) {
        self.devices[a.0].detach();
        self.devices[b.0].detach();
        if self.devices[a.0].direction() == Direction::Right {
            self.broken_right.insert(a);
            self.broken_left.insert(b);
        } else {
            self.broken_right.insert(b);
            self.broken_left.insert(a);
        }
        self.channels[channel.0].detach();
        self.spare.push(channel);
        tracing::debug!(
            a = self.devices[a.0].name(),
            b = self.devices[b.0].name(),
            channel = %channel,
            "link broken"
        );
        self.fire_disconnect(a, b, channel, now);
    }

    /// Bring a link back up over the most recently freed spare channel and
    /// fire the connect hook.
    pub(crate) fn connect(&mut self, a: DeviceId, b: DeviceId, now: Time) {
        let Some(channel) = self.spare.pop() else {
            // every disconnect parks a channel, so this cannot run dry
            tracing::warn!("spare channel pool exhausted");
            return;
        };
        let lat_a = self.device_latitude_sin(a, now);
        let lat_b = self.device_latitude_sin(b, now);
        self.devices[a.0].attach(channel);
        self.devices[b.0].attach(channel);
        self.channels[channel.0].attach(a, lat_a);
        self.channels[channel.0].attach(b, lat_b);
        if self.devices[a.0].direction() == Direction::Right {
            self.broken_right.remove(&a);
            self.broken_left.remove(&b);
        } else {
            self.broken_right.remove(&b);
            self.broken_left.remove(&a);
        }
        tracing::debug!(
            a = self.devices[a.0].name(),
            b = self.devices[b.0].name(),
            channel = %channel,
            "link restored"
        );
        self.fire_connect(a, b, channel, now);
    }
}
