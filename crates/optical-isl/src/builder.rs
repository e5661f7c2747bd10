//! Walker constellation construction.
//!
//! From `(type, T, P, F)` and a reference ("wizard") orbit, builds T
//! satellites in P planes, installs four optical terminals per satellite,
//! wires the permanent intra-plane rings and the temporary inter-plane
//! ladders, and schedules the first link-maintenance tick.

use crate::config::{DeviceConfig, SimConfig, WizardConfig};
use crate::constellation::{Constellation, LinkEvent, LinkHooks, ReadyBreakEvent, ReceiveErrorModel, SatNode};
use crate::channel::OpticalChannel;
use crate::device::{Direction, OpticalDevice};
use crate::frame::MacAllocator;
use crate::trace::TraceBus;
use crate::{ChannelId, DeviceId, Entity, NodeId};
use event_sim::{Simulator, Time};
use orbital_mechanics::{OrbitalElements, SatelliteMobility};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("T={0} is not divisible by P={1}: planes would be uneven")]
    UnevenPlanes(usize, usize),
    #[error(transparent)]
    Orbit(#[from] orbital_mechanics::OrbitalError),
}

/// Walker sub-type: STAR spreads planes over 180° of RAAN, DELTA over 360°.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConstellationType {
    Star,
    Delta,
}

/// Walker constellation parameters (T, P, F).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WalkerParams {
    #[serde(rename = "type")]
    pub kind: ConstellationType,
    /// Total satellites
    #[serde(rename = "T")]
    pub total: usize,
    /// Orbital planes
    #[serde(rename = "P")]
    pub planes: usize,
    /// Inter-plane phasing factor
    #[serde(rename = "F")]
    pub phasing: usize,
}

impl Default for WalkerParams {
    fn default() -> Self {
        // Iridium-style STAR 66/6/1
        Self {
            kind: ConstellationType::Star,
            total: 66,
            planes: 6,
            phasing: 1,
        }
    }
}

impl WalkerParams {
    pub fn validate(&self) -> Result<(), BuildError> {
        if self.planes == 0 || self.total % self.planes != 0 {
            return Err(BuildError::UnevenPlanes(self.total, self.planes));
        }
        Ok(())
    }

    /// N = T / P
    pub fn sats_per_plane(&self) -> usize {
        self.total / self.planes
    }

    /// RAAN spread across planes (deg).
    pub fn raan_span_deg(&self) -> f64 {
        match self.kind {
            ConstellationType::Star => 180.0,
            ConstellationType::Delta => 360.0,
        }
    }

    /// Intra-plane phase step Δθ = 360°/N.
    pub fn phase_step_deg(&self) -> f64 {
        360.0 / self.sats_per_plane() as f64
    }

    /// Inter-plane phase offset Δω = 360°·F/T.
    pub fn inter_plane_phase_deg(&self) -> f64 {
        360.0 * self.phasing as f64 / self.total as f64
    }
}

/// Staged inputs for [`Constellation`] construction.
pub struct ConstellationBuilder {
    params: WalkerParams,
    wizard: WizardConfig,
    device: DeviceConfig,
    lat_limit_deg: f64,
    update_interval: Time,
    error_rate: f64,
    rng_seed: u64,
    checksum: bool,
    hooks: LinkHooks,
}

impl ConstellationBuilder {
    pub fn new(params: WalkerParams, wizard: WizardConfig) -> Self {
        Self {
            params,
            wizard,
            device: DeviceConfig::default(),
            lat_limit_deg: 60.0,
            update_interval: Time::from_secs(1),
            error_rate: 0.0,
            rng_seed: 1,
            checksum: false,
            hooks: LinkHooks::default(),
        }
    }

    pub fn from_config(config: &SimConfig) -> Self {
        let mut b = Self::new(config.constellation, config.wizard);
        b.device = config.device;
        b.lat_limit_deg = config.lat_limit_deg;
        b.update_interval = config.update_interval();
        b.error_rate = config.error_rate;
        b.rng_seed = config.rng_seed;
        b.checksum = config.checksum;
        b
    }

    pub fn with_device(mut self, device: DeviceConfig) -> Self {
        self.device = device;
        self
    }

    pub fn with_latitude_limit(mut self, limit_deg: f64) -> Self {
        self.lat_limit_deg = limit_deg;
        self
    }

    pub fn with_update_interval(mut self, interval: Time) -> Self {
        self.update_interval = interval;
        self
    }

    pub fn with_error_rate(mut self, rate: f64, seed: u64) -> Self {
        self.error_rate = rate;
        self.rng_seed = seed;
        self
    }

    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn on_connect<F: FnMut(&LinkEvent) + 'static>(mut self, cb: F) -> Self {
        self.hooks.connect = Some(Box::new(cb));
        self
    }

    pub fn on_disconnect<F: FnMut(&LinkEvent) + 'static>(mut self, cb: F) -> Self {
        self.hooks.disconnect = Some(Box::new(cb));
        self
    }

    pub fn on_ready_break<F: FnMut(&ReadyBreakEvent) + 'static>(mut self, cb: F) -> Self {
        self.hooks.ready_break = Some(Box::new(cb));
        self
    }

    /// Construct the constellation and schedule the first maintenance tick.
    pub fn build(
        self,
        sim: &mut Simulator<Constellation>,
    ) -> Result<Constellation, BuildError> {
        self.params.validate()?;
        let params = self.params;
        let wizard = self.wizard;
        let planes = params.planes;
        let per_plane = params.sats_per_plane();
        let phase_step = params.phase_step_deg();
        let inter_phase = params.inter_plane_phase_deg();
        let raan_span = params.raan_span_deg();

        tracing::info!(
            kind = ?params.kind,
            total = params.total,
            planes,
            per_plane,
            phase_step_deg = phase_step,
            inter_plane_phase_deg = inter_phase,
            raan_span_deg = raan_span,
            "building constellation"
        );

        // Nodes: derive each orbit from the wizard by phasing f and RAAN.
        let mut nodes = Vec::with_capacity(params.total);
        let mut names: HashMap<String, Entity> = HashMap::new();
        let mut best_match = 0usize;
        let mut best_diff = f64::INFINITY;
        for i in 0..planes {
            for j in 0..per_plane {
                let name = format!("S{i:02}{j:02}");
                let f_deg = wizard.f_deg + inter_phase * i as f64 + phase_step * j as f64;
                let raan_deg = wizard.raan_deg + raan_span / planes as f64 * i as f64;
                let elements = OrbitalElements::from_degrees(
                    wizard.a_km,
                    wizard.e,
                    f_deg,
                    wizard.i_deg,
                    wizard.w_deg,
                    raan_deg,
                );
                let mobility = SatelliteMobility::new(elements)?;

                // DELTA: track which last-plane slot sits closest in anomaly
                // to plane 0 slot 0 (wrap-aware), for seam bookkeeping.
                if params.kind == ConstellationType::Delta && i == planes - 1 {
                    let theta = if f_deg > wizard.f_deg + 180.0 {
                        f_deg - 360.0
                    } else {
                        f_deg
                    };
                    let diff = (wizard.f_deg - theta).abs() % 360.0;
                    if diff < best_diff {
                        best_diff = diff;
                        best_match = j;
                    }
                }

                let id = NodeId(nodes.len());
                names.insert(name.clone(), Entity::Node(id));
                nodes.push(SatNode {
                    name,
                    mobility,
                    devices: [DeviceId(usize::MAX); 4],
                });
            }
        }

        // Four terminals per node, named S{i}{j}/eth{R,L,F,B}.
        let mut devices = Vec::with_capacity(params.total * 4);
        let mut allocator = MacAllocator::new();
        for idx in 0..nodes.len() {
            let mut ids = [DeviceId(usize::MAX); 4];
            for (k, direction) in Direction::ALL.iter().enumerate() {
                let dev_name = format!("{}/eth{}", nodes[idx].name, direction.letter());
                let id = DeviceId(devices.len());
                names.insert(dev_name.clone(), Entity::Device(id));
                devices.push(OpticalDevice::new(
                    dev_name,
                    NodeId(idx),
                    *direction,
                    allocator.next(),
                    &self.device,
                ));
                ids[k] = id;
            }
            nodes[idx].devices = ids;
        }

        let mut constellation = Constellation {
            params,
            nodes,
            devices,
            channels: Vec::new(),
            names,
            spare: Vec::new(),
            broken_left: HashSet::new(),
            broken_right: HashSet::new(),
            polar: HashSet::new(),
            lat_limit_sin: self.lat_limit_deg.to_radians().sin(),
            update_interval: self.update_interval,
            hooks: self.hooks,
            traces: TraceBus::new(),
            error_model: ReceiveErrorModel::new(self.error_rate, self.rng_seed),
            checksum_enabled: self.checksum,
            best_match,
        };

        constellation.wire_permanent_rings();
        constellation.wire_temporary_ladders(self.lat_limit_deg);

        let interval = constellation.update_interval;
        sim.schedule(interval, |c: &mut Constellation, sim| c.maintenance_tick(sim));

        Ok(constellation)
    }
}

impl Constellation {
    /// Intra-plane rings: S{i}{j}/ethF ↔ S{i}{(j+1) mod N}/ethB.
    fn wire_permanent_rings(&mut self) {
        let planes = self.params.planes;
        let per_plane = self.params.sats_per_plane();
        for i in 0..planes {
            for j in 0..per_plane {
                let forward =
                    self.nodes[i * per_plane + j].devices[Direction::Forward.index()];
                let backward = self.nodes[i * per_plane + (j + 1) % per_plane].devices
                    [Direction::Backward.index()];
                let id = ChannelId(self.channels.len());
                self.channels.push(OpticalChannel::permanent());
                let lat_f = self.device_latitude_sin(forward, Time::ZERO);
                let lat_b = self.device_latitude_sin(backward, Time::ZERO);
                self.channels[id.0].attach(forward, lat_f);
                self.channels[id.0].attach(backward, lat_b);
                self.devices[forward.0].attach(id);
                self.devices[backward.0].attach(id);
            }
        }
    }

    /// Inter-plane ladders: S{j}{i}/ethR ↔ S{j+1}{i}/ethL for j < P−1.
    /// Pairs already inside the polar region start in the spare pool.
    fn wire_temporary_ladders(&mut self, lat_limit_deg: f64) {
        let planes = self.params.planes;
        let per_plane = self.params.sats_per_plane();
        for i in 0..per_plane {
            for j in 0..planes - 1 {
                let right = self.nodes[j * per_plane + i].devices[Direction::Right.index()];
                let left =
                    self.nodes[(j + 1) * per_plane + i].devices[Direction::Left.index()];
                let id = ChannelId(self.channels.len());
                self.channels.push(OpticalChannel::temporary(lat_limit_deg));

                let lat_r = self.device_latitude_sin(right, Time::ZERO);
                let lat_l = self.device_latitude_sin(left, Time::ZERO);
                if lat_r > self.lat_limit_sin || lat_l > self.lat_limit_sin {
                    self.spare.push(id);
                    self.broken_right.insert(right);
                    self.broken_left.insert(left);
                    if lat_r > self.lat_limit_sin {
                        self.polar.insert(self.devices[right.0].node());
                    }
                    if lat_l > self.lat_limit_sin {
                        self.polar.insert(self.devices[left.0].node());
                    }
                    continue;
                }
                self.channels[id.0].attach(right, lat_r);
                self.channels[id.0].attach(left, lat_l);
                self.devices[right.0].attach(id);
                self.devices[left.0].attach(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walker_spacing_matches_the_star_66_6_1_layout() {
        let params = WalkerParams::default();
        assert_eq!(params.sats_per_plane(), 11);
        assert!((params.phase_step_deg() - 32.727).abs() < 1e-3);
        assert!((params.inter_plane_phase_deg() - 5.4545).abs() < 1e-3);
        assert_eq!(params.raan_span_deg(), 180.0);
        assert_eq!(params.raan_span_deg() / params.planes as f64, 30.0);
    }

    #[test]
    fn uneven_planes_are_rejected() {
        let params = WalkerParams {
            total: 65,
            ..WalkerParams::default()
        };
        assert!(matches!(
            params.validate(),
            Err(BuildError::UnevenPlanes(65, 6))
        ));
    }

    #[test]
    fn params_deserialize_with_spec_field_names() {
        let p: WalkerParams =
            serde_json::from_str(r#"{ "type": "STAR", "T": 66, "P": 6, "F": 1 }"#).unwrap();
        assert_eq!(p.kind, ConstellationType::Star);
        assert_eq!((p.total, p.planes, p.phasing), (66, 6, 1));
    }
}
