//! Point-to-point optical channel.
//!
//! A channel joins exactly two terminals (slot 0, slot 1). Permanent
//! channels carry intra-plane links and are never broken; temporary
//! channels carry inter-plane links and are gated on endpoint latitude.
//! Latitude values are stored and compared as sines: for |lat| ≤ 90° the
//! sine is monotonic, so comparing sines is comparing latitudes.

use crate::DeviceId;
use event_sim::Time;

/// Propagation speed used by the constant-delay model (m/s).
pub const SPEED_OF_LIGHT_M_S: f64 = 3.0e8;

/// Hysteresis band below the latitude limit inside which ready-break
/// warnings fire (degrees).
pub const READY_BREAK_BAND_DEG: f64 = 3.0;

/// Sentinel for "no latitude observed yet"; no real sine is negative.
const LATITUDE_UNSET: f64 = -1.0;

/// Constant-speed propagation delay over `distance_m` metres.
pub fn propagation_delay(distance_m: f64) -> Time {
    Time::from_secs_f64(distance_m / SPEED_OF_LIGHT_M_S)
}

/// Friis free-space receive power.
///
/// rx = tx + G_tx + 20·log₁₀(λ / 4πd) + G_rx, everything in dB(m).
pub fn friis_rx_power_dbm(
    tx_power_dbm: f64,
    tx_gain_db: f64,
    rx_gain_db: f64,
    wavelength_m: f64,
    distance_m: f64,
) -> f64 {
    let path_db = 20.0 * (wavelength_m / (4.0 * std::f64::consts::PI * distance_m)).log10();
    tx_power_dbm + tx_gain_db + path_db + rx_gain_db
}

/// Channel lifetime class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Intra-plane link, never broken.
    Forever,
    /// Inter-plane link, broken inside the polar region.
    Temporary,
}

/// Verdict of a send-time latitude check on a temporary channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatitudeGate {
    Pass,
    /// An endpoint is climbing toward the limit; carries the remaining
    /// headroom `sin(limit) − max(sin(lat))`.
    ReadyBreak(f64),
    /// An endpoint is above the limit; the link must break.
    Fail,
}

/// Two-endpoint optical channel.
#[derive(Debug)]
pub struct OpticalChannel {
    kind: ChannelKind,
    slots: [Option<DeviceId>; 2],
    last_lat_sin: [f64; 2],
    lat_limit_sin: f64,
    ready_break_sin: f64,
}

impl OpticalChannel {
    pub fn permanent() -> Self {
        Self {
            kind: ChannelKind::Forever,
            slots: [None, None],
            last_lat_sin: [LATITUDE_UNSET; 2],
            lat_limit_sin: 1.0,
            ready_break_sin: 1.0,
        }
    }

    /// A temporary channel gated at `limit_deg`, with the ready-break
    /// threshold three degrees below it (both converted to sines once).
    pub fn temporary(limit_deg: f64) -> Self {
        Self {
            kind: ChannelKind::Temporary,
            slots: [None, None],
            last_lat_sin: [LATITUDE_UNSET; 2],
            lat_limit_sin: limit_deg.to_radians().sin(),
            ready_break_sin: (limit_deg - READY_BREAK_BAND_DEG).to_radians().sin(),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn is_temporary(&self) -> bool {
        self.kind == ChannelKind::Temporary
    }

    pub fn slots(&self) -> [Option<DeviceId>; 2] {
        self.slots
    }

    /// Both endpoints present.
    pub fn is_attached(&self) -> bool {
        self.slots[0].is_some() && self.slots[1].is_some()
    }

    /// Record a terminal into slot 0 if free, else slot 1, remembering the
    /// endpoint's current latitude sine.
    pub(crate) fn attach(&mut self, device: DeviceId, lat_sin: f64) {
        if self.slots[0].is_none() {
            self.slots[0] = Some(device);
            self.last_lat_sin[0] = lat_sin;
        } else {
            self.slots[1] = Some(device);
            self.last_lat_sin[1] = lat_sin;
        }
    }

    /// Clear both slots and forget observed latitudes.
    pub(crate) fn detach(&mut self) {
        self.slots = [None, None];
        self.last_lat_sin = [LATITUDE_UNSET; 2];
    }

    /// The endpoint opposite `device`, if the channel is fully attached.
    pub fn peer(&self, device: DeviceId) -> Option<DeviceId> {
        match self.slots {
            [Some(a), Some(b)] if a == device => Some(b),
            [Some(a), Some(b)] if b == device => Some(a),
            _ => None,
        }
    }

    /// Send-time latitude check with current slot-ordered latitude sines.
    ///
    /// A failure leaves the last-observed values untouched; pass and
    /// ready-break update them so only movement *toward* the limit warns.
    pub(crate) fn latitude_gate(&mut self, l0: f64, l1: f64) -> LatitudeGate {
        if l0 > self.lat_limit_sin || l1 > self.lat_limit_sin {
            return LatitudeGate::Fail;
        }
        let rising = (l0 > self.last_lat_sin[0] && l0 > self.ready_break_sin)
            || (l1 > self.last_lat_sin[1] && l1 > self.ready_break_sin);
        self.last_lat_sin = [l0, l1];
        if rising {
            LatitudeGate::ReadyBreak(self.lat_limit_sin - l0.max(l1))
        } else {
            LatitudeGate::Pass
        }
    }

    pub fn lat_limit_sin(&self) -> f64 {
        self.lat_limit_sin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_fill_in_order_and_peer_resolves() {
        let mut ch = OpticalChannel::temporary(60.0);
        assert!(!ch.is_attached());
        ch.attach(DeviceId(4), 0.1);
        ch.attach(DeviceId(9), 0.2);
        assert!(ch.is_attached());
        assert_eq!(ch.slots(), [Some(DeviceId(4)), Some(DeviceId(9))]);
        assert_eq!(ch.peer(DeviceId(4)), Some(DeviceId(9)));
        assert_eq!(ch.peer(DeviceId(9)), Some(DeviceId(4)));

        ch.detach();
        assert!(!ch.is_attached());
        assert_eq!(ch.peer(DeviceId(4)), None);
    }

    #[test]
    fn gate_passes_below_threshold() {
        let mut ch = OpticalChannel::temporary(60.0);
        ch.attach(DeviceId(0), 0.1);
        ch.attach(DeviceId(1), 0.1);
        assert_eq!(ch.latitude_gate(0.2, 0.2), LatitudeGate::Pass);
    }

    #[test]
    fn gate_fails_strictly_above_limit() {
        let limit_sin = 60.0f64.to_radians().sin();
        let mut ch = OpticalChannel::temporary(60.0);
        ch.attach(DeviceId(0), 0.0);
        ch.attach(DeviceId(1), 0.0);
        // exactly at the limit stays up
        assert_eq!(ch.latitude_gate(limit_sin, 0.0), LatitudeGate::Pass);
        assert_eq!(ch.latitude_gate(limit_sin + 1e-9, 0.0), LatitudeGate::Fail);
    }

    #[test]
    fn gate_warns_when_climbing_into_band() {
        let mut ch = OpticalChannel::temporary(60.0);
        ch.attach(DeviceId(0), 0.0);
        ch.attach(DeviceId(1), 0.0);
        let inside_band = 58.5f64.to_radians().sin();
        match ch.latitude_gate(inside_band, 0.0) {
            LatitudeGate::ReadyBreak(headroom) => {
                let expected = 60.0f64.to_radians().sin() - inside_band;
                assert!((headroom - expected).abs() < 1e-12);
            }
            other => panic!("expected ready-break, got {other:?}"),
        }
        // descending out of the band no longer warns
        assert_eq!(
            ch.latitude_gate(58.0f64.to_radians().sin(), 0.0),
            LatitudeGate::Pass
        );
    }

    #[test]
    fn fresh_attachment_never_spuriously_warns() {
        let mut ch = OpticalChannel::temporary(60.0);
        let in_band = 58.0f64.to_radians().sin();
        ch.attach(DeviceId(0), in_band);
        ch.attach(DeviceId(1), in_band);
        // first check at the recorded latitudes: not rising, no warning
        assert_eq!(ch.latitude_gate(in_band, in_band), LatitudeGate::Pass);
    }

    #[test]
    fn friis_matches_hand_computation() {
        // S5 numbers: λ=1550 nm, 20 dBm, 120/120 dB gains, d = 5000 km
        let rx = friis_rx_power_dbm(20.0, 120.0, 120.0, 1550e-9, 5_000_000.0);
        let expected = 260.0 + 20.0 * (1550e-9 / (4.0 * std::f64::consts::PI * 5e6)).log10();
        assert!((rx - expected).abs() < 1e-9);
        // comfortably above the −40 dBm sensitivity at this range
        assert!(rx > -40.0);
    }

    #[test]
    fn propagation_delay_is_distance_over_c() {
        assert_eq!(propagation_delay(3.0e8), Time::from_secs(1));
        assert_eq!(propagation_delay(3.0e5), Time::from_millis(1));
    }
}
