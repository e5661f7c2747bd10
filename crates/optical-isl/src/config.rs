//! Scenario configuration model.
//!
//! Plain serde structs with the simulator's defaults baked into `Default`
//! impls; every field can be overridden from a JSON scenario file. The
//! library itself never touches the filesystem.

use crate::builder::WalkerParams;
use crate::device::DataRate;
use crate::frame::MacAddr;
use chrono::{DateTime, Utc};
use event_sim::Time;
use serde::{Deserialize, Serialize};

/// Reference ("wizard") satellite: the orbit every constellation member is
/// derived from by phasing true anomaly and RAAN.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// Semi-major axis (km)
    pub a_km: f64,
    /// Eccentricity
    pub e: f64,
    /// True anomaly (deg)
    pub f_deg: f64,
    /// Inclination (deg)
    pub i_deg: f64,
    /// Argument of perigee (deg)
    pub w_deg: f64,
    /// RAAN (deg)
    pub raan_deg: f64,
}

impl Default for WizardConfig {
    fn default() -> Self {
        // 780 km circular near-polar orbit
        Self {
            a_km: 7158.14,
            e: 0.0,
            f_deg: 0.0,
            i_deg: 86.4,
            w_deg: 0.0,
            raan_deg: 0.0,
        }
    }
}

/// Optical terminal parameters, shared by all devices of a build.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Laser wavelength (nm)
    pub lambda_nm: f64,
    /// Transmit power (dBm)
    pub tx_power_dbm: f64,
    /// Transmit gain (dB)
    pub tx_gain_db: f64,
    /// Receive gain (dB)
    pub rx_gain_db: f64,
    /// Receiver sensitivity threshold (dBm)
    pub rx_sensitivity_dbm: f64,
    pub data_rate: DataRate,
    pub mtu: u16,
    /// Egress queue capacity (frames, drop-tail)
    pub queue_len: usize,
    /// Address a device carries before build-time allocation
    pub mac: MacAddr,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            lambda_nm: 1550.0,
            tx_power_dbm: 20.0,
            tx_gain_db: 120.0,
            rx_gain_db: 120.0,
            rx_sensitivity_dbm: -40.0,
            data_rate: DataRate::bps(1_000_000_000),
            mtu: 1500,
            queue_len: 100,
            mac: MacAddr::BROADCAST,
        }
    }
}

/// Complete scenario configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub constellation: WalkerParams,
    pub wizard: WizardConfig,
    /// Polar region boundary (deg)
    pub lat_limit_deg: f64,
    /// Link maintenance cadence (s)
    pub update_interval_secs: f64,
    pub device: DeviceConfig,
    /// Bernoulli per-frame receive corruption probability
    pub error_rate: f64,
    /// Seed for the receive error model
    pub rng_seed: u64,
    /// Compute and verify the Ethernet FCS trailer
    pub checksum: bool,
    /// Wall-clock anchor for virtual time zero
    pub epoch: DateTime<Utc>,
    /// Scenario lifetime (s)
    pub run_secs: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            constellation: WalkerParams::default(),
            wizard: WizardConfig::default(),
            lat_limit_deg: 60.0,
            update_interval_secs: 1.0,
            device: DeviceConfig::default(),
            error_rate: 0.0,
            rng_seed: 1,
            checksum: false,
            epoch: DateTime::UNIX_EPOCH,
            run_secs: 6000.0,
        }
    }
}

impl SimConfig {
    pub fn update_interval(&self) -> Time {
        Time::from_secs_f64(self.update_interval_secs)
    }

    /// Wall-clock instant corresponding to virtual time `t`.
    pub fn wall_time(&self, t: Time) -> DateTime<Utc> {
        self.epoch + chrono::Duration::nanoseconds(t.as_nanos() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_iridium_style_scenario() {
        let cfg = SimConfig::default();
        assert_eq!(cfg.constellation.total, 66);
        assert_eq!(cfg.constellation.planes, 6);
        assert_eq!(cfg.constellation.phasing, 1);
        assert_eq!(cfg.wizard.a_km, 7158.14);
        assert_eq!(cfg.wizard.i_deg, 86.4);
        assert_eq!(cfg.lat_limit_deg, 60.0);
        assert_eq!(cfg.device.data_rate, DataRate::bps(1_000_000_000));
        assert_eq!(cfg.device.mtu, 1500);
        assert!(cfg.device.mac.is_broadcast());
    }

    #[test]
    fn partial_json_overrides_merge_with_defaults() {
        let cfg: SimConfig = serde_json::from_str(
            r#"{
                "constellation": { "type": "DELTA", "T": 24, "P": 3, "F": 2 },
                "lat_limit_deg": 55.0,
                "device": { "data_rate": "100Mbps" }
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.constellation.total, 24);
        assert_eq!(cfg.constellation.planes, 3);
        assert_eq!(cfg.lat_limit_deg, 55.0);
        assert_eq!(cfg.device.data_rate, DataRate::bps(100_000_000));
        // untouched fields keep their defaults
        assert_eq!(cfg.wizard.i_deg, 86.4);
        assert_eq!(cfg.update_interval_secs, 1.0);
    }

    #[test]
    fn wall_time_advances_with_virtual_time() {
        let cfg = SimConfig::default();
        let later = cfg.wall_time(Time::from_secs(90));
        assert_eq!((later - cfg.epoch).num_seconds(), 90);
    }
}
