//! Orbital Mechanics Library
//!
//! Closed-form Keplerian two-body propagation for constellation simulation:
//! classical elements, Newton solution of Kepler's equation, perifocal to
//! Earth-inertial transforms, and a satellite mobility model that answers
//! position/velocity/latitude queries at arbitrary simulation times.
//!
//! Angles are stored in radians, lengths in km for the elements and in
//! metres for all reported state vectors.

use serde::{Deserialize, Serialize};
use std::f64::consts::{PI, TAU};
use thiserror::Error;

/// Earth gravitational parameter (km³/s²)
pub const MU_EARTH_KM3_S2: f64 = 3.986e5;
/// Mean Earth radius (km)
pub const EARTH_RADIUS_KM: f64 = 6378.14;
/// Convergence bound for the Newton iteration on Kepler's equation
const KEPLER_TOLERANCE: f64 = 1e-7;

#[derive(Error, Debug)]
pub enum OrbitalError {
    #[error("Semi-major axis {0} km must exceed the Earth radius ({EARTH_RADIUS_KM} km)")]
    SemiMajorAxisTooSmall(f64),
    #[error("Eccentricity {0} outside [0, 1)")]
    EccentricityOutOfRange(f64),
}

pub type Result<T> = std::result::Result<T, OrbitalError>;

// ============================================================================
// Vectors
// ============================================================================

/// Cartesian vector in the Earth-centered inertial frame (metres, or m/s).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn distance_to(&self, other: &Vec3) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }
}

/// Sine of the absolute geocentric latitude of a position.
///
/// Valid for any non-zero vector; the constellation layer compares these
/// directly against a sine-encoded latitude limit.
pub fn latitude_sine(pos: &Vec3) -> f64 {
    pos.z.abs() / pos.norm()
}

/// Absolute geocentric latitude in degrees.
pub fn latitude_deg(pos: &Vec3) -> f64 {
    latitude_sine(pos).asin().to_degrees()
}

// ============================================================================
// Orbital elements
// ============================================================================

/// Classical (Keplerian) orbital elements.
///
/// `true_anomaly` is the only member that changes after installation; the
/// propagator advances it when the epoch moves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrbitalElements {
    /// Semi-major axis (km)
    pub semi_major_axis_km: f64,
    /// Eccentricity, [0, 1)
    pub eccentricity: f64,
    /// True anomaly (rad)
    pub true_anomaly: f64,
    /// Inclination (rad)
    pub inclination: f64,
    /// Argument of perigee (rad)
    pub argument_of_perigee: f64,
    /// Right ascension of the ascending node (rad)
    pub raan: f64,
}

impl OrbitalElements {
    /// Build elements from the degree/km convention used by configuration.
    pub fn from_degrees(
        a_km: f64,
        e: f64,
        f_deg: f64,
        i_deg: f64,
        w_deg: f64,
        raan_deg: f64,
    ) -> Self {
        Self {
            semi_major_axis_km: a_km,
            eccentricity: e,
            true_anomaly: f_deg.to_radians(),
            inclination: i_deg.to_radians(),
            argument_of_perigee: w_deg.to_radians(),
            raan: raan_deg.to_radians(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.semi_major_axis_km <= EARTH_RADIUS_KM {
            return Err(OrbitalError::SemiMajorAxisTooSmall(self.semi_major_axis_km));
        }
        if !(0.0..1.0).contains(&self.eccentricity) {
            return Err(OrbitalError::EccentricityOutOfRange(self.eccentricity));
        }
        Ok(())
    }

    /// Orbital period 2π√(a³/μ) in seconds.
    pub fn period_secs(&self) -> f64 {
        TAU * (self.semi_major_axis_km.powi(3) / MU_EARTH_KM3_S2).sqrt()
    }
}

// ============================================================================
// Frame rotation (3-1-3 Euler sequence)
// ============================================================================

type Mat3 = [[f64; 3]; 3];

fn rot_z(theta: f64) -> Mat3 {
    let (s, c) = theta.sin_cos();
    [[c, -s, 0.0], [s, c, 0.0], [0.0, 0.0, 1.0]]
}

fn rot_x(theta: f64) -> Mat3 {
    let (s, c) = theta.sin_cos();
    [[1.0, 0.0, 0.0], [0.0, c, -s], [0.0, s, c]]
}

fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

fn apply(m: &Mat3, v: [f64; 3]) -> Vec3 {
    Vec3::new(
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    )
}

/// Rotation from the perifocal frame into Earth-inertial axes,
/// R = Rz(RAAN)·Rx(i)·Rz(w).
fn perifocal_to_inertial(elements: &OrbitalElements) -> Mat3 {
    let zx = mat_mul(&rot_z(elements.raan), &rot_x(elements.inclination));
    mat_mul(&zx, &rot_z(elements.argument_of_perigee))
}

// ============================================================================
// Mobility
// ============================================================================

/// Position/velocity source for a network node.
///
/// Satellites are the only variant the constellation installs today; the
/// trait keeps the seam open for fixed or relay platforms.
pub trait Mobility {
    fn position_at(&mut self, t_secs: f64) -> Vec3;
    fn velocity_at(&mut self, t_secs: f64) -> Vec3;

    fn latitude_sine_at(&mut self, t_secs: f64) -> f64 {
        latitude_sine(&self.position_at(t_secs))
    }
}

/// Unperturbed Keplerian orbit propagator bound to one satellite.
///
/// Derived quantities (semi-latus rectum, period, initial anomalies) are
/// fixed when the elements are installed; `set_epoch` advances only the
/// true anomaly. Queries for the same epoch are idempotent.
#[derive(Debug, Clone)]
pub struct SatelliteMobility {
    elements: OrbitalElements,
    /// Semi-latus rectum p = a(1-e²) (km)
    semi_latus_km: f64,
    period_secs: f64,
    /// Mean anomaly at the reference true anomaly
    mean_anomaly_0: f64,
}

impl SatelliteMobility {
    pub fn new(elements: OrbitalElements) -> Result<Self> {
        elements.validate()?;
        let e = elements.eccentricity;
        let eccentric_0 =
            2.0 * (((1.0 - e) / (1.0 + e)).sqrt() * (elements.true_anomaly / 2.0).tan()).atan();
        Ok(Self {
            elements,
            semi_latus_km: elements.semi_major_axis_km * (1.0 - e * e),
            period_secs: elements.period_secs(),
            mean_anomaly_0: eccentric_0 - e * eccentric_0.sin(),
        })
    }

    pub fn elements(&self) -> &OrbitalElements {
        &self.elements
    }

    pub fn period_secs(&self) -> f64 {
        self.period_secs
    }

    /// Current true anomaly, degrees in [0, 360).
    pub fn true_anomaly_deg(&self) -> f64 {
        self.elements.true_anomaly.to_degrees().rem_euclid(360.0)
    }

    /// Advance the true anomaly to simulation time `t_secs` past the epoch.
    ///
    /// Mean anomaly M = 2π·(t mod T)/T + M₀; for eccentric orbits Kepler's
    /// equation E − e·sin E = M is solved by Newton iteration seeded at
    /// E = M ± e/2, then f = 2·atan(√((1+e)/(1−e))·tan(E/2)).
    pub fn set_epoch(&mut self, t_secs: f64) {
        let e = self.elements.eccentricity;
        let t = t_secs.rem_euclid(self.period_secs);
        let mean = TAU * t / self.period_secs + self.mean_anomaly_0;

        if e == 0.0 {
            self.elements.true_anomaly = mean.rem_euclid(TAU);
            return;
        }

        let mut eccentric = if mean < PI { mean + e / 2.0 } else { mean - e / 2.0 };
        loop {
            let residual = eccentric - e * eccentric.sin() - mean;
            let slope = 1.0 - e * eccentric.cos();
            let ratio = residual / slope;
            if ratio.abs() <= KEPLER_TOLERANCE {
                break;
            }
            eccentric -= ratio;
        }

        let f = 2.0 * (((1.0 + e) / (1.0 - e)).sqrt() * (eccentric / 2.0).tan()).atan();
        self.elements.true_anomaly = f.rem_euclid(TAU);
    }

    /// Distance in metres to another satellite at the same epoch.
    pub fn distance_to(&mut self, other: &mut SatelliteMobility, t_secs: f64) -> f64 {
        self.position_at(t_secs).distance_to(&other.position_at(t_secs))
    }
}

impl Mobility for SatelliteMobility {
    fn position_at(&mut self, t_secs: f64) -> Vec3 {
        self.set_epoch(t_secs);
        let f = self.elements.true_anomaly;
        let r = self.semi_latus_km / (1.0 + self.elements.eccentricity * f.cos());
        let perifocal = [r * f.cos() * 1e3, r * f.sin() * 1e3, 0.0];
        apply(&perifocal_to_inertial(&self.elements), perifocal)
    }

    fn velocity_at(&mut self, t_secs: f64) -> Vec3 {
        self.set_epoch(t_secs);
        let f = self.elements.true_anomaly;
        let k = (MU_EARTH_KM3_S2 / self.semi_latus_km).sqrt();
        let perifocal = [
            -k * f.sin() * 1e3,
            k * (self.elements.eccentricity + f.cos()) * 1e3,
            0.0,
        ];
        apply(&perifocal_to_inertial(&self.elements), perifocal)
    }
}
