//! Core pose/state types shared by every component of the engine.
//!
//! `Location` -> `Pose` -> `State` form a strict superset chain, matching the
//! data model: a `State` is the thing a particle carries, a `Pose` is what a
//! motion sensor reports relative motion in, and a `Location` is what the
//! building map and the observation model query against.

use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

/// A point in the building-local Cartesian frame, floor included.
///
/// `floor` is carried as `f64` rather than `i32` so that Gaussian jitter
/// around a floor index (e.g. during resampling or transition-cell
/// diffusion) is well defined; call [`Location::floor_index`] to get the
/// rounded integer used for every map lookup.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Location {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub floor: f64,
}

impl Location {
    pub fn new(x: f64, y: f64, z: f64, floor: f64) -> Self {
        Self { x, y, z, floor }
    }

    /// The integer floor index used for every raster lookup.
    pub fn floor_index(&self) -> i32 {
        self.floor.round() as i32
    }

    /// 3D Euclidean distance, ignoring the discreteness of `floor`.
    pub fn distance_3d(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Horizontal (x, y) distance only.
    pub fn distance_2d(&self, other: &Location) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn floor_diff(&self, other: &Location) -> f64 {
        (self.floor - other.floor).abs()
    }
}

impl Add for Location {
    type Output = Location;
    fn add(self, rhs: Location) -> Location {
        Location::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z, self.floor + rhs.floor)
    }
}

impl Sub for Location {
    type Output = Location;
    fn sub(self, rhs: Location) -> Location {
        Location::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z, self.floor - rhs.floor)
    }
}

impl Mul<f64> for Location {
    type Output = Location;
    fn mul(self, rhs: f64) -> Location {
        Location::new(self.x * rhs, self.y * rhs, self.z * rhs, self.floor * rhs)
    }
}

/// A [`Location`] plus heading and instantaneous speed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pose {
    pub location: Location,
    /// Heading in radians, 0 along +x, increasing counter-clockwise.
    pub orientation: f64,
    /// Instantaneous walking speed, m/s.
    pub velocity: f64,
    /// Component of velocity normal to `orientation` (used by transition
    /// cells, e.g. stepping sideways onto an escalator tread).
    pub normal_velocity: f64,
}

impl Pose {
    pub fn new(location: Location, orientation: f64, velocity: f64, normal_velocity: f64) -> Self {
        Self { location, orientation, velocity, normal_velocity }
    }

    /// Draws a uniformly random pose inside the given 2D box on a given
    /// floor, with uniform heading and zero velocity. Used by [`crate::status_initializer`].
    pub fn random_uniform<R: Rng + ?Sized>(
        rng: &mut R,
        x_range: std::ops::Range<f64>,
        y_range: std::ops::Range<f64>,
        floor: f64,
    ) -> Self {
        Pose::new(
            Location::new(rng.gen_range(x_range), rng.gen_range(y_range), 0.0, floor),
            rng.gen_range(0.0..2. * PI),
            0.0,
            0.0,
        )
    }
}

/// Full filter state: a [`Pose`] plus the two latent nuisance biases that
/// diffuse slowly and are never directly observed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct State {
    pub pose: Pose,
    /// Additive offset between predicted and observed RSSI, dB.
    pub rssi_bias: f64,
    /// Additive offset applied to `pose.orientation` by the system model
    /// before projecting motion (kept distinct from `pose.orientation` so
    /// that the orientation meter's estimate and the particle's private
    /// drift don't fight each other).
    pub orientation_bias: f64,
}

impl State {
    pub fn new(pose: Pose, rssi_bias: f64, orientation_bias: f64) -> Self {
        Self { pose, rssi_bias, orientation_bias }
    }

    pub fn location(&self) -> Location {
        self.pose.location
    }

    /// Clamps `rssi_bias` into `[lo, hi]`. Every call site that mutates
    /// `rssi_bias` must re-establish this bound afterward.
    pub fn clamp_rssi_bias(&mut self, lo: f64, hi: f64) {
        self.rssi_bias = self.rssi_bias.clamp(lo, hi);
    }

    pub fn clamp_velocity(&mut self, lo: f64, hi: f64) {
        self.pose.velocity = self.pose.velocity.clamp(lo, hi);
    }
}

/// Weighted mean of a population of `State`s. Orientation is averaged on the
/// unit circle (mean of sin/cos) rather than linearly, since a linear mean
/// of angles near the +/-pi wraparound is meaningless.
pub fn weighted_mean_state(states: &[State], weights: &[f64]) -> State {
    assert_eq!(states.len(), weights.len());
    let total: f64 = weights.iter().sum();
    let total = if total > 0.0 { total } else { 1.0 };

    let mut x = 0.0;
    let mut y = 0.0;
    let mut z = 0.0;
    let mut floor = 0.0;
    let mut sin_sum = 0.0;
    let mut cos_sum = 0.0;
    let mut velocity = 0.0;
    let mut rssi_bias = 0.0;
    let mut orientation_bias = 0.0;

    for (s, w) in states.iter().zip(weights) {
        let w = *w / total;
        x += s.pose.location.x * w;
        y += s.pose.location.y * w;
        z += s.pose.location.z * w;
        floor += s.pose.location.floor * w;
        sin_sum += s.pose.orientation.sin() * w;
        cos_sum += s.pose.orientation.cos() * w;
        velocity += s.pose.velocity * w;
        rssi_bias += s.rssi_bias * w;
        orientation_bias += s.orientation_bias * w;
    }

    State::new(
        Pose::new(Location::new(x, y, z, floor), sin_sum.atan2(cos_sum), velocity, 0.0),
        rssi_bias,
        orientation_bias,
    )
}

/// Weighted standard deviation of location, per axis. Used for the Status
/// snapshot and for recentering the cloud on TRACKING entry.
pub fn weighted_stdev_location(states: &[State], weights: &[f64], mean: &Location) -> Location {
    let total: f64 = weights.iter().sum();
    let total = if total > 0.0 { total } else { 1.0 };

    let mut vx = 0.0;
    let mut vy = 0.0;
    let mut vz = 0.0;
    let mut vf = 0.0;
    for (s, w) in states.iter().zip(weights) {
        let w = *w / total;
        let loc = s.pose.location;
        vx += w * (loc.x - mean.x).powi(2);
        vy += w * (loc.y - mean.y).powi(2);
        vz += w * (loc.z - mean.z).powi(2);
        vf += w * (loc.floor - mean.floor).powi(2);
    }
    Location::new(vx.sqrt(), vy.sqrt(), vz.sqrt(), vf.sqrt())
}

/// Samples `N(mean, std)`, returning `mean` unperturbed when `std <= 0`
/// (several call sites pass a possibly-zero stdev e.g. for a pinned axis).
pub fn sample_normal<R: Rng + ?Sized>(rng: &mut R, mean: f64, std: f64) -> f64 {
    if std <= 0.0 {
        return mean;
    }
    let distr = Normal::new(mean, std).expect("std already checked positive");
    distr.sample(rng)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weighted_mean_reduces_to_uniform_average() {
        let states = vec![
            State::new(Pose::new(Location::new(0.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), 0.0, 0.0),
            State::new(Pose::new(Location::new(2.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), 0.0, 0.0),
        ];
        let weights = vec![1.0, 1.0];
        let mean = weighted_mean_state(&states, &weights);
        assert!((mean.pose.location.x - 1.0).abs() < 1e-12);
    }

    #[test]
    fn weighted_mean_orientation_wraps_correctly() {
        // Two particles straddling the +/-pi seam should average to +/-pi,
        // not to 0 (which a naive linear mean would produce).
        let states = vec![
            State::new(Pose::new(Location::default(), PI - 0.01, 0.0, 0.0), 0.0, 0.0),
            State::new(Pose::new(Location::default(), -PI + 0.01, 0.0, 0.0), 0.0, 0.0),
        ];
        let weights = vec![1.0, 1.0];
        let mean = weighted_mean_state(&states, &weights);
        assert!(mean.pose.orientation.abs() > PI - 0.1);
    }

    #[test]
    fn clamp_rssi_bias_respects_bounds() {
        let mut state = State::default();
        state.rssi_bias = 100.0;
        state.clamp_rssi_bias(-10.0, 10.0);
        assert_eq!(state.rssi_bias, 10.0);
    }
}
