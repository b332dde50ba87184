//! Log-distance path-loss (LDPL) base model.
//!
//! This is the "ITU model" of the original design: a 4-parameter linear
//! model in `(1, log-distance, floor-count, horizontal-distance)` fitted
//! per beacon at training time (out of scope here — only evaluation is
//! implemented).

use crate::geometry::Location;

/// The minimum distance ever plugged into the `log10` term, preventing a
/// particle standing exactly on top of a beacon from producing `-inf`.
pub const DISTANCE_OFFSET: f64 = 1.0;

/// Fitted LDPL coefficients for one beacon (or the global fallback).
///
/// `theta[0]` is the intercept (RSSI at the reference distance), `theta[1]`
/// is the path-loss exponent, `theta[2]` is the per-floor attenuation, and
/// `theta[3]` is the horizontal-component coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LdplParameters {
    pub theta: [f64; 4],
}

impl Default for LdplParameters {
    /// A reasonable free-space-ish default: -50 dBm at 1m, path-loss
    /// exponent 2.0, 10 dB/floor, no extra horizontal term. Only used when
    /// an external trainer hasn't supplied a fit.
    fn default() -> Self {
        Self { theta: [-50.0, 2.0, 10.0, 0.0] }
    }
}

/// Evaluates the LDPL base mean at a query [`Location`] against one beacon's
/// known location:
///
/// `mu_base = theta0 - 10*theta1*log10(max(d, d_offset)) - theta2*floor_diff - theta3*horiz`
///
/// `floor_mismatch_coeff` multiplies the horizontal term when the query and
/// beacon floors differ, amplifying the mean-divergence penalty for
/// cross-floor hypotheses without forbidding them outright.
pub fn ldpl_mean(
    params: &LdplParameters,
    query: &Location,
    beacon_location: &Location,
    floor_mismatch_coeff: f64,
) -> f64 {
    let d = query.distance_3d(beacon_location).max(DISTANCE_OFFSET);
    let floor_diff = query.floor_diff(beacon_location);
    let horiz = query.distance_2d(beacon_location);

    let floor_differs = query.floor_index() != beacon_location.floor_index();
    let horiz_coeff = if floor_differs { floor_mismatch_coeff } else { 1.0 };

    params.theta[0]
        - 10.0 * params.theta[1] * d.log10()
        - params.theta[2] * floor_diff
        - params.theta[3] * horiz * horiz_coeff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_decreases_with_distance() {
        let params = LdplParameters::default();
        let beacon = Location::new(0.0, 0.0, 0.0, 0.0);
        let near = ldpl_mean(&params, &Location::new(1.0, 0.0, 0.0, 0.0), &beacon, 5.0);
        let far = ldpl_mean(&params, &Location::new(50.0, 0.0, 0.0, 0.0), &beacon, 5.0);
        assert!(far < near, "RSSI should drop off with distance");
    }

    #[test]
    fn distance_is_floored_at_offset() {
        let params = LdplParameters::default();
        let beacon = Location::new(0.0, 0.0, 0.0, 0.0);
        let on_top = ldpl_mean(&params, &Location::new(0.0, 0.0, 0.0, 0.0), &beacon, 5.0);
        let at_offset = ldpl_mean(&params, &Location::new(1.0, 0.0, 0.0, 0.0), &beacon, 5.0);
        assert!(on_top.is_finite());
        assert!((on_top - at_offset).abs() < 1e-9);
    }

    #[test]
    fn floor_mismatch_amplifies_horizontal_penalty() {
        let params = LdplParameters { theta: [-50.0, 2.0, 10.0, 1.0] };
        let beacon = Location::new(0.0, 0.0, 0.0, 1.0);
        let same_floor = ldpl_mean(&params, &Location::new(10.0, 0.0, 0.0, 1.0), &beacon, 5.0);
        let other_floor = ldpl_mean(&params, &Location::new(10.0, 0.0, 0.0, 2.0), &beacon, 5.0);
        // other_floor pays both the per-floor term and the amplified horizontal term
        assert!(other_floor < same_floor);
    }
}
