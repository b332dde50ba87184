//! Orientation meter: exponentially-weighted low-pass filter over yaw.

use super::Attitude;

/// Tuning for [`OrientationMeter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientationMeterParameters {
    /// Time constant of the exponential low-pass, seconds.
    pub window_averaging: f64,
    /// Minimum spacing between updates, seconds; attitude samples arriving
    /// more often than this are ignored by the filter (not by the caller).
    pub interval: f64,
}

impl Default for OrientationMeterParameters {
    fn default() -> Self {
        Self { window_averaging: 0.1, interval: 0.0 }
    }
}

/// Smooths the attitude stream's yaw into a slower-moving estimate.
///
/// The system model must not advance particles using orientation before
/// [`OrientationMeter::is_initialized`] returns true — this is
/// enforced by callers in [`crate::system_model`], which fall back to the
/// random-walk variant until initialization.
#[derive(Debug, Clone)]
pub struct OrientationMeter {
    params: OrientationMeterParameters,
    yaw: f64,
    last_timestamp: Option<i64>,
    initialized: bool,
}

impl OrientationMeter {
    pub fn new(params: OrientationMeterParameters) -> Self {
        Self { params, yaw: 0.0, last_timestamp: None, initialized: false }
    }

    /// Feeds one attitude sample. Unwrapped yaw is smoothed on the unit
    /// circle (via sin/cos) so that wraparound near +/-pi does not bias the
    /// low-pass toward 0.
    pub fn put_attitude(&mut self, attitude: &Attitude) {
        match self.last_timestamp {
            None => {
                self.yaw = attitude.yaw;
                self.initialized = true;
            }
            Some(last) => {
                let dt_ms = (attitude.timestamp - last).max(0) as f64;
                if dt_ms < self.params.interval * 1000.0 {
                    return;
                }
                let dt = dt_ms / 1000.0;
                // alpha -> 1 as dt grows relative to the time constant, so a
                // long gap between samples snaps close to the new reading
                // instead of dragging out the old one.
                let alpha = 1.0 - (-dt / self.params.window_averaging).exp();
                let sin = (1.0 - alpha) * self.yaw.sin() + alpha * attitude.yaw.sin();
                let cos = (1.0 - alpha) * self.yaw.cos() + alpha * attitude.yaw.cos();
                self.yaw = sin.atan2(cos);
            }
        }
        self.last_timestamp = Some(attitude.timestamp);
    }

    pub fn yaw(&self) -> f64 {
        self.yaw
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::f64::consts::PI;

    #[test]
    fn first_sample_initializes_directly() {
        let mut m = OrientationMeter::new(OrientationMeterParameters::default());
        assert!(!m.is_initialized());
        m.put_attitude(&Attitude::new(0, 0.0, 0.0, 1.0));
        assert!(m.is_initialized());
        assert_abs_diff_eq!(m.yaw(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn low_pass_moves_toward_new_reading_without_overshoot() {
        let mut m = OrientationMeter::new(OrientationMeterParameters { window_averaging: 0.1, interval: 0.0 });
        m.put_attitude(&Attitude::new(0, 0.0, 0.0, 0.0));
        m.put_attitude(&Attitude::new(100, 0.0, 0.0, 1.0));
        assert!(m.yaw() > 0.0 && m.yaw() < 1.0);
    }

    #[test]
    fn wraparound_does_not_bias_toward_zero() {
        let mut m = OrientationMeter::new(OrientationMeterParameters { window_averaging: 0.1, interval: 0.0 });
        m.put_attitude(&Attitude::new(0, 0.0, 0.0, PI - 0.01));
        m.put_attitude(&Attitude::new(1000, 0.0, 0.0, -PI + 0.01));
        assert!(m.yaw().abs() > PI / 2.0);
    }

    #[test]
    fn updates_faster_than_interval_are_ignored() {
        let mut m = OrientationMeter::new(OrientationMeterParameters { window_averaging: 0.1, interval: 1.0 });
        m.put_attitude(&Attitude::new(0, 0.0, 0.0, 0.0));
        m.put_attitude(&Attitude::new(10, 0.0, 0.0, 1.0));
        assert_abs_diff_eq!(m.yaw(), 0.0, epsilon = 1e-12);
    }
}
