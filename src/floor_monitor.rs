//! Floor-transition monitor: a subcomponent of the particle filter that
//! watches the running per-floor fraction of the particle cloud and only
//! flips the reported floor once a different floor has dominated for a
//! configured dwell, keeping the reported floor from chattering on mixed
//! evidence.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FloorMonitorParameters {
    /// Fraction of the cloud a floor must hold to be considered dominant.
    pub dominance_threshold: f64,
    /// Number of consecutive updates the dominant floor must hold before
    /// the reported floor flips.
    pub dwell_updates: usize,
    /// If true, a candidate floor flip is dropped unless corroborated by
    /// the altimeter-derived floor delta.
    pub uses_altimeter_for_floor_transition: bool,
    /// Barometric altitude change, in meters, taken to correspond to one
    /// floor. Only consulted when `uses_altimeter_for_floor_transition`.
    pub meters_per_floor: f64,
}

impl Default for FloorMonitorParameters {
    fn default() -> Self {
        Self {
            dominance_threshold: 0.5,
            dwell_updates: 3,
            uses_altimeter_for_floor_transition: false,
            meters_per_floor: 4.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FloorMonitor {
    params: FloorMonitorParameters,
    reported_floor: i32,
    candidate_floor: Option<i32>,
    candidate_streak: usize,
    blocked_by_corroboration: bool,
}

impl FloorMonitor {
    pub fn new(params: FloorMonitorParameters, initial_floor: i32) -> Self {
        Self {
            params,
            reported_floor: initial_floor,
            candidate_floor: None,
            candidate_streak: 0,
            blocked_by_corroboration: false,
        }
    }

    pub fn reported_floor(&self) -> i32 {
        self.reported_floor
    }

    /// Whether the most recent `observe` call found a dwell-qualified
    /// candidate floor but dropped the flip for lack of altimeter
    /// corroboration.
    pub fn corroboration_blocked(&self) -> bool {
        self.blocked_by_corroboration
    }

    /// Feeds one update's floor histogram (floor index -> particle count,
    /// `total` particles), plus an optional altimeter-derived floor delta
    /// relative to `reported_floor`. Returns `true` if the reported floor
    /// changed this call.
    pub fn observe(&mut self, floor_counts: &HashMap<i32, usize>, total: usize, altimeter_floor_delta: Option<i32>) -> bool {
        self.blocked_by_corroboration = false;
        if total == 0 {
            self.candidate_floor = None;
            self.candidate_streak = 0;
            return false;
        }

        let dominant = floor_counts
            .iter()
            .max_by_key(|&(_, &count)| count)
            .filter(|&(_, &count)| count as f64 / total as f64 > self.params.dominance_threshold)
            .map(|(&floor, _)| floor);

        match dominant {
            Some(floor) if floor != self.reported_floor => {
                if self.candidate_floor == Some(floor) {
                    self.candidate_streak += 1;
                } else {
                    self.candidate_floor = Some(floor);
                    self.candidate_streak = 1;
                }

                let dwell_met = self.candidate_streak >= self.params.dwell_updates;
                let corroborated = !self.params.uses_altimeter_for_floor_transition
                    || altimeter_floor_delta == Some(floor - self.reported_floor);

                if dwell_met && corroborated {
                    self.reported_floor = floor;
                    self.candidate_floor = None;
                    self.candidate_streak = 0;
                    return true;
                }
                if dwell_met && !corroborated {
                    self.blocked_by_corroboration = true;
                }
                false
            }
            _ => {
                self.candidate_floor = None;
                self.candidate_streak = 0;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(pairs: &[(i32, usize)]) -> HashMap<i32, usize> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn does_not_flip_before_dwell_elapses() {
        let mut monitor = FloorMonitor::new(FloorMonitorParameters { dwell_updates: 3, ..Default::default() }, 1);
        assert!(!monitor.observe(&counts(&[(1, 100), (2, 900)]), 1000, None));
        assert!(!monitor.observe(&counts(&[(1, 100), (2, 900)]), 1000, None));
        assert_eq!(monitor.reported_floor(), 1);
    }

    #[test]
    fn flips_after_dwell_elapses() {
        let mut monitor = FloorMonitor::new(FloorMonitorParameters { dwell_updates: 2, ..Default::default() }, 1);
        assert!(!monitor.observe(&counts(&[(1, 100), (2, 900)]), 1000, None));
        assert!(monitor.observe(&counts(&[(1, 100), (2, 900)]), 1000, None));
        assert_eq!(monitor.reported_floor(), 2);
    }

    #[test]
    fn does_not_oscillate_under_mixed_evidence() {
        let mut monitor = FloorMonitor::new(FloorMonitorParameters { dwell_updates: 2, ..Default::default() }, 1);
        for _ in 0..10 {
            monitor.observe(&counts(&[(1, 600), (2, 400)]), 1000, None);
        }
        assert_eq!(monitor.reported_floor(), 1);
    }

    #[test]
    fn altimeter_mismatch_blocks_the_flip() {
        let mut monitor = FloorMonitor::new(
            FloorMonitorParameters { dwell_updates: 1, uses_altimeter_for_floor_transition: true, ..Default::default() },
            1,
        );
        assert!(!monitor.observe(&counts(&[(2, 900)]), 900, Some(0)));
        assert_eq!(monitor.reported_floor(), 1);
        assert!(monitor.corroboration_blocked());
        assert!(monitor.observe(&counts(&[(2, 900)]), 900, Some(1)));
        assert_eq!(monitor.reported_floor(), 2);
        assert!(!monitor.corroboration_blocked());
    }
}
