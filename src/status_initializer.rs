//! Status initializer: draws an initial particle population either
//! from recorded survey samples or via a beacon-conditioned Metropolis
//! sampler over the walkable floor area.

use crate::beacons::BleBeaconTable;
use crate::geometry::{sample_normal, Location, Pose, State};
use crate::map::BuildingMap;
use crate::model::GpLdplMultiModel;
use crate::sensors::{BeaconScan, LocalHeading};
use rand::Rng;
use std::f64::consts::PI;

/// One surveyed training sample location, as loaded from the model bundle's
/// CSV; only the location is needed here.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleLocation {
    pub location: Location,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetropolisParameters {
    pub burn_in: usize,
    pub radius_2d: f64,
    /// Thin the chain, keeping every `interval`-th accepted state.
    pub interval: usize,
}

impl Default for MetropolisParameters {
    fn default() -> Self {
        Self { burn_in: 200, radius_2d: 10.0, interval: 5 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusInitializerParameters {
    pub metropolis: MetropolisParameters,
    /// Post-Metropolis jitter standard deviations.
    pub std_x: f64,
    pub std_y: f64,
    /// Weight given to a heading hint over a uniform orientation draw;
    /// `0.0` ignores the hint entirely.
    pub heading_confidence_for_orientation_init: f64,
    pub orientation_hint_sigma: f64,
}

impl Default for StatusInitializerParameters {
    fn default() -> Self {
        Self {
            metropolis: MetropolisParameters::default(),
            std_x: 0.5,
            std_y: 0.5,
            heading_confidence_for_orientation_init: 0.0,
            orientation_hint_sigma: 0.3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusInitializer {
    params: StatusInitializerParameters,
}

impl StatusInitializer {
    pub fn new(params: StatusInitializerParameters) -> Self {
        Self { params }
    }

    /// Uniformly resamples `n` states from the empirical survey, with a
    /// fresh uniform heading (or heading-hint draw) per state.
    pub fn states_by_sample_locations<R: Rng + ?Sized>(
        &self,
        samples: &[SampleLocation],
        n: usize,
        heading: Option<LocalHeading>,
        rng: &mut R,
    ) -> Vec<State> {
        if samples.is_empty() {
            return Vec::new();
        }
        (0..n)
            .map(|_| {
                let s = samples[rng.gen_range(0..samples.len())];
                let orientation = self.draw_orientation(heading, rng);
                State::new(Pose::new(s.location, orientation, 0.0, 0.0), 0.0, 0.0)
            })
            .collect()
    }

    /// Metropolis-samples `n` cell centers on `floor` weighted by the
    /// current scan's likelihood, then jitters and assigns orientation.
    #[allow(clippy::too_many_arguments)]
    pub fn states_by_beacons<R: Rng + ?Sized>(
        &self,
        map: &BuildingMap,
        floor: i32,
        model: &GpLdplMultiModel,
        table: &BleBeaconTable,
        scan: &BeaconScan,
        n: usize,
        heading: Option<LocalHeading>,
        rng: &mut R,
    ) -> Vec<State> {
        let floor_map = match map.floor(floor) {
            Some(f) => f,
            None => return Vec::new(),
        };
        let support = floor_map.walkable_world_points();
        if support.is_empty() {
            return Vec::new();
        }

        let likelihood_at = |x: f64, y: f64| -> f64 {
            let state = State::new(Pose::new(Location::new(x, y, 0.0, floor as f64), 0.0, 0.0, 0.0), 0.0, 0.0);
            model.log_likelihood(&state, scan, table)
        };

        let mut current = support[rng.gen_range(0..support.len())];
        let mut current_ll = likelihood_at(current.0, current.1);

        let mut out = Vec::with_capacity(n);
        let mut steps = 0usize;
        let mut accepted = 0usize;

        while out.len() < n {
            let angle = rng.gen_range(0.0..2.0 * PI);
            let radius = rng.gen_range(0.0..self.params.metropolis.radius_2d);
            let candidate = (current.0 + radius * angle.cos(), current.1 + radius * angle.sin());
            let candidate_ll = likelihood_at(candidate.0, candidate.1);

            let accept = candidate_ll >= current_ll || rng.gen::<f64>() < (candidate_ll - current_ll).exp();
            if accept {
                current = candidate;
                current_ll = candidate_ll;
            }
            steps += 1;

            if steps > self.params.metropolis.burn_in
                && (steps - self.params.metropolis.burn_in) % self.params.metropolis.interval.max(1) == 0
            {
                accepted += 1;
                let x = sample_normal(rng, current.0, self.params.std_x);
                let y = sample_normal(rng, current.1, self.params.std_y);
                let orientation = self.draw_orientation(heading, rng);
                out.push(State::new(Pose::new(Location::new(x, y, 0.0, floor as f64), orientation, 0.0, 0.0), 0.0, 0.0));
            }

            // Safety valve: an adversarial map (e.g. one walkable cell) could
            // make the thinning interval never advance fast enough; resample
            // directly from the support once the chain has run far longer
            // than burn-in would ever require.
            if steps > self.params.metropolis.burn_in + n * self.params.metropolis.interval.max(1) * 4 + 1000 {
                while out.len() < n {
                    let (x, y) = support[rng.gen_range(0..support.len())];
                    let orientation = self.draw_orientation(heading, rng);
                    out.push(State::new(Pose::new(Location::new(x, y, 0.0, floor as f64), orientation, 0.0, 0.0), 0.0, 0.0));
                }
            }
        }
        let _ = accepted;
        out
    }

    fn draw_orientation<R: Rng + ?Sized>(&self, heading: Option<LocalHeading>, rng: &mut R) -> f64 {
        match heading {
            Some(h) if rng.gen::<f64>() < self.params.heading_confidence_for_orientation_init * h.confidence => {
                sample_normal(rng, h.orientation, self.params.orientation_hint_sigma)
            }
            _ => rng.gen_range(0.0..2.0 * PI),
        }
    }
}
