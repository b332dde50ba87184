//! The particle filter core: owns the particle cloud and the system
//! model, and drives the predict/update/resample cycle.
//!
//! Per-particle predict and update work is the one place this crate offers
//! optional `rayon` parallelism: each particle draws from an
//! [`RngStream`] sub-stream keyed by its index and the current tick, so the
//! parallel path is bit-identical to the serial one for a fixed seed.

use crate::beacons::BleBeaconTable;
use crate::error::Diagnostic;
use crate::geometry::{sample_normal, weighted_mean_state, weighted_stdev_location, Location, Pose, State};
use crate::map::BuildingMap;
use crate::model::GpLdplMultiModel;
use crate::particle::{effective_sample_size, mean_state, renormalize, Particle};
use crate::resampler::GridResampler;
use crate::rng::RngStream;
use crate::sensors::BeaconScan;
use crate::status::{LifecycleState, Status};
use crate::status_initializer::StatusInitializer;
use crate::system_model::{MotionContext, SystemModel};
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleFilterParameters {
    pub n: usize,
    /// Fraction of the cloud replaced (lowest-weight first) by fresh
    /// beacon-conditioned draws on every observation update. `0.0` disables
    /// the recovery mechanism.
    pub mixture_probability: f64,
    /// A mixture replacement farther than this from the current weighted
    /// mean is rejected and the original particle kept instead.
    pub reject_distance: f64,
    /// A mixture replacement whose floor difference from the weighted mean
    /// exceeds this is rejected.
    pub reject_floor_difference: f64,
    /// ESS hard floor: `consecutive_collapse_tolerance` updates below this
    /// reverts the filter to `UNKNOWN`.
    pub ess_hard_floor: f64,
    pub consecutive_collapse_tolerance: u32,
}

impl Default for ParticleFilterParameters {
    fn default() -> Self {
        Self {
            n: 1000,
            mixture_probability: 0.0,
            reject_distance: 5.0,
            reject_floor_difference: 0.99,
            ess_hard_floor: 10.0,
            consecutive_collapse_tolerance: 5,
        }
    }
}

pub struct ParticleFilter {
    params: ParticleFilterParameters,
    particles: Vec<Particle>,
    system_model: SystemModel,
    observation_model: GpLdplMultiModel,
    resampler: GridResampler,
    status_initializer: StatusInitializer,
    building_map: Arc<BuildingMap>,
    beacon_table: Arc<BleBeaconTable>,
    rng: RngStream,
    state: LifecycleState,
    consecutive_collapsed_updates: u32,
    last_timestamp: Option<i64>,
}

impl ParticleFilter {
    pub fn new(
        params: ParticleFilterParameters,
        system_model: SystemModel,
        observation_model: GpLdplMultiModel,
        resampler: GridResampler,
        status_initializer: StatusInitializer,
        building_map: Arc<BuildingMap>,
        beacon_table: Arc<BleBeaconTable>,
        seed: u64,
    ) -> Self {
        Self {
            particles: Vec::new(),
            system_model,
            observation_model,
            resampler,
            status_initializer,
            building_map,
            beacon_table,
            rng: RngStream::new(seed),
            state: LifecycleState::Unknown,
            consecutive_collapsed_updates: 0,
            last_timestamp: None,
            params,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn particle_count(&self) -> usize {
        self.particles.len()
    }

    /// Draws each particle as `pose + N(0, diag(stdev))`, replacing the
    /// cloud and entering `LOCATING`.
    pub fn reset_status_around_pose(&mut self, pose: &Pose, stdev: &Location) {
        let root = self.rng.global_rng();
        let mut rng = root;
        self.particles = (0..self.params.n)
            .map(|_| {
                let loc = Location::new(
                    sample_normal(&mut rng, pose.location.x, stdev.x),
                    sample_normal(&mut rng, pose.location.y, stdev.y),
                    sample_normal(&mut rng, pose.location.z, stdev.z),
                    sample_normal(&mut rng, pose.location.floor, stdev.floor),
                );
                let state = State::new(Pose::new(loc, pose.orientation, pose.velocity, 0.0), 0.0, 0.0);
                Particle::new(state, 1.0 / self.params.n as f64)
            })
            .collect();
        self.state = LifecycleState::Locating;
        self.consecutive_collapsed_updates = 0;
        self.rng.advance_tick();
    }

    /// Delegates to the beacon-conditioned Metropolis initializer, over
    /// every floor in the building map.
    pub fn reset_status_from_scan(&mut self, scan: &BeaconScan) {
        let mut rng = self.rng.global_rng();
        let floors = self.building_map.floor_indices();
        let per_floor = (self.params.n / floors.len().max(1)).max(1);

        let mut states = Vec::with_capacity(self.params.n);
        for floor in &floors {
            states.extend(self.status_initializer.states_by_beacons(
                &self.building_map,
                *floor,
                &self.observation_model,
                &self.beacon_table,
                scan,
                per_floor,
                None,
                &mut rng,
            ));
        }
        states.truncate(self.params.n);
        if !states.is_empty() {
            let produced = states.len();
            let mut i = 0usize;
            while states.len() < self.params.n {
                states.push(states[i % produced]);
                i += 1;
            }
        }

        let weight = if states.is_empty() { 0.0 } else { 1.0 / states.len() as f64 };
        self.particles = states.into_iter().map(|s| Particle::new(s, weight)).collect();
        self.state = LifecycleState::Locating;
        self.consecutive_collapsed_updates = 0;
        self.rng.advance_tick();
    }

    /// Advances every particle through the system model by `ctx.dt`. Runs
    /// in parallel across particles when the `rayon` feature is enabled;
    /// each particle draws from its own `RngStream` sub-stream so the
    /// result matches the serial path exactly.
    pub fn predict(&mut self, ctx: &MotionContext) {
        if self.particles.is_empty() {
            return;
        }
        let map = &self.building_map;
        let system_model = &self.system_model;
        let rng_stream = &self.rng;

        #[cfg(feature = "rayon")]
        let advanced: Vec<Particle> = self
            .particles
            .par_iter()
            .enumerate()
            .map(|(i, p)| {
                let mut rng = rng_stream.particle_rng(i);
                let outcome = system_model.advance(&p.state, ctx, map, &mut rng);
                Particle::new(outcome.state, p.weight * outcome.weight_multiplier)
            })
            .collect();

        #[cfg(not(feature = "rayon"))]
        let advanced: Vec<Particle> = self
            .particles
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut rng = rng_stream.particle_rng(i);
                let outcome = system_model.advance(&p.state, ctx, map, &mut rng);
                Particle::new(outcome.state, p.weight * outcome.weight_multiplier)
            })
            .collect();

        self.particles = advanced;
        renormalize(&mut self.particles);
        self.rng.advance_tick();
    }

    /// Weights, numerically stabilizes, renormalizes, checks ESS,
    /// conditionally resamples, and applies the mixture-replacement
    /// recovery mechanism. Returns a [`Diagnostic`] if the filter collapsed
    /// into `UNKNOWN` as a result.
    pub fn update(&mut self, scan: &BeaconScan) -> Option<Diagnostic> {
        if self.particles.is_empty() {
            return None;
        }

        let model = &self.observation_model;
        let table = &self.beacon_table;

        #[cfg(feature = "rayon")]
        let log_likelihoods: Vec<f64> =
            self.particles.par_iter().map(|p| model.log_likelihood(&p.state, scan, table)).collect();

        #[cfg(not(feature = "rayon"))]
        let log_likelihoods: Vec<f64> =
            self.particles.iter().map(|p| model.log_likelihood(&p.state, scan, table)).collect();

        let max_ll = log_likelihoods.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        for (p, ll) in self.particles.iter_mut().zip(&log_likelihoods) {
            p.weight *= (ll - max_ll).exp();
        }
        renormalize(&mut self.particles);

        self.apply_mixture_replacement(scan);

        let ess = effective_sample_size(&self.particles);
        if self.resampler.should_resample(ess) {
            self.particles = self.resampler.resample(&self.particles, &mut self.rng.global_rng());
        }
        self.rng.advance_tick();

        if self.state == LifecycleState::Tracking || self.state == LifecycleState::Locating {
            if ess < self.params.ess_hard_floor {
                self.consecutive_collapsed_updates += 1;
            } else {
                self.consecutive_collapsed_updates = 0;
            }
            if self.consecutive_collapsed_updates >= self.params.consecutive_collapse_tolerance {
                log::warn!(
                    "effective sample size below hard floor for {} consecutive updates; reverting to UNKNOWN",
                    self.consecutive_collapsed_updates
                );
                self.state = LifecycleState::Unknown;
                self.particles.clear();
                return Some(Diagnostic::FilterCollapsed { consecutive: self.consecutive_collapsed_updates });
            }
        }
        None
    }

    /// Replaces the lowest-weight `mixture_probability` fraction of the
    /// cloud with fresh beacon-conditioned draws, rejecting any replacement
    /// too far (or too many floors) from the current weighted mean.
    fn apply_mixture_replacement(&mut self, scan: &BeaconScan) {
        if self.params.mixture_probability <= 0.0 || self.particles.is_empty() {
            return;
        }
        let replace_count = ((self.particles.len() as f64) * self.params.mixture_probability).round() as usize;
        if replace_count == 0 {
            return;
        }

        let mean = mean_state(&self.particles).location();
        let mut rng = self.rng.global_rng();
        let floors = self.building_map.floor_indices();
        if floors.is_empty() {
            return;
        }
        let per_floor = (replace_count / floors.len()).max(1);

        let mut candidates = Vec::new();
        for floor in &floors {
            candidates.extend(self.status_initializer.states_by_beacons(
                &self.building_map,
                *floor,
                &self.observation_model,
                &self.beacon_table,
                scan,
                per_floor,
                None,
                &mut rng,
            ));
        }

        let accepted: Vec<State> = candidates
            .into_iter()
            .filter(|s| {
                s.location().distance_2d(&mean) <= self.params.reject_distance
                    && s.location().floor_diff(&mean) <= self.params.reject_floor_difference
            })
            .take(replace_count)
            .collect();

        if accepted.is_empty() {
            return;
        }

        let mut order: Vec<usize> = (0..self.particles.len()).collect();
        order.sort_by(|&a, &b| self.particles[a].weight.partial_cmp(&self.particles[b].weight).unwrap());

        for (slot, new_state) in order.into_iter().zip(accepted) {
            let uniform_weight = self.particles[slot].weight;
            self.particles[slot] = Particle::new(new_state, uniform_weight);
        }
    }

    /// A population summary snapshot.
    pub fn status(&self, timestamp: i64) -> Status {
        if self.particles.is_empty() {
            return Status {
                state: self.state,
                particle_states: Vec::new(),
                mean_location: Location::default(),
                stdev_location: Location::default(),
                timestamp,
            };
        }
        let mean = mean_state(&self.particles);
        let stdev = weighted_stdev_location(
            &self.particles.iter().map(|p| p.state).collect::<Vec<_>>(),
            &self.particles.iter().map(|p| p.weight).collect::<Vec<_>>(),
            &mean.location(),
        );
        Status {
            state: self.state,
            particle_states: self.particles.iter().map(|p| p.state).collect(),
            mean_location: mean.location(),
            stdev_location: stdev,
            timestamp,
        }
    }

    /// Histogram of particle counts per floor, used by the floor-transition
    /// monitor.
    pub fn floor_histogram(&self) -> (HashMap<i32, usize>, usize) {
        let mut counts = HashMap::new();
        for p in &self.particles {
            *counts.entry(p.state.location().floor_index()).or_insert(0) += 1;
        }
        (counts, self.particles.len())
    }

    pub fn enter_tracking(&mut self) {
        if self.particles.is_empty() {
            return;
        }
        let mean = weighted_mean_state(
            &self.particles.iter().map(|p| p.state).collect::<Vec<_>>(),
            &self.particles.iter().map(|p| p.weight).collect::<Vec<_>>(),
        );
        self.reset_status_around_pose(&mean.pose, &Location::new(0.5, 0.5, 0.1, 0.01));
        self.state = LifecycleState::Tracking;
    }

    pub fn check_timestamp_order(&mut self, timestamp: i64) -> Option<Diagnostic> {
        if let Some(last) = self.last_timestamp {
            if timestamp < last {
                return Some(Diagnostic::InvalidInput { incoming: timestamp, last });
            }
        }
        self.last_timestamp = Some(timestamp);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacons::BleBeacon;
    use crate::map::{CellKind, CoordinateTransform, FloorMap};
    use crate::model::{BeaconObservationParameters, ObservationModelParameters};
    use crate::resampler::ResamplerParameters;
    use crate::sensors::Beacon;
    use crate::status_initializer::StatusInitializerParameters;
    use crate::system_model::SystemModelParameters;

    fn open_map() -> Arc<BuildingMap> {
        Arc::new(BuildingMap::new(vec![FloorMap::new(
            1,
            200,
            200,
            vec![CellKind::Walkable; 200 * 200],
            vec![1.0; 200 * 200],
            CoordinateTransform { ppmx: 1.0, ppmy: 1.0, origin_x: -100.0, origin_y: -100.0 },
        )]))
    }

    fn make_filter(n: usize) -> ParticleFilter {
        let table = Arc::new(BleBeaconTable::new(vec![BleBeacon::new(10, 1, Location::new(5.0, 5.0, 0.0, 1.0))]));
        let fallback = BeaconObservationParameters::new(Default::default(), 4.0, None);
        let model = GpLdplMultiModel::new(ObservationModelParameters::new(HashMap::new(), fallback));
        ParticleFilter::new(
            ParticleFilterParameters { n, ..Default::default() },
            SystemModel::new(SystemModelParameters::default()),
            model,
            GridResampler::new(ResamplerParameters::always_resample(n)),
            StatusInitializer::new(StatusInitializerParameters::default()),
            open_map(),
            table,
            42,
        )
    }

    #[test]
    fn weights_sum_to_one_after_update() {
        let mut filter = make_filter(200);
        filter.reset_status_around_pose(&Pose::new(Location::new(0.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), &Location::new(2.0, 2.0, 0.0, 0.0));
        let scan = BeaconScan::new(vec![Beacon::new(10, 1, -60.0)], 0);
        filter.update(&scan);
        let sum: f64 = filter.particles.iter().map(|p| p.weight).sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(filter.particles.iter().all(|p| p.weight >= 0.0));
    }

    #[test]
    fn ess_is_n_immediately_after_resample() {
        let mut filter = make_filter(200);
        filter.reset_status_around_pose(&Pose::new(Location::new(0.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), &Location::new(2.0, 2.0, 0.0, 0.0));
        let scan = BeaconScan::new(vec![Beacon::new(10, 1, -60.0)], 0);
        filter.update(&scan);
        let ess = effective_sample_size(&filter.particles);
        assert!((ess - 200.0).abs() < 1e-6);
    }

    #[test]
    fn reset_around_pose_enters_locating() {
        let mut filter = make_filter(50);
        filter.reset_status_around_pose(&Pose::new(Location::new(0.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), &Location::new(1.0, 1.0, 0.0, 0.0));
        assert_eq!(filter.state(), LifecycleState::Locating);
        assert_eq!(filter.particle_count(), 50);
    }

    #[test]
    fn status_snapshot_has_matching_population_size() {
        let mut filter = make_filter(30);
        filter.reset_status_around_pose(&Pose::new(Location::new(1.0, 1.0, 0.0, 1.0), 0.0, 0.0, 0.0), &Location::new(0.5, 0.5, 0.0, 0.0));
        let status = filter.status(0);
        assert_eq!(status.particle_states.len(), 30);
    }

    #[test]
    fn timestamp_regression_is_flagged() {
        let mut filter = make_filter(10);
        assert!(filter.check_timestamp_order(100).is_none());
        assert!(matches!(filter.check_timestamp_order(50), Some(Diagnostic::InvalidInput { .. })));
    }
}
