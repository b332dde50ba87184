//! The streaming front-end: input dispatch, smoothing buffers, and
//! the `UNKNOWN -> LOCATING -> TRACKING` lifecycle state machine.
//!
//! Decoding a model bundle from JSON/base64 is out of scope; a
//! caller builds the already-decoded [`BuildingMap`], [`BleBeaconTable`],
//! and [`GpLdplMultiModel`] (e.g. via [`ModelBundleSource`]) and hands them
//! to [`Engine::set_model`].

use crate::beacons::{BeaconFilter, BeaconFilterParameters, BleBeaconTable, SmoothingMode};
use crate::error::{Diagnostic, ModelError};
use crate::filter::{ParticleFilter, ParticleFilterParameters};
use crate::floor_monitor::{FloorMonitor, FloorMonitorParameters};
use crate::geometry::{weighted_mean_state, Location, Pose, State};
use crate::map::BuildingMap;
use crate::model::GpLdplMultiModel;
use crate::resampler::{GridResampler, ResamplerParameters};
use crate::sensors::{Acceleration, Altimeter, Attitude, BeaconScan, LocalHeading, OrientationMeter, OrientationMeterParameters, Pedometer, PedometerParameters};
use crate::status::{LifecycleState, Status, StatusSink};
use crate::status_initializer::{StatusInitializer, StatusInitializerParameters};
use crate::system_model::{MotionContext, SystemModel, SystemModelParameters};
use std::collections::VecDeque;
use std::sync::Arc;

/// `ONESHOT` fully re-initializes the filter on every scan, with no
/// temporal continuity; `CONTINUOUS` runs the ordinary lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalizeMode {
    Continuous,
    OneShot,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineParameters {
    pub particle_filter: ParticleFilterParameters,
    pub resampler: ResamplerParameters,
    pub system_model: SystemModelParameters,
    pub status_initializer: StatusInitializerParameters,
    pub orientation_meter: OrientationMeterParameters,
    pub pedometer: PedometerParameters,
    pub beacon_filter: BeaconFilterParameters,
    pub floor_monitor: FloorMonitorParameters,
    pub localize_mode: LocalizeMode,
    /// Which of the two mutually-exclusive beacon smoothing modes to run.
    pub smoothing: SmoothingMode,
    /// Number of consecutive scans `LOCATING` accumulates before
    /// recentering the cloud and entering `TRACKING`.
    pub n_smooth: usize,
    /// If false, skip the observation update when the pedometer reports
    /// `!is_walking` for two or more consecutive scans.
    pub does_update_when_stopping: bool,
    pub rng_seed: u64,
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self {
            particle_filter: ParticleFilterParameters::default(),
            resampler: ResamplerParameters::always_resample(1000),
            system_model: SystemModelParameters::default(),
            status_initializer: StatusInitializerParameters::default(),
            orientation_meter: OrientationMeterParameters::default(),
            pedometer: PedometerParameters::default(),
            beacon_filter: BeaconFilterParameters::default(),
            floor_monitor: FloorMonitorParameters::default(),
            localize_mode: LocalizeMode::Continuous,
            smoothing: SmoothingMode::location_smoothing(),
            n_smooth: 3,
            does_update_when_stopping: false,
            rng_seed: 42,
        }
    }
}

/// The fully decoded model bundle an external loader hands to
/// [`Engine::set_model`], minus the JSON/base64/PNG decoding itself.
pub struct ModelBundle {
    pub building_map: BuildingMap,
    pub beacon_table: BleBeaconTable,
    pub observation_model: GpLdplMultiModel,
}

/// The external collaborator that decodes an on-disk/network bundle into a
/// [`ModelBundle`]; this crate only defines the seam.
pub trait ModelBundleSource {
    fn load(&self) -> Result<ModelBundle, ModelError>;
}

/// The streaming front-end. Generic over the status sink so
/// callers can plug in anything from a test double to a channel sender.
pub struct Engine<S: StatusSink> {
    params: EngineParameters,
    orientation_meter: OrientationMeter,
    pedometer: Pedometer,
    beacon_filter: BeaconFilter,
    smoothing: SmoothingMode,
    floor_monitor: Option<FloorMonitor>,
    filter: Option<ParticleFilter>,
    locating_progress: usize,
    locating_location_ring: VecDeque<State>,
    consecutive_not_walking: u32,
    last_heading: Option<LocalHeading>,
    last_altimeter_relative_altitude: Option<f64>,
    altitude_baseline: Option<f64>,
    is_ready: bool,
    sink: S,
}

impl<S: StatusSink> Engine<S> {
    pub fn new(params: EngineParameters, sink: S) -> Self {
        let smoothing = params.smoothing.clone();
        Self {
            orientation_meter: OrientationMeter::new(params.orientation_meter),
            pedometer: Pedometer::new(params.pedometer),
            beacon_filter: BeaconFilter::new(params.beacon_filter),
            smoothing,
            floor_monitor: None,
            filter: None,
            locating_progress: 0,
            locating_location_ring: VecDeque::new(),
            consecutive_not_walking: 0,
            last_heading: None,
            last_altimeter_relative_altitude: None,
            altitude_baseline: None,
            is_ready: false,
            sink,
            params,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.filter.as_ref().map(|f| f.state()).unwrap_or(LifecycleState::Unknown)
    }

    /// Installs a decoded model bundle, constructs the particle filter, and
    /// makes the engine ready to accept input. The bundle loader itself
    /// (JSON/base64/PNG decode) is out of scope; callers obtain a
    /// [`ModelBundle`] from a [`ModelBundleSource`] or build one directly.
    pub fn set_model(&mut self, bundle: ModelBundle) -> Result<(), ModelError> {
        let building_map = Arc::new(bundle.building_map);
        let beacon_table = Arc::new(bundle.beacon_table);
        let initial_floor = building_map.floor_indices().first().copied().unwrap_or(0);

        self.filter = Some(ParticleFilter::new(
            self.params.particle_filter,
            SystemModel::new(self.params.system_model),
            bundle.observation_model,
            GridResampler::new(self.params.resampler),
            StatusInitializer::new(self.params.status_initializer),
            building_map,
            beacon_table,
            self.params.rng_seed,
        ));
        self.floor_monitor = Some(FloorMonitor::new(self.params.floor_monitor, initial_floor));
        self.altitude_baseline = None;
        self.is_ready = true;
        Ok(())
    }

    /// Forwards to the orientation meter. O(1), no particle work.
    pub fn put_attitude(&mut self, att: Attitude) -> Option<Diagnostic> {
        if !self.is_ready {
            log::debug!("put_attitude called before set_model completed");
            return Some(Diagnostic::NotReady);
        }
        if let Some(d) = self.filter.as_mut().unwrap().check_timestamp_order(att.timestamp) {
            log::warn!("{d}");
            return Some(d);
        }
        if !att.is_finite() {
            log::warn!("dropping attitude sample with non-finite field");
            return Some(Diagnostic::NonFiniteSample { field: "attitude" });
        }
        self.orientation_meter.put_attitude(&att);
        None
    }

    /// Forwards to the pedometer; if a step is emitted, advances every
    /// particle through the system model.
    pub fn put_acceleration(&mut self, acc: Acceleration) -> Option<Diagnostic> {
        if !self.is_ready {
            log::debug!("put_acceleration called before set_model completed");
            return Some(Diagnostic::NotReady);
        }
        if let Some(d) = self.filter.as_mut().unwrap().check_timestamp_order(acc.timestamp) {
            log::warn!("{d}");
            return Some(d);
        }
        if !acc.is_finite() {
            log::warn!("dropping acceleration sample with non-finite field");
            return Some(Diagnostic::NonFiniteSample { field: "acceleration" });
        }

        let step = self.pedometer.put_acceleration(&acc);
        if self.pedometer.is_walking() {
            self.consecutive_not_walking = 0;
        } else {
            self.consecutive_not_walking = self.consecutive_not_walking.saturating_add(1);
        }

        if let Some(step) = step {
            if let Some(filter) = self.filter.as_mut() {
                let ctx = MotionContext {
                    dt: step.dt,
                    orientation: self.orientation_meter.is_initialized().then(|| self.orientation_meter.yaw()),
                    velocity: step.velocity,
                    is_walking: self.pedometer.is_walking(),
                };
                filter.predict(&ctx);
            }
        }
        None
    }

    pub fn put_local_heading(&mut self, heading: LocalHeading) {
        self.last_heading = Some(heading);
    }

    pub fn put_altimeter(&mut self, altimeter: Altimeter) {
        self.last_altimeter_relative_altitude = Some(altimeter.relative_altitude);
        if self.altitude_baseline.is_none() {
            self.altitude_baseline = Some(altimeter.relative_altitude);
        }
    }

    /// The full dispatch through beacon filtering, smoothing, the
    /// lifecycle state machine, and the
    /// floor-transition monitor. Returns a [`Diagnostic`] when the update
    /// was skipped or resulted in a notable event, and always invokes the
    /// status sink when the filter actually advances.
    pub fn put_beacons(&mut self, scan: BeaconScan) -> Option<Diagnostic> {
        if !self.is_ready {
            return Some(Diagnostic::NotReady);
        }
        if let Some(d) = self.filter.as_mut().unwrap().check_timestamp_order(scan.timestamp) {
            log::warn!("{d}");
            return Some(d);
        }
        if !scan.is_finite() {
            return Some(Diagnostic::NonFiniteSample { field: "beacon scan" });
        }

        let filtered = self.beacon_filter.filter(&scan);
        let synthesized = self.smoothing.submit(filtered);
        if synthesized.beacons.is_empty() {
            log::warn!("beacon scan at {} had no strong beacon after filtering; update skipped", scan.timestamp);
            return Some(Diagnostic::EmptyScan);
        }

        if !self.params.does_update_when_stopping && self.consecutive_not_walking >= 2 {
            return None;
        }

        let filter = match self.filter.as_mut() {
            Some(f) => f,
            None => return Some(Diagnostic::NotReady),
        };

        let mut diagnostic = match filter.state() {
            LifecycleState::Unknown => {
                filter.reset_status_from_scan(&synthesized);
                self.locating_progress = 1;
                self.locating_location_ring.clear();
                None
            }
            LifecycleState::Locating => {
                filter.reset_status_from_scan(&synthesized);
                self.locating_progress += 1;
                if matches!(self.smoothing, SmoothingMode::LocationSmoothing) {
                    let snapshot = filter.status(synthesized.timestamp);
                    if !snapshot.particle_states.is_empty() {
                        let weights = vec![1.0; snapshot.particle_states.len()];
                        let mean = weighted_mean_state(&snapshot.particle_states, &weights);
                        self.locating_location_ring.push_back(mean);
                        while self.locating_location_ring.len() > self.params.n_smooth {
                            self.locating_location_ring.pop_front();
                        }
                    }
                }
                if self.params.localize_mode == LocalizeMode::Continuous && self.locating_progress >= self.params.n_smooth {
                    filter.enter_tracking();
                    self.locating_progress = 0;
                }
                None
            }
            LifecycleState::Tracking => {
                if self.params.localize_mode == LocalizeMode::OneShot {
                    filter.reset_status_from_scan(&synthesized);
                    None
                } else {
                    filter.update(&synthesized)
                }
            }
        };

        if let Some(monitor) = self.floor_monitor.as_mut() {
            let (counts, total) = filter.floor_histogram();
            let altimeter_floor_delta = match (self.last_altimeter_relative_altitude, self.altitude_baseline) {
                (Some(altitude), Some(baseline)) => {
                    Some(((altitude - baseline) / self.params.floor_monitor.meters_per_floor).round() as i32)
                }
                _ => None,
            };
            let flipped = monitor.observe(&counts, total, altimeter_floor_delta);
            if flipped {
                self.altitude_baseline = self.last_altimeter_relative_altitude;
            } else if monitor.corroboration_blocked() && diagnostic.is_none() {
                diagnostic = Some(Diagnostic::MissingAltimeterCorroboration);
            }
        }

        if let Some(d) = &diagnostic {
            log::warn!("{d}");
        }
        let status = self.status(synthesized.timestamp).expect("filter installed above");
        self.sink.on_status(&status);
        diagnostic
    }

    /// Recenters the cloud around an externally supplied pose.
    pub fn reset_status_around_pose(&mut self, pose: Pose, stdev: Location) -> Option<Diagnostic> {
        match self.filter.as_mut() {
            Some(f) => {
                f.reset_status_around_pose(&pose, &stdev);
                self.locating_progress = 0;
                None
            }
            None => Some(Diagnostic::NotReady),
        }
    }

    /// Reinitializes the cloud from a beacon scan.
    pub fn reset_status_from_scan(&mut self, scan: &BeaconScan) -> Option<Diagnostic> {
        match self.filter.as_mut() {
            Some(f) => {
                f.reset_status_from_scan(scan);
                self.locating_progress = 0;
                None
            }
            None => Some(Diagnostic::NotReady),
        }
    }

    /// The current population summary snapshot, if a model is installed.
    /// Under location smoothing, the reported mean location is averaged
    /// over the ring of recent per-tick mean states accumulated while
    /// `LOCATING` rather than read straight off the current cloud.
    pub fn status(&self, timestamp: i64) -> Option<Status> {
        self.filter.as_ref().map(|f| {
            let mut status = f.status(timestamp);
            if status.state == LifecycleState::Locating
                && matches!(self.smoothing, SmoothingMode::LocationSmoothing)
                && !self.locating_location_ring.is_empty()
            {
                let ring: Vec<State> = self.locating_location_ring.iter().copied().collect();
                let weights = vec![1.0; ring.len()];
                status.mean_location = weighted_mean_state(&ring, &weights).location();
            }
            status
        })
    }

    /// The filter's estimate of the per-device RSSI bias, averaged over the
    /// cloud; a diagnostic accessor for calibration tooling.
    pub fn estimated_rssi_bias(&self) -> Option<f64> {
        self.filter.as_ref().and_then(|f| {
            let status = f.status(0);
            if status.particle_states.is_empty() {
                return None;
            }
            let weights = vec![1.0; status.particle_states.len()];
            Some(weighted_mean_state(&status.particle_states, &weights).rssi_bias)
        })
    }
}
