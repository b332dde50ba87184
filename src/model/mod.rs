//! GP-LDPL-MultiModel observation model.
//!
//! Scores a particle `State` against a BLE scan: per beacon, a log-distance
//! path-loss base mean ([`ldpl`]) corrected by a cached Gaussian-Process
//! residual ([`gp`]), evaluated under either a Gaussian or Student-t noise
//! model.

pub mod gp;
pub mod ldpl;

use crate::beacons::BleBeaconTable;
use crate::geometry::State;
use crate::sensors::BeaconScan;
use gp::GpResidual;
use ldpl::LdplParameters;
use statrs::distribution::{Continuous, Normal, StudentsT};
use std::collections::HashMap;

/// Which tail behavior the per-beacon residual is scored under.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NormFunction {
    Gaussian,
    /// Degrees of freedom for the Student-t location-scale distribution;
    /// heavier tails than Gaussian, more forgiving of the occasional wild
    /// RSSI outlier.
    StudentT { dof: f64 },
}

impl NormFunction {
    /// `log p(residual | 0, sigma)` under the configured distribution.
    pub fn log_pdf(&self, residual: f64, sigma: f64) -> f64 {
        let sigma = sigma.max(1e-6);
        match self {
            NormFunction::Gaussian => {
                Normal::new(0.0, sigma).expect("sigma positive").ln_pdf(residual)
            }
            NormFunction::StudentT { dof } => StudentsT::new(0.0, sigma, *dof)
                .expect("scale positive, dof positive")
                .ln_pdf(residual),
        }
    }
}

/// What to do about a beacon present in the scan but absent from the
/// known-beacon table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnknownBeaconPolicy {
    /// Contributes 0 to the log-likelihood sum (a true no-op for that beacon).
    Ignore,
    /// Scored against a fixed low assumed mean with a wide global stdev,
    /// so an unknown beacon still mildly informs the posterior instead of
    /// being silently discarded.
    UseGlobalStdev { assumed_mean: f64, stdev: f64 },
}

/// Per-beacon fitted parameters: LDPL coefficients, the residual stdev, and
/// an optional GP correction (absent for beacons the trainer had too few
/// samples near to fit a useful residual surface for).
#[derive(Debug, Clone)]
pub struct BeaconObservationParameters {
    pub ldpl: LdplParameters,
    pub sigma: f64,
    pub gp: Option<GpResidual>,
}

impl BeaconObservationParameters {
    pub fn new(ldpl: LdplParameters, sigma: f64, gp: Option<GpResidual>) -> Self {
        Self { ldpl, sigma, gp }
    }
}

/// All trained parameters for the observation model, as loaded from (or
/// written back to) the model bundle's `ObservationModelParameters` blob.
#[derive(Debug, Clone)]
pub struct ObservationModelParameters {
    per_beacon: HashMap<u32, BeaconObservationParameters>,
    /// Used for a known beacon that has no dedicated per-beacon fit.
    pub global_fallback: BeaconObservationParameters,
    pub coeff_diff_floor_stdev: f64,
    pub norm_function: NormFunction,
    pub unknown_beacon_policy: UnknownBeaconPolicy,
}

impl ObservationModelParameters {
    pub fn new(
        per_beacon: HashMap<u32, BeaconObservationParameters>,
        global_fallback: BeaconObservationParameters,
    ) -> Self {
        Self {
            per_beacon,
            global_fallback,
            coeff_diff_floor_stdev: 5.0,
            norm_function: NormFunction::Gaussian,
            unknown_beacon_policy: UnknownBeaconPolicy::Ignore,
        }
    }

    pub fn beacon_params(&self, id: u32) -> &BeaconObservationParameters {
        self.per_beacon.get(&id).unwrap_or(&self.global_fallback)
    }
}

/// GP-LDPL-MultiModel: scores a particle state against a BLE scan.
#[derive(Debug, Clone)]
pub struct GpLdplMultiModel {
    params: ObservationModelParameters,
}

impl GpLdplMultiModel {
    pub fn new(params: ObservationModelParameters) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ObservationModelParameters {
        &self.params
    }

    /// `sum_j normFunc(rssi_j - mu_j(s), sigma_j)` over the scan. Invariant
    /// to beacon order within `scan` since it's a plain sum. Returns 0.0 (a
    /// true no-op) if the scan has no known beacons and the unknown policy
    /// is `Ignore`.
    pub fn log_likelihood(&self, state: &State, scan: &BeaconScan, table: &BleBeaconTable) -> f64 {
        let location = state.location();
        let mut total = 0.0;

        for beacon in &scan.beacons {
            if beacon.is_sentinel() {
                continue;
            }
            let id = beacon.id();
            match table.get(id) {
                Some(known) => {
                    let bp = self.params.beacon_params(id);
                    let mu_base =
                        ldpl::ldpl_mean(&bp.ldpl, &location, &known.location, self.params.coeff_diff_floor_stdev);
                    let mu_gp = bp
                        .gp
                        .as_ref()
                        .map(|gp| gp.predict_mean(location.x, location.y))
                        .unwrap_or(0.0);
                    let mu = mu_base + mu_gp + state.rssi_bias;
                    total += self.params.norm_function.log_pdf(beacon.rssi - mu, bp.sigma);
                }
                None => match self.params.unknown_beacon_policy {
                    UnknownBeaconPolicy::Ignore => {}
                    UnknownBeaconPolicy::UseGlobalStdev { assumed_mean, stdev } => {
                        total += self.params.norm_function.log_pdf(beacon.rssi - assumed_mean, stdev);
                    }
                },
            }
        }

        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacons::BleBeacon;
    use crate::geometry::{Location, Pose};
    use crate::sensors::{Beacon, BeaconScan};

    fn table() -> BleBeaconTable {
        BleBeaconTable::new(vec![
            BleBeacon::new(10, 1, Location::new(5.0, 5.0, 0.0, 1.0)),
            BleBeacon::new(10, 2, Location::new(0.0, 0.0, 0.0, 1.0)),
        ])
    }

    fn model() -> GpLdplMultiModel {
        let fallback = BeaconObservationParameters::new(LdplParameters::default(), 4.0, None);
        GpLdplMultiModel::new(ObservationModelParameters::new(HashMap::new(), fallback))
    }

    fn state_at(x: f64, y: f64, floor: f64) -> State {
        State::new(Pose::new(Location::new(x, y, 0.0, floor), 0.0, 0.0, 0.0), 0.0, 0.0)
    }

    #[test]
    fn closer_state_gets_higher_likelihood_for_strong_rssi() {
        let m = model();
        let t = table();
        let scan = BeaconScan::new(vec![Beacon::new(10, 1, -50.0)], 0);
        let near = m.log_likelihood(&state_at(5.0, 5.0, 1.0), &scan, &t);
        let far = m.log_likelihood(&state_at(50.0, 50.0, 1.0), &scan, &t);
        assert!(near > far);
    }

    #[test]
    fn permutation_of_scan_does_not_change_log_likelihood() {
        let m = model();
        let t = table();
        let s = state_at(2.0, 2.0, 1.0);
        let scan_a = BeaconScan::new(vec![Beacon::new(10, 1, -60.0), Beacon::new(10, 2, -70.0)], 0);
        let scan_b = BeaconScan::new(vec![Beacon::new(10, 2, -70.0), Beacon::new(10, 1, -60.0)], 0);
        let la = m.log_likelihood(&s, &scan_a, &t);
        let lb = m.log_likelihood(&s, &scan_b, &t);
        assert!((la - lb).abs() < 1e-12);
    }

    #[test]
    fn unknown_beacon_ignored_by_default_yields_zero() {
        let m = model();
        let t = table();
        let s = state_at(2.0, 2.0, 1.0);
        let scan = BeaconScan::new(vec![Beacon::new(99, 99, -60.0)], 0);
        assert_eq!(m.log_likelihood(&s, &scan, &t), 0.0);
    }

    #[test]
    fn scaling_all_sigmas_preserves_the_argmax_particle() {
        let fallback_tight = BeaconObservationParameters::new(LdplParameters::default(), 2.0, None);
        let fallback_wide = BeaconObservationParameters::new(LdplParameters::default(), 20.0, None);
        let m_tight = GpLdplMultiModel::new(ObservationModelParameters::new(HashMap::new(), fallback_tight));
        let m_wide = GpLdplMultiModel::new(ObservationModelParameters::new(HashMap::new(), fallback_wide));
        let t = table();
        let scan = BeaconScan::new(vec![Beacon::new(10, 1, -55.0)], 0);

        let candidates = [state_at(5.0, 5.0, 1.0), state_at(1.0, 1.0, 1.0), state_at(20.0, 20.0, 1.0)];
        let argmax = |m: &GpLdplMultiModel| {
            candidates
                .iter()
                .enumerate()
                .map(|(i, s)| (i, m.log_likelihood(s, &scan, &t)))
                .fold((0usize, f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
                .0
        };
        assert_eq!(argmax(&m_tight), argmax(&m_wide));
    }
}
