//! The system (motion) model: advances one particle's [`State`] by
//! `dt` seconds of pedestrian dead-reckoning, then applies the shared
//! building-constraint post-filter. Each motion variant is a tagged enum
//! member so all four share the one `advance` entry point.

use crate::geometry::{sample_normal, Location, State};
use crate::map::{BuildingMap, CellKind, TransitionKind};
use rand::Rng;
use std::f64::consts::PI;

/// Which of the four pedestrian motion variants is active.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SystemModelVariant {
    /// Isotropic position diffusion, `sigma` meters per step.
    RandomWalk { sigma: f64 },
    /// Pedometer-velocity-driven motion along current orientation, with
    /// different noise while walking vs. stopped.
    RandomWalkAcc { sigma_move: f64, sigma_stop: f64 },
    /// As `RandomWalkAcc`, plus per-particle orientation-bias diffusion and
    /// an angular-velocity cap (the default tracking mode).
    RandomWalkAccAtt { sigma_move: f64, sigma_stop: f64, angular_velocity_limit: f64 },
    /// Mixes pedestrian prediction with a rare orientation-bias "jump" and a
    /// configurable chance of walking backward.
    WeakPoseRandomWalker { sigma_move: f64, sigma_stop: f64, jump_probability: f64, backward_probability: f64 },
}

/// Per-transition-kind velocity scaling and the shared building-constraint
/// tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildingConstraintParameters {
    pub velocity_rate_floor: f64,
    pub velocity_rate_stair: f64,
    pub velocity_rate_elevator: f64,
    pub velocity_rate_escalator: f64,
    /// Per-step weight multiplier applied when a move is rejected as
    /// non-walkable; derived from a configured half-life in steps.
    pub weight_decay_rate: f64,
    pub max_incidence_angle_deg: f64,
}

impl BuildingConstraintParameters {
    /// Builds from a weight half-life in steps (default 5), converting to
    /// the per-step multiplier `0.5^(1/halfLife)`.
    pub fn with_weight_decay_half_life(half_life_steps: f64) -> Self {
        Self {
            velocity_rate_floor: 1.0,
            velocity_rate_stair: 0.5,
            velocity_rate_elevator: 0.2,
            velocity_rate_escalator: 0.7,
            weight_decay_rate: 0.5f64.powf(1.0 / half_life_steps),
            max_incidence_angle_deg: 45.0,
        }
    }
}

impl Default for BuildingConstraintParameters {
    fn default() -> Self {
        Self::with_weight_decay_half_life(5.0)
    }
}

/// Latent-bias diffusion rates and clamp bounds for `rssi_bias` and
/// walking velocity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasDiffusionParameters {
    pub diffusion_rssi_bias: f64,
    pub diffusion_orientation_bias: f64,
    pub min_rssi_bias: f64,
    pub max_rssi_bias: f64,
    pub min_velocity: f64,
    pub max_velocity: f64,
}

impl Default for BiasDiffusionParameters {
    fn default() -> Self {
        Self {
            diffusion_rssi_bias: 0.2,
            diffusion_orientation_bias: 0.05,
            min_rssi_bias: -20.0,
            max_rssi_bias: 20.0,
            min_velocity: 0.1,
            max_velocity: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemModelParameters {
    pub variant: SystemModelVariant,
    pub building: BuildingConstraintParameters,
    pub bias: BiasDiffusionParameters,
}

impl Default for SystemModelParameters {
    fn default() -> Self {
        Self {
            variant: SystemModelVariant::RandomWalkAccAtt {
                sigma_move: 0.3,
                sigma_stop: 0.05,
                angular_velocity_limit: 30.0_f64.to_radians(),
            },
            building: BuildingConstraintParameters::default(),
            bias: BiasDiffusionParameters::default(),
        }
    }
}

/// The per-tick input the front-end feeds to the motion model: elapsed
/// time and whatever the pedometer/orientation meter currently report.
/// `orientation`/`is_walking` are `None` before those components have
/// initialized, in which case only isotropic diffusion is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionContext {
    pub dt: f64,
    pub orientation: Option<f64>,
    pub velocity: f64,
    pub is_walking: bool,
}

/// Outcome of applying the building constraint to a proposed move, so the
/// filter can fold the weight multiplier into the particle's weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvanceOutcome {
    pub state: State,
    pub weight_multiplier: f64,
}

/// The system model: a variant selector plus the shared building
/// constraint and bias diffusion it always applies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SystemModel {
    params: SystemModelParameters,
}

impl SystemModel {
    pub fn new(params: SystemModelParameters) -> Self {
        Self { params }
    }

    /// Advances one particle's state by `ctx.dt`, proposing a new position
    /// per the configured variant, then applying the shared building
    /// constraint and bias diffusion.
    pub fn advance<R: Rng + ?Sized>(&self, state: &State, ctx: &MotionContext, map: &BuildingMap, rng: &mut R) -> AdvanceOutcome {
        let mut next = *state;
        let proposed = self.propose_location(state, ctx, &mut next, rng);

        let (accepted_location, weight_multiplier) = self.apply_building_constraint(&state.location(), &proposed, map, rng);
        next.pose.location = accepted_location;

        self.diffuse_bias(&mut next, ctx.dt, rng);
        next.clamp_rssi_bias(self.params.bias.min_rssi_bias, self.params.bias.max_rssi_bias);
        next.clamp_velocity(self.params.bias.min_velocity, self.params.bias.max_velocity);

        AdvanceOutcome { state: next, weight_multiplier }
    }

    /// Computes the proposed (unconstrained) next location and mutates
    /// `next`'s orientation/velocity fields to match, per the selected
    /// variant.
    fn propose_location<R: Rng + ?Sized>(
        &self,
        state: &State,
        ctx: &MotionContext,
        next: &mut State,
        rng: &mut R,
    ) -> Location {
        let loc = state.location();
        match self.params.variant {
            SystemModelVariant::RandomWalk { sigma } => {
                Location::new(
                    sample_normal(rng, loc.x, sigma),
                    sample_normal(rng, loc.y, sigma),
                    loc.z,
                    loc.floor,
                )
            }
            SystemModelVariant::RandomWalkAcc { sigma_move, sigma_stop } => {
                self.pedestrian_step(state, ctx, next, sigma_move, sigma_stop, None, rng)
            }
            SystemModelVariant::RandomWalkAccAtt { sigma_move, sigma_stop, angular_velocity_limit } => {
                self.pedestrian_step(state, ctx, next, sigma_move, sigma_stop, Some(angular_velocity_limit), rng)
            }
            SystemModelVariant::WeakPoseRandomWalker { sigma_move, sigma_stop, jump_probability, backward_probability } => {
                if rng.gen::<f64>() < jump_probability {
                    next.orientation_bias = rng.gen_range(-PI..PI);
                }
                let sign = if rng.gen::<f64>() < backward_probability { -1.0 } else { 1.0 };
                self.pedestrian_step_signed(state, ctx, next, sigma_move, sigma_stop, None, sign, rng)
            }
        }
    }

    fn pedestrian_step<R: Rng + ?Sized>(
        &self,
        state: &State,
        ctx: &MotionContext,
        next: &mut State,
        sigma_move: f64,
        sigma_stop: f64,
        angular_velocity_limit: Option<f64>,
        rng: &mut R,
    ) -> Location {
        self.pedestrian_step_signed(state, ctx, next, sigma_move, sigma_stop, angular_velocity_limit, 1.0, rng)
    }

    #[allow(clippy::too_many_arguments)]
    fn pedestrian_step_signed<R: Rng + ?Sized>(
        &self,
        state: &State,
        ctx: &MotionContext,
        next: &mut State,
        sigma_move: f64,
        sigma_stop: f64,
        angular_velocity_limit: Option<f64>,
        sign: f64,
        rng: &mut R,
    ) -> Location {
        let loc = state.location();
        let heading = ctx.orientation.unwrap_or(state.pose.orientation) + state.orientation_bias;

        let mut orientation = ctx.orientation.unwrap_or(state.pose.orientation);
        if let Some(limit) = angular_velocity_limit {
            let max_delta = limit * ctx.dt;
            let delta = wrap_angle(orientation - state.pose.orientation).clamp(-max_delta, max_delta);
            orientation = state.pose.orientation + delta;
        }
        next.pose.orientation = orientation;
        next.pose.velocity = ctx.velocity;

        let sigma = if ctx.is_walking { sigma_move } else { sigma_stop };
        let step = sign * ctx.velocity * ctx.dt;
        let dx = step * heading.cos() + sample_normal(rng, 0.0, sigma);
        let dy = step * heading.sin() + sample_normal(rng, 0.0, sigma);
        Location::new(loc.x + dx, loc.y + dy, loc.z, loc.floor)
    }

    /// Applies the building constraint: accept a walkable move, reject
    /// (stay put, decay weight) a blocked one, or allow floor diffusion
    /// with scaled velocity through a transition cell.
    fn apply_building_constraint<R: Rng + ?Sized>(
        &self,
        from: &Location,
        proposed: &Location,
        map: &BuildingMap,
        rng: &mut R,
    ) -> (Location, f64) {
        match map.cell_at(proposed.x, proposed.y, proposed.floor_index()) {
            CellKind::Walkable => (*proposed, 1.0),
            CellKind::Blocked => (*from, self.params.building.weight_decay_rate),
            CellKind::Transition(kind) => {
                let rate = match kind {
                    TransitionKind::Stair => self.params.building.velocity_rate_stair,
                    TransitionKind::Elevator => self.params.building.velocity_rate_elevator,
                    TransitionKind::Escalator => self.params.building.velocity_rate_escalator,
                };
                let dx = (proposed.x - from.x) * rate;
                let dy = (proposed.y - from.y) * rate;
                let floor_jitter = sample_normal(rng, 0.0, 0.3);
                (Location::new(from.x + dx, from.y + dy, proposed.z, from.floor + floor_jitter), 1.0)
            }
        }
    }

    fn diffuse_bias<R: Rng + ?Sized>(&self, state: &mut State, dt: f64, rng: &mut R) {
        state.rssi_bias += sample_normal(rng, 0.0, (self.params.bias.diffusion_rssi_bias * dt).max(0.0).sqrt());
        state.orientation_bias +=
            sample_normal(rng, 0.0, (self.params.bias.diffusion_orientation_bias * dt).max(0.0).sqrt());
    }
}

/// Wraps an angle difference into `(-pi, pi]`, needed before clamping a
/// heading delta against the angular-velocity limit.
fn wrap_angle(mut a: f64) -> f64 {
    while a > PI {
        a -= 2.0 * PI;
    }
    while a <= -PI {
        a += 2.0 * PI;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;
    use crate::map::{BuildingMap, CoordinateTransform, FloorMap};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn open_floor_map() -> BuildingMap {
        BuildingMap::new(vec![FloorMap::new(
            1,
            1000,
            1000,
            vec![CellKind::Walkable; 1000 * 1000],
            vec![1.0; 1000 * 1000],
            CoordinateTransform { ppmx: 1.0, ppmy: 1.0, origin_x: -500.0, origin_y: -500.0 },
        )])
    }

    fn walking_state() -> State {
        State::new(Pose::new(Location::new(0.0, 0.0, 0.0, 1.0), 0.0, 1.0, 0.0), 0.0, 0.0)
    }

    #[test]
    fn walking_straight_east_advances_x() {
        let model = SystemModel::new(SystemModelParameters {
            variant: SystemModelVariant::RandomWalkAcc { sigma_move: 0.0, sigma_stop: 0.0 },
            ..Default::default()
        });
        let map = open_floor_map();
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let ctx = MotionContext { dt: 1.0, orientation: Some(0.0), velocity: 1.0, is_walking: true };
        let outcome = model.advance(&walking_state(), &ctx, &map, &mut rng);
        assert!((outcome.state.pose.location.x - 1.0).abs() < 1e-9);
        assert!(outcome.state.pose.location.y.abs() < 1e-9);
    }

    #[test]
    fn blocked_move_rejects_and_decays_weight() {
        let model = SystemModel::new(SystemModelParameters::default());
        let blocked_map = BuildingMap::new(vec![FloorMap::new(
            1,
            10,
            10,
            vec![CellKind::Blocked; 100],
            vec![1.0; 100],
            CoordinateTransform { ppmx: 1.0, ppmy: 1.0, origin_x: -5.0, origin_y: -5.0 },
        )]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let ctx = MotionContext { dt: 1.0, orientation: Some(0.0), velocity: 1.0, is_walking: true };
        let before = walking_state();
        let outcome = model.advance(&before, &ctx, &blocked_map, &mut rng);
        assert_eq!(outcome.state.pose.location, before.pose.location);
        assert!(outcome.weight_multiplier < 1.0);
    }

    #[test]
    fn bias_terms_stay_within_clamp_bounds() {
        let model = SystemModel::new(SystemModelParameters::default());
        let map = open_floor_map();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut state = walking_state();
        state.rssi_bias = 19.9;
        let ctx = MotionContext { dt: 10.0, orientation: Some(0.0), velocity: 1.0, is_walking: true };
        for _ in 0..20 {
            let outcome = model.advance(&state, &ctx, &map, &mut rng);
            state = outcome.state;
        }
        assert!(state.rssi_bias <= 20.0 + 1e-9 && state.rssi_bias >= -20.0 - 1e-9);
    }

    #[test]
    fn angular_velocity_limit_caps_heading_change() {
        let model = SystemModel::new(SystemModelParameters {
            variant: SystemModelVariant::RandomWalkAccAtt {
                sigma_move: 0.0,
                sigma_stop: 0.0,
                angular_velocity_limit: 0.1,
            },
            ..Default::default()
        });
        let map = open_floor_map();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let ctx = MotionContext { dt: 1.0, orientation: Some(PI), velocity: 0.0, is_walking: true };
        let outcome = model.advance(&walking_state(), &ctx, &map, &mut rng);
        assert!((outcome.state.pose.orientation - 0.1).abs() < 1e-9);
    }
}
