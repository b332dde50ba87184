//! The particle cloud: a weighted population of [`State`] hypotheses, and
//! the population-level statistics the filter needs each tick.

use crate::geometry::{weighted_mean_state, weighted_stdev_location, Location, State};

/// One hypothesis in the cloud: a state and its normalized importance weight.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub state: State,
    pub weight: f64,
}

impl Particle {
    pub fn new(state: State, weight: f64) -> Self {
        Self { state, weight }
    }
}

/// `1 / sum(w_i^2)` over normalized weights; the standard effective sample
/// size diagnostic. Returns 0 for an empty cloud.
pub fn effective_sample_size(particles: &[Particle]) -> f64 {
    let sum: f64 = particles.iter().map(|p| p.weight).sum();
    if sum <= 0.0 || particles.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = particles.iter().map(|p| (p.weight / sum).powi(2)).sum();
    if sum_sq <= 0.0 {
        0.0
    } else {
        1.0 / sum_sq
    }
}

/// Rescales weights to sum to 1. If every weight collapsed to zero (or the
/// cloud is empty), resets to a uniform distribution rather than dividing by
/// zero — the filter-collapse recovery path is expected to run immediately
/// after this.
pub fn renormalize(particles: &mut [Particle]) {
    let sum: f64 = particles.iter().map(|p| p.weight).sum();
    if sum > 0.0 && sum.is_finite() {
        for p in particles.iter_mut() {
            p.weight /= sum;
        }
    } else if !particles.is_empty() {
        let uniform = 1.0 / particles.len() as f64;
        for p in particles.iter_mut() {
            p.weight = uniform;
        }
    }
}

/// Weighted mean [`State`] of the cloud, circular-averaging orientation.
pub fn mean_state(particles: &[Particle]) -> State {
    let states: Vec<State> = particles.iter().map(|p| p.state).collect();
    let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
    weighted_mean_state(&states, &weights)
}

/// Weighted per-axis location standard deviation of the cloud.
pub fn stdev_location(particles: &[Particle], mean: &Location) -> Location {
    let states: Vec<State> = particles.iter().map(|p| p.state).collect();
    let weights: Vec<f64> = particles.iter().map(|p| p.weight).collect();
    weighted_stdev_location(&states, &weights, mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Pose;

    fn particle(w: f64) -> Particle {
        Particle::new(State::default(), w)
    }

    #[test]
    fn ess_is_n_for_uniform_weights() {
        let particles = vec![particle(0.25); 4];
        assert!((effective_sample_size(&particles) - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ess_is_one_when_a_single_particle_dominates() {
        let mut particles = vec![particle(0.0); 4];
        particles[0].weight = 1.0;
        assert!((effective_sample_size(&particles) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn renormalize_recovers_uniform_on_total_collapse() {
        let mut particles = vec![particle(0.0); 5];
        renormalize(&mut particles);
        for p in &particles {
            assert!((p.weight - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn mean_state_matches_weighted_average() {
        let particles = vec![
            Particle::new(State::new(Pose::new(Location::new(0.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), 0.0, 0.0), 1.0),
            Particle::new(State::new(Pose::new(Location::new(4.0, 0.0, 0.0, 1.0), 0.0, 0.0, 0.0), 0.0, 0.0), 1.0),
        ];
        let mean = mean_state(&particles);
        assert!((mean.pose.location.x - 2.0).abs() < 1e-9);
    }
}
