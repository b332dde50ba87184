//! GridResampler: systematic resampling with stratified jitter.

use crate::particle::Particle;
use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResamplerParameters {
    /// Resample only when `ESS` falls below this many particles (default
    /// equals `N`, i.e. resample unconditionally every update).
    pub effective_sample_size_threshold: f64,
}

impl ResamplerParameters {
    pub fn always_resample(n: usize) -> Self {
        Self { effective_sample_size_threshold: n as f64 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridResampler {
    params: ResamplerParameters,
}

impl GridResampler {
    pub fn new(params: ResamplerParameters) -> Self {
        Self { params }
    }

    pub fn should_resample(&self, ess: f64) -> bool {
        ess < self.params.effective_sample_size_threshold
    }

    /// Systematic resampling: draws one stratification offset `u0 ~
    /// U[0, 1/N)`, then for `k` in `0..N` selects the particle whose
    /// cumulative-weight interval contains `u0 + k/N`. Ties
    /// (cumulative weight exactly equal to the draw) resolve to the lower
    /// index since the search advances past an interval only once its
    /// upper edge is strictly exceeded. Resets every weight to `1/N`.
    pub fn resample<R: Rng + ?Sized>(&self, particles: &[Particle], rng: &mut R) -> Vec<Particle> {
        let n = particles.len();
        if n == 0 {
            return Vec::new();
        }
        let total: f64 = particles.iter().map(|p| p.weight).sum();
        let total = if total > 0.0 { total } else { 1.0 };

        let step = 1.0 / n as f64;
        let u0 = rng.gen_range(0.0..step);

        let mut out = Vec::with_capacity(n);
        let mut cumulative = particles[0].weight / total;
        let mut i = 0usize;
        let uniform_weight = 1.0 / n as f64;

        for k in 0..n {
            let target = u0 + k as f64 * step;
            while cumulative < target && i < n - 1 {
                i += 1;
                cumulative += particles[i].weight / total;
            }
            out.push(Particle::new(particles[i].state, uniform_weight));
        }
        out
    }
}
