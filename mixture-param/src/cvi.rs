use crate::dirichlet::*;
use crate::error::*;
use crate::mixture::*;
use crate::suff_stat::*;
use crate::traits::*;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Conjugate M-step of the Gaussian mixture
///
/// `theta* = prior + (N(k), Σ r x, Σ r x x')`, added to
/// `(α - 1, β, b, A, v̂)`. With all-zero responsibilities the result is
/// the prior itself.
///
/// * `prior` - fixed prior natural parameters
/// * `x_nl` - one latent sample per data point (N x L)
/// * `r_nk` - responsibilities in probability space (N x K)
/// * `stat_scale` - multiplier on the statistics (1 for none)
pub fn m_step(
    prior: &GmmNatural,
    x_nl: ArrayView2<f64>,
    r_nk: ArrayView2<f64>,
    stat_scale: f64,
) -> Result<GmmNatural> {
    let stat = MixtureSuffStats::from_samples(x_nl, r_nk)?;
    if stat_scale == 1. {
        prior.add_stat(&stat)
    } else {
        prior.add_stat(&stat.scaled(stat_scale))
    }
}

/// M-step of the Student-t mixture: only the Dirichlet over mixture
/// weights receives the counts `N(k)`
pub fn m_step_smm(
    prior: &DirichletNatural,
    r_nk: ArrayView2<f64>,
    stat_scale: f64,
) -> Result<DirichletNatural> {
    let n_k = r_nk.sum_axis(Axis(0)) * stat_scale;
    prior.add_stat(&n_k)
}

/// `(1 - rho) * theta + rho * theta_star` on every natural parameter
///
/// `rho` outside [0, 1] is not clamped; the result is then undefined.
pub fn update_gmm_params<P: ConjugateParam>(theta: &P, theta_star: &P, rho: f64) -> P {
    theta.convex_combination(theta_star, rho)
}

/// Exponentially decaying CVI step size
///
/// `rho(t) = learning_rate * decay_rate ^ (t / decay_steps)` with
/// continuous (non-staircase) decay.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CviSchedule {
    pub learning_rate: f64,
    pub decay_rate: f64,
    pub decay_steps: f64,
}

impl CviSchedule {
    pub fn new(learning_rate: f64, decay_rate: f64) -> Self {
        Self {
            learning_rate,
            decay_rate,
            decay_steps: 1000.,
        }
    }

    pub fn step_size(&self, step: usize) -> f64 {
        self.learning_rate * self.decay_rate.powf(step as f64 / self.decay_steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn zero_responsibilities_return_prior() {
        let (prior, _) = init_mm(3, 2, 1);
        let x_nl = array![[1.0, 2.0], [3.0, -1.0], [0.0, 0.5], [2.0, 2.0]];
        let r_nk = Array2::<f64>::zeros((4, 3));
        let theta_star = m_step(&prior, x_nl.view(), r_nk.view(), 1.).unwrap();
        assert_eq!(theta_star, prior);

        let alpha_star = m_step_smm(&prior.dirichlet, r_nk.view(), 1.).unwrap();
        assert_eq!(alpha_star, prior.dirichlet);
    }

    #[test]
    fn convex_combination_boundaries() {
        let (_, theta) = init_mm(3, 2, 1);
        let (_, theta_star) = init_mm(3, 2, 2);

        assert_eq!(update_gmm_params(&theta, &theta_star, 0.0), theta);
        assert_eq!(update_gmm_params(&theta, &theta_star, 1.0), theta_star);

        for rho in [0.0, 0.1, 0.5, 0.9, 1.0] {
            let same = update_gmm_params(&theta, &theta, rho);
            for (a, b) in same.niw.a_kll.iter().zip(theta.niw.a_kll.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
            for (a, b) in same.dirichlet.nat_k.iter().zip(theta.dirichlet.nat_k.iter()) {
                assert_abs_diff_eq!(a, b, epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn smm_counts_follow_responsibilities() {
        let prior = DirichletNatural::new(array![0.0, 0.0]);
        let r_nk = array![[0.25, 0.75], [1.0, 0.0]];
        let alpha_star = m_step_smm(&prior, r_nk.view(), 2.).unwrap();
        assert_abs_diff_eq!(alpha_star.nat_k[0], 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(alpha_star.nat_k[1], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn schedule_decays_continuously() {
        let sched = CviSchedule::new(0.2, 0.5);
        assert_abs_diff_eq!(sched.step_size(0), 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(sched.step_size(1000), 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(sched.step_size(500), 0.2 * 0.5f64.sqrt(), epsilon = 1e-12);

        let flat = CviSchedule::new(0.3, 1.0);
        assert_abs_diff_eq!(flat.step_size(123_456), 0.3, epsilon = 1e-12);
    }
}
