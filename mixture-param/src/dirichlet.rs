extern crate special;

use crate::error::*;
use crate::traits::*;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Dirichlet natural parameter `α - 1` over `K` mixture weights
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirichletNatural {
    pub nat_k: Array1<f64>,
}

/// Dirichlet concentration `α`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DirichletStandard {
    pub alpha_k: Array1<f64>,
}

impl DirichletStandard {
    pub fn symmetric(num_components: usize, alpha: f64) -> Self {
        Self {
            alpha_k: Array1::from_elem(num_components, alpha),
        }
    }

    pub fn to_natural(&self) -> DirichletNatural {
        DirichletNatural {
            nat_k: self.alpha_k.mapv(|a| a - 1.),
        }
    }

    /// E[log π(k)] = ψ(α(k)) - ψ(Σ α)
    pub fn expected_log_pi(&self) -> Array1<f64> {
        use special::Gamma;
        let psi_tot = Gamma::digamma(self.alpha_k.sum());
        self.alpha_k.mapv(|a| Gamma::digamma(a) - psi_tot)
    }

    /// E[π(k)] = α(k) / Σ α
    pub fn expected_pi(&self) -> Array1<f64> {
        &self.alpha_k / self.alpha_k.sum()
    }
}

impl DirichletNatural {
    pub fn new(nat_k: Array1<f64>) -> Self {
        Self { nat_k }
    }

    pub fn num_components(&self) -> usize {
        self.nat_k.len()
    }

    /// α = η + 1; every concentration must be strictly positive
    pub fn to_standard(&self) -> Result<DirichletStandard> {
        let alpha_k = self.nat_k.mapv(|x| x + 1.);
        if let Some(k) = alpha_k.iter().position(|a| !a.is_finite() || *a <= 0.) {
            return Err(ParamError::numerical(
                k,
                format!("Dirichlet concentration {} is not positive", alpha_k[k]),
            ));
        }
        Ok(DirichletStandard { alpha_k })
    }

    pub fn expected_log_pi(&self) -> Result<Array1<f64>> {
        Ok(self.to_standard()?.expected_log_pi())
    }
}

impl ConjugateParam for DirichletNatural {
    type Stat = Array1<f64>;

    fn add_stat(&self, n_k: &Self::Stat) -> Result<Self> {
        if n_k.len() != self.nat_k.len() {
            return Err(ParamError::Shape(format!(
                "{} counts vs. {} components",
                n_k.len(),
                self.nat_k.len()
            )));
        }
        Ok(Self {
            nat_k: &self.nat_k + n_k,
        })
    }

    fn convex_combination(&self, target: &Self, rho: f64) -> Self {
        Self {
            nat_k: &self.nat_k * (1. - rho) + &target.nat_k * rho,
        }
    }

    fn validate(&self) -> Result<()> {
        self.to_standard().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn symmetric_concentration_gives_identical_expectations() {
        for alpha in [0.01, 0.5, 1.0, 7.5, 250.0] {
            let elog = DirichletStandard::symmetric(6, alpha).expected_log_pi();
            for k in 1..6 {
                assert_abs_diff_eq!(elog[k], elog[0], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn round_trip() {
        let nat = DirichletNatural::new(array![-0.5, 0.0, 3.25, 10.0]);
        let back = nat.to_standard().unwrap().to_natural();
        for (a, b) in nat.nat_k.iter().zip(back.nat_k.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn non_positive_concentration_is_an_error() {
        let nat = DirichletNatural::new(array![0.0, -1.0, 2.0]);
        match nat.to_standard() {
            Err(ParamError::Numerical { component, .. }) => assert_eq!(component, 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn expected_log_pi_matches_uniform_case() {
        // α = (1, 1): E[log π] = ψ(1) - ψ(2) = -1
        let elog = DirichletStandard::symmetric(2, 1.0).expected_log_pi();
        assert_abs_diff_eq!(elog[0], -1.0, epsilon = 1e-9);
    }
}
