use crate::error::*;
use crate::gaussian::*;
use crate::linalg::*;
use crate::suff_stat::MixtureSuffStats;
use crate::traits::*;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Normal-Inverse-Wishart natural parameters for `K` components
///
/// * `A = C + β m m'`
/// * `b = β m`
/// * `β`
/// * `v̂ = v + L + 2`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NiwNatural {
    pub a_kll: Array3<f64>,
    pub b_kl: Array2<f64>,
    pub beta_k: Array1<f64>,
    pub v_hat_k: Array1<f64>,
}

/// Normal-Inverse-Wishart standard parameters
///
/// μ ~ N(m, Σ/β), Σ ~ IW(C, v)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NiwStandard {
    pub beta_k: Array1<f64>,
    pub m_kl: Array2<f64>,
    pub c_kll: Array3<f64>,
    pub v_k: Array1<f64>,
}

impl NiwStandard {
    pub fn dims(&self) -> (usize, usize) {
        self.m_kl.dim()
    }

    pub fn to_natural(&self) -> NiwNatural {
        let (kk, ll) = self.dims();
        let b_kl = &self.m_kl * &self.beta_k.view().insert_axis(Axis(1));
        let mut a_kll = self.c_kll.clone();
        for k in 0..kk {
            let bm = outer(b_kl.row(k), self.m_kl.row(k));
            let mut a = a_kll.index_axis_mut(Axis(0), k);
            a += &bm;
        }
        NiwNatural {
            a_kll,
            b_kl,
            beta_k: self.beta_k.clone(),
            v_hat_k: self.v_k.mapv(|v| v + ll as f64 + 2.),
        }
    }

    /// Expected mean and plug-in covariance for each component
    ///
    /// E[μ] = m and Σ = (E[Σ⁻¹])⁻¹ = C / v
    pub fn expected_values(&self) -> Result<GaussianStandard> {
        let (kk, ll) = self.dims();
        let mut sigma_kll = Array3::zeros((kk, ll, ll));
        for k in 0..kk {
            let c = symmetrize(self.c_kll.index_axis(Axis(0), k));
            cholesky_lower(c.view(), k)?;
            sigma_kll
                .index_axis_mut(Axis(0), k)
                .assign(&(c / self.v_k[k]));
        }
        Ok(GaussianStandard {
            mu_kl: self.m_kl.clone(),
            sigma_kll,
        })
    }
}

impl NiwNatural {
    pub fn dims(&self) -> (usize, usize) {
        self.b_kl.dim()
    }

    /// m = b/β, C = A - b m', v = v̂ - L - 2
    ///
    /// Fails if β ≤ 0, v ≤ L - 1, or C is not positive definite.
    pub fn to_standard(&self) -> Result<NiwStandard> {
        let (kk, ll) = self.dims();

        if let Some(k) = self.beta_k.iter().position(|b| !b.is_finite() || *b <= 0.) {
            return Err(ParamError::numerical(
                k,
                format!("NIW beta {} is not positive", self.beta_k[k]),
            ));
        }

        let v_k = self.v_hat_k.mapv(|v| v - ll as f64 - 2.);
        if let Some(k) = v_k.iter().position(|v| !v.is_finite() || *v <= ll as f64 - 1.) {
            return Err(ParamError::numerical(
                k,
                format!("NIW degrees of freedom {} <= {}", v_k[k], ll as f64 - 1.),
            ));
        }

        let m_kl = &self.b_kl / &self.beta_k.view().insert_axis(Axis(1));
        let mut c_kll = self.a_kll.clone();
        for k in 0..kk {
            let bm = outer(self.b_kl.row(k), m_kl.row(k));
            let mut c = c_kll.index_axis_mut(Axis(0), k);
            c -= &bm;
            cholesky_lower(c.view(), k)?;
        }

        Ok(NiwStandard {
            beta_k: self.beta_k.clone(),
            m_kl,
            c_kll,
            v_k,
        })
    }

    pub fn expected_values(&self) -> Result<GaussianStandard> {
        self.to_standard()?.expected_values()
    }
}

impl ConjugateParam for NiwNatural {
    type Stat = MixtureSuffStats;

    /// A + Σ r x x', b + Σ r x, β + N, v̂ + N
    fn add_stat(&self, stat: &Self::Stat) -> Result<Self> {
        if stat.dims() != self.dims() {
            return Err(ParamError::Shape(format!(
                "statistics {:?} vs. NIW {:?}",
                stat.dims(),
                self.dims()
            )));
        }
        Ok(Self {
            a_kll: &self.a_kll + &stat.sxx_kll,
            b_kl: &self.b_kl + &stat.sx_kl,
            beta_k: &self.beta_k + &stat.n_k,
            v_hat_k: &self.v_hat_k + &stat.n_k,
        })
    }

    fn convex_combination(&self, target: &Self, rho: f64) -> Self {
        let blend = 1. - rho;
        Self {
            a_kll: &self.a_kll * blend + &target.a_kll * rho,
            b_kl: &self.b_kl * blend + &target.b_kl * rho,
            beta_k: &self.beta_k * blend + &target.beta_k * rho,
            v_hat_k: &self.v_hat_k * blend + &target.v_hat_k * rho,
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

    fn example() -> NiwStandard {
        let mut c_kll = Array3::zeros((2, 3, 3));
        c_kll
            .index_axis_mut(Axis(0), 0)
            .assign(&array![[3.0, 0.2, 0.1], [0.2, 2.0, 0.0], [0.1, 0.0, 1.5]]);
        c_kll
            .index_axis_mut(Axis(0), 1)
            .assign(&(Array2::eye(3) * 4.0));
        NiwStandard {
            beta_k: array![0.5, 2.0],
            m_kl: array![[1.0, -1.0, 0.0], [3.0, 2.0, -4.0]],
            c_kll,
            v_k: array![4.5, 10.0],
        }
    }

    #[test]
    fn natural_round_trip() {
        let nat = example().to_natural();
        let back = nat.to_standard().unwrap().to_natural();
        for (a, b) in nat.a_kll.iter().zip(back.a_kll.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        for (a, b) in nat.b_kl.iter().zip(back.b_kl.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        assert_eq!(nat.beta_k, back.beta_k);
        assert_eq!(nat.v_hat_k, back.v_hat_k);
    }

    #[test]
    fn v_hat_offset() {
        let nat = example().to_natural();
        assert_abs_diff_eq!(nat.v_hat_k[0], 4.5 + 3. + 2., epsilon = 1e-12);
    }

    #[test]
    fn expected_covariance_is_scale_over_dof() {
        let std = example();
        let expected = std.expected_values().unwrap();
        let sigma = expected.sigma_kll.index_axis(Axis(0), 1);
        assert_abs_diff_eq!(sigma[[0, 0]], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(sigma[[0, 1]], 0.0, epsilon = 1e-12);
        assert_eq!(expected.mu_kl, std.m_kl);
    }

    #[test]
    fn negative_beta_is_rejected() {
        let mut nat = example().to_natural();
        nat.beta_k[1] = -0.1;
        match nat.to_standard() {
            Err(ParamError::Numerical { component, .. }) => assert_eq!(component, 1),
            other => panic!("unexpected {:?}", other),
        }
    }
}
