use crate::error::*;
use crate::linalg::*;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Natural parameters of `K` multivariate Gaussians in `L` dimensions
///
/// η1 = Σ⁻¹ μ,  η2 = -½ Σ⁻¹
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianNatural {
    pub eta1_kl: Array2<f64>,
    pub eta2_kll: Array3<f64>,
}

/// Mean and covariance of `K` multivariate Gaussians
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianStandard {
    pub mu_kl: Array2<f64>,
    pub sigma_kll: Array3<f64>,
}

impl GaussianNatural {
    pub fn dims(&self) -> (usize, usize) {
        self.eta1_kl.dim()
    }

    /// precision matrices `-2 η2`
    pub fn precision(&self) -> Array3<f64> {
        &self.eta2_kll * (-2.)
    }

    /// Σ = (-2 η2)⁻¹, μ = Σ η1
    pub fn to_standard(&self) -> Result<GaussianStandard> {
        let (kk, ll) = self.dims();
        let mut mu_kl = Array2::zeros((kk, ll));
        let mut sigma_kll = Array3::zeros((kk, ll, ll));

        for k in 0..kk {
            let prec = self.eta2_kll.index_axis(Axis(0), k).mapv(|x| -2. * x);
            let sigma = spd_inverse(prec.view(), k)?;
            mu_kl
                .row_mut(k)
                .assign(&sigma.dot(&self.eta1_kl.row(k)));
            sigma_kll.index_axis_mut(Axis(0), k).assign(&sigma);
        }
        Ok(GaussianStandard { mu_kl, sigma_kll })
    }

    /// A(η) = ½ η1'μ - ½ log|-2 η2| for each component
    pub fn log_partition(&self) -> Result<Array1<f64>> {
        let std = self.to_standard()?;
        let (kk, _) = self.dims();
        let mut ret = Array1::zeros(kk);
        for k in 0..kk {
            let prec = self.eta2_kll.index_axis(Axis(0), k).mapv(|x| -2. * x);
            let log_det = log_det_spd(prec.view(), k)?;
            ret[k] = 0.5 * self.eta1_kl.row(k).dot(&std.mu_kl.row(k)) - 0.5 * log_det;
        }
        Ok(ret)
    }
}

impl GaussianStandard {
    pub fn dims(&self) -> (usize, usize) {
        self.mu_kl.dim()
    }

    /// η2 = -½ Σ⁻¹, η1 = Σ⁻¹ μ
    pub fn to_natural(&self) -> Result<GaussianNatural> {
        let (kk, ll) = self.dims();
        let mut eta1_kl = Array2::zeros((kk, ll));
        let mut eta2_kll = Array3::zeros((kk, ll, ll));

        for k in 0..kk {
            let prec = spd_inverse(self.sigma_kll.index_axis(Axis(0), k), k)?;
            eta1_kl.row_mut(k).assign(&prec.dot(&self.mu_kl.row(k)));
            eta2_kll
                .index_axis_mut(Axis(0), k)
                .assign(&prec.mapv(|x| -0.5 * x));
        }
        Ok(GaussianNatural { eta1_kl, eta2_kll })
    }

    /// Lower Cholesky factors of the covariance matrices
    pub fn cholesky(&self) -> Result<Array3<f64>> {
        let (kk, ll) = self.dims();
        let mut ret = Array3::zeros((kk, ll, ll));
        for k in 0..kk {
            let l = cholesky_lower(self.sigma_kll.index_axis(Axis(0), k), k)?;
            ret.index_axis_mut(Axis(0), k).assign(&to_array2(&l));
        }
        Ok(ret)
    }

    /// log N(x | μ(k), Σ(k))
    pub fn log_density(&self, x_l: ArrayView1<f64>, k: usize) -> Result<f64> {
        let (_, ll) = self.dims();
        let sigma = self.sigma_kll.index_axis(Axis(0), k);
        let prec = spd_inverse(sigma, k)?;
        let log_det = log_det_spd(sigma, k)?;
        let dx = &x_l - &self.mu_kl.row(k);
        let quad = dx.dot(&prec.dot(&dx));
        Ok(-0.5 * (quad + log_det + ll as f64 * (2. * std::f64::consts::PI).ln()))
    }
}
