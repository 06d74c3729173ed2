use crate::error::*;
use ndarray::prelude::*;

/// Responsibility-weighted sufficient statistics of a Gaussian mixture
///
/// * `n_k` - Σ_n r(n,k)
/// * `sx_kl` - Σ_n r(n,k) x(n)
/// * `sxx_kll` - Σ_n r(n,k) x(n) x(n)'
#[derive(Clone, Debug, PartialEq)]
pub struct MixtureSuffStats {
    pub n_k: Array1<f64>,
    pub sx_kl: Array2<f64>,
    pub sxx_kll: Array3<f64>,
}

impl MixtureSuffStats {
    pub fn zeros(num_components: usize, dim: usize) -> Self {
        Self {
            n_k: Array1::zeros(num_components),
            sx_kl: Array2::zeros((num_components, dim)),
            sxx_kll: Array3::zeros((num_components, dim, dim)),
        }
    }

    pub fn dims(&self) -> (usize, usize) {
        self.sx_kl.dim()
    }

    /// Accumulate statistics over a batch
    ///
    /// * `x_nl` - latent samples (N x L)
    /// * `r_nk` - responsibilities (N x K), rows in probability space
    pub fn from_samples(x_nl: ArrayView2<f64>, r_nk: ArrayView2<f64>) -> Result<Self> {
        let (nn, ll) = x_nl.dim();
        let (nr, kk) = r_nk.dim();
        if nn != nr {
            return Err(ParamError::Shape(format!(
                "{} samples vs. {} responsibility rows",
                nn, nr
            )));
        }

        let n_k = r_nk.sum_axis(Axis(0));
        let sx_kl = r_nk.t().dot(&x_nl);

        let mut sxx_kll = Array3::zeros((kk, ll, ll));
        for k in 0..kk {
            let weighted_nl = &x_nl * &r_nk.column(k).insert_axis(Axis(1));
            sxx_kll
                .index_axis_mut(Axis(0), k)
                .assign(&weighted_nl.t().dot(&x_nl));
        }

        Ok(Self {
            n_k,
            sx_kl,
            sxx_kll,
        })
    }

    /// multiply every statistic by `scale`, e.g., dataset size over
    /// minibatch size
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            n_k: &self.n_k * scale,
            sx_kl: &self.sx_kl * scale,
            sxx_kll: &self.sxx_kll * scale,
        }
    }
}
