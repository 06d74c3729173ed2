use crate::candle_aux_linear::WeightInit;
use crate::candle_linalg::*;
use crate::error::SvaeError;
use crate::tensor_util::*;
use candle_core::{Result, Tensor};
use mixture_param::gaussian::GaussianStandard;
use mixture_param::linalg::cholesky_lower;
use mixture_param::GmmNatural;
use ndarray::prelude::*;

/// Recognition-side Gaussian mixture `phi_gmm`
///
/// Trainable natural parameters of `K` Gaussians in the latent space
/// and their mixture logits. The precision `-2 η2 = U U'` is kept
/// through its Cholesky factor `U`, stored unconstrained (softplus on
/// the diagonal).
pub struct RecognitionGmm {
    pub eta1_kl: Tensor,
    pub l_raw_kll: Tensor,
    pub pi_raw_k: Tensor,
}

impl RecognitionGmm {
    pub fn num_components(&self) -> Result<usize> {
        self.eta1_kl.dim(0)
    }

    pub fn dim_latent(&self) -> Result<usize> {
        self.eta1_kl.dim(1)
    }

    /// Cholesky factors of the component precisions (K x L x L)
    pub fn precision_chol(&self) -> Result<Tensor> {
        lower_from_raw(&self.l_raw_kll)
    }

    /// precision matrices `U U'`
    pub fn precision(&self) -> Result<Tensor> {
        let chol = self.precision_chol()?;
        chol.matmul(&chol.transpose(1, 2)?.contiguous()?)
    }

    /// log mixture weights (normalized)
    pub fn log_pi(&self) -> Result<Tensor> {
        candle_nn::ops::log_softmax(&self.pi_raw_k, 0)
    }

    /// component means `(U U')⁻¹ η1`
    pub fn means(&self) -> Result<Tensor> {
        let chol = self.precision_chol()?;
        cholesky_solve(&chol, &self.eta1_kl.unsqueeze(2)?)?.squeeze(2)
    }

    /// A(η) = ½ η1'μ - ½ log|U U'|, one per component
    pub fn log_partition(&self) -> Result<Tensor> {
        let chol = self.precision_chol()?;
        let mu_kl = cholesky_solve(&chol, &self.eta1_kl.unsqueeze(2)?)?.squeeze(2)?;
        let quad_k = self.eta1_kl.mul(&mu_kl)?.sum(1)?;
        ((quad_k - cholesky_log_det(&chol)?)? * 0.5)
    }

    /// Mean and covariance of each component, for reporting
    pub fn to_standard(&self) -> anyhow::Result<GaussianStandard> {
        let prec = tensor_to_array3(&self.precision()?)?;
        let eta1 = tensor_to_array2(&self.eta1_kl)?;
        let nat = mixture_param::gaussian::GaussianNatural {
            eta1_kl: eta1,
            eta2_kll: prec * (-0.5),
        };
        Ok(nat.to_standard()?)
    }
}

/// Unconstrained storage of lower-triangular factors with positive
/// diagonals (inverse of `lower_from_raw`)
pub fn raw_from_lower(chol_kll: &Array3<f64>) -> Array3<f64> {
    let mut raw = chol_kll.clone();
    let (kk, ll, _) = raw.dim();
    for k in 0..kk {
        for i in 0..ll {
            raw[[k, i, i]] = inv_softplus(chol_kll[[k, i, i]]);
            for j in (i + 1)..ll {
                raw[[k, i, j]] = 0.;
            }
        }
    }
    raw
}

/// Initialize `phi_gmm` from the mixture posterior `theta`
///
/// The recognition Gaussians start at the natural parameters implied
/// by theta's expected means and plug-in covariances, and the logits at
/// `E[log π]`, so the first responsibilities already reflect theta.
///
/// Creates `phi_gmm.eta1`, `phi_gmm.l_raw` and `phi_gmm.pi_raw`.
pub fn init_recognition_params(
    theta: &GmmNatural,
    init: &mut WeightInit,
) -> std::result::Result<RecognitionGmm, SvaeError> {
    let expected = theta.expected_gaussian()?;
    let natural = expected.to_natural()?;
    let kk = theta.num_components();
    let ll = theta.dim();

    let mut chol_kll = Array3::zeros((kk, ll, ll));
    for k in 0..kk {
        let prec = natural.eta2_kll.index_axis(Axis(0), k).mapv(|x| -2. * x);
        let chol = cholesky_lower(prec.view(), k)?;
        for i in 0..ll {
            for j in 0..=i {
                chol_kll[[k, i, j]] = chol[(i, j)];
            }
        }
    }

    let elog_pi = theta.expected_log_pi()?;
    let dev = init.device().clone();

    let eta1_kl = init.constant("phi_gmm.eta1", array2_to_tensor(natural.eta1_kl.view(), &dev)?)?;
    let l_raw_kll = init.constant(
        "phi_gmm.l_raw",
        array3_to_tensor(raw_from_lower(&chol_kll).view(), &dev)?,
    )?;
    let pi_raw_k = init.constant("phi_gmm.pi_raw", array1_to_tensor(elog_pi.view(), &dev)?)?;

    Ok(RecognitionGmm {
        eta1_kl,
        l_raw_kll,
        pi_raw_k,
    })
}
