use crate::candle_aux_linear::WeightInit;
use crate::candle_linalg::*;
use crate::candle_recognition_gmm::raw_from_lower;
use crate::tensor_util::*;
use candle_core::{Result, Tensor};
use ndarray::prelude::*;
use special::Gamma;

/// Point estimates of Student-t locations and scales, trained by the
/// gradient optimizer together with the network weights
///
/// * `mu_kl` - locations (K x L)
/// * `l_raw_kll` - unconstrained Cholesky factor of the scale matrix
pub struct StudentTLocScale {
    pub mu_kl: Tensor,
    pub l_raw_kll: Tensor,
}

impl StudentTLocScale {
    /// Creates `theta.mu_k` and `theta.l_k_raw`
    ///
    /// * `loc_kl` - initial locations
    /// * `scale_chol_kll` - initial lower Cholesky factors of the scales
    pub fn new(
        loc_kl: &Array2<f64>,
        scale_chol_kll: &Array3<f64>,
        init: &mut WeightInit,
    ) -> Result<Self> {
        let dev = init.device().clone();
        let mu_kl = init.constant("theta.mu_k", array2_to_tensor(loc_kl.view(), &dev)?)?;
        let l_raw_kll = init.constant(
            "theta.l_k_raw",
            array3_to_tensor(raw_from_lower(scale_chol_kll).view(), &dev)?,
        )?;
        Ok(Self { mu_kl, l_raw_kll })
    }

    pub fn scale_chol(&self) -> Result<Tensor> {
        lower_from_raw(&self.l_raw_kll)
    }

    /// scale matrices `L L'` (K x L x L)
    pub fn scale(&self) -> Result<Tensor> {
        let chol = self.scale_chol()?;
        chol.matmul(&chol.transpose(1, 2)?.contiguous()?)
    }
}

/// Multivariate Student-t log density of every latent draw under every
/// component
///
/// log t(x | μ, Σ, ν) = lnΓ((ν+L)/2) - lnΓ(ν/2) - L/2 log(νπ)
///                      - ½ log|Σ| - (ν+L)/2 log(1 + δ/ν),
/// δ = (x - μ)' Σ⁻¹ (x - μ)
///
/// * `x_nksl` - latent samples
/// * `loc_scale` - locations and scales
/// * `dof_k` - degrees of freedom (fixed)
///
/// # Returns `(n x k x s)` log densities
pub fn student_t_log_density(
    x_nksl: &Tensor,
    loc_scale: &StudentTLocScale,
    dof_k: &Array1<f64>,
) -> Result<Tensor> {
    let (nn, kk, ss, ll) = x_nksl.dims4()?;
    let dev = x_nksl.device();

    let chol_kll = loc_scale.scale_chol()?;
    let dx_nksl = x_nksl.broadcast_sub(&loc_scale.mu_kl.unsqueeze(0)?.unsqueeze(2)?)?;

    // (K, L, N*S) right-hand sides
    let rhs = dx_nksl
        .permute((1, 3, 0, 2))?
        .contiguous()?
        .reshape((kk, ll, nn * ss))?;
    let z = solve_lower(&chol_kll, &rhs)?;
    let delta_nks = z
        .sqr()?
        .sum(1)?
        .reshape((kk, nn, ss))?
        .permute((1, 0, 2))?
        .contiguous()?;

    let lf = ll as f64;
    let const_k: Vec<f32> = dof_k
        .iter()
        .map(|&nu| {
            let (a, _) = Gamma::ln_gamma((nu + lf) / 2.);
            let (b, _) = Gamma::ln_gamma(nu / 2.);
            (a - b - 0.5 * lf * (nu * std::f64::consts::PI).ln()) as f32
        })
        .collect();
    let const_k = Tensor::from_vec(const_k, (1, kk, 1), dev)?;
    let half_dof_k = Tensor::from_vec(
        dof_k.iter().map(|&nu| ((nu + lf) / 2.) as f32).collect::<Vec<_>>(),
        (1, kk, 1),
        dev,
    )?;
    let dof_k = array1_to_tensor(dof_k.view(), dev)?.reshape((1, kk, 1))?;

    let half_log_det = (cholesky_log_det(&chol_kll)? * 0.5)?.reshape((1, kk, 1))?;

    let tail = delta_nks
        .broadcast_div(&dof_k)?
        .affine(1., 1.)?
        .log()?
        .broadcast_mul(&half_dof_k)?;

    tail.neg()?
        .broadcast_add(&const_k)?
        .broadcast_sub(&half_log_det)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn univariate_cauchy_density() -> Result<()> {
        // ν = 1, L = 1: log t(x) = -log(π σ (1 + ((x - μ)/σ)²))
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let loc = array![[0.5]];
        let chol = Array3::from_elem((1, 1, 1), 2.0);
        let ls = StudentTLocScale::new(&loc, &chol, &mut WeightInit::new(&vm, &dev, 0))?;
        let x = Tensor::new(&[1.5f32, -3.0], &dev)?.reshape((1, 1, 2, 1))?;
        let lp = student_t_log_density(&x, &ls, &array![1.0])?
            .flatten_all()?
            .to_vec1::<f32>()?;
        for (i, xv) in [1.5f64, -3.0].iter().enumerate() {
            let z = (xv - 0.5) / 2.0;
            let expected = -(std::f64::consts::PI * 2.0 * (1. + z * z)).ln();
            assert_abs_diff_eq!(lp[i] as f64, expected, epsilon = 1e-4);
        }
        Ok(())
    }

    #[test]
    fn large_dof_approaches_gaussian() -> Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let loc = array![[0.0, 1.0], [2.0, -1.0]];
        let mut chol = Array3::zeros((2, 2, 2));
        chol[[0, 0, 0]] = 1.0;
        chol[[0, 1, 1]] = 1.0;
        chol[[1, 0, 0]] = 0.5;
        chol[[1, 1, 0]] = 0.1;
        chol[[1, 1, 1]] = 0.8;
        let ls = StudentTLocScale::new(&loc, &chol, &mut WeightInit::new(&vm, &dev, 0))?;

        let x = Tensor::new(&[0.3f32, 0.4, 1.9, -0.7], &dev)?.reshape((1, 2, 1, 2))?;
        let lp = student_t_log_density(&x, &ls, &array![1e4, 1e4])?
            .flatten_all()?
            .to_vec1::<f32>()?;

        let sigma = tensor_to_array3(&ls.scale()?)?;
        let gauss = mixture_param::gaussian::GaussianStandard {
            mu_kl: loc.clone(),
            sigma_kll: sigma,
        };
        let xs = [array![0.3, 0.4], array![1.9, -0.7]];
        for k in 0..2 {
            let expected = gauss.log_density(xs[k].view(), k).unwrap();
            assert_abs_diff_eq!(lp[k] as f64, expected, epsilon = 1e-2);
        }
        Ok(())
    }
}
