use crate::candle_linalg::*;
use candle_core::{Result, Tensor};

pub const HALF_LOG_2PI: f64 = 0.918_938_533_204_672_7;

/// Per data point and component posterior natural parameters
/// `phi_tilde(n,k) = phi_local(n) + phi_gmm(k)`
///
/// * `eta1_nkl` - η1
/// * `prec_nkll` - `-2 η2`
/// * `chol_nkll` - lower Cholesky factor `U` of `-2 η2`
/// * `mu_nkl` - posterior mean
/// * `log_partition_nk` - A(η)
pub struct PhiTilde {
    pub eta1_nkl: Tensor,
    pub prec_nkll: Tensor,
    pub chol_nkll: Tensor,
    pub mu_nkl: Tensor,
    pub log_partition_nk: Tensor,
}

impl PhiTilde {
    pub fn dims(&self) -> Result<(usize, usize, usize)> {
        self.eta1_nkl.dims3()
    }
}

/// Conjugate combination of diagonal local potentials with full
/// recognition-mixture Gaussians
///
/// * `eta1_nl` - local η1 (N x L)
/// * `prec_nl` - local diagonal precision (N x L)
/// * `eta1_kl` - mixture η1 (K x L)
/// * `prec_kll` - mixture precision (K x L x L)
pub fn combine_natural(
    eta1_nl: &Tensor,
    prec_nl: &Tensor,
    eta1_kl: &Tensor,
    prec_kll: &Tensor,
) -> Result<PhiTilde> {
    let (nn, ll) = eta1_nl.dims2()?;
    let kk = eta1_kl.dim(0)?;

    let eta1_nkl = eta1_nl.unsqueeze(1)?.broadcast_add(&eta1_kl.unsqueeze(0)?)?;

    let eye = Tensor::eye(ll, prec_nl.dtype(), prec_nl.device())?;
    let diag_n1ll = prec_nl
        .reshape((nn, 1, 1, ll))?
        .broadcast_mul(&eye.reshape((1, 1, ll, ll))?)?;
    let prec_nkll = diag_n1ll.broadcast_add(&prec_kll.unsqueeze(0)?)?;

    let prec_bll = prec_nkll.reshape((nn * kk, ll, ll))?;
    let chol_bll = batched_cholesky(&prec_bll)?;
    let eta1_bl1 = eta1_nkl.reshape((nn * kk, ll, 1))?;
    let mu_bl = cholesky_solve(&chol_bll, &eta1_bl1)?.squeeze(2)?;

    let quad_b = eta1_bl1.squeeze(2)?.mul(&mu_bl)?.sum(1)?;
    let log_partition_b = ((quad_b - cholesky_log_det(&chol_bll)?)? * 0.5)?;

    Ok(PhiTilde {
        eta1_nkl,
        prec_nkll,
        chol_nkll: chol_bll.reshape((nn, kk, ll, ll))?,
        mu_nkl: mu_bl.reshape((nn, kk, ll))?,
        log_partition_nk: log_partition_b.reshape((nn, kk))?,
    })
}

/// log N(x | η) = ⟨η1, x⟩ + x'η2 x - A(η) - L/2 log 2π, written with
/// the precision `-2 η2`
///
/// Parameters broadcast over the leading data axis, so the same
/// routine serves per-datapoint `phi_tilde` and shared `theta`.
///
/// * `x_nksl` - samples (N x K x S x L)
/// * `eta1_nkl` - (N x K x L) or (1 x K x L)
/// * `prec_nkll` - (N x K x L x L) or (1 x K x L x L)
/// * `log_partition_nk` - (N x K) or (1 x K)
///
/// # Returns `(N x K x S)` log densities
pub fn gaussian_logprob_natural(
    x_nksl: &Tensor,
    eta1_nkl: &Tensor,
    prec_nkll: &Tensor,
    log_partition_nk: &Tensor,
) -> Result<Tensor> {
    let (nn, kk, ss, ll) = x_nksl.dims4()?;

    let lin_nks = x_nksl.broadcast_mul(&eta1_nkl.unsqueeze(2)?)?.sum(3)?;

    let prec = prec_nkll.broadcast_as((nn, kk, ll, ll))?.contiguous()?;
    let px_nksl = x_nksl.contiguous()?.matmul(&prec)?;
    let quad_nks = px_nksl.mul(x_nksl)?.sum(3)?;

    let a_nk1 = log_partition_nk.unsqueeze(2)?;
    let ret = lin_nks.sub(&(quad_nks * 0.5)?)?.broadcast_sub(&a_nk1)?;
    debug_assert_eq!(ret.dims(), &[nn, kk, ss]);
    ret - (ll as f64 * HALF_LOG_2PI)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_util::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;
    use ndarray::prelude::*;

    #[test]
    fn natural_logprob_matches_standard_density() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let mu_kl = array![[1.0, -2.0], [0.5, 0.25]];
        let mut sigma_kll = Array3::zeros((2, 2, 2));
        sigma_kll
            .index_axis_mut(Axis(0), 0)
            .assign(&array![[2.0, 0.3], [0.3, 1.0]]);
        sigma_kll
            .index_axis_mut(Axis(0), 1)
            .assign(&array![[0.5, -0.1], [-0.1, 0.7]]);
        let std = mixture_param::gaussian::GaussianStandard { mu_kl, sigma_kll };
        let nat = std.to_natural()?;
        let a_k = nat.log_partition()?;

        let eta1 = array2_to_tensor(nat.eta1_kl.view(), &dev)?.unsqueeze(0)?;
        let prec = array3_to_tensor((&nat.eta2_kll * -2.).view(), &dev)?.unsqueeze(0)?;
        let a = array1_to_tensor(a_k.view(), &dev)?.unsqueeze(0)?;

        let x = Tensor::new(&[0.3f32, -0.7, 1.2, 0.1, -0.5, 0.4, 2.0, 2.0], &dev)?
            .reshape((1, 2, 2, 2))?;
        let lp = gaussian_logprob_natural(&x, &eta1, &prec, &a)?.to_vec3::<f32>()?;

        let xv = [[[0.3, -0.7], [1.2, 0.1]], [[-0.5, 0.4], [2.0, 2.0]]];
        for k in 0..2 {
            for s in 0..2 {
                let x_l = array![xv[k][s][0], xv[k][s][1]];
                let expected = std.log_density(x_l.view(), k)?;
                assert_abs_diff_eq!(lp[0][k][s] as f64, expected, epsilon = 1e-4);
            }
        }
        Ok(())
    }

    #[test]
    fn combined_partition_is_consistent() -> Result<()> {
        // A(φ̃) evaluated via its own mean and covariance
        let dev = Device::Cpu;
        let eta1_nl = Tensor::new(&[[1f32, -1.], [0.5, 2.]], &dev)?;
        let prec_nl = Tensor::new(&[[2f32, 0.5], [1., 1.]], &dev)?;
        let eta1_kl = Tensor::new(&[[0f32, 0.], [1., 1.]], &dev)?;
        let prec_kll = Tensor::new(&[[[1f32, 0.2], [0.2, 1.]], [[3., 0.], [0., 0.5]]], &dev)?;
        let phi = combine_natural(&eta1_nl, &prec_nl, &eta1_kl, &prec_kll)?;
        assert_eq!(phi.mu_nkl.dims(), &[2, 2, 2]);

        // P μ = η1
        let pm = phi
            .prec_nkll
            .matmul(&phi.mu_nkl.unsqueeze(3)?)?
            .squeeze(3)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        let eta1 = phi.eta1_nkl.flatten_all()?.to_vec1::<f32>()?;
        for (a, b) in pm.iter().zip(eta1.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-4);
        }

        // n = 0, k = 0: P = [[3, .2], [.2, 1.5]], η1 = (1, -1)
        let p = [[3f64, 0.2], [0.2, 1.5]];
        let det = p[0][0] * p[1][1] - p[0][1] * p[1][0];
        let inv = [[p[1][1] / det, -p[0][1] / det], [-p[1][0] / det, p[0][0] / det]];
        let e = [1f64, -1.];
        let quad = e[0] * (inv[0][0] * e[0] + inv[0][1] * e[1]) + e[1] * (inv[1][0] * e[0] + inv[1][1] * e[1]);
        let expected = 0.5 * quad - 0.5 * det.ln();
        let a = phi.log_partition_nk.to_vec2::<f32>()?;
        assert_abs_diff_eq!(a[0][0] as f64, expected, epsilon = 1e-4);
        Ok(())
    }
}
