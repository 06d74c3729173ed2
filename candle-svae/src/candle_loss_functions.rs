use crate::candle_model_traits::{DecoderOutput, DecoderType};
use crate::tensor_util::{log_sum_exp_keepdim, softplus};
use candle_core::{Result, Tensor};

const LOG_2PI: f64 = 1.837_877_066_409_345_5;

/// observed `y_nd` lined up against `(n, k, s, d)` reconstructions
fn expand_obs(y_nd: &Tensor) -> Result<Tensor> {
    y_nd.unsqueeze(1)?.unsqueeze(1)
}

/// Elementwise Bernoulli log-likelihood with logits
///
/// llik(n,k,s,d) = y(n,d) * l(n,k,s,d) - log(1 + exp(l(n,k,s,d)))
///
/// * `y_nd` - data in {0, 1}
/// * `logits_nksd` - decoder logits
pub fn bernoulli_llik_elem(y_nd: &Tensor, logits_nksd: &Tensor) -> Result<Tensor> {
    logits_nksd
        .broadcast_mul(&expand_obs(y_nd)?)?
        .sub(&softplus(logits_nksd)?)
}

/// Elementwise diagonal Gaussian log-likelihood
///
/// llik = -0.5 * [ log 2π + log σ² + (y - μ)² / σ² ]
///
/// * `y_nd` - data tensor (observed data)
/// * `mean_nksd` - reconstruction mean
/// * `var_nksd` - reconstruction variance, positive
pub fn gaussian_llik_elem(y_nd: &Tensor, mean_nksd: &Tensor, var_nksd: &Tensor) -> Result<Tensor> {
    let sq = mean_nksd.broadcast_sub(&expand_obs(y_nd)?)?.sqr()?;
    let quad = sq.div(var_nksd)?;
    (quad.add(&var_nksd.log()?)? + LOG_2PI)? * (-0.5)
}

/// Elementwise log-likelihood of the decoder's observation model
pub fn decoder_llik_elem(
    y_nd: &Tensor,
    recon: &DecoderOutput,
    decoder_type: DecoderType,
) -> Result<Tensor> {
    match decoder_type {
        DecoderType::Bernoulli => bernoulli_llik_elem(y_nd, &recon.out2_nksd),
        DecoderType::Gaussian => gaussian_llik_elem(y_nd, &recon.mean_nksd, &recon.out2_nksd),
    }
}

/// Σ_d log p(y(n,d) | x(n,k,s)), shaped (n x k x s)
pub fn decoder_log_likelihood(
    y_nd: &Tensor,
    recon: &DecoderOutput,
    decoder_type: DecoderType,
) -> Result<Tensor> {
    decoder_llik_elem(y_nd, recon, decoder_type)?.sum(3)
}

/// Responsibility-weighted squared error
///
/// mse = mean_n Σ_k r(n,k) Σ_d (y(n,d) - mean_s ŷ(n,k,s,d))²
///
/// * `y_nd` - observed data
/// * `mean_nksd` - reconstruction mean
/// * `r_nk` - responsibilities
/// * `mask_nd` - optional {0, 1} mask restricting the dimensions
pub fn weighted_mse(
    y_nd: &Tensor,
    mean_nksd: &Tensor,
    r_nk: &Tensor,
    mask_nd: Option<&Tensor>,
) -> Result<Tensor> {
    let nn = y_nd.dim(0)?;
    let y_hat_nkd = mean_nksd.mean(2)?;
    let sq_nkd = y_hat_nkd.broadcast_sub(&y_nd.unsqueeze(1)?)?.sqr()?;
    let sq_nkd = match mask_nd {
        Some(mask) => sq_nkd.broadcast_mul(&mask.unsqueeze(1)?)?,
        None => sq_nkd,
    };
    (sq_nkd.sum(2)?.mul(r_nk)?.sum_all()? / nn as f64)
}

/// Average predictive log-probability of the data under the mixture
/// of reconstructions
///
/// log p(y(n)) ≈ log Σ_k r(n,k) mean_s p(y(n) | x(n,k,s))
///
/// * `llik_nksd` - elementwise log-likelihood
/// * `log_r_nk` - log responsibilities
/// * `mask_nd` - optional {0, 1} mask restricting the dimensions
pub fn mixture_logprob(
    llik_nksd: &Tensor,
    log_r_nk: &Tensor,
    mask_nd: Option<&Tensor>,
) -> Result<Tensor> {
    let (nn, kk, ss, _) = llik_nksd.dims4()?;
    let llik_nks = match mask_nd {
        Some(mask) => llik_nksd.broadcast_mul(&expand_obs(mask)?)?.sum(3)?,
        None => llik_nksd.sum(3)?,
    };
    let log_w = (log_r_nk.unsqueeze(2)? - (ss as f64).ln())?;
    let joint = llik_nks.broadcast_add(&log_w)?.reshape((nn, kk * ss))?;
    (log_sum_exp_keepdim(&joint, 1)?.sum_all()? / nn as f64)
}

/// Bernoulli predictive log-probability, see `mixture_logprob`
pub fn bernoulli_logprob(y_nd: &Tensor, logits_nksd: &Tensor, log_r_nk: &Tensor) -> Result<Tensor> {
    mixture_logprob(&bernoulli_llik_elem(y_nd, logits_nksd)?, log_r_nk, None)
}

/// Gaussian predictive log-probability, see `mixture_logprob`
pub fn diagonal_gaussian_logprob(
    y_nd: &Tensor,
    mean_nksd: &Tensor,
    var_nksd: &Tensor,
    log_r_nk: &Tensor,
) -> Result<Tensor> {
    mixture_logprob(&gaussian_llik_elem(y_nd, mean_nksd, var_nksd)?, log_r_nk, None)
}

/// Cluster entropy and purity of hard assignments `argmax_k r(n,k)`
/// against reference labels
///
/// * entropy - Σ_k (n_k / n) H(labels in cluster k)
/// * purity - Σ_k max_c count(k, c) / n
///
/// Returns `None` when no labels are available.
pub fn purity(r_nk: &Tensor, labels: Option<&[usize]>) -> Result<Option<(f32, f32)>> {
    let labels = match labels {
        Some(l) => l,
        None => return Ok(None),
    };

    let assign = r_nk.argmax(1)?.to_vec1::<u32>()?;
    if assign.len() != labels.len() {
        return Err(candle_core::Error::Msg(format!(
            "{} assignments vs. {} labels",
            assign.len(),
            labels.len()
        )));
    }

    let kk = r_nk.dim(1)?;
    let cc = labels.iter().max().map(|&c| c + 1).unwrap_or(0);
    let mut counts = vec![vec![0usize; cc]; kk];
    for (&k, &c) in assign.iter().zip(labels.iter()) {
        counts[k as usize][c] += 1;
    }

    let nn = labels.len() as f32;
    let mut entropy = 0f32;
    let mut pure = 0f32;
    for row in counts.iter() {
        let n_k: usize = row.iter().sum();
        if n_k == 0 {
            continue;
        }
        let h: f32 = row
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f32 / n_k as f32;
                -p * p.ln()
            })
            .sum();
        entropy += n_k as f32 / nn * h;
        pure += row.iter().copied().max().unwrap_or(0) as f32;
    }

    Ok(Some((entropy, pure / nn)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};

    #[test]
    fn bernoulli_llik_is_finite_and_non_positive() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[0f32, 1., 1.], [1., 0., 0.]], &dev)?;
        let logits = Tensor::new(&[-50f32, -2., 0., 3., 50., 0.1], &dev)?.reshape((2, 1, 1, 3))?;
        let logits = logits.broadcast_as((2, 2, 3, 3))?.contiguous()?;
        let llik = bernoulli_llik_elem(&y, &logits)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(llik.iter().all(|x| x.is_finite() && *x <= 0.));
        Ok(())
    }

    #[test]
    fn gaussian_llik_matches_closed_form() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1f32, -2.]], &dev)?;
        let mean = Tensor::new(&[0.5f32, 0.], &dev)?.reshape((1, 1, 1, 2))?;
        let var = Tensor::new(&[2f32, 0.25], &dev)?.reshape((1, 1, 1, 2))?;
        let llik = gaussian_llik_elem(&y, &mean, &var)?.flatten_all()?.to_vec1::<f32>()?;
        let expected0 = -0.5 * (LOG_2PI + 2f64.ln() + 0.25 / 2.);
        let expected1 = -0.5 * (LOG_2PI + 0.25f64.ln() + 4. / 0.25);
        assert_abs_diff_eq!(llik[0] as f64, expected0, epsilon = 1e-5);
        assert_abs_diff_eq!(llik[1] as f64, expected1, epsilon = 1e-5);
        assert!(llik.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn weighted_mse_of_exact_reconstruction_is_zero() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1f32, 2.], [3., 4.]], &dev)?;
        let mean = y.unsqueeze(1)?.unsqueeze(1)?.broadcast_as((2, 3, 4, 2))?.contiguous()?;
        let r = (Tensor::ones((2, 3), DType::F32, &dev)? / 3.)?;
        let mse = weighted_mse(&y, &mean, &r, None)?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(mse, 0., epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn perfect_clustering_has_unit_purity() -> Result<()> {
        let dev = Device::Cpu;
        let r = Tensor::new(&[[0.9f32, 0.1], [0.2, 0.8], [0.7, 0.3], [0.4, 0.6]], &dev)?;
        let (entropy, pure) = purity(&r, Some(&[1, 0, 1, 0]))?.unwrap();
        assert_abs_diff_eq!(pure, 1., epsilon = 1e-6);
        assert_abs_diff_eq!(entropy, 0., epsilon = 1e-6);
        assert!(purity(&r, None)?.is_none());

        let (entropy, pure) = purity(&r, Some(&[1, 1, 0, 0]))?.unwrap();
        assert_abs_diff_eq!(pure, 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(entropy, 2f32.ln(), epsilon = 1e-6);
        Ok(())
    }
}
