use crate::candle_loss_functions::*;
use crate::candle_model_traits::*;
use candle_core::{Device, Result, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Random {0, 1} mask with exactly `round(ratio * n * d)` ones
/// (1 = missing), constant for a whole run
///
/// * `nrows` - n
/// * `ncols` - d
/// * `ratio` - fraction of missing entries in [0, 1]
/// * `seed` - random seed
pub fn generate_missing_data_mask(
    nrows: usize,
    ncols: usize,
    ratio: f64,
    seed: u64,
    device: &Device,
) -> Result<Tensor> {
    let ntot = nrows * ncols;
    let nmiss = ((ntot as f64) * ratio.clamp(0., 1.)).round() as usize;

    let mut rng = StdRng::seed_from_u64(seed);
    let mut mask = vec![0f32; ntot];
    for i in rand::seq::index::sample(&mut rng, ntot, nmiss) {
        mask[i] = 1.;
    }
    Tensor::from_vec(mask, (nrows, ncols), device)
}

/// Replace the masked entries of `y_nd` with noise of the observation
/// model: fair coin flips for binary data, standard normal otherwise
fn perturb_missing(
    y_nd: &Tensor,
    mask_nd: &Tensor,
    decoder_type: DecoderType,
    rng: &mut StdRng,
) -> Result<Tensor> {
    let (nn, dd) = y_nd.dims2()?;
    let noise: Vec<f32> = match decoder_type {
        DecoderType::Bernoulli => (0..nn * dd)
            .map(|_| if rng.random::<bool>() { 1. } else { 0. })
            .collect(),
        DecoderType::Gaussian => (0..nn * dd)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect(),
    };
    let noise = Tensor::from_vec(noise, (nn, dd), y_nd.device())?;
    let keep = mask_nd.affine(-1., 1.)?;
    y_nd.mul(&keep)?.add(&noise.mul(mask_nd)?)
}

/// Missing-data imputation losses
///
/// The masked entries are replaced by noise `nb_perturbations` times;
/// each perturbed copy goes through `impute_fn` and the reconstruction
/// is scored on the masked entries only.
///
/// * `y_nd` - complete data
/// * `mask_nd` - {0, 1} missing-data mask
/// * `impute_fn` - maps a perturbed batch to the decoder output and
///   log responsibilities, typically a closure over `inference`
/// * `nb_perturbations` - number of perturbed copies
/// * `decoder_type` - observation model
/// * `seed` - seed of the perturbation noise
///
/// # Returns `(mse, logprob)` averaged over perturbations
pub fn imputation_losses<F>(
    y_nd: &Tensor,
    mask_nd: &Tensor,
    impute_fn: F,
    nb_perturbations: usize,
    decoder_type: DecoderType,
    seed: u64,
) -> Result<(f32, f32)>
where
    F: Fn(&Tensor, usize) -> Result<(DecoderOutput, Tensor)>,
{
    let nb_perturbations = nb_perturbations.max(1);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut mse_tot = 0f32;
    let mut lp_tot = 0f32;

    for p in 0..nb_perturbations {
        let y_pert = perturb_missing(y_nd, mask_nd, decoder_type, &mut rng)?;
        let (recon, log_r_nk) = impute_fn(&y_pert, p)?;
        let r_nk = log_r_nk.exp()?;

        let mse = weighted_mse(y_nd, &recon.mean_nksd, &r_nk, Some(mask_nd))?;
        let llik_nksd = decoder_llik_elem(y_nd, &recon, decoder_type)?;
        let lp = mixture_logprob(&llik_nksd, &log_r_nk, Some(mask_nd))?;

        mse_tot += mse.to_scalar::<f32>()?;
        lp_tot += lp.to_scalar::<f32>()?;
    }

    let denom = nb_perturbations as f32;
    Ok((mse_tot / denom, lp_tot / denom))
}
