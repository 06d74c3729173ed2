use crate::candle_gaussian::*;
use crate::candle_loss_functions::decoder_log_likelihood;
use crate::candle_model_traits::*;
use crate::candle_student_t::*;
use crate::error::Result;
use crate::tensor_util::*;
use candle_core::{Device, Tensor};
use mixture_param::{GmmNatural, SmmState};

/// Pieces of the bound, each a scalar tensor summed over the batch
///
/// * `neg_rec_err` - E_q[log p(y | x)]
/// * `log_numerator` - Σ r E[log q(x | φ̃) + log r]
/// * `log_denominator` - Σ r E[log p(x | θ) + E log π]
/// * `regularizer` - `log_numerator - log_denominator`
pub struct ElboDetails {
    pub neg_rec_err: Tensor,
    pub log_numerator: Tensor,
    pub log_denominator: Tensor,
    pub regularizer: Tensor,
}

impl ElboDetails {
    pub fn to_scalars(&self) -> Result<[f32; 4]> {
        Ok([
            self.neg_rec_err.to_scalar::<f32>()?,
            self.log_numerator.to_scalar::<f32>()?,
            self.log_denominator.to_scalar::<f32>()?,
            self.regularizer.to_scalar::<f32>()?,
        ])
    }
}

/// Mixture posterior `theta` as constant tensors: natural parameters
/// of the plug-in Gaussians and `E[log π]`
pub struct ThetaTensors {
    pub eta1_1kl: Tensor,
    pub prec_1kll: Tensor,
    pub log_partition_1k: Tensor,
    pub elog_pi_1k: Tensor,
}

impl ThetaTensors {
    pub fn from_gmm(theta: &GmmNatural, device: &Device) -> Result<Self> {
        let gauss = theta.expected_gaussian()?.to_natural()?;
        let a_k = gauss.log_partition()?;
        let elog_pi = theta.expected_log_pi()?;
        let prec = &gauss.eta2_kll * (-2.);
        Ok(Self {
            eta1_1kl: array2_to_tensor(gauss.eta1_kl.view(), device)?.unsqueeze(0)?,
            prec_1kll: array3_to_tensor(prec.view(), device)?.unsqueeze(0)?,
            log_partition_1k: array1_to_tensor(a_k.view(), device)?.unsqueeze(0)?,
            elog_pi_1k: array1_to_tensor(elog_pi.view(), device)?.unsqueeze(0)?,
        })
    }
}

/// Shared tail of both bounds
///
/// reconstruction: Σ_nk r(n,k) mean_s llik(n,k,s)
/// regularizer: Σ_nk r(n,k) mean_s [num(n,k,s) - den(n,k,s)]
fn assemble_elbo(
    llik_nks: &Tensor,
    log_num_nks: &Tensor,
    log_den_nks: &Tensor,
    log_r_nk: &Tensor,
) -> Result<(Tensor, ElboDetails)> {
    let r_nk = log_r_nk.exp()?;

    let neg_rec_err = llik_nks.mean(2)?.mul(&r_nk)?.sum_all()?;
    let num_nk = log_num_nks.mean(2)?.mul(&r_nk)?;
    let den_nk = log_den_nks.mean(2)?.mul(&r_nk)?;

    let log_numerator = num_nk.sum_all()?;
    let log_denominator = den_nk.sum_all()?;
    let regularizer = log_numerator.sub(&log_denominator)?;
    let elbo = neg_rec_err.sub(&regularizer)?;

    Ok((
        elbo,
        ElboDetails {
            neg_rec_err,
            log_numerator,
            log_denominator,
            regularizer,
        },
    ))
}

/// Evidence lower bound of the Gaussian-mixture SVAE
///
/// ELBO = E_q[log p(y | x)] - Σ r E_s[ log q(x | φ̃) + log r
///                                    - log N(x | E μ, Σ) - E log π ]
///
/// `theta` enters as constants: its gradient comes from the CVI update,
/// not from back-propagation.
///
/// # Arguments
/// * `y_nd` - observed batch
/// * `recon` - decoder output for every draw
/// * `theta` - mixture posterior
/// * `phi_tilde` - local posterior natural parameters
/// * `x_k_samples` - latent draws (N x K x S x L)
/// * `log_r_nk` - log responsibilities
/// * `decoder_type` - observation model
pub fn compute_elbo(
    y_nd: &Tensor,
    recon: &DecoderOutput,
    theta: &GmmNatural,
    phi_tilde: &PhiTilde,
    x_k_samples: &Tensor,
    log_r_nk: &Tensor,
    decoder_type: DecoderType,
) -> Result<(Tensor, ElboDetails)> {
    let theta_t = ThetaTensors::from_gmm(theta, y_nd.device())?;
    compute_elbo_with(y_nd, recon, &theta_t, phi_tilde, x_k_samples, log_r_nk, decoder_type)
}

/// `compute_elbo` with theta already converted to tensors
pub fn compute_elbo_with(
    y_nd: &Tensor,
    recon: &DecoderOutput,
    theta: &ThetaTensors,
    phi_tilde: &PhiTilde,
    x_k_samples: &Tensor,
    log_r_nk: &Tensor,
    decoder_type: DecoderType,
) -> Result<(Tensor, ElboDetails)> {
    let llik_nks = decoder_log_likelihood(y_nd, recon, decoder_type)?;

    let log_num_nks = gaussian_logprob_natural(
        x_k_samples,
        &phi_tilde.eta1_nkl,
        &phi_tilde.prec_nkll,
        &phi_tilde.log_partition_nk,
    )?
    .broadcast_add(&log_r_nk.unsqueeze(2)?)?;

    let log_den_nks = gaussian_logprob_natural(
        x_k_samples,
        &theta.eta1_1kl,
        &theta.prec_1kll,
        &theta.log_partition_1k,
    )?
    .broadcast_add(&theta.elog_pi_1k.unsqueeze(2)?)?;

    assemble_elbo(&llik_nks, &log_num_nks, &log_den_nks, log_r_nk)
}

/// Evidence lower bound of the Student-t mixture SVAE
///
/// Same structure as `compute_elbo`, but the denominator is the
/// Student-t density at the point-estimated locations and scales; the
/// only variational prior term is `E[log π]` of the Dirichlet.
/// Gradients reach `loc_scale` through the denominator.
#[allow(clippy::too_many_arguments)]
pub fn compute_elbo_smm(
    y_nd: &Tensor,
    recon: &DecoderOutput,
    smm: &SmmState,
    loc_scale: &StudentTLocScale,
    phi_tilde: &PhiTilde,
    x_k_samples: &Tensor,
    log_r_nk: &Tensor,
    decoder_type: DecoderType,
) -> Result<(Tensor, ElboDetails)> {
    let dev = y_nd.device();
    let llik_nks = decoder_log_likelihood(y_nd, recon, decoder_type)?;

    let log_num_nks = gaussian_logprob_natural(
        x_k_samples,
        &phi_tilde.eta1_nkl,
        &phi_tilde.prec_nkll,
        &phi_tilde.log_partition_nk,
    )?
    .broadcast_add(&log_r_nk.unsqueeze(2)?)?;

    let elog_pi = smm.dirichlet.expected_log_pi()?;
    let elog_pi_1k1 = array1_to_tensor(elog_pi.view(), dev)?
        .unsqueeze(0)?
        .unsqueeze(2)?;
    let log_den_nks = student_t_log_density(x_k_samples, loc_scale, &smm.dof_k)?
        .broadcast_add(&elog_pi_1k1)?;

    assemble_elbo(&llik_nks, &log_num_nks, &log_den_nks, log_r_nk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candle_aux_linear::WeightInit;
    use crate::candle_decoder_mixture::MixtureDecoder;
    use crate::candle_encoder_natparam::NatParamEncoder;
    use crate::candle_inference::*;
    use crate::candle_recognition_gmm::init_recognition_params;
    use approx::assert_abs_diff_eq;
    use candle_nn::VarMap;

    #[test]
    fn regularizer_is_numerator_minus_denominator() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let mut init = WeightInit::new(&vm, &dev, 0);
        let (_, theta) = mixture_param::init_mm(3, 2, 0);
        let phi_gmm = init_recognition_params(&theta, &mut init)?;
        let enc = NatParamEncoder::new(4, 2, &[8], &mut init)?;
        let dec = MixtureDecoder::new(4, 2, &[8], DecoderType::Gaussian, &mut init)?;

        let y = Tensor::randn(0f32, 1., (6, 4), &dev)?;
        let out = inference(&y, &phi_gmm, &enc, &dec, 3, InferenceSeed::derive(0, 0, 0))?;
        let (elbo, details) = compute_elbo(
            &y,
            &out.recon,
            &theta,
            &out.phi_tilde,
            &out.x_k_samples,
            &out.log_r_nk,
            DecoderType::Gaussian,
        )?;
        let [rec, num, den, reg] = details.to_scalars()?;
        assert_abs_diff_eq!(reg, num - den, epsilon = 1e-3);
        assert_abs_diff_eq!(elbo.to_scalar::<f32>()?, rec - reg, epsilon = 1e-3);
        assert!(elbo.to_scalar::<f32>()?.is_finite());

        // responsibilities are normalized
        let r = out.log_r_nk.exp()?.sum(1)?.to_vec1::<f32>()?;
        for x in r {
            assert_abs_diff_eq!(x, 1.0, epsilon = 1e-5);
        }
        Ok(())
    }
}
