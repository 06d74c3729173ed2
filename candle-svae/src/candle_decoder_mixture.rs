use crate::candle_aux_layers::*;
use crate::candle_aux_linear::*;
use crate::candle_model_traits::*;
use crate::tensor_util::softplus;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module};

/// Variance floor of the Gaussian observation model
pub const MIN_OBS_VAR: f64 = 1e-5;

/// Decoder shared by every mixture component; applied to each latent
/// draw independently
pub struct MixtureDecoder {
    n_features: usize,
    n_latent: usize,
    decoder_type: DecoderType,
    fc: TanhLayers,
    out1: Linear,
    out2: Option<Linear>,
}

impl MixtureDecoderT for MixtureDecoder {
    fn forward(&self, x_nksl: &Tensor) -> Result<DecoderOutput> {
        let (nn, kk, ss, ll) = x_nksl.dims4()?;
        let dd = self.n_features;

        // one flat batch of (n, k, s) rows; reshaped back at the end
        let x_bl = x_nksl.reshape((nn * kk * ss, ll))?;
        let h_bu = self.fc.forward(&x_bl)?;
        let out1_bd = self.out1.forward(&h_bu)?;

        let (mean_bd, out2_bd) = match (self.decoder_type, &self.out2) {
            (DecoderType::Gaussian, Some(out2)) => {
                let var_bd = (softplus(&out2.forward(&h_bu)?)? + MIN_OBS_VAR)?;
                (out1_bd, var_bd)
            }
            _ => (candle_nn::ops::sigmoid(&out1_bd)?, out1_bd),
        };

        Ok(DecoderOutput {
            mean_nksd: mean_bd.reshape((nn, kk, ss, dd))?,
            out2_nksd: out2_bd.reshape((nn, kk, ss, dd))?,
        })
    }

    fn decoder_type(&self) -> DecoderType {
        self.decoder_type
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl MixtureDecoder {
    /// Will create a new decoder module with these variables:
    ///
    /// * `nn.dec.fc.{}.weight` where {} is the layer index
    /// * `nn.dec.out.logits.weight` (Bernoulli) or
    ///   `nn.dec.out.mean.weight` and `nn.dec.out.var.weight` (Gaussian)
    ///
    /// # Arguments
    /// * `n_features` - the number of observed features
    /// * `n_latent` - latent dimension
    /// * `layers` - hidden layers (tanh), each with the dim
    /// * `decoder_type` - observation model
    /// * `init` - seeded weight initializer
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        decoder_type: DecoderType,
        init: &mut WeightInit,
    ) -> Result<Self> {
        let fc = TanhLayers::new(n_latent, layers, "nn.dec.fc", init)?;
        let prev_dim = fc.out_dim();

        let (out1, out2) = match decoder_type {
            DecoderType::Bernoulli => (
                seeded_linear(prev_dim, n_features, "nn.dec.out.logits", init)?,
                None,
            ),
            DecoderType::Gaussian => (
                seeded_linear(prev_dim, n_features, "nn.dec.out.mean", init)?,
                Some(seeded_linear(prev_dim, n_features, "nn.dec.out.var", init)?),
            ),
        };

        Ok(Self {
            n_features,
            n_latent,
            decoder_type,
            fc,
            out1,
            out2,
        })
    }
}
