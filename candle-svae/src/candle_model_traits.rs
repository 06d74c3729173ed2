use candle_core::{Result, Tensor};
use serde::{Deserialize, Serialize};

/// Observation model of the decoder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoderType {
    /// binary data, logits output
    Bernoulli,
    /// real-valued data, mean and variance output
    Gaussian,
}

/// Diagonal Gaussian natural parameters produced per data point by the
/// recognition network
///
/// * `mean_nl`, `var_nl` - raw encoder output in mean/variance form
/// * `eta1_nl` - `mean / var`
/// * `prec_nl` - diagonal of `-2 η2`, i.e., `1 / var`
pub struct LocalNatParams {
    pub mean_nl: Tensor,
    pub var_nl: Tensor,
    pub eta1_nl: Tensor,
    pub prec_nl: Tensor,
}

/// Decoder output for every (data point, component, sample)
///
/// * `mean_nksd` - Bernoulli probability or Gaussian mean
/// * `out2_nksd` - Bernoulli logits or Gaussian variance
pub struct DecoderOutput {
    pub mean_nksd: Tensor,
    pub out2_nksd: Tensor,
}

pub trait NatParamEncoderT {
    /// An encoder that spits out local natural parameters
    ///
    /// # Arguments
    /// * `y_nd` - input data (n x d)
    fn forward_natparam(&self, y_nd: &Tensor) -> Result<LocalNatParams>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}

pub trait MixtureDecoderT {
    /// A decoder that spits out reconstruction of each latent sample
    ///
    /// * `x_nksl` - latent samples (n x k x s x l)
    fn forward(&self, x_nksl: &Tensor) -> Result<DecoderOutput>;

    fn decoder_type(&self) -> DecoderType;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
