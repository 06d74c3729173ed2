use crate::candle_aux_layers::*;
use crate::candle_aux_linear::*;
use crate::candle_model_traits::*;
use crate::tensor_util::softplus;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module};

/// Variance floor of the local Gaussian potentials
pub const MIN_LOCAL_VAR: f64 = 1e-5;

/// Recognition network mapping each data point to a diagonal Gaussian
/// potential in natural parameters
pub struct NatParamEncoder {
    n_features: usize,
    n_latent: usize,
    fc: TanhLayers,
    z_mean: Linear,
    z_var: Linear,
}

impl NatParamEncoderT for NatParamEncoder {
    fn forward_natparam(&self, y_nd: &Tensor) -> Result<LocalNatParams> {
        let h_nu = self.fc.forward(y_nd)?;
        let mean_nl = self.z_mean.forward(&h_nu)?;
        let var_nl = (softplus(&self.z_var.forward(&h_nu)?)? + MIN_LOCAL_VAR)?;
        let prec_nl = var_nl.recip()?;
        let eta1_nl = mean_nl.mul(&prec_nl)?;
        Ok(LocalNatParams {
            mean_nl,
            var_nl,
            eta1_nl,
            prec_nl,
        })
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl NatParamEncoder {
    /// Will create a new encoder module with these variables:
    ///
    /// * `nn.enc.fc.{}.weight` where {} is the layer index
    /// * `nn.enc.z.mean.weight`
    /// * `nn.enc.z.var.weight`
    ///
    /// # Arguments
    /// * `n_features` - the number of observed features
    /// * `n_latent` - latent dimension
    /// * `layers` - hidden layers (tanh), each with the dim
    /// * `init` - seeded weight initializer
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        init: &mut WeightInit,
    ) -> Result<Self> {
        let fc = TanhLayers::new(n_features, layers, "nn.enc.fc", init)?;
        let prev_dim = fc.out_dim();

        let z_mean = seeded_linear(prev_dim, n_latent, "nn.enc.z.mean", init)?;
        let z_var = seeded_linear(prev_dim, n_latent, "nn.enc.z.var", init)?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_mean,
            z_var,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn local_potentials_have_positive_precision() -> Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let enc = NatParamEncoder::new(5, 2, &[8, 8], &mut WeightInit::new(&vm, &dev, 0))?;
        let y = Tensor::randn(0f32, 3., (10, 5), &dev)?;
        let local = enc.forward_natparam(&y)?;
        assert_eq!(local.eta1_nl.dims(), &[10, 2]);
        let prec = local.prec_nl.flatten_all()?.to_vec1::<f32>()?;
        assert!(prec.iter().all(|p| p.is_finite() && *p > 0.));

        // η1 / precision recovers the mean
        let back = local.eta1_nl.div(&local.prec_nl)?;
        let diff = back.sub(&local.mean_nl)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-4);
        assert_eq!(vm.all_vars().len(), 8);
        assert_eq!(local.var_nl.dtype(), DType::F32);
        Ok(())
    }
}
