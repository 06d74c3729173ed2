use crate::candle_aux_linear::{seeded_linear, WeightInit};
use candle_core::{Result, Tensor};
use candle_nn::{Linear, Module};

/// Hidden trunk `h ← tanh(W h + b)` shared by the encoder and the
/// decoder
pub struct TanhLayers {
    layers: Vec<Linear>,
    out_dim: usize,
}

impl Module for TanhLayers {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        self.layers
            .iter()
            .try_fold(input.clone(), |h, layer| layer.forward(&h)?.tanh())
    }
}

impl TanhLayers {
    /// Creates `{prefix}.{j}.weight` and `{prefix}.{j}.bias` for the
    /// j-th hidden layer
    ///
    /// * `in_dim` - input dimension
    /// * `hidden` - width of each hidden layer; none gives the identity
    pub fn new(in_dim: usize, hidden: &[usize], prefix: &str, init: &mut WeightInit) -> Result<Self> {
        let mut layers = Vec::with_capacity(hidden.len());
        let mut prev_dim = in_dim;
        for (j, &next_dim) in hidden.iter().enumerate() {
            layers.push(seeded_linear(prev_dim, next_dim, &format!("{}.{}", prefix, j), init)?);
            prev_dim = next_dim;
        }
        Ok(Self {
            layers,
            out_dim: prev_dim,
        })
    }

    /// width of the last hidden layer
    pub fn out_dim(&self) -> usize {
        self.out_dim
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn hidden_units_are_bounded() -> Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let trunk = TanhLayers::new(3, &[5, 4], "nn.test", &mut WeightInit::new(&vm, &dev, 0))?;
        assert_eq!(trunk.len(), 2);
        assert_eq!(trunk.out_dim(), 4);
        assert!(vm.data().lock().unwrap().contains_key("nn.test.1.bias"));

        let x = Tensor::randn(0f32, 100., (6, 3), &dev)?;
        let h = trunk.forward(&x)?;
        assert_eq!(h.dims(), &[6, 4]);
        assert!(h.flatten_all()?.to_vec1::<f32>()?.iter().all(|v| v.abs() <= 1.));
        Ok(())
    }

    #[test]
    fn no_hidden_layer_is_the_identity() -> Result<()> {
        let dev = Device::Cpu;
        let vm = VarMap::new();
        let trunk = TanhLayers::new(3, &[], "nn.test", &mut WeightInit::new(&vm, &dev, 0))?;
        assert!(trunk.is_empty());
        assert_eq!(trunk.out_dim(), 3);

        let x = Tensor::randn(0f32, 1., (2, 3), &dev)?;
        let diff = (trunk.forward(&x)? - &x)?.abs()?.sum_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.);
        Ok(())
    }
}
