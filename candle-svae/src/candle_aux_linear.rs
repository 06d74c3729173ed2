use candle_core::{Device, Result, Tensor, Var};
use candle_nn::{Linear, VarMap};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

/// Register `init` as a trainable variable under `name`
///
/// If `name` already exists, its value is overwritten and the existing
/// variable is returned, so repeated construction reuses weights.
pub fn register_var(varmap: &VarMap, name: &str, init: Tensor) -> Result<Tensor> {
    let mut data = varmap
        .data()
        .lock()
        .map_err(|e| candle_core::Error::Msg(format!("variable map poisoned: {}", e)))?;

    if let Some(var) = data.get(name) {
        var.set(&init)?;
        return Ok(var.as_tensor().clone());
    }

    let var = Var::from_tensor(&init)?;
    let ret = var.as_tensor().clone();
    data.insert(name.to_string(), var);
    Ok(ret)
}

/// Seeded source of initial weights. Each layer draws from its own
/// stream derived from the base seed and a layer counter.
pub struct WeightInit<'a> {
    varmap: &'a VarMap,
    device: Device,
    seed: u64,
    counter: u64,
}

impl<'a> WeightInit<'a> {
    pub fn new(varmap: &'a VarMap, device: &Device, seed: u64) -> Self {
        Self {
            varmap,
            device: device.clone(),
            seed,
            counter: 0,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn varmap(&self) -> &VarMap {
        self.varmap
    }

    fn next_rng(&mut self) -> StdRng {
        self.counter += 1;
        StdRng::seed_from_u64(self.seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ self.counter)
    }

    /// `N(0, std²)` entries of the given shape
    pub fn randn(&mut self, name: &str, shape: (usize, usize), std: f64) -> Result<Tensor> {
        let mut rng = self.next_rng();
        let normal = Normal::new(0., std).map_err(|e| candle_core::Error::Msg(e.to_string()))?;
        let data: Vec<f32> = (0..shape.0 * shape.1)
            .map(|_| normal.sample(&mut rng) as f32)
            .collect();
        let init = Tensor::from_vec(data, shape, &self.device)?;
        register_var(self.varmap, name, init)
    }

    /// any precomputed initial value
    pub fn constant(&mut self, name: &str, init: Tensor) -> Result<Tensor> {
        register_var(self.varmap, name, init.to_device(&self.device)?)
    }
}

/// Dense layer `y = x W' + b` with `N(0, 1/in_dim)` weights and zero
/// bias
///
/// Creates `{name}.weight` (out x in) and `{name}.bias` (out)
pub fn seeded_linear(
    in_dim: usize,
    out_dim: usize,
    name: &str,
    init: &mut WeightInit,
) -> Result<Linear> {
    let std = (1. / in_dim as f64).sqrt();
    let ws = init.randn(&format!("{}.weight", name), (out_dim, in_dim), std)?;
    let bs = init.constant(
        &format!("{}.bias", name),
        Tensor::zeros(out_dim, candle_core::DType::F32, init.device())?,
    )?;
    Ok(Linear::new(ws, Some(bs)))
}
