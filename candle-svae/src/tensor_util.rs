use candle_core::{Device, Result, Tensor};
use ndarray::prelude::*;

/// f64 matrix to an f32 tensor
pub fn array2_to_tensor(a: ArrayView2<f64>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = a.iter().map(|&x| x as f32).collect();
    Tensor::from_vec(data, a.dim(), device)
}

pub fn array1_to_tensor(a: ArrayView1<f64>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = a.iter().map(|&x| x as f32).collect();
    Tensor::from_vec(data, a.len(), device)
}

pub fn array3_to_tensor(a: ArrayView3<f64>, device: &Device) -> Result<Tensor> {
    let data: Vec<f32> = a.iter().map(|&x| x as f32).collect();
    Tensor::from_vec(data, a.dim(), device)
}

/// (N x D) tensor to an f64 matrix
pub fn tensor_to_array2(t: &Tensor) -> Result<Array2<f64>> {
    let (nn, dd) = t.dims2()?;
    let data: Vec<f64> = t
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|x| x as f64)
        .collect();
    Array2::from_shape_vec((nn, dd), data)
        .map_err(|e| candle_core::Error::Msg(e.to_string()))
}

pub fn tensor_to_array3(t: &Tensor) -> Result<Array3<f64>> {
    let dims = t.dims3()?;
    let data: Vec<f64> = t
        .flatten_all()?
        .to_vec1::<f32>()?
        .into_iter()
        .map(|x| x as f64)
        .collect();
    Array3::from_shape_vec(dims, data).map_err(|e| candle_core::Error::Msg(e.to_string()))
}

/// log(1 + exp(x)) without overflow
pub fn softplus(x: &Tensor) -> Result<Tensor> {
    let tail = x.abs()?.neg()?.exp()?.affine(1., 1.)?.log()?;
    x.relu()?.add(&tail)
}

/// inverse of softplus for positive scalars
pub fn inv_softplus(y: f64) -> f64 {
    if y > 20. {
        y
    } else {
        y.exp_m1().ln()
    }
}

/// log Σ exp along `dim`, keeping the reduced dimension
pub fn log_sum_exp_keepdim(x: &Tensor, dim: usize) -> Result<Tensor> {
    let x_max = x.max_keepdim(dim)?.detach();
    let sum = x.broadcast_sub(&x_max)?.exp()?.sum_keepdim(dim)?;
    sum.log()?.broadcast_add(&x_max)
}

/// false if any entry is NaN or infinite
pub fn all_finite(x: &Tensor) -> Result<bool> {
    let v = x.flatten_all()?.to_vec1::<f32>()?;
    Ok(v.iter().all(|x| x.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn softplus_is_stable() -> Result<()> {
        let x = Tensor::new(&[-100f32, -1., 0., 1., 100.], &Device::Cpu)?;
        let y = softplus(&x)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(y[0], 0., epsilon = 1e-6);
        assert_abs_diff_eq!(y[2], 2f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(y[3], (1. + 1f32.exp()).ln(), epsilon = 1e-5);
        assert_abs_diff_eq!(y[4], 100., epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn inv_softplus_round_trip() -> Result<()> {
        for v in [1e-3, 0.5, 2., 30.] {
            let raw = inv_softplus(v);
            let x = Tensor::new(&[raw as f32], &Device::Cpu)?;
            let y = softplus(&x)?.to_vec1::<f32>()?;
            assert_abs_diff_eq!(y[0] as f64, v, epsilon = 1e-4 * v.max(1.));
        }
        Ok(())
    }

    #[test]
    fn log_sum_exp_matches_direct() -> Result<()> {
        let x = Tensor::new(&[[0f32, 1., 2.], [-3., 5., 0.5]], &Device::Cpu)?;
        let y = log_sum_exp_keepdim(&x, 1)?.to_vec2::<f32>()?;
        let direct = (1f32 + 1f32.exp() + 2f32.exp()).ln();
        assert_abs_diff_eq!(y[0][0], direct, epsilon = 1e-5);
        Ok(())
    }
}
