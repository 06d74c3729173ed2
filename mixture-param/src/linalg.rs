use crate::error::*;
use nalgebra::DMatrix;
use ndarray::prelude::*;

/// Added to the diagonal before every Cholesky factorization of a
/// covariance or precision matrix. No other regularization is applied.
pub const COV_EPS: f64 = 1e-8;

pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (nr, nc) = a.dim();
    DMatrix::from_fn(nr, nc, |i, j| a[[i, j]])
}

pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// symmetrize `(a + a')/2`
pub fn symmetrize(a: ArrayView2<f64>) -> Array2<f64> {
    (&a + &a.t()) * 0.5
}

/// Lower Cholesky factor of a symmetric positive definite matrix
///
/// * `a` - square matrix
/// * `component` - mixture component index for error reporting
pub fn cholesky_lower(a: ArrayView2<f64>, component: usize) -> Result<DMatrix<f64>> {
    let (nr, nc) = a.dim();
    if nr != nc {
        return Err(ParamError::Shape(format!("{} x {} is not square", nr, nc)));
    }
    if a.iter().any(|x| !x.is_finite()) {
        return Err(ParamError::numerical(component, "non-finite matrix entry"));
    }

    let mut m = to_dmatrix(symmetrize(a).view());
    for i in 0..nr {
        m[(i, i)] += COV_EPS;
    }

    m.cholesky()
        .map(|chol| chol.l())
        .ok_or_else(|| ParamError::numerical(component, "matrix is not positive definite"))
}

/// Inverse of a symmetric positive definite matrix
pub fn spd_inverse(a: ArrayView2<f64>, component: usize) -> Result<Array2<f64>> {
    let (nr, _) = a.dim();
    if a.iter().any(|x| !x.is_finite()) {
        return Err(ParamError::numerical(component, "non-finite matrix entry"));
    }
    let mut m = to_dmatrix(symmetrize(a).view());
    for i in 0..nr {
        m[(i, i)] += COV_EPS;
    }
    let chol = m
        .cholesky()
        .ok_or_else(|| ParamError::numerical(component, "matrix is not positive definite"))?;
    Ok(symmetrize(to_array2(&chol.inverse()).view()))
}

/// log |a| of a symmetric positive definite matrix
pub fn log_det_spd(a: ArrayView2<f64>, component: usize) -> Result<f64> {
    let l = cholesky_lower(a, component)?;
    Ok(2. * l.diagonal().iter().map(|x| x.ln()).sum::<f64>())
}

/// outer product `u v'`
pub fn outer(u: ArrayView1<f64>, v: ArrayView1<f64>) -> Array2<f64> {
    u.insert_axis(Axis(1)).dot(&v.insert_axis(Axis(0)))
}
