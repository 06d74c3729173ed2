//! Batched dense linear algebra for small `L x L` matrices.
//!
//! Everything is composed of elementary tensor ops (`narrow`, `mul`,
//! `sqrt`, `cat`), so gradients flow through the factorizations. The
//! cost is `O(L^3)` tensor ops over the batch, fine for latent
//! dimensions of a few dozen.

use candle_core::{Result, Tensor};

/// entry `(i, j)` of every matrix in the batch, shaped `(B, 1, 1)`
fn entry(a_bll: &Tensor, i: usize, j: usize) -> Result<Tensor> {
    a_bll.narrow(1, i, 1)?.narrow(2, j, 1)
}

/// Lower Cholesky factor `U` with `A = U U'`
///
/// * `a_bll` - symmetric positive definite matrices (B x L x L)
///
/// Non positive-definite input produces NaN entries rather than an
/// error; callers check finiteness downstream.
pub fn batched_cholesky(a_bll: &Tensor) -> Result<Tensor> {
    let (bb, ll, _) = a_bll.dims3()?;
    let zero = Tensor::zeros((bb, 1, 1), a_bll.dtype(), a_bll.device())?;

    let mut u: Vec<Vec<Tensor>> = vec![vec![zero.clone(); ll]; ll];

    for j in 0..ll {
        let mut s = entry(a_bll, j, j)?;
        for k in 0..j {
            s = s.sub(&u[j][k].sqr()?)?;
        }
        let d = s.sqrt()?;

        for i in (j + 1)..ll {
            let mut s = entry(a_bll, i, j)?;
            for k in 0..j {
                s = s.sub(&u[i][k].mul(&u[j][k])?)?;
            }
            u[i][j] = s.div(&d)?;
        }
        u[j][j] = d;
    }

    let rows = u
        .iter()
        .map(|row| Tensor::cat(row, 2))
        .collect::<Result<Vec<_>>>()?;
    Tensor::cat(&rows, 1)
}

/// Solve `U y = b` for lower-triangular `U`
///
/// * `u_bll` - lower triangular (B x L x L)
/// * `b_blm` - right-hand sides (B x L x M)
pub fn solve_lower(u_bll: &Tensor, b_blm: &Tensor) -> Result<Tensor> {
    let (_, ll, _) = u_bll.dims3()?;
    let mut y: Vec<Tensor> = Vec::with_capacity(ll);
    for i in 0..ll {
        let mut s = b_blm.narrow(1, i, 1)?;
        for (k, y_k) in y.iter().enumerate() {
            s = s.sub(&y_k.broadcast_mul(&entry(u_bll, i, k)?)?)?;
        }
        y.push(s.broadcast_div(&entry(u_bll, i, i)?)?);
    }
    Tensor::cat(&y, 1)
}

/// Solve `U' x = b` for lower-triangular `U`
///
/// * `u_bll` - lower triangular (B x L x L)
/// * `b_blm` - right-hand sides (B x L x M)
pub fn solve_lower_transpose(u_bll: &Tensor, b_blm: &Tensor) -> Result<Tensor> {
    let (_, ll, _) = u_bll.dims3()?;
    let mut x: Vec<Option<Tensor>> = vec![None; ll];
    for i in (0..ll).rev() {
        let mut s = b_blm.narrow(1, i, 1)?;
        for k in (i + 1)..ll {
            if let Some(x_k) = &x[k] {
                s = s.sub(&x_k.broadcast_mul(&entry(u_bll, k, i)?)?)?;
            }
        }
        x[i] = Some(s.broadcast_div(&entry(u_bll, i, i)?)?);
    }
    let x = x.into_iter().flatten().collect::<Vec<_>>();
    Tensor::cat(&x, 1)
}

/// `A⁻¹ b` given the Cholesky factor of `A`
pub fn cholesky_solve(u_bll: &Tensor, b_blm: &Tensor) -> Result<Tensor> {
    solve_lower_transpose(u_bll, &solve_lower(u_bll, b_blm)?)
}

/// `log|A| = 2 Σ log U(i,i)` for each matrix in the batch, shaped `(B,)`
pub fn cholesky_log_det(u_bll: &Tensor) -> Result<Tensor> {
    let (bb, ll, _) = u_bll.dims3()?;
    let diag = (0..ll)
        .map(|i| entry(u_bll, i, i))
        .collect::<Result<Vec<_>>>()?;
    (Tensor::cat(&diag, 2)?.log()?.sum(2)?.reshape(bb)? * 2.)
}

/// Lower-triangular factor with a positive diagonal from an
/// unconstrained square parameter: strict lower part as is, softplus
/// on the diagonal
///
/// * `raw_bll` - unconstrained (B x L x L)
pub fn lower_from_raw(raw_bll: &Tensor) -> Result<Tensor> {
    let (_, ll, _) = raw_bll.dims3()?;
    let eye = Tensor::eye(ll, raw_bll.dtype(), raw_bll.device())?;
    let strict = Tensor::tril2(ll, raw_bll.dtype(), raw_bll.device())?.sub(&eye)?;
    let diag = crate::tensor_util::softplus(raw_bll)?.broadcast_mul(&eye)?;
    raw_bll.broadcast_mul(&strict)?.add(&diag)
}
