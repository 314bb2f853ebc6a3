use candle_core::{DType, Device, Tensor};

use crate::error::{LayerError, Result};

/// KL divergence from a diagonal Gaussian to the standard normal
///
/// 0.5 * sum_i ( mu_i^2 + s_i^2 - 1 - 2 * log(s_i) )
///
/// * `mean` - variational mean
/// * `scale` - standard deviations, same shape as `mean`
///
pub fn kl_diag_to_standard(mean: &Tensor, scale: &Tensor) -> Result<Tensor> {
    check_positive_scale(scale)?;
    let dim = mean.elem_count() as f64;
    let mu_sq = mean.sqr()?.sum_all()?;
    let s_sq = scale.sqr()?.sum_all()?;
    let log_s = scale.log()?.sum_all()?;
    let kl = (((mu_sq + s_sq)? - (log_s * 2.0)?)? - dim)?;
    Ok((kl * 0.5)?)
}

/// KL divergence from N(mu, L L') to the standard normal
///
/// 0.5 * ( |mu|^2 + trace(L L') - dim - log det(L L') )
///
/// where trace(L L') is the squared Frobenius norm of `L` and
/// log det(L L') = 2 * sum_i log(L_ii)
///
/// * `mean` - variational mean, shape (dim,)
/// * `chol` - lower-triangular Cholesky factor, shape (dim, dim)
///
pub fn kl_tril_to_standard(mean: &Tensor, chol: &Tensor) -> Result<Tensor> {
    let (n, _) = chol.dims2()?;
    let diag = tril_diagonal(chol)?;
    check_positive_scale(&diag)?;

    let mu_sq = mean.sqr()?.sum_all()?;
    let trace = chol.sqr()?.sum_all()?;
    let log_det = (diag.log()?.sum_all()? * 2.0)?;
    let kl = (((mu_sq + trace)? - log_det)? - n as f64)?;
    Ok((kl * 0.5)?)
}

/// Diagonal entries of a square matrix as a vector
pub fn tril_diagonal(chol: &Tensor) -> Result<Tensor> {
    let (n, _) = chol.dims2()?;
    let eye = Tensor::eye(n, chol.dtype(), chol.device())?;
    Ok(chol.mul(&eye)?.sum(1)?)
}

/// Every entry must be finite and strictly positive, otherwise the log
/// terms turn into NaN or -inf and poison the loss.
pub fn check_positive_scale(scale: &Tensor) -> Result<()> {
    let flat = scale.flatten_all()?;
    let smallest = host_scalar(&flat.min(0)?)?;
    let largest = host_scalar(&flat.max(0)?)?;
    if smallest.is_nan() || smallest <= 0.0 {
        Err(LayerError::DegenerateScale(smallest))
    } else if !largest.is_finite() {
        Err(LayerError::NonFiniteScale(largest))
    } else {
        Ok(())
    }
}

/// scalar as f64; the cast happens on the host since Metal has no f64
fn host_scalar(x: &Tensor) -> Result<f64> {
    Ok(x.to_device(&Device::Cpu)?.to_dtype(DType::F64)?.to_scalar::<f64>()?)
}

/// Read a scalar KL back to the host and make sure it is usable
pub fn kl_value(kl: &Tensor) -> Result<f64> {
    let v = host_scalar(kl)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(LayerError::NonFiniteKl(v))
    }
}
