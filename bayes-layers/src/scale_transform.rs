use candle_core::{DType, Device, Tensor};

use crate::error::{LayerError, Result};

/// Bijection between an unconstrained raw tensor (what the optimizer
/// touches) and a constrained scale parameter.
///
/// * `Positive` - elementwise softplus, for standard deviations
/// * `LowerTriangular` - strictly lower part as is, softplus on the
///   diagonal, zero above; a Cholesky factor with positive diagonal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleTransform {
    Positive,
    LowerTriangular,
}

impl ScaleTransform {
    /// Map raw (unconstrained) values to the constrained scale
    pub fn forward(&self, raw: &Tensor) -> Result<Tensor> {
        match self {
            ScaleTransform::Positive => Ok(softplus(raw)?),
            ScaleTransform::LowerTriangular => {
                let (n, m) = raw.dims2()?;
                if n != m {
                    return Err(LayerError::InputShape(format!(
                        "triangular raw scale must be square, got {} x {}",
                        n, m
                    )));
                }
                let (strict_lower, eye) = tril_masks(n, raw.dtype(), raw.device())?;
                let off_diag = raw.mul(&strict_lower)?;
                let diag = softplus(raw)?.mul(&eye)?;
                Ok((off_diag + diag)?)
            }
        }
    }

    /// Map a constrained scale back to raw values.
    ///
    /// Only used when building parameters from caller-supplied
    /// values, so it checks the constraint instead of assuming it.
    pub fn inverse(&self, value: &Tensor) -> Result<Tensor> {
        let dtype = value.dtype();
        let device = value.device();
        // Metal has no f64 kernels; do the bookkeeping on the host
        let host = value.to_device(&Device::Cpu)?.to_dtype(DType::F64)?;

        let raw = match self {
            ScaleTransform::Positive => {
                let flat = host.flatten_all()?.to_vec1::<f64>()?;
                let raw = flat
                    .iter()
                    .map(|&x| inv_softplus(x))
                    .collect::<Result<Vec<f64>>>()?;
                Tensor::from_vec(raw, host.shape().clone(), &Device::Cpu)?
            }
            ScaleTransform::LowerTriangular => {
                let (n, m) = host.dims2().map_err(|_| {
                    LayerError::InvalidScale(format!(
                        "Cholesky factor must be a matrix, got {:?}",
                        host.dims()
                    ))
                })?;
                if n != m {
                    return Err(LayerError::InvalidScale(format!(
                        "Cholesky factor must be square, got {} x {}",
                        n, m
                    )));
                }
                let rows = host.to_vec2::<f64>()?;
                let mut raw = Vec::with_capacity(n * n);
                for (i, row) in rows.iter().enumerate() {
                    for (j, &x) in row.iter().enumerate() {
                        if j < i {
                            raw.push(x);
                        } else if j == i {
                            raw.push(inv_softplus(x)?);
                        } else if x != 0.0 {
                            return Err(LayerError::InvalidScale(format!(
                                "Cholesky factor must be lower-triangular, found {} at ({}, {})",
                                x, i, j
                            )));
                        } else {
                            raw.push(0.0);
                        }
                    }
                }
                Tensor::from_vec(raw, (n, n), &Device::Cpu)?
            }
        };

        Ok(raw.to_dtype(dtype)?.to_device(device)?)
    }
}

/// softplus(x) = ln(1 + exp(x)), written as max(x, 0) + log1p(exp(-|x|))
pub fn softplus(x: &Tensor) -> candle_core::Result<Tensor> {
    let tail = log1p_small(&x.abs()?.neg()?.exp()?)?;
    x.relu()? + tail
}

/// ln(1 + e) for 0 <= e <= 1, accurate when 1 + e rounds in low
/// precision: e * ln(u) / (u - 1) with u = 1 + e, and e itself where
/// u rounds to exactly 1
fn log1p_small(e: &Tensor) -> candle_core::Result<Tensor> {
    let u = (e + 1.0)?;
    let d = (&u - 1.0)?;
    let rounded = d.eq(0.0)?;
    let safe_d = rounded.where_cond(&d.ones_like()?, &d)?;
    let corrected = e.mul(&u.log()?.div(&safe_d)?)?;
    rounded.where_cond(e, &corrected)
}

/// x + ln(1 - exp(-x)) for x > 0
fn inv_softplus(x: f64) -> Result<f64> {
    if x.is_finite() && x > 0.0 {
        Ok(x + (-(-x).exp_m1()).ln())
    } else {
        Err(LayerError::InvalidScale(format!(
            "scale entries must be positive and finite, got {}",
            x
        )))
    }
}

/// (strictly lower-triangular ones, identity)
fn tril_masks(n: usize, dtype: DType, device: &Device) -> candle_core::Result<(Tensor, Tensor)> {
    let eye = Tensor::eye(n, dtype, device)?;
    let lower = Tensor::tril2(n, dtype, device)?;
    Ok(((lower - &eye)?, eye))
}
