use candle_core::{Result, Tensor};

/// Gaussian log-likelihood of real-valued outputs
///
/// llik(i) = -0.5 * sum_k { [ y(i,k) - yhat(i,k) ]^2 / v + log(2 pi v) }
///
/// * `y_nk` - observed data
/// * `hat_nk` - prediction
/// * `noise_var` - observation noise variance `v`
///
pub fn gaussian_likelihood(y_nk: &Tensor, hat_nk: &Tensor, noise_var: f64) -> Result<Tensor> {
    let log_norm = (2.0 * std::f64::consts::PI * noise_var).ln();
    let sq_err = y_nk.sub(hat_nk)?.sqr()?;
    ((sq_err / noise_var)? + log_norm)?
        .sum(y_nk.rank() - 1)?
        * (-0.5)
}

/// Root mean squared error over all entries
pub fn rmse(y_nk: &Tensor, hat_nk: &Tensor) -> Result<f64> {
    y_nk.sub(hat_nk)?
        .sqr()?
        .mean_all()?
        .sqrt()?
        .to_dtype(candle_core::DType::F64)?
        .to_scalar::<f64>()
}
