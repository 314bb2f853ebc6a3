use candle_core::{DType, Device, Tensor, Var};

use crate::error::{LayerError, Result};
use crate::gaussian_kl::kl_diag_to_standard;
use crate::scale_transform::ScaleTransform;

/// Initial standard deviation of every latent; a small value has been
/// observed to help fitting
pub const DEFAULT_ENCODER_STD: f64 = 1e-5;

/// Directly parameterized diagonal Normal over per-datapoint latents
///
/// q(w_i) = N(means[i, :], diag(std[i, :]^2))
///
/// No amortization: each datapoint owns its own mean and std, so the
/// encoder is tied to the full data set and cannot be minibatched.
pub struct DirectNormalEncoder {
    num_data: usize,
    latent_dim: usize,
    /// (num_data, latent_dim)
    means: Var,
    /// unconstrained std, (num_data, latent_dim)
    std_raw: Var,
}

impl DirectNormalEncoder {
    /// * `num_data` - number of data points
    /// * `latent_dim` - dimensionality of each latent variable
    /// * `means` - optional initial means, shape (num_data, latent_dim);
    ///   zeros otherwise
    pub fn new(
        num_data: usize,
        latent_dim: usize,
        means: Option<Tensor>,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        if num_data < 1 || latent_dim < 1 {
            return Err(LayerError::EncoderInitialization(format!(
                "num_data = {}, latent_dim = {}",
                num_data, latent_dim
            )));
        }

        let means = match means {
            None => Tensor::zeros((num_data, latent_dim), dtype, device)?,
            Some(m) if m.dims() == [num_data, latent_dim] => m.to_dtype(dtype)?.to_device(device)?,
            Some(m) => {
                return Err(LayerError::EncoderInitialization(format!(
                    "means must be ({}, {}), got {:?}",
                    num_data,
                    latent_dim,
                    m.dims()
                )))
            }
        };

        let std = Tensor::full(DEFAULT_ENCODER_STD, (num_data, latent_dim), &Device::Cpu)?
            .to_dtype(dtype)?
            .to_device(device)?;
        let std_raw = ScaleTransform::Positive.inverse(&std)?;

        Ok(Self {
            num_data,
            latent_dim,
            means: Var::from_tensor(&means)?,
            std_raw: Var::from_tensor(&std_raw)?,
        })
    }

    pub fn num_data(&self) -> usize {
        self.num_data
    }

    pub fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    pub fn vars(&self) -> Vec<Var> {
        vec![self.means.clone(), self.std_raw.clone()]
    }

    /// # Returns `(means, std)`, each (num_data, latent_dim)
    ///
    /// * `inputs` - if given, must have one row per datapoint
    pub fn forward(&self, inputs: Option<&Tensor>) -> Result<(Tensor, Tensor)> {
        if let Some(x) = inputs {
            if x.rank() != 2 || x.dim(0)? != self.num_data {
                return Err(LayerError::InputShape(format!(
                    "expected ({}, D), got {:?}",
                    self.num_data,
                    x.dims()
                )));
            }
        }
        let std = ScaleTransform::Positive.forward(self.std_raw.as_tensor())?;
        Ok((self.means.as_tensor().clone(), std))
    }

    /// sum over all datapoints and latents of KL( q(w_i) || N(0, I) )
    pub fn kl_divergence(&self) -> Result<Tensor> {
        let (means, std) = self.forward(None)?;
        kl_diag_to_standard(&means, &std)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_default_means_and_std() -> Result<()> {
        let dev = Device::Cpu;
        let enc = DirectNormalEncoder::new(5, 2, None, DType::F64, &dev)?;
        let (means, std) = enc.forward(None)?;
        assert_eq!(means.dims(), &[5, 2]);
        assert_eq!(means.sqr()?.sum_all()?.to_scalar::<f64>()?, 0.0);
        for row in std.to_vec2::<f64>()? {
            for s in row {
                assert_abs_diff_eq!(s, DEFAULT_ENCODER_STD, epsilon = 1e-12);
            }
        }
        Ok(())
    }

    #[test]
    fn test_mismatched_means_rejected() -> Result<()> {
        let dev = Device::Cpu;
        let means = Tensor::zeros((4, 2), DType::F64, &dev)?;
        assert!(matches!(
            DirectNormalEncoder::new(5, 2, Some(means), DType::F64, &dev),
            Err(LayerError::EncoderInitialization(_))
        ));
        Ok(())
    }

    #[test]
    fn test_inputs_must_cover_all_data() -> Result<()> {
        let dev = Device::Cpu;
        let enc = DirectNormalEncoder::new(5, 2, None, DType::F64, &dev)?;
        let ok = Tensor::zeros((5, 3), DType::F64, &dev)?;
        assert!(enc.forward(Some(&ok)).is_ok());
        let minibatch = Tensor::zeros((2, 3), DType::F64, &dev)?;
        assert!(matches!(
            enc.forward(Some(&minibatch)),
            Err(LayerError::InputShape(_))
        ));
        Ok(())
    }

    #[test]
    fn test_kl_grows_with_mean() -> Result<()> {
        let dev = Device::Cpu;
        let near = DirectNormalEncoder::new(3, 1, None, DType::F64, &dev)?;
        let far_means = Tensor::full(3f64, (3, 1), &dev)?;
        let far = DirectNormalEncoder::new(3, 1, Some(far_means), DType::F64, &dev)?;
        let kl_near = near.kl_divergence()?.to_scalar::<f64>()?;
        let kl_far = far.kl_divergence()?.to_scalar::<f64>()?;
        // mean term: 0.5 * 3 * 3^2
        assert_abs_diff_eq!(kl_far - kl_near, 13.5, epsilon = 1e-9);
        Ok(())
    }
}
