use std::sync::Mutex;

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{Activation, Module};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use crate::error::{LayerError, Result};
use crate::gaussian_kl::{kl_diag_to_standard, kl_tril_to_standard, kl_value};
use crate::scale_transform::ScaleTransform;

/// Initial posterior standard deviation; keeps q(w) close to a point
/// mass at the mean for the first updates
pub const DEFAULT_INIT_SCALE: f64 = 1e-5;

/// Default cold-posterior temperature
pub const DEFAULT_TEMPERATURE: f64 = 1e-4;

/// Construction options for [`BayesianDenseLayer`]
#[derive(Clone, Debug)]
pub struct BayesianDenseConfig {
    /// diagonal (`true`) or full-covariance (`false`) posterior
    pub is_mean_field: bool,
    /// weight of the KL term in the loss
    pub temperature: f64,
    /// flattened weights-then-bias, shape (dim,)
    pub initial_mean: Option<Tensor>,
    /// standard deviations (dim,) or a lower-triangular Cholesky
    /// factor (dim, dim)
    pub initial_scale: Option<Tensor>,
    pub activation: Option<Activation>,
    /// seed for the layer's own random stream
    pub seed: Option<u64>,
    pub dtype: DType,
}

impl Default for BayesianDenseConfig {
    fn default() -> Self {
        Self {
            is_mean_field: true,
            temperature: DEFAULT_TEMPERATURE,
            initial_mean: None,
            initial_scale: None,
            activation: None,
            seed: None,
            dtype: DType::F32,
        }
    }
}

/// Prediction options.
///
/// Only sample-based prediction is meaningful for a Bayesian dense
/// layer; `full_cov`, `full_output_cov` and `white` are always
/// rejected.
#[derive(Clone, Copy, Debug, Default)]
pub struct PredictOpts {
    /// `None` gives (N, Q); `Some(S)` gives (S, N, Q)
    pub num_samples: Option<usize>,
    pub full_cov: bool,
    pub full_output_cov: bool,
    pub white: bool,
}

impl PredictOpts {
    pub fn samples(num_samples: usize) -> Self {
        Self {
            num_samples: Some(num_samples),
            ..Default::default()
        }
    }
}

/// A dense layer with a Gaussian variational posterior over its
/// flattened weights and bias.
///
/// The mean is stored as is; the scale is stored unconstrained and
/// mapped through a [`ScaleTransform`], so whatever the optimizer does
/// to the raw values the public scale stays positive (mean field) or
/// lower-triangular with positive diagonal (full covariance).
pub struct BayesianDenseLayer {
    input_dim: usize,
    output_dim: usize,
    num_data: usize,
    dim: usize,
    temperature: f64,
    transform: ScaleTransform,
    activation: Option<Activation>,
    /// posterior mean: (dim,)
    w_mu: Var,
    /// unconstrained scale: (dim,) or (dim, dim)
    w_sqrt_raw: Var,
    rng: Mutex<StdRng>,
}

impl BayesianDenseLayer {
    /// Create a new Bayesian dense layer.
    ///
    /// # Arguments
    /// * `input_dim` - number of input features (excluding bias)
    /// * `output_dim` - number of outputs
    /// * `num_data` - training set size; normalizes the KL term
    /// * `config` - posterior type, temperature, initial values, ...
    /// * `device` - where the parameters live
    pub fn new(
        input_dim: usize,
        output_dim: usize,
        num_data: usize,
        config: BayesianDenseConfig,
        device: &Device,
    ) -> Result<Self> {
        for (name, value) in [
            ("input_dim", input_dim),
            ("output_dim", output_dim),
            ("num_data", num_data),
        ] {
            if value < 1 {
                return Err(LayerError::InvalidDimension { name, value });
            }
        }
        if !(config.temperature > 0.0 && config.temperature.is_finite()) {
            return Err(LayerError::InvalidTemperature(config.temperature));
        }

        let dim = (input_dim + 1) * output_dim;
        let dtype = config.dtype;
        let transform = if config.is_mean_field {
            ScaleTransform::Positive
        } else {
            ScaleTransform::LowerTriangular
        };

        if let Some(mean) = &config.initial_mean {
            check_shape("initial_mean", mean, &[dim])?;
        }
        if let Some(scale) = &config.initial_scale {
            let expected = if config.is_mean_field {
                vec![dim]
            } else {
                vec![dim, dim]
            };
            check_shape("initial_scale", scale, &expected)?;
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let w_mu = match &config.initial_mean {
            Some(mean) => mean.to_dtype(dtype)?.to_device(device)?,
            None => {
                // variance scaling on the weights, zero bias
                let stdev = (2.0 / (input_dim + output_dim) as f64).sqrt();
                let mut mu = Vec::with_capacity(dim);
                for _ in 0..(input_dim * output_dim) {
                    let z: f64 = rng.sample(StandardNormal);
                    mu.push(z * stdev);
                }
                mu.resize(dim, 0.0);
                Tensor::from_vec(mu, dim, &Device::Cpu)?
                    .to_dtype(dtype)?
                    .to_device(device)?
            }
        };

        // Metal has no f64 kernels; defaults are built on the host
        let w_sqrt = match &config.initial_scale {
            Some(scale) => scale.to_dtype(dtype)?.to_device(device)?,
            None if config.is_mean_field => Tensor::full(DEFAULT_INIT_SCALE, dim, &Device::Cpu)?
                .to_dtype(dtype)?
                .to_device(device)?,
            None => (Tensor::eye(dim, DType::F64, &Device::Cpu)? * DEFAULT_INIT_SCALE)?
                .to_dtype(dtype)?
                .to_device(device)?,
        };
        let w_sqrt_raw = transform.inverse(&w_sqrt)?;

        debug!(
            "BayesianDenseLayer: {} -> {}, dim = {}, {:?}",
            input_dim, output_dim, dim, transform
        );

        Ok(Self {
            input_dim,
            output_dim,
            num_data,
            dim,
            temperature: config.temperature,
            transform,
            activation: config.activation,
            w_mu: Var::from_tensor(&w_mu)?,
            w_sqrt_raw: Var::from_tensor(&w_sqrt_raw)?,
            rng: Mutex::new(rng),
        })
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    pub fn num_data(&self) -> usize {
        self.num_data
    }

    /// (input_dim + 1) * output_dim
    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn is_mean_field(&self) -> bool {
        self.transform == ScaleTransform::Positive
    }

    /// Trainable variables: posterior mean and unconstrained scale
    pub fn vars(&self) -> Vec<Var> {
        vec![self.w_mu.clone(), self.w_sqrt_raw.clone()]
    }

    /// Posterior mean, shape (dim,)
    pub fn posterior_mean(&self) -> &Tensor {
        self.w_mu.as_tensor()
    }

    /// Constrained posterior scale, shape (dim,) or (dim, dim)
    pub fn posterior_scale(&self) -> Result<Tensor> {
        self.transform.forward(self.w_sqrt_raw.as_tensor())
    }

    /// Draw weight samples by reparameterization
    ///
    /// w = mu + s * z (mean field) or w = mu + L z (full covariance),
    /// with z ~ N(0, I) of shape (dim, S)
    ///
    /// # Returns
    /// Weight samples, shape (dim, S)
    pub fn sample_weights(&self, num_samples: usize) -> Result<Tensor> {
        let z_ds = self.standard_normal(num_samples)?;
        let scale = self.posterior_scale()?;
        let mu_d1 = self.w_mu.as_tensor().unsqueeze(1)?;

        let noise_ds = match self.transform {
            ScaleTransform::Positive => scale.unsqueeze(1)?.broadcast_mul(&z_ds)?,
            ScaleTransform::LowerTriangular => scale.matmul(&z_ds)?,
        };
        Ok(mu_d1.broadcast_add(&noise_ds)?)
    }

    /// Sample predictions at N inputs.
    ///
    /// # Arguments
    /// * `inputs` - shape (N, input_dim)
    /// * `opts` - number of samples; covariance modes must stay off
    ///
    /// # Returns
    /// (N, output_dim) if `opts.num_samples` is `None`, otherwise
    /// (S, N, output_dim)
    pub fn predict(&self, inputs: &Tensor, opts: PredictOpts) -> Result<Tensor> {
        if opts.full_output_cov {
            return Err(LayerError::Unsupported("full_output_cov"));
        }
        if opts.full_cov {
            return Err(LayerError::Unsupported("full_cov"));
        }
        if opts.white {
            return Err(LayerError::Unsupported("white"));
        }
        if opts.num_samples == Some(0) {
            return Err(LayerError::InvalidArgument(
                "num_samples must be >= 1".to_string(),
            ));
        }
        let x_n1 = self.augment_inputs(inputs)?;

        let s = opts.num_samples.unwrap_or(1);
        let w_ds = self.sample_weights(s)?;

        // (dim, S) -> (S, D + 1, Q)
        let w_sdq = w_ds
            .t()?
            .contiguous()?
            .reshape((s, self.input_dim + 1, self.output_dim))?;

        // (1, N, D + 1) x (S, D + 1, Q) -> (S, N, Q)
        let y_snq = x_n1.unsqueeze(0)?.broadcast_matmul(&w_sdq)?;

        let y = match opts.num_samples {
            None => y_snq.squeeze(0)?,
            Some(_) => y_snq,
        };
        self.activate(y)
    }

    /// Deterministic prediction through the posterior mean alone;
    /// the limit of [`predict`](Self::predict) as the scale goes to zero
    pub fn predict_mean(&self, inputs: &Tensor) -> Result<Tensor> {
        let x_n1 = self.augment_inputs(inputs)?;
        let w_dq = self
            .w_mu
            .as_tensor()
            .reshape((self.input_dim + 1, self.output_dim))?;
        self.activate(x_n1.matmul(&w_dq)?)
    }

    /// KL( q(w) || N(0, I) ) in closed form
    ///
    /// Fails with [`LayerError::DegenerateScale`] if a scale entry (or
    /// Cholesky diagonal) is not strictly positive,
    /// [`LayerError::NonFiniteScale`] if one is infinite, and with
    /// [`LayerError::NonFiniteKl`] if the result is not finite.
    pub fn kl_divergence(&self) -> Result<Tensor> {
        let scale = self.posterior_scale()?;
        let kl = match self.transform {
            ScaleTransform::Positive => kl_diag_to_standard(self.w_mu.as_tensor(), &scale)?,
            ScaleTransform::LowerTriangular => {
                kl_tril_to_standard(self.w_mu.as_tensor(), &scale)?
            }
        };
        kl_value(&kl)?;
        Ok(kl)
    }

    /// Loss contribution per datapoint
    ///
    /// temperature * KL / num_data while training, exactly zero otherwise
    pub fn regularization_loss(&self, train: bool) -> Result<Tensor> {
        if train {
            let kl = self.kl_divergence()?;
            Ok((kl * (self.temperature / self.num_data as f64))?)
        } else {
            Ok(Tensor::zeros((), self.w_mu.dtype(), self.w_mu.device())?)
        }
    }

    /// Ordinary layer call: a single weight draw and the loss term
    ///
    /// # Returns `(y_nq, loss)`
    /// * `y_nq` - sampled output (N x Q)
    /// * `loss` - scalar regularization term
    pub fn forward_t(&self, inputs: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let y_nq = self.predict(inputs, PredictOpts::default())?;
        let loss = self.regularization_loss(train)?;
        Ok((y_nq, loss))
    }

    /// z ~ N(0, I) from the layer's own stream, shape (dim, S)
    fn standard_normal(&self, num_samples: usize) -> Result<Tensor> {
        let n = self.dim * num_samples;
        let z = {
            let mut rng = self.rng.lock().map_err(|_| LayerError::RngPoisoned)?;
            (0..n)
                .map(|_| rng.sample::<f64, _>(StandardNormal))
                .collect::<Vec<f64>>()
        };
        Ok(Tensor::from_vec(z, (self.dim, num_samples), &Device::Cpu)?
            .to_dtype(self.w_mu.dtype())?
            .to_device(self.w_mu.device())?)
    }

    /// [x, 1]: (N, D) -> (N, D + 1)
    fn augment_inputs(&self, inputs: &Tensor) -> Result<Tensor> {
        match *inputs.dims() {
            [_, d] if d == self.input_dim => {}
            _ => {
                return Err(LayerError::InputShape(format!(
                    "expected (N, {}), got {:?}",
                    self.input_dim,
                    inputs.dims()
                )))
            }
        }
        let n = inputs.dim(0)?;
        let x = inputs.to_dtype(self.w_mu.dtype())?;
        let ones = Tensor::ones((n, 1), x.dtype(), x.device())?;
        Ok(Tensor::cat(&[&x, &ones], 1)?)
    }

    fn activate(&self, y: Tensor) -> Result<Tensor> {
        match &self.activation {
            Some(act) => Ok(act.forward(&y)?),
            None => Ok(y),
        }
    }
}

/// Evaluation-mode call; no loss is produced
impl Module for BayesianDenseLayer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        Ok(self.predict(xs, PredictOpts::default())?)
    }
}

fn check_shape(what: &'static str, t: &Tensor, expected: &[usize]) -> Result<()> {
    if t.dims() == expected {
        Ok(())
    } else {
        Err(LayerError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            got: t.dims().to_vec(),
        })
    }
}
