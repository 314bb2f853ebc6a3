//! Bayesian dense layers for variational Bayesian neural networks.
//!
//! A [`BayesianDenseLayer`] keeps a Gaussian variational posterior
//! q(w) = N(mu, Sigma) over its flattened weights and bias. Each call
//! draws weights by reparameterization, w = mu + L z with z ~ N(0, I),
//! and applies them as an affine map. The closed-form KL( q || N(0, I) )
//! scaled by `temperature / num_data` is the layer's loss term while
//! training. Gradients come from candle.
//!
//! # Example
//!
//! ```ignore
//! use bayes_layers::{BayesianDenseConfig, BayesianDenseLayer, PredictOpts};
//!
//! let layer = BayesianDenseLayer::new(2, 1, num_data, BayesianDenseConfig::default(), &device)?;
//! let y_snq = layer.predict(&x_nd, PredictOpts::samples(100))?;
//! let (y_nq, loss) = layer.forward_t(&x_nd, true)?;
//! ```

pub mod bayesian_dense;
pub mod cli;
pub mod data_loader;
pub mod direct_encoder;
pub mod error;
pub mod gaussian_kl;
pub mod inference;
pub mod layer_stack;
pub mod layer_traits;
pub mod loss_functions;
pub mod scale_transform;
pub mod simulate;

pub use bayesian_dense::{BayesianDenseConfig, BayesianDenseLayer, PredictOpts};
pub use direct_encoder::DirectNormalEncoder;
pub use error::{LayerError, Result};
pub use layer_stack::StackLayers;
pub use layer_traits::RegularizedModuleT;
pub use scale_transform::ScaleTransform;

pub use candle_core;
pub use candle_nn;
