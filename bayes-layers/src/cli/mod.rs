pub mod fit;
pub mod profile;

use candle_core::{DType, Device, Var};
use candle_nn::Activation;
use clap::{Parser, Subcommand, ValueEnum};

use crate::bayesian_dense::{BayesianDenseConfig, BayesianDenseLayer};
use crate::layer_stack::StackLayers;

pub use fit::FitArgs;
pub use profile::ProfileArgs;

#[derive(Parser)]
#[command(name = "bayes-layers")]
#[command(about = "Variational Bayesian dense layers on simulated regression data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fit a two-layer Bayesian network
    Fit(FitArgs),
    /// Time optimizer updates for mean-field and full-covariance layers
    Profile(ProfileArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum ActivationArg {
    Relu,
    Elu,
    Sigmoid,
    Gelu,
    Silu,
}

impl From<ActivationArg> for Activation {
    fn from(act: ActivationArg) -> Self {
        match act {
            ActivationArg::Relu => Activation::Relu,
            ActivationArg::Elu => Activation::Elu(0.01),
            ActivationArg::Sigmoid => Activation::Sigmoid,
            ActivationArg::Gelu => Activation::Gelu,
            ActivationArg::Silu => Activation::Silu,
        }
    }
}

/// Architecture shared by the subcommands
pub struct NetworkArch {
    pub input_dim: usize,
    pub hidden: usize,
    pub num_data: usize,
    pub is_mean_field: bool,
    pub temperature: f64,
    pub activation: ActivationArg,
    pub seed: u64,
}

/// input -> Bayesian(hidden, act) -> Bayesian(1)
///
/// # Returns `(network, trainable variables)`
pub fn build_network(
    arch: &NetworkArch,
    device: &Device,
) -> anyhow::Result<(StackLayers, Vec<Var>)> {
    let config = |seed: u64| BayesianDenseConfig {
        is_mean_field: arch.is_mean_field,
        temperature: arch.temperature,
        seed: Some(seed),
        dtype: DType::F32,
        ..Default::default()
    };

    let hidden = BayesianDenseLayer::new(
        arch.input_dim,
        arch.hidden,
        arch.num_data,
        config(arch.seed),
        device,
    )?;
    let output = BayesianDenseLayer::new(
        arch.hidden,
        1,
        arch.num_data,
        config(arch.seed.wrapping_add(1)),
        device,
    )?;

    let mut vars = hidden.vars();
    vars.extend(output.vars());

    let mut network = StackLayers::new();
    network.push_with_act(hidden, arch.activation.into())?;
    network.push(output)?;
    Ok((network, vars))
}
