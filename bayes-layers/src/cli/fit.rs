use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use clap::Args;
use log::info;

use super::{build_network, ActivationArg, NetworkArch};
use crate::inference::{train_regression, TrainConfig};
use crate::layer_traits::RegularizedModuleT;
use crate::loss_functions::rmse;
use crate::simulate::simulate_regression;

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(short = 'n', long, default_value = "200", help = "Number of simulated datapoints")]
    pub num_data: usize,

    #[arg(short = 'd', long, default_value = "1")]
    pub input_dim: usize,

    #[arg(long, default_value = "0.1")]
    pub noise_std: f64,

    #[arg(long, default_value = "16")]
    pub hidden: usize,

    #[arg(long, default_value = "relu")]
    pub activation: ActivationArg,

    #[arg(long, help = "Full-covariance posterior instead of mean field")]
    pub full_cov: bool,

    #[arg(long, default_value = "1e-4")]
    pub temperature: f64,

    #[arg(long, default_value = "300")]
    pub epochs: usize,

    #[arg(long, default_value = "0.01")]
    pub lr: f32,

    #[arg(long, default_value = "32")]
    pub batch_size: usize,

    #[arg(long, default_value = "100", help = "Weight draws for the predictive mean")]
    pub num_samples: usize,

    #[arg(long, default_value = "42")]
    pub seed: u64,

    #[arg(short, long)]
    pub verbose: bool,
}

pub fn run(args: &FitArgs) -> Result<()> {
    let device = Device::Cpu;

    let sim = simulate_regression(args.num_data, args.input_dim, args.noise_std, args.seed)?;
    info!("Simulated x: {:?}, y: {:?}", sim.x.dims(), sim.y.dims());

    let arch = NetworkArch {
        input_dim: args.input_dim,
        hidden: args.hidden,
        num_data: args.num_data,
        is_mean_field: !args.full_cov,
        temperature: args.temperature,
        activation: args.activation,
        seed: args.seed,
    };
    let (network, vars) = build_network(&arch, &device)?;

    let train_config = TrainConfig {
        learning_rate: args.lr,
        batch_size: args.batch_size,
        num_epochs: args.epochs,
        noise_variance: args.noise_std.powi(2).max(1e-6),
        seed: Some(args.seed),
        device: device.clone(),
        verbose: args.verbose,
        show_progress: true,
    };

    let trace = train_regression(&network, vars, &sim.x, &sim.y, &train_config)?;
    if let (Some(first), Some(last)) = (trace.first(), trace.last()) {
        info!("loss: {:.4} -> {:.4}", first, last);
    }

    let (_, reg) = network.forward_t(&sim.x, true)?;
    info!(
        "regularization (temperature * KL / num_data): {:.6}",
        reg.to_dtype(DType::F64)?.to_scalar::<f64>()?
    );

    // predictive mean over independent forward passes
    let draws = (0..args.num_samples.max(1))
        .map(|_| Ok(network.forward_t(&sim.x, false)?.0))
        .collect::<Result<Vec<Tensor>>>()?;
    let y_mean = Tensor::stack(&draws, 0)?.mean(0)?;

    let y_obs = sim.y.to_dtype(y_mean.dtype())?;
    info!(
        "RMSE of the {}-sample predictive mean: {:.4}",
        draws.len(),
        rmse(&y_obs, &y_mean)?
    );
    Ok(())
}
