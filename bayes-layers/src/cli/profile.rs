use std::time::Instant;

use anyhow::Result;
use candle_core::Device;
use candle_nn::{AdamW, Optimizer};
use clap::Args;
use log::info;

use super::{build_network, ActivationArg, NetworkArch};
use crate::layer_traits::RegularizedModuleT;
use crate::loss_functions::gaussian_likelihood;
use crate::simulate::simulate_regression;

/// fixed seed so that timing does not vary with the random draws
const PROFILE_SEED: u64 = 0;

#[derive(Args, Debug)]
pub struct ProfileArgs {
    #[arg(long, default_value = "20", help = "Optimizer updates per configuration")]
    pub updates: usize,

    #[arg(long, default_value = "32")]
    pub batch_size: usize,

    #[arg(short = 'd', long, default_value = "4")]
    pub input_dim: usize,

    #[arg(long, default_value = "16")]
    pub hidden: usize,

    #[arg(long, default_value = "3", help = "Timed repetitions; the best one is reported")]
    pub repeats: usize,
}

pub fn run(args: &ProfileArgs) -> Result<()> {
    for is_mean_field in [true, false] {
        let secs = (0..args.repeats.max(1))
            .map(|_| time_updates(args, is_mean_field))
            .collect::<Result<Vec<f64>>>()?;
        let best = secs.iter().copied().fold(f64::INFINITY, f64::min);
        info!(
            "{}: {} updates, best of {}: {:.4}s ({:.2} ms/update)",
            if is_mean_field { "mean-field" } else { "full-covariance" },
            args.updates,
            secs.len(),
            best,
            1e3 * best / args.updates.max(1) as f64
        );
    }
    Ok(())
}

/// Wall-clock seconds for `args.updates` optimizer steps on one
/// minibatch
fn time_updates(args: &ProfileArgs, is_mean_field: bool) -> Result<f64> {
    let device = Device::Cpu;
    let sim = simulate_regression(args.batch_size, args.input_dim, 0.1, PROFILE_SEED)?;

    let arch = NetworkArch {
        input_dim: args.input_dim,
        hidden: args.hidden,
        num_data: args.batch_size,
        is_mean_field,
        temperature: 1.0,
        activation: ActivationArg::Relu,
        seed: PROFILE_SEED,
    };
    let (network, vars) = build_network(&arch, &device)?;
    let mut adam = AdamW::new_lr(vars, 1e-3)?;

    let t0 = Instant::now();
    for _ in 0..args.updates {
        let (y_hat, reg) = network.forward_t(&sim.x, true)?;
        let llik = gaussian_likelihood(&sim.y, &y_hat, 0.01)?;
        let loss = (llik.mean_all()?.neg()? + reg)?;
        adam.backward_step(&loss)?;
    }
    Ok(t0.elapsed().as_secs_f64())
}
