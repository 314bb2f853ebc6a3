use candle_core::{DType, Tensor, Var};
use candle_nn::{AdamW, Optimizer};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::info;

use crate::data_loader::InMemoryData;
use crate::layer_traits::RegularizedModuleT;
use crate::loss_functions::gaussian_likelihood;

pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    pub num_epochs: usize,
    /// observation noise variance of the Gaussian likelihood
    pub noise_variance: f64,
    /// minibatch shuffling seed
    pub seed: Option<u64>,
    pub device: candle_core::Device,
    pub verbose: bool,
    pub show_progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-2,
            batch_size: 32,
            num_epochs: 100,
            noise_variance: 0.1,
            seed: None,
            device: candle_core::Device::Cpu,
            verbose: false,
            show_progress: true,
        }
    }
}

/// Train a (stack of) regularized layer(s) on Gaussian regression
///
/// loss = - mean_i llik(i) + sum_l temperature_l * KL_l / num_data
///
/// Every layer's loss term is already normalized per datapoint, so the
/// scale of this objective does not depend on the minibatch size.
///
/// * `model` - layer or stack of layers
/// * `vars` - every trainable variable of `model`
/// * `x_nd` - inputs (n x d)
/// * `y_nk` - outputs (n x k)
/// * `train_config` - training configuration
///
/// # Returns
/// Mean loss per epoch
pub fn train_regression<M>(
    model: &M,
    vars: Vec<Var>,
    x_nd: &Tensor,
    y_nk: &Tensor,
    train_config: &TrainConfig,
) -> anyhow::Result<Vec<f32>>
where
    M: RegularizedModuleT,
{
    let device = &train_config.device;
    let mut adam = AdamW::new_lr(vars, train_config.learning_rate.into())?;

    let mut data = InMemoryData::new(x_nd.clone(), y_nk.clone(), train_config.seed)?;
    info!(
        "Training on {} datapoints for {} epochs",
        data.num_data(),
        train_config.num_epochs
    );

    let pb = ProgressBar::new(train_config.num_epochs as u64);

    if !train_config.show_progress || train_config.verbose {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    let mut loss_trace = vec![];

    for epoch in 0..train_config.num_epochs {
        data.shuffle_minibatch(train_config.batch_size);
        let mut loss_tot = 0f32;

        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_shuffled(b, device)?;
            let (y_hat, reg) = model.forward_t(&mb.input, true)?;
            let y_obs = mb.output.to_dtype(y_hat.dtype())?;

            let llik = gaussian_likelihood(&y_obs, &y_hat, train_config.noise_variance)?;
            let loss = (llik.mean_all()?.neg()? + reg.to_dtype(y_hat.dtype())?)?;

            adam.backward_step(&loss)?;
            loss_tot += loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;
        }

        pb.inc(1);
        loss_trace.push(loss_tot / data.num_minibatch() as f32);
        if train_config.verbose {
            info!(
                "[{}] loss: {}",
                epoch + 1,
                loss_trace.last().ok_or(anyhow::anyhow!("loss"))?
            );
        }
    }
    pb.finish_and_clear();
    Ok(loss_trace)
}
