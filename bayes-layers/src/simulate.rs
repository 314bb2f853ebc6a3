use candle_core::{Device, Tensor};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, Uniform};

/// Simulated regression data
pub struct SimData {
    /// inputs, (n, input_dim)
    pub x: Tensor,
    /// outputs, (n, 1)
    pub y: Tensor,
}

///
/// A wiggly 1-D regression problem in the spirit of the Snelson data:
///
/// y(i) = sin(3 t(i)) + 0.5 t(i) + eps(i),  t(i) = sum_j x(i,j)
///
/// * `n` - number of datapoints
/// * `input_dim` - number of input columns, each uniform on [-2, 2]
/// * `noise_std` - standard deviation of eps
/// * `rseed` - random seed
///
pub fn simulate_regression(
    n: usize,
    input_dim: usize,
    noise_std: f64,
    rseed: u64,
) -> anyhow::Result<SimData> {
    let mut rng = StdRng::seed_from_u64(rseed);
    let unif = Uniform::new(-2.0f32, 2.0f32)?;
    let noise = Normal::new(0.0f32, noise_std as f32)?;

    let mut x = Vec::with_capacity(n * input_dim);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let row: Vec<f32> = (0..input_dim).map(|_| unif.sample(&mut rng)).collect();
        let t: f32 = row.iter().sum();
        y.push((3.0 * t).sin() + 0.5 * t + noise.sample(&mut rng));
        x.extend(row);
    }

    Ok(SimData {
        x: Tensor::from_vec(x, (n, input_dim), &Device::Cpu)?,
        y: Tensor::from_vec(y, (n, 1), &Device::Cpu)?,
    })
}
