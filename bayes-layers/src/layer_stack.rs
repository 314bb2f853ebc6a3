use candle_core::Tensor;
use candle_nn::{Activation, Module};

use crate::error::Result;
use crate::layer_traits::{check_chain, RegularizedModuleT};

/// build a stack of alternating layers and optional activations,
/// adding up every layer's loss term on the way
pub struct StackLayers {
    module_layers: Vec<Box<dyn RegularizedModuleT + Send + Sync>>,
    activation_layers: Vec<Option<Activation>>,
}

impl RegularizedModuleT for StackLayers {
    fn forward_t(&self, input: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let mut x = input.clone();
        let mut loss = Tensor::zeros((), input.dtype(), input.device())?;
        for (module, activation) in self.module_layers.iter().zip(self.activation_layers.iter()) {
            let (y, layer_loss) = module.forward_t(&x, train)?;
            loss = (loss + layer_loss.to_dtype(input.dtype())?)?;
            x = match activation {
                Some(activation) => activation.forward(&y)?,
                None => y,
            };
        }
        Ok((x, loss))
    }

    fn dim_in(&self) -> usize {
        self.module_layers.first().map(|m| m.dim_in()).unwrap_or(0)
    }

    fn dim_out(&self) -> usize {
        self.module_layers.last().map(|m| m.dim_out()).unwrap_or(0)
    }
}

impl StackLayers {
    pub fn new() -> Self {
        Self {
            module_layers: Vec::new(),
            activation_layers: Vec::new(),
        }
    }

    /// Appends a layer after all the current layers.
    pub fn push_with_act<M>(&mut self, layer: M, activation: Activation) -> Result<()>
    where
        M: RegularizedModuleT + Send + Sync + 'static,
    {
        self.push_inner(Box::new(layer), Some(activation))
    }

    pub fn push<M>(&mut self, layer: M) -> Result<()>
    where
        M: RegularizedModuleT + Send + Sync + 'static,
    {
        self.push_inner(Box::new(layer), None)
    }

    fn push_inner(
        &mut self,
        layer: Box<dyn RegularizedModuleT + Send + Sync>,
        activation: Option<Activation>,
    ) -> Result<()> {
        if let Some(prev) = self.module_layers.last() {
            check_chain(prev.dim_out(), layer.dim_in())?;
        }
        self.module_layers.push(layer);
        self.activation_layers.push(activation);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.module_layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.module_layers.is_empty()
    }
}

impl Default for StackLayers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bayesian_dense::{BayesianDenseConfig, BayesianDenseLayer};
    use crate::error::LayerError;
    use approx::assert_abs_diff_eq;
    use candle_core::{DType, Device};
    use candle_nn::{VarBuilder, VarMap};

    fn config(seed: u64) -> BayesianDenseConfig {
        BayesianDenseConfig {
            dtype: DType::F64,
            seed: Some(seed),
            temperature: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_stack_sums_losses() -> Result<()> {
        let dev = Device::Cpu;
        let l1 = BayesianDenseLayer::new(2, 4, 20, config(1), &dev)?;
        let l2 = BayesianDenseLayer::new(4, 1, 20, config(2), &dev)?;
        let expected = l1.regularization_loss(true)?.to_scalar::<f64>()?
            + l2.regularization_loss(true)?.to_scalar::<f64>()?;

        let mut stack = StackLayers::new();
        stack.push_with_act(l1, Activation::Sigmoid)?;
        stack.push(l2)?;
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.dim_in(), 2);
        assert_eq!(stack.dim_out(), 1);

        let x = Tensor::ones((7, 2), DType::F64, &dev)?;
        let (y, loss) = stack.forward_t(&x, true)?;
        assert_eq!(y.dims(), &[7, 1]);
        assert_abs_diff_eq!(loss.to_scalar::<f64>()?, expected, epsilon = 1e-9);

        let (_, eval_loss) = stack.forward_t(&x, false)?;
        assert_eq!(eval_loss.to_scalar::<f64>()?, 0.0);
        Ok(())
    }

    #[test]
    fn test_mixed_with_plain_linear() -> Result<()> {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F64, &dev);
        let linear = candle_nn::linear(3, 2, vb.pp("fc"))?;

        let mut stack = StackLayers::new();
        stack.push_with_act(linear, Activation::Relu)?;
        stack.push(BayesianDenseLayer::new(2, 1, 10, config(3), &dev)?)?;

        let x = Tensor::ones((4, 3), DType::F64, &dev)?;
        let (y, loss) = stack.forward_t(&x, true)?;
        assert_eq!(y.dims(), &[4, 1]);
        assert!(loss.to_scalar::<f64>()? > 0.0);
        Ok(())
    }

    #[test]
    fn test_mismatched_chain_rejected() -> Result<()> {
        let dev = Device::Cpu;
        let mut stack = StackLayers::new();
        stack.push(BayesianDenseLayer::new(2, 4, 10, config(1), &dev)?)?;
        assert!(matches!(
            stack.push(BayesianDenseLayer::new(3, 1, 10, config(2), &dev)?),
            Err(LayerError::ShapeMismatch { .. })
        ));
        assert_eq!(stack.len(), 1);
        Ok(())
    }
}
