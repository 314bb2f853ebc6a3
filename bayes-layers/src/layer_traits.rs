use candle_core::{Tensor, D};
use candle_nn::Linear;

use crate::bayesian_dense::BayesianDenseLayer;
use crate::error::{LayerError, Result};

pub trait RegularizedModuleT {
    /// A layer call that spits out two results (output, loss term)
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - whether the loss term should be active
    ///
    /// # Returns `(y_nk, loss)`
    /// * `y_nk` - layer output (n x k)
    /// * `loss` - scalar loss contribution, already per datapoint
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)>;

    fn dim_in(&self) -> usize;

    fn dim_out(&self) -> usize;
}

impl RegularizedModuleT for BayesianDenseLayer {
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        BayesianDenseLayer::forward_t(self, x_nd, train)
    }

    fn dim_in(&self) -> usize {
        self.input_dim()
    }

    fn dim_out(&self) -> usize {
        self.output_dim()
    }
}

/// Plain dense layers carry no regularizer
impl RegularizedModuleT for Linear {
    fn forward_t(&self, x_nd: &Tensor, _train: bool) -> Result<(Tensor, Tensor)> {
        use candle_nn::Module;
        let y_nk = self.forward(x_nd)?;
        let loss = Tensor::zeros((), y_nk.dtype(), y_nk.device())?;
        Ok((y_nk, loss))
    }

    fn dim_in(&self) -> usize {
        self.weight().dim(D::Minus1).unwrap_or(0)
    }

    fn dim_out(&self) -> usize {
        self.weight().dim(0).unwrap_or(0)
    }
}

pub(crate) fn check_chain(prev_out: usize, next_in: usize) -> Result<()> {
    if prev_out == next_in {
        Ok(())
    } else {
        Err(LayerError::ShapeMismatch {
            what: "stacked layer input",
            expected: vec![prev_out],
            got: vec![next_in],
        })
    }
}
