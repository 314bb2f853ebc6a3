use thiserror::Error;

/// Errors raised by the Bayesian layers
///
/// Construction errors fire before any parameter is created;
/// capability errors fire before any noise is drawn.
#[derive(Debug, Error)]
pub enum LayerError {
    #[error("invalid dimension: {name} = {value} (must be >= 1)")]
    InvalidDimension { name: &'static str, value: usize },

    #[error("invalid temperature: {0} (must be > 0)")]
    InvalidTemperature(f64),

    #[error("{what}: expected shape {expected:?}, got {got:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("invalid initial scale: {0}")]
    InvalidScale(String),

    #[error("encoder initialization: {0}")]
    EncoderInitialization(String),

    #[error("unsupported prediction mode: {0}")]
    Unsupported(&'static str),

    #[error("input shape: {0}")]
    InputShape(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("degenerate posterior scale: smallest entry = {0}")]
    DegenerateScale(f64),

    #[error("non-finite posterior scale: largest entry = {0}")]
    NonFiniteScale(f64),

    #[error("non-finite KL divergence: {0}")]
    NonFiniteKl(f64),

    #[error("random stream lock poisoned")]
    RngPoisoned,

    #[error(transparent)]
    Tensor(#[from] candle_core::Error),
}

pub type Result<T> = std::result::Result<T, LayerError>;

impl From<LayerError> for candle_core::Error {
    fn from(err: LayerError) -> Self {
        match err {
            LayerError::Tensor(e) => e,
            other => candle_core::Error::wrap(other),
        }
    }
}
