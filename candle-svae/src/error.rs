use mixture_param::ParamError;
use thiserror::Error;

/// Errors raised while building or training a structured VAE
#[derive(Error, Debug)]
pub enum SvaeError {
    /// missing or invalid hyper-parameter, detected before the first
    /// iteration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// invalid mixture parameters or a non-finite objective
    #[error("numerical error at iteration {iteration}: {msg}")]
    Numerical { iteration: usize, msg: String },

    #[error("resource exhausted: {0}")]
    ResourceExhaustion(String),

    #[error(transparent)]
    Param(#[from] ParamError),

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SvaeError {
    pub fn config(msg: impl Into<String>) -> Self {
        SvaeError::Configuration(msg.into())
    }

    /// attach the iteration to parameter errors; other errors pass
    /// through unchanged
    pub fn at_iteration(self, iteration: usize) -> Self {
        match self {
            SvaeError::Param(e) => SvaeError::Numerical {
                iteration,
                msg: e.to_string(),
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SvaeError>;
