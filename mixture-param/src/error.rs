use thiserror::Error;

/// Errors raised when exponential-family parameters leave their valid domain
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParamError {
    /// invalid parameters of one mixture component, e.g., a scale
    /// matrix that is not positive definite or a non-positive
    /// concentration
    #[error("numerical error in component {component}: {msg}")]
    Numerical { component: usize, msg: String },

    #[error("shape mismatch: {0}")]
    Shape(String),
}

impl ParamError {
    pub fn numerical(component: usize, msg: impl Into<String>) -> Self {
        ParamError::Numerical {
            component,
            msg: msg.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ParamError>;
