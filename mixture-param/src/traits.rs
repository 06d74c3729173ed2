use crate::error::Result;

/// A conjugate exponential-family parameter in its natural
/// parameterization, updated from expected sufficient statistics
pub trait ConjugateParam: Sized {
    type Stat;

    /// Conjugate posterior: natural parameters plus the statistics
    ///
    /// * `stat` - expected sufficient statistics
    fn add_stat(&self, stat: &Self::Stat) -> Result<Self>;

    /// `(1 - rho) * self + rho * target`, field by field
    ///
    /// `rho` must lie in [0, 1]; the value is not clamped.
    fn convex_combination(&self, target: &Self, rho: f64) -> Self;

    /// check that the parameters convert to a valid standard form
    fn validate(&self) -> Result<()>;
}
