pub mod cvi;
pub mod dirichlet;
pub mod error;
pub mod gaussian;
pub mod io;
pub mod kmeans;
pub mod linalg;
pub mod mixture;
pub mod niw;
pub mod suff_stat;
pub mod traits;

pub use cvi::{m_step, m_step_smm, update_gmm_params, CviSchedule};
pub use error::ParamError;
pub use kmeans::{Kmeans, KmeansArgs};
pub use mixture::{
    init_mm, init_mm_from_clustering, init_mm_with_means, init_smm, smm_from_mixture, GmmNatural,
    SmmInit, SmmState,
};
pub use traits::ConjugateParam;
