use crate::dirichlet::*;
use crate::error::*;
use crate::gaussian::*;
use crate::niw::*;
use crate::suff_stat::*;
use crate::traits::*;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Natural parameters of a Bayesian Gaussian mixture: Dirichlet
/// weights and one Normal-Inverse-Wishart per component. Used for
/// both the fixed prior and the variational posterior `theta`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GmmNatural {
    pub dirichlet: DirichletNatural,
    pub niw: NiwNatural,
}

impl GmmNatural {
    pub fn num_components(&self) -> usize {
        self.dirichlet.num_components()
    }

    pub fn dim(&self) -> usize {
        self.niw.dims().1
    }

    /// E[μ(k)] and plug-in Σ(k)
    pub fn expected_gaussian(&self) -> Result<GaussianStandard> {
        self.niw.expected_values()
    }

    pub fn expected_log_pi(&self) -> Result<Array1<f64>> {
        self.dirichlet.expected_log_pi()
    }
}

impl ConjugateParam for GmmNatural {
    type Stat = MixtureSuffStats;

    fn add_stat(&self, stat: &Self::Stat) -> Result<Self> {
        Ok(Self {
            dirichlet: self.dirichlet.add_stat(&stat.n_k)?,
            niw: self.niw.add_stat(stat)?,
        })
    }

    fn convex_combination(&self, target: &Self, rho: f64) -> Self {
        Self {
            dirichlet: self.dirichlet.convex_combination(&target.dirichlet, rho),
            niw: self.niw.convex_combination(&target.niw, rho),
        }
    }

    fn validate(&self) -> Result<()> {
        self.dirichlet.validate()?;
        self.niw.validate()
    }
}

/// Bayesian part of a Student-t mixture. Only the mixture weights
/// carry a variational posterior; locations and scales are point
/// estimates trained elsewhere, and degrees of freedom stay fixed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SmmState {
    pub dirichlet: DirichletNatural,
    pub dof_k: Array1<f64>,
}

impl SmmState {
    pub fn num_components(&self) -> usize {
        self.dirichlet.num_components()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(k) = self.dof_k.iter().position(|d| !d.is_finite() || *d <= 0.) {
            return Err(ParamError::numerical(
                k,
                format!("degrees of freedom {} is not positive", self.dof_k[k]),
            ));
        }
        self.dirichlet.validate()
    }
}

/// Initial values of a Student-t mixture
pub struct SmmInit {
    /// Dirichlet prior over the mixture weights
    pub prior: DirichletNatural,
    pub state: SmmState,
    /// locations, scales and the Gaussian theta they were taken from,
    /// used to initialize the recognition model
    pub loc_kl: Array2<f64>,
    pub scale_chol_kll: Array3<f64>,
    pub theta: GmmNatural,
}

///////////////////////////
// mixture initialization //
///////////////////////////

/// Hyper-parameters of the mixture initializer
#[derive(Clone, Debug)]
pub struct MixtureInit {
    /// total prior concentration, spread evenly over components
    pub prior_alpha_total: f64,
    pub prior_beta: f64,
    /// prior scale and degrees of freedom are `L + prior_dof_offset`
    pub prior_dof_offset: f64,
    pub theta_alpha: f64,
    pub theta_beta: f64,
    /// initial means are drawn uniformly from `[-m_scale, m_scale]`
    pub m_scale: f64,
}

impl Default for MixtureInit {
    fn default() -> Self {
        Self {
            prior_alpha_total: 0.05,
            prior_beta: 0.5,
            prior_dof_offset: 0.5,
            theta_alpha: 1.0,
            theta_beta: 1.0,
            m_scale: 5.0,
        }
    }
}

impl MixtureInit {
    /// symmetric prior: equal concentration, zero mean, `(L + offset) I`
    /// scale, `L + offset` degrees of freedom
    pub fn prior(&self, num_components: usize, dim: usize) -> GmmNatural {
        let kk = num_components;
        let ll = dim as f64;
        let alpha = self.prior_alpha_total / kk as f64;
        let v = ll + self.prior_dof_offset;

        let niw = NiwStandard {
            beta_k: Array1::from_elem(kk, self.prior_beta),
            m_kl: Array2::zeros((kk, dim)),
            c_kll: identity_stack(kk, dim, v),
            v_k: Array1::from_elem(kk, v),
        };

        GmmNatural {
            dirichlet: DirichletStandard::symmetric(kk, alpha).to_natural(),
            niw: niw.to_natural(),
        }
    }

    /// initial posterior centred at the given means, `2L I` scale and
    /// `L + 1` degrees of freedom
    pub fn theta_with_means(&self, m_kl: Array2<f64>) -> GmmNatural {
        let (kk, dim) = m_kl.dim();
        let ll = dim as f64;

        let niw = NiwStandard {
            beta_k: Array1::from_elem(kk, self.theta_beta),
            m_kl,
            c_kll: identity_stack(kk, dim, 2. * ll),
            v_k: Array1::from_elem(kk, ll + 1.),
        };

        GmmNatural {
            dirichlet: DirichletStandard::symmetric(kk, self.theta_alpha).to_natural(),
            niw: niw.to_natural(),
        }
    }

    /// initial posterior with uniformly perturbed means
    pub fn theta(&self, num_components: usize, dim: usize, seed: u64) -> GmmNatural {
        let mut rng = StdRng::seed_from_u64(seed);
        let m_kl = Array2::from_shape_simple_fn((num_components, dim), || {
            self.m_scale * rng.random_range(-1.0..1.0)
        });
        self.theta_with_means(m_kl)
    }
}

fn identity_stack(num_components: usize, dim: usize, scale: f64) -> Array3<f64> {
    let mut ret = Array3::zeros((num_components, dim, dim));
    for k in 0..num_components {
        ret.index_axis_mut(Axis(0), k)
            .assign(&(Array2::eye(dim) * scale));
    }
    ret
}

/// Prior and seeded initial posterior of a `K`-component Gaussian
/// mixture in `L` dimensions
///
/// * `num_components` - K
/// * `dim` - L
/// * `seed` - random seed for the initial means
pub fn init_mm(num_components: usize, dim: usize, seed: u64) -> (GmmNatural, GmmNatural) {
    let init = MixtureInit::default();
    (
        init.prior(num_components, dim),
        init.theta(num_components, dim, seed),
    )
}

/// Same as `init_mm`, but the initial posterior is centred at an
/// existing clustering
///
/// * `m_kl` - initial cluster means (K x L)
pub fn init_mm_with_means(m_kl: Array2<f64>) -> (GmmNatural, GmmNatural) {
    let init = MixtureInit::default();
    let (kk, dim) = m_kl.dim();
    (init.prior(kk, dim), init.theta_with_means(m_kl))
}

/// Prior and initial posterior from a hard clustering of latent points
///
/// `theta = prior + (N(k), Σ x, Σ x x')` over the members of each
/// cluster; a cluster without members starts at the prior.
///
/// * `x_nl` - latent points (N x L)
/// * `membership` - cluster of each point, each below `num_components`
pub fn init_mm_from_clustering(
    x_nl: ArrayView2<f64>,
    membership: &[usize],
    num_components: usize,
) -> Result<(GmmNatural, GmmNatural)> {
    let (nn, dim) = x_nl.dim();
    if membership.len() != nn {
        return Err(ParamError::Shape(format!(
            "{} points vs. {} memberships",
            nn,
            membership.len()
        )));
    }

    let mut r_nk = Array2::<f64>::zeros((nn, num_components));
    for (n, &k) in membership.iter().enumerate() {
        if k >= num_components {
            return Err(ParamError::Shape(format!(
                "membership {} of point {} exceeds {} components",
                k, n, num_components
            )));
        }
        r_nk[[n, k]] = 1.;
    }

    let prior = MixtureInit::default().prior(num_components, dim);
    let theta = prior.add_stat(&MixtureSuffStats::from_samples(x_nl, r_nk.view())?)?;
    theta.validate()?;
    Ok((prior, theta))
}

/// Student-t mixture initialization
///
/// The Gaussian-mixture theta is built as in `init_mm`; its Dirichlet
/// part becomes the variational state of the mixture weights and its
/// expected means and covariance Cholesky factors become the initial
/// point estimates. Only the Dirichlet prior is kept.
///
/// * `dof` - degrees of freedom shared by every component
pub fn init_smm(num_components: usize, dim: usize, dof: f64, seed: u64) -> Result<SmmInit> {
    let (prior, theta) = init_mm(num_components, dim, seed);
    smm_from_mixture(prior, theta, dof)
}

/// Student-t mixture starting at the expected means and plug-in
/// scales of a Gaussian mixture posterior
pub fn smm_from_mixture(prior: GmmNatural, theta: GmmNatural, dof: f64) -> Result<SmmInit> {
    let expected = theta.expected_gaussian()?;
    let scale_chol_kll = expected.cholesky()?;

    let state = SmmState {
        dirichlet: theta.dirichlet.clone(),
        dof_k: Array1::from_elem(theta.num_components(), dof),
    };
    state.validate()?;

    Ok(SmmInit {
        prior: prior.dirichlet,
        state,
        loc_kl: expected.mu_kl,
        scale_chol_kll,
        theta,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn prior_is_symmetric_and_valid() {
        let (prior, theta) = init_mm(4, 3, 0);
        prior.validate().unwrap();
        theta.validate().unwrap();

        let alpha = prior.dirichlet.to_standard().unwrap().alpha_k;
        for k in 0..4 {
            assert_abs_diff_eq!(alpha[k], 0.05 / 4., epsilon = 1e-12);
        }

        let std = prior.niw.to_standard().unwrap();
        assert_abs_diff_eq!(std.v_k[2], 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(std.c_kll[[1, 0, 0]], 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(std.m_kl[[3, 2]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn theta_means_are_seeded_and_bounded() {
        let (_, a) = init_mm(3, 2, 42);
        let (_, b) = init_mm(3, 2, 42);
        let (_, c) = init_mm(3, 2, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let m_kl = a.niw.to_standard().unwrap().m_kl;
        assert!(m_kl.iter().all(|m| m.abs() <= 5.0));
    }

    #[test]
    fn provided_means_are_kept() {
        let m_kl = array![[1.0, 2.0], [-3.0, 0.5]];
        let (_, theta) = init_mm_with_means(m_kl.clone());
        let expected = theta.expected_gaussian().unwrap();
        for (a, b) in expected.mu_kl.iter().zip(m_kl.iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-9);
        }
        // C / v = 2L / (L + 1)
        assert_abs_diff_eq!(expected.sigma_kll[[0, 0, 0]], 4.0 / 3.0, epsilon = 1e-6);
    }

    #[test]
    fn clustering_sets_the_posterior_means() {
        let x_nl = array![[4.0, 0.0], [4.2, 0.2], [3.8, -0.2], [-3.0, 1.0], [-3.0, 1.2]];
        let membership = [1, 1, 1, 0, 0];
        let (prior, theta) = init_mm_from_clustering(x_nl.view(), &membership, 3).unwrap();

        let expected = theta.expected_gaussian().unwrap();
        // β m = β0 m0 + Σ x with m0 = 0
        assert_abs_diff_eq!(expected.mu_kl[[1, 0]], 12.0 / 3.5, epsilon = 1e-9);
        assert_abs_diff_eq!(expected.mu_kl[[0, 1]], 2.2 / 2.5, epsilon = 1e-9);

        // no members: the prior itself
        assert_eq!(theta.niw.a_kll.index_axis(Axis(0), 2), prior.niw.a_kll.index_axis(Axis(0), 2));
        assert_abs_diff_eq!(
            theta.dirichlet.nat_k[1] - prior.dirichlet.nat_k[1],
            3.0,
            epsilon = 1e-12
        );

        assert!(init_mm_from_clustering(x_nl.view(), &[0, 1], 3).is_err());
        assert!(init_mm_from_clustering(x_nl.view(), &[0, 1, 2, 3, 0], 3).is_err());
    }

    #[test]
    fn smm_keeps_only_dirichlet_prior() {
        let init = init_smm(3, 2, 4.0, 7).unwrap();
        assert_eq!(init.prior.num_components(), 3);
        assert_eq!(init.state.dof_k, array![4.0, 4.0, 4.0]);
        assert_eq!(init.loc_kl.dim(), (3, 2));
        // lower-triangular scale factors
        assert_abs_diff_eq!(init.scale_chol_kll[[0, 0, 1]], 0.0, epsilon = 1e-12);
        assert!(init.scale_chol_kll[[0, 0, 0]] > 0.);
    }
}
