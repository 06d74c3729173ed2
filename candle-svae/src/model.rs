use crate::candle_aux_linear::WeightInit;
use crate::candle_decoder_mixture::MixtureDecoder;
use crate::candle_elbo::*;
use crate::candle_encoder_natparam::NatParamEncoder;
use crate::candle_inference::*;
use crate::candle_model_traits::{DecoderType, NatParamEncoderT};
use crate::candle_recognition_gmm::*;
use crate::candle_student_t::StudentTLocScale;
use crate::config::{ExperimentConfig, Method};
use crate::error::{Result, SvaeError};
use crate::tensor_util::tensor_to_array2;
use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use log::info;
use mixture_param::dirichlet::DirichletNatural;
use mixture_param::io::ParamIo;
use mixture_param::*;
use std::path::Path;

/// Architecture and initialization of a structured VAE
#[derive(Clone, Debug)]
pub struct ModelSpec {
    pub method: Method,
    pub num_components: usize,
    pub dim_obs: usize,
    pub dim_latent: usize,
    /// hidden layer sizes of both encoder and decoder
    pub hidden_layers: Vec<usize>,
    pub decoder_type: DecoderType,
    pub seed: u64,
}

impl ModelSpec {
    /// two tanh layers of `U` units on either side
    pub fn from_config(cfg: &ExperimentConfig, dim_obs: usize) -> Self {
        Self {
            method: cfg.method,
            num_components: cfg.num_components,
            dim_obs,
            dim_latent: cfg.dim_latent,
            hidden_layers: vec![cfg.hidden_units; 2],
            decoder_type: cfg.decoder_type,
            seed: cfg.seed,
        }
    }
}

/// Conjugate part of the model
pub enum PgmState {
    /// Dirichlet + NIW prior and posterior
    Gaussian { prior: GmmNatural, theta: GmmNatural },
    /// Dirichlet prior and posterior of the weights; locations and
    /// scales are point estimates living in the `VarMap`
    StudentT {
        prior: DirichletNatural,
        theta: SmmState,
        loc_scale: StudentTLocScale,
    },
}

impl PgmState {
    pub fn validate(&self) -> std::result::Result<(), ParamError> {
        match self {
            PgmState::Gaussian { theta, .. } => theta.validate(),
            PgmState::StudentT { theta, .. } => theta.validate(),
        }
    }

    /// `E[π]` of the posterior Dirichlet
    pub fn mixture_coefficients(&self) -> std::result::Result<Vec<f64>, ParamError> {
        let dir = match self {
            PgmState::Gaussian { theta, .. } => &theta.dirichlet,
            PgmState::StudentT { theta, .. } => &theta.dirichlet,
        };
        Ok(dir.to_standard()?.expected_pi().to_vec())
    }
}

enum MixtureStart {
    Gaussian(GmmNatural),
    StudentT(Box<SmmInit>),
}

/// Everything that is learned: network weights (including `phi_gmm`
/// and, for the Student-t mixture, locations and scales) in a single
/// `VarMap`, and the conjugate state updated by CVI
pub struct ModelParameters {
    pub spec: ModelSpec,
    pub varmap: VarMap,
    pub encoder: NatParamEncoder,
    pub decoder: MixtureDecoder,
    pub phi_gmm: RecognitionGmm,
    pub pgm: PgmState,
    device: Device,
}

impl ModelParameters {
    /// Initialize all parameters of `spec` on `device`
    ///
    /// The mixture prior and posterior are drawn first; `phi_gmm` (and
    /// the Student-t locations and scales) start from that posterior.
    pub fn instantiate(spec: &ModelSpec, device: &Device) -> Result<Self> {
        let kk = spec.num_components;
        let ll = spec.dim_latent;
        let varmap = VarMap::new();
        let mut init = WeightInit::new(&varmap, device, spec.seed);

        let (start, theta_gmm) = match spec.method {
            Method::Svae => {
                let (prior, theta) = init_mm(kk, ll, spec.seed);
                (MixtureStart::Gaussian(prior), theta)
            }
            Method::SvaeSmm { dof } => {
                let smm = init_smm(kk, ll, dof, spec.seed)?;
                let theta = smm.theta.clone();
                (MixtureStart::StudentT(Box::new(smm)), theta)
            }
        };

        let phi_gmm = init_recognition_params(&theta_gmm, &mut init)?;

        let pgm = match start {
            MixtureStart::Gaussian(prior) => PgmState::Gaussian {
                prior,
                theta: theta_gmm,
            },
            MixtureStart::StudentT(smm) => {
                let loc_scale = StudentTLocScale::new(&smm.loc_kl, &smm.scale_chol_kll, &mut init)?;
                PgmState::StudentT {
                    prior: smm.prior,
                    theta: smm.state,
                    loc_scale,
                }
            }
        };
        pgm.validate()?;

        let encoder = NatParamEncoder::new(spec.dim_obs, ll, &spec.hidden_layers, &mut init)?;
        let decoder = MixtureDecoder::new(
            spec.dim_obs,
            ll,
            &spec.hidden_layers,
            spec.decoder_type,
            &mut init,
        )?;

        info!(
            "model: K = {}, L = {}, D = {}, hidden {:?}, {} variables",
            kk,
            ll,
            spec.dim_obs,
            spec.hidden_layers,
            varmap.all_vars().len()
        );

        Ok(Self {
            spec: spec.clone(),
            varmap,
            encoder,
            decoder,
            phi_gmm,
            pgm,
            device: device.clone(),
        })
    }

    /// Restart the conjugate part from a hard clustering of `y_nd`
    ///
    /// The posterior is the prior plus the statistics of the encoder
    /// means within each cluster; `phi_gmm` (and the Student-t
    /// locations and scales) follow that posterior. Network weights are
    /// left as they are.
    ///
    /// * `y_nd` - observations
    /// * `membership` - cluster of each row of `y_nd`
    pub fn init_from_clustering(&mut self, y_nd: &Tensor, membership: &[usize]) -> Result<()> {
        let local = self.encoder.forward_natparam(y_nd)?;
        let x_nl = tensor_to_array2(&local.mean_nl)?;
        let (prior, theta) =
            init_mm_from_clustering(x_nl.view(), membership, self.spec.num_components)?;

        let mut init = WeightInit::new(&self.varmap, &self.device, self.spec.seed);

        self.pgm = match self.spec.method {
            Method::Svae => {
                self.phi_gmm = init_recognition_params(&theta, &mut init)?;
                PgmState::Gaussian { prior, theta }
            }
            Method::SvaeSmm { dof } => {
                let smm = smm_from_mixture(prior, theta, dof)?;
                self.phi_gmm = init_recognition_params(&smm.theta, &mut init)?;
                let loc_scale = StudentTLocScale::new(&smm.loc_kl, &smm.scale_chol_kll, &mut init)?;
                PgmState::StudentT {
                    prior: smm.prior,
                    theta: smm.state,
                    loc_scale,
                }
            }
        };
        self.pgm.validate()?;

        info!(
            "mixture restarted from a clustering of {} points",
            membership.len()
        );
        Ok(())
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// One recognition pass, see `inference`
    pub fn infer(
        &self,
        y_nd: &Tensor,
        nb_samples: usize,
        seed: InferenceSeed,
    ) -> candle_core::Result<InferenceOutput> {
        inference(
            y_nd,
            &self.phi_gmm,
            &self.encoder,
            &self.decoder,
            nb_samples,
            seed,
        )
    }

    pub fn predict(
        &self,
        y_nd: &Tensor,
        nb_samples: usize,
        seed: InferenceSeed,
    ) -> candle_core::Result<(Tensor, Vec<u32>)> {
        predict(
            y_nd,
            &self.phi_gmm,
            &self.encoder,
            &self.decoder,
            nb_samples,
            seed,
        )
    }

    /// ELBO of an inference pass under the current conjugate state
    pub fn elbo(&self, y_nd: &Tensor, out: &InferenceOutput) -> Result<(Tensor, ElboDetails)> {
        let decoder_type = self.spec.decoder_type;
        match &self.pgm {
            PgmState::Gaussian { theta, .. } => compute_elbo(
                y_nd,
                &out.recon,
                theta,
                &out.phi_tilde,
                &out.x_k_samples,
                &out.log_r_nk,
                decoder_type,
            ),
            PgmState::StudentT {
                theta, loc_scale, ..
            } => compute_elbo_smm(
                y_nd,
                &out.recon,
                theta,
                loc_scale,
                &out.phi_tilde,
                &out.x_k_samples,
                &out.log_r_nk,
                decoder_type,
            ),
        }
    }

    /// Network weights as `{prefix}.safetensors` and the conjugate
    /// state as `{prefix}.pgm.json`
    pub fn save(&self, dir: &Path, prefix: &str) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        self.varmap
            .save(dir.join(format!("{}.safetensors", prefix)))?;

        let pgm_file = dir.join(format!("{}.pgm.json", prefix));
        let res = match &self.pgm {
            PgmState::Gaussian { theta, .. } => theta.to_json(&pgm_file),
            PgmState::StudentT { theta, .. } => theta.to_json(&pgm_file),
        };
        res.map_err(|e| SvaeError::Io(std::io::Error::other(e.to_string())))
    }

    /// Restore network weights and conjugate state written by `save`
    pub fn load(&mut self, dir: &Path, prefix: &str) -> Result<()> {
        self.varmap
            .load(dir.join(format!("{}.safetensors", prefix)))?;

        let pgm_file = dir.join(format!("{}.pgm.json", prefix));
        let to_io = |e: anyhow::Error| SvaeError::Io(std::io::Error::other(e.to_string()));
        match &mut self.pgm {
            PgmState::Gaussian { theta, .. } => {
                *theta = GmmNatural::from_json(&pgm_file).map_err(to_io)?;
            }
            PgmState::StudentT { theta, .. } => {
                *theta = SmmState::from_json(&pgm_file).map_err(to_io)?;
            }
        }
        self.pgm.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn spec(method: Method) -> ModelSpec {
        ModelSpec {
            method,
            num_components: 3,
            dim_obs: 4,
            dim_latent: 2,
            hidden_layers: vec![8, 8],
            decoder_type: DecoderType::Gaussian,
            seed: 1,
        }
    }

    #[test]
    fn recognition_gmm_starts_at_theta() -> Result<()> {
        let model = ModelParameters::instantiate(&spec(Method::Svae), &Device::Cpu)?;
        let theta = match &model.pgm {
            PgmState::Gaussian { theta, .. } => theta,
            _ => unreachable!(),
        };
        let expected = theta.expected_gaussian()?;
        let means = model.phi_gmm.means()?.to_vec2::<f32>()?;
        for k in 0..3 {
            for l in 0..2 {
                assert_abs_diff_eq!(means[k][l] as f64, expected.mu_kl[[k, l]], epsilon = 1e-3);
            }
        }
        let pi = model.pgm.mixture_coefficients()?;
        assert_abs_diff_eq!(pi.iter().sum::<f64>(), 1.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn student_t_variant_registers_loc_scale() -> Result<()> {
        let model = ModelParameters::instantiate(&spec(Method::SvaeSmm { dof: 3. }), &Device::Cpu)?;
        let vars = model.varmap.data().lock().unwrap();
        assert!(vars.contains_key("theta.mu_k"));
        assert!(vars.contains_key("theta.l_k_raw"));
        assert!(vars.contains_key("phi_gmm.eta1"));
        Ok(())
    }

    #[test]
    fn clustering_start_separates_the_clusters() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let (x, labels) = crate::datasets::make_clusters(3, 40, 6., 0.3, 2)?;
        let x = x.mapv(|v| v as f64);
        let mut s = spec(Method::Svae);
        s.dim_obs = x.ncols();
        let mut model = ModelParameters::instantiate(&s, &dev)?;

        let y = crate::tensor_util::array2_to_tensor(x.view(), &dev)?;
        model.init_from_clustering(&y, &labels)?;

        let theta = match &model.pgm {
            PgmState::Gaussian { theta, .. } => theta.clone(),
            _ => unreachable!(),
        };
        // every component got its own points
        let pi = model.pgm.mixture_coefficients()?;
        for p in pi.iter() {
            assert_abs_diff_eq!(*p, 1. / 3., epsilon = 0.01);
        }

        // phi_gmm follows the new theta
        let expected = theta.expected_gaussian()?;
        let means = model.phi_gmm.means()?.to_vec2::<f32>()?;
        for k in 0..3 {
            for l in 0..2 {
                assert_abs_diff_eq!(means[k][l] as f64, expected.mu_kl[[k, l]], epsilon = 1e-3);
            }
        }

        assert!(model.init_from_clustering(&y, &labels[1..]).is_err());
        Ok(())
    }

    #[test]
    fn clustering_start_of_student_t_mixture() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let (x, labels) = crate::datasets::make_clusters(3, 20, 6., 0.3, 4)?;
        let x = x.mapv(|v| v as f64);
        let mut s = spec(Method::SvaeSmm { dof: 4. });
        s.dim_obs = x.ncols();
        let mut model = ModelParameters::instantiate(&s, &dev)?;
        let num_vars = model.varmap.all_vars().len();

        let y = crate::tensor_util::array2_to_tensor(x.view(), &dev)?;
        model.init_from_clustering(&y, &labels)?;

        match &model.pgm {
            PgmState::StudentT {
                theta, loc_scale, ..
            } => {
                assert!(theta.dof_k.iter().all(|&d| d == 4.));
                assert_eq!(loc_scale.mu_kl.dims(), &[3, 2]);
            }
            _ => unreachable!(),
        }
        // the same variables are overwritten, not added
        assert_eq!(model.varmap.all_vars().len(), num_vars);
        Ok(())
    }

    #[test]
    fn checkpoint_round_trip() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let a = ModelParameters::instantiate(&spec(Method::Svae), &Device::Cpu)?;
        a.save(dir.path(), "ckpt")?;

        let mut other = spec(Method::Svae);
        other.seed = 99;
        let mut b = ModelParameters::instantiate(&other, &Device::Cpu)?;
        b.load(dir.path(), "ckpt")?;

        let wa = a.phi_gmm.eta1_kl.flatten_all()?.to_vec1::<f32>()?;
        let wb = b.phi_gmm.eta1_kl.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(wa, wb);
        Ok(())
    }
}
