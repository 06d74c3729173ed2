use crate::candle_data_loader::*;
use crate::candle_imputation::*;
use crate::candle_inference::InferenceSeed;
use crate::candle_loss_functions::*;
use crate::candle_model_traits::{DecoderOutput, DecoderType};
use crate::config::{ExperimentConfig, MixtureStartKind};
use crate::error::{Result, SvaeError};
use crate::model::*;
use crate::summary::SummaryWriter;
use crate::tensor_util::*;
use candle_core::backprop::GradStore;
use candle_core::{Device, Tensor, Var};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info};
use mixture_param::*;
use rayon::prelude::*;
use std::path::PathBuf;

/// random streams of `InferenceSeed::derive`; towers add their index
/// to the training stream
pub const STREAM_TRAIN: u64 = 0;
pub const STREAM_EVAL: u64 = 1 << 20;
pub const STREAM_IMPUTE: u64 = 2 << 20;

/// Upper bound on the elements of one (N x K x S x D) reconstruction
pub const MAX_RECON_ELEMENTS: usize = 1 << 28;

/// training rows clustered to start the mixture
pub const KMEANS_MAX_ROWS: usize = 2000;

/// Run-time options that do not change the model
#[derive(Clone, Debug)]
pub struct TrainOptions {
    pub device: Device,
    pub verbose: bool,
    pub show_progress: bool,
    /// write summaries and checkpoints under `log_dir`
    pub write_logs: bool,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            verbose: false,
            show_progress: true,
            write_logs: true,
        }
    }
}

/// Training statistics of one step, summed over towers
#[derive(Clone, Debug, Default)]
pub struct StepStats {
    pub iteration: usize,
    pub elbo: f32,
    /// `-elbo / batch size`
    pub elbo_normed: f32,
    pub neg_rec_err: f32,
    pub log_numerator: f32,
    pub log_denominator: f32,
    pub regularizer: f32,
    /// CVI step size used in this step
    pub rho: f64,
}

/// Held-out performance
#[derive(Clone, Debug, Default)]
pub struct EvalStats {
    pub iteration: usize,
    pub elbo_normed: f32,
    pub mse: f32,
    pub loglik: f32,
    /// `(entropy, purity)` when labels exist
    pub purity: Option<(f32, f32)>,
    /// `(mse, logprob)` on the missing entries
    pub imputation: Option<(f32, f32)>,
}

struct TowerOutput {
    grads: GradStore,
    num_rows: usize,
    elbo: [f32; 5],
    log_r_nk: Tensor,
    x_samples: Tensor,
}

fn check_recon_size(nn: usize, kk: usize, ss: usize, dd: usize) -> Result<()> {
    let ntot = nn.saturating_mul(kk).saturating_mul(ss).saturating_mul(dd);
    if ntot > MAX_RECON_ELEMENTS {
        return Err(SvaeError::ResourceExhaustion(format!(
            "{} x {} x {} x {} reconstructions exceed {} elements; \
             use smaller batches, more towers or fewer samples",
            nn, kk, ss, dd, MAX_RECON_ELEMENTS
        )));
    }
    Ok(())
}

/// Average per-tower gradients into the first tower's store
///
/// Variables without a gradient in any tower are left out.
pub fn average_gradients(stores: Vec<GradStore>, vars: &[Var]) -> Result<GradStore> {
    let mut iter = stores.into_iter();
    let mut first = iter
        .next()
        .ok_or_else(|| SvaeError::config("no tower produced gradients"))?;
    let rest: Vec<GradStore> = iter.collect();
    if rest.is_empty() {
        return Ok(first);
    }

    for var in vars {
        let x = var.as_tensor();
        let mut acc: Option<Tensor> = first.get(x).cloned();
        let mut count = usize::from(acc.is_some());
        for g in rest.iter().filter_map(|s| s.get(x)) {
            acc = Some(match acc {
                Some(a) => a.add(g)?,
                None => g.clone(),
            });
            count += 1;
        }
        if let Some(a) = acc {
            first.insert(x, (a / count as f64)?);
        }
    }
    Ok(first)
}

/// Inference, negative ELBO and its gradient on one shard
fn run_tower(
    model: &ModelParameters,
    y_nd: &Tensor,
    nb_samples: usize,
    seed: InferenceSeed,
    iteration: usize,
) -> Result<TowerOutput> {
    let nn = y_nd.dim(0)?;
    check_recon_size(nn, model.spec.num_components, nb_samples, model.spec.dim_obs)?;

    let out = model.infer(y_nd, nb_samples, seed)?;
    let (elbo, details) = model
        .elbo(y_nd, &out)
        .map_err(|e| e.at_iteration(iteration))?;

    let elbo_val = elbo.to_scalar::<f32>()?;
    if !elbo_val.is_finite() {
        return Err(SvaeError::Numerical {
            iteration,
            msg: format!("ELBO is {}", elbo_val),
        });
    }
    if !all_finite(&out.log_r_nk)? {
        return Err(SvaeError::Numerical {
            iteration,
            msg: "non-finite responsibilities".into(),
        });
    }

    let grads = elbo.neg()?.backward()?;
    let [rec, num, den, reg] = details.to_scalars()?;

    Ok(TowerOutput {
        grads,
        num_rows: nn,
        elbo: [elbo_val, rec, num, den, reg],
        log_r_nk: out.log_r_nk.detach(),
        x_samples: out.x_samples,
    })
}

/// Cluster (a regular subset of) the training rows with k-means and
/// start the mixture from the encoded clusters
pub fn start_from_kmeans(
    model: &mut ModelParameters,
    data: &SvaeData,
    seed: u64,
    device: &Device,
) -> Result<()> {
    let ntr = data.num_train();
    if ntr == 0 {
        return Ok(());
    }
    let stride = ntr.div_ceil(KMEANS_MAX_ROWS);
    let rows: Vec<usize> = (0..ntr).step_by(stride).collect();

    let y_nd = data
        .y_tr
        .select(ndarray::Axis(0), &rows)
        .mapv(|x| x as f64);
    let args = KmeansArgs::with_clusters(model.spec.num_components, seed);
    let membership = y_nd.kmeans_rows(&args);

    debug!("k-means on {} of {} training rows", rows.len(), ntr);
    model.init_from_clustering(&data.train_rows(&rows, device)?, &membership)
}

/// Training driver of one configuration
pub struct Trainer<'a> {
    cfg: &'a ExperimentConfig,
    opts: TrainOptions,
    pub model: ModelParameters,
    optimizer: AdamW,
    schedule: CviSchedule,
    sampler: MinibatchSampler,
    run_dir: PathBuf,
    summary: Option<SummaryWriter>,
    missing_mask: Option<Tensor>,
}

impl<'a> Trainer<'a> {
    /// Build the model for `data` and everything the loop needs
    pub fn new(cfg: &'a ExperimentConfig, data: &SvaeData, opts: TrainOptions) -> Result<Self> {
        let spec = ModelSpec::from_config(cfg, data.dim_obs());
        let mut model = ModelParameters::instantiate(&spec, &opts.device)?;
        if cfg.init == MixtureStartKind::Kmeans {
            start_from_kmeans(&mut model, data, cfg.seed, &opts.device)?;
        }

        let optimizer = AdamW::new(
            model.varmap.all_vars(),
            ParamsAdamW {
                lr: cfg.lr,
                weight_decay: 0.,
                ..Default::default()
            },
        )?;

        let run_dir = cfg.log_dir.join(cfg.run_id());
        let summary = if opts.write_logs {
            std::fs::create_dir_all(&run_dir)?;
            let config_file = std::fs::File::create(run_dir.join("config.json"))?;
            serde_json::to_writer_pretty(config_file, cfg)?;
            Some(SummaryWriter::new(run_dir.join("summary.jsonl"))?)
        } else {
            None
        };

        let nte = data.y_te.nrows();
        let missing_mask = if nte > 0 && cfg.missing_ratio > 0. && cfg.nb_perturbations > 0 {
            Some(generate_missing_data_mask(
                nte,
                data.dim_obs(),
                cfg.missing_ratio,
                cfg.seed,
                &opts.device,
            )?)
        } else {
            None
        };

        Ok(Self {
            cfg,
            opts,
            model,
            optimizer,
            schedule: CviSchedule::new(cfg.lrcvi, cfg.decay_rate),
            sampler: MinibatchSampler::new(data.num_train(), cfg.seed),
            run_dir,
            summary,
            missing_mask,
        })
    }

    /// One training step
    ///
    /// 1. draw a minibatch and cut it into towers
    /// 2. per tower in parallel: inference, ELBO, gradients of `-ELBO`
    /// 3. average gradients and take one Adam step
    /// 4. M-step on all towers' responsibilities and samples, then the
    ///    CVI blend of the conjugate state
    pub fn step(&mut self, data: &SvaeData, iteration: usize) -> Result<StepStats> {
        let cfg = self.cfg;
        let device = self.opts.device.clone();
        let towers = self.sampler.sample_towers(cfg.batch_size, cfg.nb_towers);

        let outputs = {
            let model = &self.model;
            towers
                .par_iter()
                .enumerate()
                .map(|(t, rows)| {
                    let y_nd = data.train_rows(rows, &device)?;
                    let seed = InferenceSeed::derive(cfg.seed, iteration, STREAM_TRAIN + t as u64);
                    run_tower(model, &y_nd, cfg.nb_samples, seed, iteration)
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut stats = StepStats {
            iteration,
            ..Default::default()
        };
        let mut batch_size = 0;
        for out in outputs.iter() {
            let [elbo, rec, num, den, reg] = out.elbo;
            stats.elbo += elbo;
            stats.neg_rec_err += rec;
            stats.log_numerator += num;
            stats.log_denominator += den;
            stats.regularizer += reg;
            batch_size += out.num_rows;
        }
        stats.elbo_normed = -stats.elbo / batch_size.max(1) as f32;

        let log_r_nk = Tensor::cat(&outputs.iter().map(|o| &o.log_r_nk).collect::<Vec<_>>(), 0)?;
        let x_nl = Tensor::cat(&outputs.iter().map(|o| &o.x_samples).collect::<Vec<_>>(), 0)?;

        let grads = average_gradients(
            outputs.into_iter().map(|o| o.grads).collect(),
            &self.model.varmap.all_vars(),
        )?;
        self.optimizer.step(&grads)?;

        stats.rho = self.schedule.step_size(iteration);
        self.update_pgm(&log_r_nk, &x_nl, stats.rho, iteration)?;

        Ok(stats)
    }

    /// conjugate M-step followed by the convex blend
    fn update_pgm(&mut self, log_r_nk: &Tensor, x_nl: &Tensor, rho: f64, iteration: usize) -> Result<()> {
        let r_nk = tensor_to_array2(&log_r_nk.exp()?)?;
        let stat_scale = self.cfg.stat_scale;
        let numerical = |e: ParamError| SvaeError::from(e).at_iteration(iteration);

        match &mut self.model.pgm {
            PgmState::Gaussian { prior, theta } => {
                let x_nl = tensor_to_array2(x_nl)?;
                let theta_star =
                    m_step(prior, x_nl.view(), r_nk.view(), stat_scale).map_err(numerical)?;
                let next = update_gmm_params(&*theta, &theta_star, rho);
                next.validate().map_err(numerical)?;
                *theta = next;
            }
            PgmState::StudentT { prior, theta, .. } => {
                let dir_star = m_step_smm(prior, r_nk.view(), stat_scale).map_err(numerical)?;
                let next = update_gmm_params(&theta.dirichlet, &dir_star, rho);
                next.validate().map_err(numerical)?;
                theta.dirichlet = next;
            }
        }
        Ok(())
    }

    /// ELBO, reconstruction error, predictive log-likelihood, cluster
    /// purity and imputation losses on the test rows
    pub fn evaluate(&self, data: &SvaeData, iteration: usize) -> Result<Option<EvalStats>> {
        let nte = data.y_te.nrows();
        if nte == 0 {
            return Ok(None);
        }
        let cfg = self.cfg;
        let nb_samples = cfg.nb_samples_te;
        check_recon_size(nte, cfg.num_components, nb_samples, data.dim_obs())?;

        let y_nd = data.test_tensor(&self.opts.device)?;
        let out = self.model.infer(
            &y_nd,
            nb_samples,
            InferenceSeed::derive(cfg.seed, iteration, STREAM_EVAL),
        )?;
        let (elbo, _) = self
            .model
            .elbo(&y_nd, &out)
            .map_err(|e| e.at_iteration(iteration))?;
        let r_nk = out.log_r_nk.exp()?;

        let mse = weighted_mse(&y_nd, &out.recon.mean_nksd, &r_nk, None)?;
        let loglik = match cfg.decoder_type {
            DecoderType::Bernoulli => bernoulli_logprob(&y_nd, &out.recon.out2_nksd, &out.log_r_nk)?,
            DecoderType::Gaussian => diagonal_gaussian_logprob(
                &y_nd,
                &out.recon.mean_nksd,
                &out.recon.out2_nksd,
                &out.log_r_nk,
            )?,
        };
        let purity = purity(&r_nk, data.lbl_te.as_deref())?;

        let imputation = match self.missing_mask.as_ref() {
            Some(mask) => {
                let impute = |y_pert: &Tensor, p: usize| -> candle_core::Result<(DecoderOutput, Tensor)> {
                    let seed = InferenceSeed::derive(cfg.seed, iteration, STREAM_IMPUTE + p as u64);
                    let out = self.model.infer(y_pert, nb_samples, seed)?;
                    Ok((out.recon, out.log_r_nk))
                };
                Some(imputation_losses(
                    &y_nd,
                    mask,
                    impute,
                    cfg.nb_perturbations,
                    cfg.decoder_type,
                    cfg.seed,
                )?)
            }
            None => None,
        };

        Ok(Some(EvalStats {
            iteration,
            elbo_normed: -elbo.to_scalar::<f32>()? / nte as f32,
            mse: mse.to_scalar::<f32>()?,
            loglik: loglik.to_scalar::<f32>()?,
            purity,
            imputation,
        }))
    }

    fn write_step_summary(&mut self, stats: &StepStats) -> Result<()> {
        let Some(w) = self.summary.as_mut() else {
            return Ok(());
        };
        let it = stats.iteration;
        w.scalar(it, "elbo_normed", stats.elbo_normed)?;
        w.scalar(it, "neg_rec_err", stats.neg_rec_err)?;
        w.scalar(it, "regularizer", stats.regularizer)?;
        w.scalar(it, "log_numerator", stats.log_numerator)?;
        w.scalar(it, "log_denominator", stats.log_denominator)?;
        w.scalar(it, "rho", stats.rho as f32)?;

        let pi = self.model.pgm.mixture_coefficients()?;
        let pi = Tensor::from_vec(
            pi.iter().map(|&x| x as f32).collect::<Vec<_>>(),
            pi.len(),
            &Device::Cpu,
        )?;
        w.histogram(it, "mixture_coefficients", &pi)?;

        let dev = Device::Cpu;
        let (means, covs) = match &self.model.pgm {
            PgmState::Gaussian { theta, .. } => {
                let g = theta.expected_gaussian()?;
                (
                    array2_to_tensor(g.mu_kl.view(), &dev)?,
                    array3_to_tensor(g.sigma_kll.view(), &dev)?,
                )
            }
            PgmState::StudentT { loc_scale, .. } => (loc_scale.mu_kl.clone(), loc_scale.scale()?),
        };
        w.tensor(it, "cluster_means", &means)?;
        w.tensor(it, "cluster_covs", &covs)?;
        Ok(())
    }

    fn write_eval_summary(&mut self, eval: &EvalStats) -> Result<()> {
        let Some(w) = self.summary.as_mut() else {
            return Ok(());
        };
        let it = eval.iteration;
        w.scalar(it, "test_elbo_normed", eval.elbo_normed)?;
        w.scalar(it, "test_mse", eval.mse)?;
        w.scalar(it, "test_loglik", eval.loglik)?;
        if let Some((entropy, purity)) = eval.purity {
            w.scalar(it, "entropy", entropy)?;
            w.scalar(it, "purity", purity)?;
        }
        if let Some((mse, logprob)) = eval.imputation {
            w.scalar(it, "imp_mse", mse)?;
            w.scalar(it, "imp_logprob", logprob)?;
        }
        Ok(())
    }

    fn checkpoint(&self, iteration: usize) -> Result<()> {
        if !self.opts.write_logs {
            return Ok(());
        }
        let prefix = format!("checkpoint_{}", iteration);
        self.model.save(&self.run_dir, &prefix)?;
        debug!("saved {}/{}", self.run_dir.display(), prefix);
        Ok(())
    }

    /// Run `nb_iters` steps, evaluating every `eval_freq` and saving
    /// every `checkpoint_freq` iterations (from the first) and at the
    /// end
    pub fn run(mut self, data: &SvaeData) -> Result<TrainOutput> {
        let cfg = self.cfg;
        let pb = ProgressBar::new(cfg.nb_iters as u64);
        if !self.opts.show_progress || self.opts.verbose {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        let mut trace = Vec::with_capacity(cfg.nb_iters);
        let mut evals = vec![];

        for iteration in 0..cfg.nb_iters {
            let stats = self.step(data, iteration)?;
            let last = iteration + 1 == cfg.nb_iters;

            if iteration % cfg.eval_freq == 0 || last {
                self.write_step_summary(&stats)?;
                if let Some(eval) = self.evaluate(data, iteration)? {
                    info!(
                        "[{}] elbo {:.4}, test elbo {:.4}, mse {:.4}, loglik {:.4}{}",
                        iteration,
                        stats.elbo_normed,
                        eval.elbo_normed,
                        eval.mse,
                        eval.loglik,
                        eval.purity
                            .map(|(h, p)| format!(", entropy {:.3}, purity {:.3}", h, p))
                            .unwrap_or_default()
                    );
                    self.write_eval_summary(&eval)?;
                    evals.push(eval);
                } else {
                    info!("[{}] elbo {:.4}", iteration, stats.elbo_normed);
                }
            } else if self.opts.verbose {
                debug!("[{}] elbo {:.4}", iteration, stats.elbo_normed);
            }

            if iteration % cfg.checkpoint_freq == 0 || last {
                self.checkpoint(iteration)?;
            }

            trace.push(stats);
            pb.inc(1);
        }
        pb.finish_and_clear();

        Ok(TrainOutput {
            model: self.model,
            trace,
            evals,
        })
    }
}

/// Trained parameters and the recorded statistics
pub struct TrainOutput {
    pub model: ModelParameters,
    pub trace: Vec<StepStats>,
    pub evals: Vec<EvalStats>,
}

/// Load the data of `cfg`, train, and return the trained model
pub fn train(cfg: &ExperimentConfig, opts: TrainOptions) -> Result<(SvaeData, TrainOutput)> {
    let data = SvaeData::load(&cfg.dataset, &cfg.load_options())?;
    info!("run {}", cfg.run_id());
    let out = Trainer::new(cfg, &data, opts)?.run(&data)?;
    Ok((data, out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_store_is_unchanged() -> Result<()> {
        let dev = Device::Cpu;
        let w = Var::from_tensor(&Tensor::new(&[1f32, 2., 3.], &dev)?)?;
        let loss = w.as_tensor().sqr()?.sum_all()?;
        let grads = loss.backward()?;
        let before = grads.get(w.as_tensor()).unwrap().to_vec1::<f32>()?;

        let avg = average_gradients(vec![grads], &[w.clone()])?;
        assert_eq!(avg.get(w.as_tensor()).unwrap().to_vec1::<f32>()?, before);
        Ok(())
    }

    #[test]
    fn two_towers_average() -> Result<()> {
        let dev = Device::Cpu;
        let w = Var::from_tensor(&Tensor::new(&[1f32, -1.], &dev)?)?;
        let g1 = (w.as_tensor() * 2.)?.sum_all()?.backward()?;
        let g2 = (w.as_tensor() * 4.)?.sum_all()?.backward()?;
        let avg = average_gradients(vec![g1, g2], &[w.clone()])?;
        assert_eq!(avg.get(w.as_tensor()).unwrap().to_vec1::<f32>()?, vec![3., 3.]);
        Ok(())
    }

    #[test]
    fn parameter_errors_in_the_bound_carry_the_iteration() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let (x, _) = crate::datasets::make_clusters(2, 10, 4., 0.5, 0)?;
        let data = SvaeData::from_matrix(x, None, 1.0, 0)?;
        let spec = ModelSpec {
            method: crate::config::Method::Svae,
            num_components: 2,
            dim_obs: 2,
            dim_latent: 2,
            hidden_layers: vec![4],
            decoder_type: DecoderType::Gaussian,
            seed: 0,
        };
        let mut model = ModelParameters::instantiate(&spec, &dev)?;
        if let PgmState::Gaussian { theta, .. } = &mut model.pgm {
            theta.niw.beta_k[0] = -1.;
        }

        let y_nd = data.train_rows(&[0, 1, 2], &dev)?;
        let res = run_tower(&model, &y_nd, 1, InferenceSeed::derive(0, 7, 0), 7);
        assert!(matches!(res, Err(SvaeError::Numerical { iteration: 7, .. })));
        Ok(())
    }

    #[test]
    fn kmeans_start_gives_every_component_members() -> anyhow::Result<()> {
        let dev = Device::Cpu;
        let (x, _) = crate::datasets::make_clusters(3, 30, 6., 0.3, 1)?;
        let data = SvaeData::from_matrix(x, None, 1.0, 0)?;
        let spec = ModelSpec {
            method: crate::config::Method::Svae,
            num_components: 3,
            dim_obs: 2,
            dim_latent: 2,
            hidden_layers: vec![8, 8],
            decoder_type: DecoderType::Gaussian,
            seed: 3,
        };
        let mut model = ModelParameters::instantiate(&spec, &dev)?;
        start_from_kmeans(&mut model, &data, 0, &dev)?;

        let pi = model.pgm.mixture_coefficients()?;
        assert!(pi.iter().all(|&p| (p - 1. / 3.).abs() < 0.01), "{:?}", pi);
        Ok(())
    }

    #[test]
    fn oversized_reconstruction_is_refused() {
        assert!(matches!(
            check_recon_size(1 << 10, 10, 1 << 10, 1 << 10),
            Err(SvaeError::ResourceExhaustion(_))
        ));
        assert!(check_recon_size(64, 3, 1, 2).is_ok());
    }
}
