use super::ComputeDevice;
use crate::candle_inference::InferenceSeed;
use crate::common_io::*;
use crate::config::ExperimentConfig;
use crate::trainer::*;
use clap::{Args, ValueEnum};
use log::info;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "kebab-case")]
pub enum MethodArg {
    Svae,
    SvaeSmm,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum DecoderArg {
    Bernoulli,
    Gaussian,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum InitArg {
    Kmeans,
    Random,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(
        long,
        help = "JSON schedule file",
        long_help = "JSON object of hyper-parameters. List-valued entries are\n\
		     expanded into the cartesian product of configurations.\n\
		     When given, the model options below are ignored."
    )]
    schedule: Option<PathBuf>,

    #[arg(
        long,
        default_value = "clusters",
        help = "Dataset",
        long_help = "`clusters`, `pinwheel`, or a data file\n\
		     (`.tsv`, `.csv`, either possibly `.gz`), one row per sample."
    )]
    dataset: String,

    #[arg(long, help = "Label file, one integer per line")]
    labels: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "svae", help = "Mixture prior")]
    method: MethodArg,

    #[arg(long, help = "Observation model (default: gaussian, or bernoulli with --binarize)")]
    decoder: Option<DecoderArg>,

    #[arg(
        long,
        value_enum,
        default_value = "kmeans",
        help = "Starting point of the mixture",
        long_help = "kmeans: cluster the training rows and start each component\n\
		     at the encoded members of one cluster.\n\
		     random: random component means."
    )]
    init: InitArg,

    #[arg(short = 'K', long, default_value_t = 10, help = "Number of mixture components")]
    num_components: usize,

    #[arg(short = 'L', long, default_value_t = 6, help = "Latent dimension")]
    dim_latent: usize,

    #[arg(short = 'U', long, default_value_t = 50, help = "Hidden units per layer")]
    hidden_units: usize,

    #[arg(long, default_value_t = 3e-4, help = "Adam learning rate")]
    lr: f64,

    #[arg(long, default_value_t = 0.2, help = "CVI step size")]
    lrcvi: f64,

    #[arg(
        long,
        default_value_t = 0.95,
        help = "CVI step-size decay",
        long_help = "rho(t) = lrcvi * decay_rate^(t / 1000)"
    )]
    decay_rate: f64,

    #[arg(long, default_value_t = 4.0, help = "Student-t degrees of freedom")]
    dof: f64,

    #[arg(long, default_value_t = 10, help = "Latent samples per data point in training")]
    nb_samples: usize,

    #[arg(long, default_value_t = 100, help = "Latent samples per data point in evaluation")]
    nb_samples_te: usize,

    #[arg(long, default_value_t = 64, help = "Minibatch size")]
    batch_size: usize,

    #[arg(long, default_value_t = 1000, help = "Training iterations")]
    nb_iters: usize,

    #[arg(
        long,
        help = "Parallel towers per minibatch",
        long_help = "Each minibatch is split into this many shards processed\n\
		     in parallel; default: number of physical cores (at most 4)."
    )]
    nb_towers: Option<usize>,

    #[arg(long, default_value_t = 0.7, help = "Fraction of rows used for training")]
    ratio_tr: f64,

    #[arg(long, default_value_t = false, help = "Threshold data at 0.5 into {0, 1}")]
    binarize: bool,

    #[arg(long, default_value_t = 0.0, help = "Std of Gaussian noise on training rows")]
    noise_level: f64,

    #[arg(long, default_value_t = 0.2, help = "Fraction of missing test entries for imputation")]
    missing_ratio: f64,

    #[arg(long, default_value_t = 10, help = "Perturbed copies in imputation")]
    nb_perturbations: usize,

    #[arg(long, default_value_t = 1.0, help = "Multiplier on sufficient statistics")]
    stat_scale: f64,

    #[arg(long, default_value_t = 0, help = "Random seed")]
    seed: u64,

    #[arg(long, default_value = "logs", help = "Directory of summaries and checkpoints")]
    log_dir: PathBuf,

    #[arg(long, default_value_t = 500, help = "Checkpoint every this many iterations")]
    checkpoint_freq: usize,

    #[arg(long, default_value_t = 100, help = "Evaluate every this many iterations")]
    eval_freq: usize,

    #[arg(
        long,
        short,
        help = "Output prefix",
        long_help = "Write cluster assignments of training and test rows to\n\
		     {out}.train_clusters.txt.gz and {out}.test_clusters.txt.gz"
    )]
    out: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value = "cpu",
        help = "Candle device",
        long_help = "Candle device to use for computation.\n\
		     Options: cpu, cuda, metal."
    )]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "A device for cuda or metal")]
    device_no: usize,

    #[arg(long, default_value_t = false, help = "Hide the progress bar")]
    no_progress: bool,

    #[arg(long, short, help = "Verbosity")]
    pub verbose: bool,
}

impl TrainArgs {
    /// the command-line model options as one schedule entry
    fn to_config_map(&self) -> Map<String, Value> {
        let method = match self.method {
            MethodArg::Svae => "svae",
            MethodArg::SvaeSmm => "svae-smm",
        };
        let init = match self.init {
            InitArg::Kmeans => "kmeans",
            InitArg::Random => "random",
        };
        let nb_towers = self
            .nb_towers
            .unwrap_or_else(|| num_cpus::get_physical().clamp(1, 4));

        let mut map = json!({
            "method": method,
            "dataset": self.dataset,
            "K": self.num_components,
            "L": self.dim_latent,
            "U": self.hidden_units,
            "lr": self.lr,
            "lrcvi": self.lrcvi,
            "decay_rate": self.decay_rate,
            "DoF": self.dof,
            "nb_samples": self.nb_samples,
            "nb_samples_te": self.nb_samples_te,
            "batch_size": self.batch_size,
            "nb_iters": self.nb_iters,
            "nb_towers": nb_towers,
            "ratio_tr": self.ratio_tr,
            "binarize": self.binarize,
            "noise_level": self.noise_level,
            "missing_ratio": self.missing_ratio,
            "nb_perturbations": self.nb_perturbations,
            "stat_scale": self.stat_scale,
            "seed": self.seed,
            "log_dir": self.log_dir.to_string_lossy(),
            "checkpoint_freq": self.checkpoint_freq,
            "eval_freq": self.eval_freq,
            "init": init,
        });

        if let Some(obj) = map.as_object_mut() {
            if let Some(labels) = self.labels.as_ref() {
                obj.insert("labels".into(), json!(labels.to_string_lossy()));
            }
            if let Some(decoder) = self.decoder {
                let name = match decoder {
                    DecoderArg::Bernoulli => "bernoulli",
                    DecoderArg::Gaussian => "gaussian",
                };
                obj.insert("decoder".into(), json!(name));
            }
        }
        match map {
            Value::Object(obj) => obj,
            _ => Map::new(),
        }
    }

    fn configs(&self) -> anyhow::Result<Vec<ExperimentConfig>> {
        match self.schedule.as_ref() {
            Some(path) => {
                let grid: Value = serde_json::from_reader(open_buf_reader(path)?)?;
                let configs = ExperimentConfig::from_schedule(&grid)?;
                info!("{} configurations in {}", configs.len(), path.display());
                Ok(configs)
            }
            None => Ok(vec![ExperimentConfig::from_map(&self.to_config_map())?]),
        }
    }
}

pub fn run(args: &TrainArgs) -> anyhow::Result<()> {
    // every configuration is checked before the first one runs
    let configs = args.configs()?;
    let device = args.device.to_device(args.device_no)?;

    for (i, cfg) in configs.iter().enumerate() {
        info!("experiment {} / {}: {}", i + 1, configs.len(), cfg.run_id());

        let opts = TrainOptions {
            device: device.clone(),
            verbose: args.verbose,
            show_progress: !args.no_progress,
            write_logs: true,
        };
        let (data, out) = train(cfg, opts)?;

        if let Some(last) = out.evals.last() {
            info!(
                "final: test mse {:.4}, loglik {:.4}",
                last.mse, last.loglik
            );
            if let Some((entropy, purity)) = last.purity {
                info!("final: entropy {:.4}, purity {:.4}", entropy, purity);
            }
        }

        if let Some(out_prefix) = args.out.as_ref() {
            let prefix = if configs.len() > 1 {
                format!("{}.{}", out_prefix.display(), cfg.run_id())
            } else {
                out_prefix.display().to_string()
            };
            let seed = InferenceSeed::derive(cfg.seed, cfg.nb_iters, STREAM_EVAL);

            let rows: Vec<usize> = (0..data.num_train()).collect();
            let y_tr = data.train_rows(&rows, &device)?;
            let (_, clusters_tr) = out.model.predict(&y_tr, 1, seed)?;
            let clusters_tr: Vec<usize> = clusters_tr.iter().map(|&k| k as usize).collect();
            write_labels(&clusters_tr, format!("{}.train_clusters.txt.gz", prefix))?;

            if data.y_te.nrows() > 0 {
                let y_te = data.test_tensor(&device)?;
                let (_, clusters_te) = out.model.predict(&y_te, 1, seed)?;
                let clusters_te: Vec<usize> = clusters_te.iter().map(|&k| k as usize).collect();
                write_labels(&clusters_te, format!("{}.test_clusters.txt.gz", prefix))?;
            }
            info!("wrote cluster assignments to {}.*", prefix);
        }
    }

    Ok(())
}
