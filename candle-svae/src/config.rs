use crate::candle_data_loader::{DatasetSpec, LoadOptions};
use crate::candle_model_traits::DecoderType;
use crate::error::{Result, SvaeError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Prior family of the latent mixture
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Method {
    /// Gaussian mixture, fully Bayesian (Dirichlet + NIW)
    Svae,
    /// Student-t mixture with fixed degrees of freedom
    SvaeSmm { dof: f64 },
}

/// Starting point of the mixture posterior
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MixtureStartKind {
    /// k-means on the training data, statistics of the encoded
    /// clusters added to the prior
    Kmeans,
    /// random means around the origin
    Random,
}

/// One fully specified training run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub method: Method,
    pub dataset: DatasetSpec,
    pub decoder_type: DecoderType,
    pub num_components: usize,
    pub dim_latent: usize,
    pub hidden_units: usize,
    pub seed: u64,
    pub lr: f64,
    pub lrcvi: f64,
    pub decay_rate: f64,
    pub nb_samples: usize,
    pub nb_samples_te: usize,
    pub batch_size: usize,
    pub nb_iters: usize,
    pub nb_towers: usize,
    pub ratio_tr: f64,
    pub binarize: bool,
    pub noise_level: f64,
    pub log_dir: PathBuf,
    pub checkpoint_freq: usize,
    pub eval_freq: usize,
    pub missing_ratio: f64,
    pub nb_perturbations: usize,
    pub stat_scale: f64,
    pub init: MixtureStartKind,
}

const KNOWN_KEYS: &[&str] = &[
    "method",
    "dataset",
    "labels",
    "decoder",
    "K",
    "L",
    "U",
    "seed",
    "lr",
    "lrcvi",
    "decay_rate",
    "nb_samples",
    "nb_samples_te",
    "batch_size",
    "nb_iters",
    "nb_towers",
    "ratio_tr",
    "binarize",
    "noise_level",
    "DoF",
    "log_dir",
    "checkpoint_freq",
    "eval_freq",
    "missing_ratio",
    "nb_perturbations",
    "stat_scale",
    "init",
];

/// Expand a JSON object into the cartesian product of its array-valued
/// entries
///
/// `{"K": [5, 10], "lr": [0.1, 0.01], "seed": 0}` gives four
/// configurations, each with scalar values only. Keys keep their order
/// within each configuration.
pub fn create_schedule(grid: &Value) -> Result<Vec<Map<String, Value>>> {
    let obj = grid
        .as_object()
        .ok_or_else(|| SvaeError::config("a schedule must be a JSON object"))?;

    let mut ret = vec![Map::new()];
    for (key, val) in obj.iter() {
        let choices: Vec<Value> = match val {
            Value::Array(arr) if arr.is_empty() => {
                return Err(SvaeError::config(format!("empty list for `{}`", key)));
            }
            Value::Array(arr) => arr.clone(),
            other => vec![other.clone()],
        };

        ret = ret
            .into_iter()
            .flat_map(|cfg| {
                choices.iter().map(move |v| {
                    let mut next = cfg.clone();
                    next.insert(key.clone(), v.clone());
                    next
                })
            })
            .collect();
    }
    Ok(ret)
}

/// typed accessors over one expanded configuration
struct Entries<'a>(&'a Map<String, Value>);

impl Entries<'_> {
    fn required(&self, key: &str) -> Result<&Value> {
        self.0
            .get(key)
            .ok_or_else(|| SvaeError::config(format!("missing key `{}`", key)))
    }

    fn usize_or(&self, key: &str, default: Option<usize>) -> Result<usize> {
        match (self.0.get(key), default) {
            (Some(v), _) => v
                .as_u64()
                .map(|x| x as usize)
                .ok_or_else(|| SvaeError::config(format!("`{}` must be a non-negative integer", key))),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(SvaeError::config(format!("missing key `{}`", key))),
        }
    }

    fn f64_or(&self, key: &str, default: Option<f64>) -> Result<f64> {
        match (self.0.get(key), default) {
            (Some(v), _) => v
                .as_f64()
                .ok_or_else(|| SvaeError::config(format!("`{}` must be a number", key))),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(SvaeError::config(format!("missing key `{}`", key))),
        }
    }

    fn str_or<'b>(&'b self, key: &str, default: Option<&'b str>) -> Result<&'b str> {
        match (self.0.get(key), default) {
            (Some(v), _) => v
                .as_str()
                .ok_or_else(|| SvaeError::config(format!("`{}` must be a string", key))),
            (None, Some(d)) => Ok(d),
            (None, None) => Err(SvaeError::config(format!("missing key `{}`", key))),
        }
    }

    fn opt_str(&self, key: &str) -> Result<Option<&str>> {
        self.0
            .get(key)
            .map(|v| {
                v.as_str()
                    .ok_or_else(|| SvaeError::config(format!("`{}` must be a string", key)))
            })
            .transpose()
    }

    fn bool_or(&self, key: &str, default: bool) -> Result<bool> {
        match self.0.get(key) {
            Some(v) => v
                .as_bool()
                .ok_or_else(|| SvaeError::config(format!("`{}` must be true or false", key))),
            None => Ok(default),
        }
    }
}

impl ExperimentConfig {
    /// Typed configuration from one schedule entry
    ///
    /// Required keys: `method`, `dataset`, `K`, `L`, `U`, `lr`, `lrcvi`,
    /// `nb_iters`; `DoF` is required for `svae-smm`. Everything else has
    /// a default. Unknown keys and unknown enum strings are rejected.
    pub fn from_map(map: &Map<String, Value>) -> Result<Self> {
        if let Some(key) = map.keys().find(|k| !KNOWN_KEYS.contains(&k.as_str())) {
            return Err(SvaeError::config(format!("unknown key `{}`", key)));
        }
        let e = Entries(map);

        let method = match e.str_or("method", None)? {
            "svae" => Method::Svae,
            "svae-smm" | "svae_smm" => {
                let dof = e.f64_or("DoF", None)?;
                if !(dof.is_finite() && dof > 0.) {
                    return Err(SvaeError::config(format!("DoF = {} must be positive", dof)));
                }
                Method::SvaeSmm { dof }
            }
            other => return Err(SvaeError::config(format!("unknown method `{}`", other))),
        };

        let labels = match map.get("labels") {
            Some(v) => Some(PathBuf::from(v.as_str().ok_or_else(|| {
                SvaeError::config("`labels` must be a file path")
            })?)),
            None => None,
        };
        let dataset = DatasetSpec::from_name(e.str_or("dataset", None)?, labels);

        let binarize = e.bool_or("binarize", false)?;
        let decoder_type = match e.opt_str("decoder")? {
            Some("bernoulli") => DecoderType::Bernoulli,
            Some("gaussian") | Some("standard") => DecoderType::Gaussian,
            Some(other) => {
                return Err(SvaeError::config(format!("unknown decoder `{}`", other)));
            }
            None if binarize => DecoderType::Bernoulli,
            None => DecoderType::Gaussian,
        };

        let num_components = e.usize_or("K", None)?;
        let dim_latent = e.usize_or("L", None)?;
        let hidden_units = e.usize_or("U", None)?;
        let batch_size = e.usize_or("batch_size", Some(64))?;
        let nb_towers = e.usize_or("nb_towers", Some(1))?;

        for (key, val) in [
            ("K", num_components),
            ("L", dim_latent),
            ("U", hidden_units),
            ("batch_size", batch_size),
            ("nb_towers", nb_towers),
        ] {
            if val == 0 {
                return Err(SvaeError::config(format!("`{}` must be positive", key)));
            }
        }

        let ratio_tr = e.f64_or("ratio_tr", Some(0.7))?;
        let missing_ratio = e.f64_or("missing_ratio", Some(0.2))?;
        for (key, val) in [("ratio_tr", ratio_tr), ("missing_ratio", missing_ratio)] {
            if !(0. ..=1.).contains(&val) {
                return Err(SvaeError::config(format!("`{}` = {} is not in [0, 1]", key, val)));
            }
        }

        let nb_iters = e.usize_or("nb_iters", None)?;

        let init = match e.str_or("init", Some("kmeans"))? {
            "kmeans" => MixtureStartKind::Kmeans,
            "random" => MixtureStartKind::Random,
            other => return Err(SvaeError::config(format!("unknown init `{}`", other))),
        };

        Ok(Self {
            method,
            dataset,
            decoder_type,
            num_components,
            dim_latent,
            hidden_units,
            seed: e.usize_or("seed", Some(0))? as u64,
            lr: e.f64_or("lr", None)?,
            lrcvi: e.f64_or("lrcvi", None)?,
            decay_rate: e.f64_or("decay_rate", Some(1.0))?,
            nb_samples: e.usize_or("nb_samples", Some(1))?.max(1),
            nb_samples_te: e.usize_or("nb_samples_te", Some(100))?.max(1),
            batch_size,
            nb_iters,
            nb_towers,
            ratio_tr,
            binarize,
            noise_level: e.f64_or("noise_level", Some(0.))?,
            log_dir: PathBuf::from(e.str_or("log_dir", Some("logs"))?),
            checkpoint_freq: e.usize_or("checkpoint_freq", Some(nb_iters.max(1)))?.max(1),
            eval_freq: e.usize_or("eval_freq", Some(100))?.max(1),
            missing_ratio,
            nb_perturbations: e.usize_or("nb_perturbations", Some(10))?,
            stat_scale: e.f64_or("stat_scale", Some(1.0))?,
            init,
        })
    }

    /// Expand a schedule file into typed configurations; fails on the
    /// first invalid one before anything runs
    pub fn from_schedule(grid: &Value) -> Result<Vec<Self>> {
        create_schedule(grid)?
            .iter()
            .map(Self::from_map)
            .collect()
    }

    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            ratio_tr: self.ratio_tr,
            seed_split: 0,
            binarize: self.binarize,
            noise_level: self.noise_level,
            seed: self.seed,
        }
    }

    /// short id of the run, used as the log sub-directory
    pub fn run_id(&self) -> String {
        let method = match self.method {
            Method::Svae => "svae".to_string(),
            Method::SvaeSmm { dof } => format!("svae-smm-dof{}", dof),
        };
        format!(
            "{}_K{}_L{}_U{}_lr{}_lrcvi{}_seed{}",
            method,
            self.num_components,
            self.dim_latent,
            self.hidden_units,
            self.lr,
            self.lrcvi,
            self.seed
        )
    }
}
