use crate::common_io::*;
use crate::datasets::*;
use crate::error::{Result, SvaeError};
use candle_core::{Device, Tensor};
use log::info;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the data come from
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DatasetSpec {
    /// 3 well-separated 2D clusters, 300 points each
    Clusters,
    /// 5-armed 2D pinwheel, 100 points per arm
    Pinwheel,
    /// delimited text matrix (`.tsv`, `.csv`, maybe `.gz`) and an
    /// optional label file with one integer per line
    File {
        data: PathBuf,
        labels: Option<PathBuf>,
    },
}

impl DatasetSpec {
    /// `clusters`, `pinwheel`, or a file path
    pub fn from_name(name: &str, labels: Option<PathBuf>) -> Self {
        match name {
            "clusters" => DatasetSpec::Clusters,
            "pinwheel" => DatasetSpec::Pinwheel,
            _ => DatasetSpec::File {
                data: PathBuf::from(name),
                labels,
            },
        }
    }

    fn generate(&self, seed: u64) -> Result<(Array2<f32>, Option<Vec<usize>>)> {
        match self {
            DatasetSpec::Clusters => {
                let (x, lbl) =
                    make_clusters(3, 300, 5., 0.5, seed).map_err(|e| SvaeError::config(e.to_string()))?;
                Ok((x, Some(lbl)))
            }
            DatasetSpec::Pinwheel => {
                let (x, lbl) = make_pinwheel(0.3, 0.05, 5, 100, 0.25, seed);
                Ok((x, Some(lbl)))
            }
            DatasetSpec::File { data, labels } => {
                let x = read_matrix(data).map_err(|e| {
                    SvaeError::config(format!("failed to read {}: {}", data.display(), e))
                })?;
                let lbl = match labels {
                    Some(path) => Some(read_labels(path).map_err(|e| {
                        SvaeError::config(format!("failed to read {}: {}", path.display(), e))
                    })?),
                    None => None,
                };
                Ok((x, lbl))
            }
        }
    }
}

/// Options of `SvaeData::load`
#[derive(Clone, Debug)]
pub struct LoadOptions {
    /// fraction of rows kept for training
    pub ratio_tr: f64,
    /// seed of the train/test split and of synthetic data
    pub seed_split: u64,
    /// threshold at 0.5 into {0, 1}
    pub binarize: bool,
    /// standard deviation of Gaussian noise added to the training rows
    pub noise_level: f64,
    /// seed of the noise
    pub seed: u64,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            ratio_tr: 0.7,
            seed_split: 0,
            binarize: false,
            noise_level: 0.,
            seed: 0,
        }
    }
}

/// In-memory train/test split of a data matrix. Each row is one
/// observation.
pub struct SvaeData {
    pub y_tr: Array2<f32>,
    pub y_te: Array2<f32>,
    pub lbl_tr: Option<Vec<usize>>,
    pub lbl_te: Option<Vec<usize>>,
}

impl SvaeData {
    /// Split `y` (and optional `labels`) at random
    ///
    /// * `ratio_tr` - fraction of rows kept for training
    /// * `seed_split` - seed of the permutation
    pub fn from_matrix(
        y: Array2<f32>,
        labels: Option<Vec<usize>>,
        ratio_tr: f64,
        seed_split: u64,
    ) -> Result<Self> {
        let nn = y.nrows();
        if !(0. ..=1.).contains(&ratio_tr) {
            return Err(SvaeError::config(format!(
                "ratio_tr = {} is not in [0, 1]",
                ratio_tr
            )));
        }
        if let Some(lbl) = labels.as_ref() {
            if lbl.len() != nn {
                return Err(SvaeError::config(format!(
                    "{} labels for {} rows",
                    lbl.len(),
                    nn
                )));
            }
        }

        let ntr = ((nn as f64) * ratio_tr).round() as usize;
        if ntr == 0 {
            return Err(SvaeError::config("empty training set"));
        }

        let mut order: Vec<usize> = (0..nn).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed_split));
        let (tr, te) = order.split_at(ntr);

        let take = |idx: &[usize]| -> Option<Vec<usize>> {
            labels.as_ref().map(|l| idx.iter().map(|&i| l[i]).collect())
        };

        Ok(Self {
            y_tr: y.select(Axis(0), tr),
            y_te: y.select(Axis(0), te),
            lbl_tr: take(tr),
            lbl_te: take(te),
        })
    }

    /// Read or generate a dataset, split it, then binarize and perturb
    pub fn load(dataset: &DatasetSpec, opts: &LoadOptions) -> Result<Self> {
        let (y, labels) = dataset.generate(opts.seed_split)?;
        info!("data: {} x {}", y.nrows(), y.ncols());

        let mut data = Self::from_matrix(y, labels, opts.ratio_tr, opts.seed_split)?;

        if opts.binarize {
            data.y_tr.mapv_inplace(|v| if v > 0.5 { 1. } else { 0. });
            data.y_te.mapv_inplace(|v| if v > 0.5 { 1. } else { 0. });
        }

        if opts.noise_level > 0. {
            let normal = Normal::new(0., opts.noise_level)
                .map_err(|e| SvaeError::config(format!("noise_level: {}", e)))?;
            let mut rng = StdRng::seed_from_u64(opts.seed);
            data.y_tr
                .mapv_inplace(|v| v + normal.sample(&mut rng) as f32);
        }

        info!(
            "train: {}, test: {}",
            data.num_train(),
            data.y_te.nrows()
        );
        Ok(data)
    }

    pub fn dim_obs(&self) -> usize {
        self.y_tr.ncols()
    }

    pub fn num_train(&self) -> usize {
        self.y_tr.nrows()
    }

    /// training rows as an (n x d) tensor
    pub fn train_rows(&self, rows: &[usize], device: &Device) -> Result<Tensor> {
        rows_to_tensor(&self.y_tr, rows, device)
    }

    pub fn test_tensor(&self, device: &Device) -> Result<Tensor> {
        let (n, d) = self.y_te.dim();
        let data: Vec<f32> = self.y_te.iter().copied().collect();
        Ok(Tensor::from_vec(data, (n, d), device)?)
    }
}

fn rows_to_tensor(mat: &Array2<f32>, rows: &[usize], device: &Device) -> Result<Tensor> {
    let d = mat.ncols();
    let mut data = Vec::with_capacity(rows.len() * d);
    for &r in rows {
        data.extend(mat.row(r).iter().copied());
    }
    Ok(Tensor::from_vec(data, (rows.len(), d), device)?)
}

/// Seeded minibatch sampler; each minibatch is drawn without
/// replacement and then cut into towers
pub struct MinibatchSampler {
    rng: StdRng,
    num_rows: usize,
}

impl MinibatchSampler {
    pub fn new(num_rows: usize, seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            num_rows,
        }
    }

    /// `batch_size` distinct row indexes (all rows if fewer)
    pub fn sample(&mut self, batch_size: usize) -> Vec<usize> {
        let size = batch_size.min(self.num_rows);
        rand::seq::index::sample(&mut self.rng, self.num_rows, size).into_vec()
    }

    /// Draw a minibatch and partition it into `nb_towers` contiguous
    /// shards of near-equal size; empty shards are dropped
    pub fn sample_towers(&mut self, batch_size: usize, nb_towers: usize) -> Vec<Vec<usize>> {
        let rows = self.sample(batch_size);
        partition_towers(&rows, nb_towers)
    }
}

pub fn partition_towers(rows: &[usize], nb_towers: usize) -> Vec<Vec<usize>> {
    let nb_towers = nb_towers.max(1);
    let base = rows.len() / nb_towers;
    let extra = rows.len() % nb_towers;

    let mut ret = Vec::with_capacity(nb_towers);
    let mut lb = 0;
    for t in 0..nb_towers {
        let ub = lb + base + usize::from(t < extra);
        if ub > lb {
            ret.push(rows[lb..ub].to_vec());
        }
        lb = ub;
    }
    ret
}
