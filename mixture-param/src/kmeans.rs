//! Seeded k-means over the rows of a matrix, used to start the mixture
//! from a hard clustering

use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Arguments for k-means clustering
#[derive(Debug, Clone)]
pub struct KmeansArgs {
    /// Number of clusters
    pub num_clusters: usize,
    /// Maximum number of Lloyd iterations per restart
    pub max_iter: usize,
    /// Independent k-means++ starts; the lowest within-cluster sum of
    /// squares wins
    pub num_restarts: usize,
    pub seed: u64,
}

impl Default for KmeansArgs {
    fn default() -> Self {
        Self {
            num_clusters: 1,
            max_iter: 100,
            num_restarts: 5,
            seed: 0,
        }
    }
}

impl KmeansArgs {
    pub fn with_clusters(num_clusters: usize, seed: u64) -> Self {
        Self {
            num_clusters,
            seed,
            ..Default::default()
        }
    }
}

pub trait Kmeans {
    /// Cluster rows and return one membership per row
    fn kmeans_rows(&self, args: &KmeansArgs) -> Vec<usize>;
}

impl Kmeans for Array2<f64> {
    fn kmeans_rows(&self, args: &KmeansArgs) -> Vec<usize> {
        kmeans_rows(self.view(), args)
    }
}

/// `Kmeans::kmeans_rows` on a view
pub fn kmeans_rows(x_nd: ArrayView2<f64>, args: &KmeansArgs) -> Vec<usize> {
    let nn = x_nd.nrows();
    let kk = args.num_clusters.min(nn);
    if kk <= 1 {
        return vec![0; nn];
    }

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut best: Option<(f64, Vec<usize>)> = None;

    for _ in 0..args.num_restarts.max(1) {
        let centers = kmeans_pp(x_nd, kk, &mut rng);
        let (inertia, membership) = lloyd(x_nd, centers, args.max_iter);
        let better = match best.as_ref() {
            Some((b, _)) => inertia < *b,
            None => true,
        };
        if better {
            best = Some((inertia, membership));
        }
    }
    best.map(|(_, m)| m).unwrap_or_else(|| vec![0; nn])
}

fn sq_dist(a: ArrayView1<f64>, b: ArrayView1<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// k-means++ seeding: each next center is drawn with probability
/// proportional to the squared distance to the closest chosen one
fn kmeans_pp(x_nd: ArrayView2<f64>, kk: usize, rng: &mut StdRng) -> Array2<f64> {
    let (nn, dd) = x_nd.dim();
    let mut centers = Array2::zeros((kk, dd));
    let first = rng.random_range(0..nn);
    centers.row_mut(0).assign(&x_nd.row(first));

    let mut d2_n: Vec<f64> = x_nd
        .rows()
        .into_iter()
        .map(|x| sq_dist(x, centers.row(0)))
        .collect();

    for k in 1..kk {
        let total: f64 = d2_n.iter().sum();
        let pick = if total > 0. {
            let u = rng.random::<f64>() * total;
            let mut acc = 0.;
            d2_n.iter()
                .position(|&d| {
                    acc += d;
                    u < acc
                })
                .unwrap_or(nn - 1)
        } else {
            rng.random_range(0..nn)
        };
        centers.row_mut(k).assign(&x_nd.row(pick));

        for (n, d2) in d2_n.iter_mut().enumerate() {
            *d2 = d2.min(sq_dist(x_nd.row(n), centers.row(k)));
        }
    }
    centers
}

/// Lloyd iterations until memberships stop changing
///
/// # Returns `(within-cluster sum of squares, membership)`
fn lloyd(x_nd: ArrayView2<f64>, mut centers: Array2<f64>, max_iter: usize) -> (f64, Vec<usize>) {
    let (nn, dd) = x_nd.dim();
    let kk = centers.nrows();
    let mut membership = vec![usize::MAX; nn];
    let mut inertia = 0.;

    for _ in 0..max_iter.max(1) {
        let mut changed = false;
        inertia = 0.;
        for (n, x) in x_nd.rows().into_iter().enumerate() {
            let (k, d2) = (0..kk)
                .map(|k| (k, sq_dist(x, centers.row(k))))
                .fold((0, f64::INFINITY), |a, b| if b.1 < a.1 { b } else { a });
            inertia += d2;
            if membership[n] != k {
                membership[n] = k;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let mut sum_kd = Array2::<f64>::zeros((kk, dd));
        let mut count_k = vec![0usize; kk];
        for (n, &k) in membership.iter().enumerate() {
            sum_kd.row_mut(k).scaled_add(1., &x_nd.row(n));
            count_k[k] += 1;
        }
        for k in 0..kk {
            // an emptied cluster keeps its previous center
            if count_k[k] > 0 {
                centers
                    .row_mut(k)
                    .assign(&(&sum_kd.row(k) / count_k[k] as f64));
            }
        }
    }
    (inertia, membership)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn separated_rows_form_their_own_clusters() {
        let x = array![
            [0.0, 0.0],
            [0.1, 0.1],
            [0.0, 0.2],
            [10.0, 10.0],
            [10.1, 10.1],
            [-10.0, 5.0],
            [-10.2, 5.1],
        ];
        let membership = x.kmeans_rows(&KmeansArgs::with_clusters(3, 0));
        assert_eq!(membership.len(), 7);
        assert_eq!(membership[0], membership[1]);
        assert_eq!(membership[1], membership[2]);
        assert_eq!(membership[3], membership[4]);
        assert_eq!(membership[5], membership[6]);
        assert_ne!(membership[0], membership[3]);
        assert_ne!(membership[0], membership[5]);
        assert_ne!(membership[3], membership[5]);
    }

    #[test]
    fn same_seed_same_membership() {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| ((i * 7 + j * 13) % 11) as f64);
        let a = x.kmeans_rows(&KmeansArgs::with_clusters(4, 3));
        let b = x.kmeans_rows(&KmeansArgs::with_clusters(4, 3));
        assert_eq!(a, b);
        assert!(a.iter().all(|&k| k < 4));
    }

    #[test]
    fn degenerate_inputs() {
        let x = Array2::<f64>::zeros((0, 2));
        assert!(x.kmeans_rows(&KmeansArgs::with_clusters(3, 0)).is_empty());

        let x = Array2::<f64>::ones((5, 2));
        let m = x.kmeans_rows(&KmeansArgs::with_clusters(1, 0));
        assert_eq!(m, vec![0; 5]);
    }
}
