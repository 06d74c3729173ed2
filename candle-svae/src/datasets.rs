use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal, StandardNormal};

/// Well-separated Gaussian clusters in 2D
///
/// Means sit evenly on a circle of radius `separation`; each cluster
/// is isotropic with standard deviation `std_dev`.
///
/// * `num_clusters` - number of clusters
/// * `num_per_cluster` - points per cluster
/// * `separation` - radius of the circle of means
/// * `std_dev` - within-cluster standard deviation
/// * `seed` - random seed
///
/// # Returns `(data, labels)`, rows in shuffled order
pub fn make_clusters(
    num_clusters: usize,
    num_per_cluster: usize,
    separation: f64,
    std_dev: f64,
    seed: u64,
) -> anyhow::Result<(Array2<f32>, Vec<usize>)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let normal = Normal::new(0., std_dev)?;

    let ntot = num_clusters * num_per_cluster;
    let mut data = Array2::<f32>::zeros((ntot, 2));
    let mut labels = Vec::with_capacity(ntot);

    let mut i = 0;
    for k in 0..num_clusters {
        let angle = 2. * std::f64::consts::PI * (k as f64) / (num_clusters as f64);
        let (mx, my) = (separation * angle.cos(), separation * angle.sin());
        for _ in 0..num_per_cluster {
            data[[i, 0]] = (mx + normal.sample(&mut rng)) as f32;
            data[[i, 1]] = (my + normal.sample(&mut rng)) as f32;
            labels.push(k);
            i += 1;
        }
    }

    Ok(shuffle_rows(data, labels, &mut rng))
}

/// Pinwheel-shaped clusters
///
/// Each arm starts as a stretched Gaussian blob along the x-axis and
/// is rotated by an angle that grows exponentially with the radius.
///
/// * `radial_std` - spread along each arm
/// * `tangential_std` - spread across each arm
/// * `num_classes` - number of arms
/// * `num_per_class` - points per arm
/// * `rate` - how fast the arms twist
/// * `seed` - random seed
pub fn make_pinwheel(
    radial_std: f64,
    tangential_std: f64,
    num_classes: usize,
    num_per_class: usize,
    rate: f64,
    seed: u64,
) -> (Array2<f32>, Vec<usize>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let ntot = num_classes * num_per_class;

    let mut data = Array2::<f32>::zeros((ntot, 2));
    let mut labels = Vec::with_capacity(ntot);

    let mut i = 0;
    for k in 0..num_classes {
        let base = 2. * std::f64::consts::PI * (k as f64) / (num_classes as f64);
        for _ in 0..num_per_class {
            let e0: f64 = StandardNormal.sample(&mut rng);
            let e1: f64 = StandardNormal.sample(&mut rng);
            let f0 = e0 * radial_std + 1.;
            let f1 = e1 * tangential_std;

            let angle = base + rate * f0.exp();
            let (s, c) = angle.sin_cos();
            data[[i, 0]] = (10. * (f0 * c + f1 * s)) as f32;
            data[[i, 1]] = (10. * (-f0 * s + f1 * c)) as f32;
            labels.push(k);
            i += 1;
        }
    }

    shuffle_rows(data, labels, &mut rng)
}

fn shuffle_rows(
    data: Array2<f32>,
    labels: Vec<usize>,
    rng: &mut StdRng,
) -> (Array2<f32>, Vec<usize>) {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.shuffle(rng);
    let data = data.select(Axis(0), &order);
    let labels = order.iter().map(|&i| labels[i]).collect();
    (data, labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn clusters_are_centred_on_a_circle() -> anyhow::Result<()> {
        let (x, lbl) = make_clusters(3, 500, 5., 0.5, 1)?;
        assert_eq!(x.dim(), (1500, 2));

        for k in 0..3 {
            let rows: Vec<usize> = (0..lbl.len()).filter(|&i| lbl[i] == k).collect();
            assert_eq!(rows.len(), 500);
            let mean = x.select(Axis(0), &rows).mean_axis(Axis(0)).unwrap();
            let angle = 2. * std::f64::consts::PI * k as f64 / 3.;
            assert_abs_diff_eq!(mean[0] as f64, 5. * angle.cos(), epsilon = 0.1);
            assert_abs_diff_eq!(mean[1] as f64, 5. * angle.sin(), epsilon = 0.1);
        }
        Ok(())
    }

    #[test]
    fn pinwheel_is_seeded() {
        let (a, la) = make_pinwheel(0.3, 0.05, 5, 100, 0.25, 3);
        let (b, lb) = make_pinwheel(0.3, 0.05, 5, 100, 0.25, 3);
        assert_eq!(a, b);
        assert_eq!(la, lb);
        assert_eq!(a.dim(), (500, 2));
        assert!(a.iter().all(|v| v.is_finite()));
    }
}
