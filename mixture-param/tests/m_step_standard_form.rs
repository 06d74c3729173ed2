use approx::assert_abs_diff_eq;
use mixture_param::niw::NiwStandard;
use mixture_param::*;
use ndarray::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Natural-parameter M-step vs. the textbook (Bishop 10.60-10.63)
/// update written in standard parameters
#[test]
fn natural_m_step_matches_standard_form() {
    let (kk, ll, nn) = (3, 2, 50);
    let (prior, _) = init_mm(kk, ll, 0);

    let mut rng = StdRng::seed_from_u64(3);
    let x_nl = Array2::from_shape_simple_fn((nn, ll), || rng.random_range(-4.0..4.0));
    let mut r_nk = Array2::from_shape_simple_fn((nn, kk), || rng.random_range(0.01..1.0));
    for mut row in r_nk.rows_mut() {
        let tot = row.sum();
        row /= tot;
    }

    let theta_star = m_step(&prior, x_nl.view(), r_nk.view(), 1.0).unwrap();
    let post = theta_star.niw.to_standard().unwrap();
    let pri: NiwStandard = prior.niw.to_standard().unwrap();

    for k in 0..kk {
        let r_n = r_nk.column(k);
        let n_k = r_n.sum();
        let xbar = x_nl.t().dot(&r_n) / n_k;

        let mut s_ll = Array2::<f64>::zeros((ll, ll));
        for (i, x) in x_nl.rows().into_iter().enumerate() {
            let dx = &x - &xbar;
            for a in 0..ll {
                for b in 0..ll {
                    s_ll[[a, b]] += r_n[i] * dx[a] * dx[b];
                }
            }
        }

        let beta0 = pri.beta_k[k];
        let m0 = pri.m_kl.row(k);
        let beta_n = beta0 + n_k;
        let m_n = (&m0 * beta0 + &xbar * n_k) / beta_n;
        let dm = &xbar - &m0;
        let c_n = Array2::from_shape_fn((ll, ll), |(a, b)| {
            pri.c_kll[[k, a, b]] + s_ll[[a, b]] + beta0 * n_k / beta_n * dm[a] * dm[b]
        });

        assert_abs_diff_eq!(post.beta_k[k], beta_n, epsilon = 1e-9);
        assert_abs_diff_eq!(post.v_k[k], pri.v_k[k] + n_k, epsilon = 1e-9);
        for a in 0..ll {
            assert_abs_diff_eq!(post.m_kl[[k, a]], m_n[a], epsilon = 1e-9);
            for b in 0..ll {
                assert_abs_diff_eq!(post.c_kll[[k, a, b]], c_n[[a, b]], epsilon = 1e-7);
            }
        }
    }

    let alpha = theta_star.dirichlet.to_standard().unwrap().alpha_k;
    let n_k = r_nk.sum_axis(Axis(0));
    for k in 0..kk {
        assert_abs_diff_eq!(alpha[k], 0.05 / kk as f64 + n_k[k], epsilon = 1e-9);
    }
}

#[test]
fn cvi_blend_stays_valid_along_training_like_updates() {
    let (kk, ll, nn) = (4, 3, 40);
    let (prior, mut theta) = init_mm(kk, ll, 5);
    let sched = CviSchedule::new(0.5, 0.9);
    let mut rng = StdRng::seed_from_u64(9);

    for t in 0..25 {
        let x_nl = Array2::from_shape_simple_fn((nn, ll), || rng.random_range(-6.0..6.0));
        let mut r_nk = Array2::from_shape_simple_fn((nn, kk), || rng.random_range(0.0..1.0));
        for mut row in r_nk.rows_mut() {
            let tot = row.sum();
            row /= tot;
        }
        let theta_star = m_step(&prior, x_nl.view(), r_nk.view(), 1.0).unwrap();
        theta = update_gmm_params(&theta, &theta_star, sched.step_size(t));
        theta.validate().unwrap();
    }
}
