use approx::assert_abs_diff_eq;
use hyperridge::estimate::{EstimationError, PenaltyTuner, TuningStatus, tune_penalty};
use hyperridge::faer_ndarray::FaerCholesky;
use hyperridge::model::TunerConfig;
use hyperridge::simulate::{
    SimulationConfig, ks_uniform_statistic, null_calibration, run_sweep, simulate_problem,
};
use hyperridge::solver::{factorize, solve};
use faer::Side;
use rand::SeedableRng;
use rand::rngs::StdRng;

#[test]
fn zero_penalty_recovers_least_squares_on_ar1_design() {
    let config = SimulationConfig::default();
    let problem = simulate_problem(&config, &mut StdRng::seed_from_u64(1)).unwrap();
    let decomposition = factorize(problem.x.view()).unwrap();

    let ridge = solve(&decomposition, problem.y.view(), 0.0).unwrap();
    let gram = problem.x.t().dot(&problem.x);
    let ols = gram
        .cholesky(Side::Lower)
        .unwrap()
        .solve_vec(&problem.x.t().dot(&problem.y));

    for (a, b) in ridge.iter().zip(ols.iter()) {
        let scale = b.abs().max(1.0);
        assert!((a - b).abs() / scale < 1e-8, "ridge {a} vs ols {b}");
    }
}

#[test]
fn decomposition_reuse_is_stateless() {
    let config = SimulationConfig::default();
    let problem = simulate_problem(&config, &mut StdRng::seed_from_u64(2)).unwrap();
    let decomposition = factorize(problem.x.view()).unwrap();
    let tuner = TunerConfig::default();

    let baseline = solve(&decomposition, problem.y.view(), 4.2).unwrap();
    for _ in 0..3 {
        PenaltyTuner::new(&decomposition, problem.x.view(), problem.y.view(), &tuner)
            .unwrap()
            .run(0.2)
            .unwrap();
    }
    let after = solve(&decomposition, problem.y.view(), 4.2).unwrap();
    assert_eq!(baseline, after);
}

#[test]
fn well_specified_prior_converges_near_the_optimal_penalty() {
    let config = SimulationConfig::default();
    let r2 = config.population_r2();
    let optimum = config.theoretical_penalty().unwrap();
    let tuner = TunerConfig::default();

    for seed in 10..15 {
        let problem = simulate_problem(&config, &mut StdRng::seed_from_u64(seed)).unwrap();
        let result = tune_penalty(problem.x.view(), problem.y.view(), r2, &tuner).unwrap();

        assert_eq!(result.status, TuningStatus::Converged, "seed {seed}");
        assert!(result.iterations <= 100);
        let ratio = result.fit.penalty / optimum;
        assert!(
            (1.0 / 3.0..=3.0).contains(&ratio),
            "seed {seed}: lambda {} vs optimum {optimum} (ratio {ratio})",
            result.fit.penalty
        );
    }
}

#[test]
fn reference_scenario_recovers_signs_and_magnitudes() {
    let config = SimulationConfig::default();
    assert!(config.trials >= 50);
    let summary = run_sweep(&config, &TunerConfig::default()).unwrap();

    assert_eq!(summary.trials, config.trials);
    assert_eq!(summary.converged, summary.trials);

    let mean = &summary.mean_coefficients;
    assert!(mean[0] > 0.0, "first coefficient {}", mean[0]);
    assert!(mean[1] < 0.0, "second coefficient {}", mean[1]);
    assert_abs_diff_eq!(mean[0], 1.0, epsilon = 0.5);
    assert_abs_diff_eq!(mean[1], -1.0, epsilon = 0.5);
    for &null_coef in mean.iter().skip(2) {
        assert_abs_diff_eq!(null_coef, 0.0, epsilon = 0.25);
    }

    let optimum = summary.theoretical_penalty.unwrap();
    let ratio = summary.mean_penalty / optimum;
    assert!((1.0 / 3.0..=3.0).contains(&ratio), "ratio {ratio}");
    assert_abs_diff_eq!(summary.mean_noise_variance, 4.0, epsilon = 0.8);
}

#[test]
fn sweeps_are_reproducible() {
    let config = SimulationConfig {
        trials: 8,
        ..SimulationConfig::default()
    };
    let tuner = TunerConfig::default();
    let first = run_sweep(&config, &tuner).unwrap();
    let second = run_sweep(&config, &tuner).unwrap();
    assert_eq!(first.mean_coefficients, second.mean_coefficients);
    assert_eq!(first.mean_penalty, second.mean_penalty);
}

#[test]
fn significance_is_calibrated_under_the_null() {
    let config = SimulationConfig {
        seed: 0xC0FFEE,
        ..SimulationConfig::default()
    };
    let p_values = null_calibration(&config, &TunerConfig::default(), 0.2, 200).unwrap();
    assert_eq!(p_values.len(), 200);
    assert!(p_values.iter().all(|p| (0.0..=1.0).contains(p)));

    let ks = ks_uniform_statistic(&p_values);
    assert!(ks < 0.15, "KS distance to uniform too large: {ks}");
}

#[test]
fn degenerate_priors_fail_before_computation() {
    let config = SimulationConfig::default();
    let problem = simulate_problem(&config, &mut StdRng::seed_from_u64(3)).unwrap();
    for r2 in [0.0, 1.0] {
        let err = tune_penalty(
            problem.x.view(),
            problem.y.view(),
            r2,
            &TunerConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::InvalidArgument(_)));
    }
}
