use anyhow::Result;
use approx::assert_abs_diff_eq;
use nested_rs::{
    NestedSampler, NestedSamplerSettings, ParamView, PriorChain, PriorError, PriorVariable,
    SampleError, SliceOptions, TerminationReason,
};

fn std_normal_logp(x: f64, mean: f64, sigma: f64) -> f64 {
    let dx = (x - mean) / sigma;
    -0.5 * dx * dx - sigma.ln() - 0.5 * (2.0 * std::f64::consts::PI).ln()
}

/// Uniform prior on [-100, 100] with a unit Gaussian likelihood. The
/// evidence is 1/200 (the normalized likelihood integrates to one).
fn wide_uniform_sampler() -> NestedSampler<impl nested_rs::LogLikelihood> {
    let prior = PriorChain::builder()
        .push(PriorVariable::uniform("x", vec![-100.0], vec![100.0]))
        .unwrap()
        .build();
    NestedSampler::new(
        |params: &ParamView<'_>| std_normal_logp(params.get("x").unwrap()[0], 0.0, 1.0),
        prior,
    )
    .with_reducer("x_mean", |params: &ParamView<'_>| {
        params.get("x").unwrap().to_vec()
    })
}

/// Conjugate pair: prior N(0, 1), likelihood N(x; 1, 1), so that
/// Z = N(1; 0, sqrt(2)) in closed form and the posterior mean is 1/2.
fn conjugate_sampler() -> NestedSampler<impl nested_rs::LogLikelihood> {
    let prior = PriorChain::builder()
        .push(PriorVariable::normal("x", vec![0.0], vec![1.0]))
        .unwrap()
        .build();
    NestedSampler::new(
        |params: &ParamView<'_>| std_normal_logp(params.get("x").unwrap()[0], 1.0, 1.0),
        prior,
    )
    .with_reducer("x_mean", |params: &ParamView<'_>| {
        params.get("x").unwrap().to_vec()
    })
}

fn conjugate_log_z() -> f64 {
    std_normal_logp(1.0, 0.0, 2.0f64.sqrt())
}

#[test]
fn wide_uniform_scenario_recovers_evidence() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 0,
        num_live_points: 300,
        termination_frac: 0.01,
        ..Default::default()
    };
    let results = wide_uniform_sampler().run(&settings)?;

    let true_log_z = -(200.0f64).ln();
    assert!(
        (results.log_z - true_log_z).abs() < 1.0,
        "logZ = {} vs analytic {}",
        results.log_z,
        true_log_z
    );
    assert!(results.ess > 100.0, "ESS = {}", results.ess);
    assert_eq!(
        results.termination_reason,
        TerminationReason::EvidenceConverged
    );
    // Posterior mean of the unit Gaussian is 0.
    assert!(results.marginalised["x_mean"][0].abs() < 0.2);
    Ok(())
}

#[test]
fn conjugate_evidence_within_reported_error() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 7,
        num_live_points: 400,
        ..Default::default()
    };
    let results = conjugate_sampler().run(&settings)?;

    let tolerance = 3.0 * results.log_z_err.max(0.05);
    assert!(
        (results.log_z - conjugate_log_z()).abs() < tolerance,
        "logZ = {} +- {} vs analytic {}",
        results.log_z,
        results.log_z_err,
        conjugate_log_z()
    );
    assert!((results.marginalised["x_mean"][0] - 0.5).abs() < 0.15);
    Ok(())
}

#[test]
fn stochastic_shrinkage_is_compatible() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 11,
        num_live_points: 400,
        stochastic_uncertainty: true,
        ..Default::default()
    };
    let results = conjugate_sampler().run(&settings)?;
    assert!((results.log_z - conjugate_log_z()).abs() < 4.0 * results.log_z_err.max(0.05));
    Ok(())
}

#[test]
fn output_invariants_hold() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 3,
        num_live_points: 100,
        ..Default::default()
    };
    let results = wide_uniform_sampler().run(&settings)?;

    let total: f64 = results.log_p.iter().map(|&v| v.exp()).sum();
    assert_abs_diff_eq!(total, 1.0, epsilon = 1e-8);

    for w in results.log_x.windows(2) {
        assert!(w[1] < w[0], "log_X must be strictly decreasing");
    }

    assert!(results.efficiency > 0.0 && results.efficiency <= 1.0);
    assert!(results.ess <= results.num_samples as f64);
    assert_eq!(results.log_l_samples.len(), results.num_samples);
    assert_eq!(results.n_per_sample.len(), results.num_samples);
    assert_eq!(results.sampler_efficiency.len(), results.num_samples);
    assert!(results
        .sampler_efficiency
        .iter()
        .all(|&e| e > 0.0 && e <= 1.0));

    // Main-loop samples see the full pool; the tail drains it one by one.
    assert_eq!(results.n_per_sample[0], 100);
    assert_eq!(*results.n_per_sample.last().unwrap(), 1);

    let samples = &results.samples["x"];
    assert_eq!(samples.num_samples(), results.num_samples);
    Ok(())
}

#[test]
fn same_seed_reproduces_bit_identical_results() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 123,
        num_live_points: 80,
        stochastic_uncertainty: true,
        sampler_options: SliceOptions {
            depth: 2,
            num_slices: 3,
        },
        ..Default::default()
    };
    let sampler = wide_uniform_sampler();
    let a = sampler.run(&settings)?;
    let b = sampler.run(&settings)?;

    assert_eq!(a.log_z.to_bits(), b.log_z.to_bits());
    assert_eq!(a.h.to_bits(), b.h.to_bits());
    assert_eq!(a.num_samples, b.num_samples);
    assert_eq!(a.num_likelihood_evaluations, b.num_likelihood_evaluations);
    assert_eq!(a.log_p, b.log_p);
    assert_eq!(a.log_x, b.log_x);
    assert_eq!(a.samples["x"].values(), b.samples["x"].values());
    Ok(())
}

#[test]
fn collect_samples_off_keeps_summaries() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 5,
        num_live_points: 60,
        collect_samples: false,
        ..Default::default()
    };
    let results = wide_uniform_sampler().run(&settings)?;
    assert!(results.samples.is_empty());
    assert!(results.log_z.is_finite());
    assert!(!results.log_p.is_empty());
    assert!(results.resample(0, 10).is_empty());
    Ok(())
}

#[test]
fn resample_produces_equally_weighted_draws() -> Result<()> {
    let settings = NestedSamplerSettings {
        seed: 9,
        num_live_points: 150,
        ..Default::default()
    };
    let results = wide_uniform_sampler().run(&settings)?;
    let resampled = results.resample(17, results.ess as usize);
    let x = &resampled["x"];
    assert_eq!(x.num_samples(), results.ess as usize);
    // Resampled posterior mean should sit near zero.
    let mean: f64 = x.values().iter().sum::<f64>() / x.num_samples() as f64;
    assert!(mean.abs() < 0.5);
    Ok(())
}

#[test]
fn duplicate_prior_name_fails_before_any_evaluation() {
    let err = PriorChain::builder()
        .push(PriorVariable::uniform("x", vec![0.0], vec![1.0]))
        .unwrap()
        .push(PriorVariable::uniform("x", vec![0.0], vec![1.0]))
        .unwrap_err();
    assert!(matches!(err, PriorError::DuplicateName(name) if name == "x"));
}

#[test]
fn impossible_likelihood_fails_initialization() {
    let prior = PriorChain::builder()
        .push(PriorVariable::uniform("x", vec![0.0], vec![1.0]))
        .unwrap()
        .build();
    let sampler = NestedSampler::new(|_: &ParamView<'_>| f64::NAN, prior);
    let err = sampler
        .run(&NestedSamplerSettings {
            num_live_points: 10,
            ..Default::default()
        })
        .unwrap_err();
    let err = err.downcast::<SampleError>().unwrap();
    assert!(matches!(err, SampleError::Initialization { .. }));
}
