use cpue_index::probability::inverse_link;
use cpue_index::{
    LinkFunction, NormalizeError, Parameterization, geometric_mean, normalize, normalize_effects,
    normalize_with,
};
use ndarray::Array1;
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

const REL_TOL: f64 = 1e-9;
const MIN_PROPTEST_CASES: u32 = 256;

fn proptest_cases() -> u32 {
    std::env::var("PROPTEST_CASES")
        .ok()
        .and_then(|raw| raw.parse::<u32>().ok())
        .map(|parsed| parsed.max(MIN_PROPTEST_CASES))
        .unwrap_or(MIN_PROPTEST_CASES)
}

fn relative_close(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() <= REL_TOL * expected.abs().max(1.0)
}

fn link_strategy() -> impl Strategy<Value = LinkFunction> {
    prop_oneof![Just(LinkFunction::Log), Just(LinkFunction::Logit)]
}

fn coefficients() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-4.0f64..4.0, 1..24)
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: proptest_cases(),
        ..ProptestConfig::default()
    })]

    #[test]
    fn output_geometric_mean_equals_reference(
        raw in coefficients(),
        link in link_strategy(),
        reference in 1e-3f64..1e3,
    ) {
        let raw = Array1::from_vec(raw);
        let out = normalize(raw.view(), link, reference).expect("normalize");
        prop_assert_eq!(out.len(), raw.len());
        let gm = geometric_mean(out.view()).expect("geometric mean");
        prop_assert!(relative_close(gm, reference), "gm={gm} reference={reference}");
    }

    #[test]
    fn scaling_transformed_values_does_not_change_output(
        raw in coefficients(),
        link in link_strategy(),
        reference in 1e-3f64..1e3,
        scale in 1e-3f64..1e3,
    ) {
        let raw = Array1::from_vec(raw);
        let base = normalize(raw.view(), link, reference).expect("normalize");
        let scaled = normalize_with(raw.view(), |eta| scale * inverse_link(link, eta), reference)
            .expect("normalize scaled");
        for (a, b) in base.iter().zip(scaled.iter()) {
            prop_assert!(relative_close(*b, *a), "base={a} scaled={b} scale={scale}");
        }
    }

    #[test]
    fn log_link_output_ignores_the_baseline_convention(
        raw in coefficients(),
        shift in -3.0f64..3.0,
        reference in 1e-2f64..1e2,
    ) {
        // Treatment-contrast coefficients are no-intercept coefficients minus
        // the first level; under the log link the two must normalize alike.
        let full = Array1::from_vec(raw).mapv(|v| v + shift);
        let base = full[0];
        let contrasts = full.slice(ndarray::s![1..]).mapv(|v| v - base);
        let a = normalize_effects(
            full.view(),
            LinkFunction::Log,
            Parameterization::NoIntercept,
            reference,
        )
        .expect("no-intercept");
        let b = normalize_effects(
            contrasts.view(),
            LinkFunction::Log,
            Parameterization::TreatmentContrast,
            reference,
        )
        .expect("treatment contrast");
        prop_assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            prop_assert!(relative_close(*y, *x), "no-intercept={x} contrast={y}");
        }
    }

    #[test]
    fn identity_link_reports_first_non_positive_value(
        mut values in prop::collection::vec(0.1f64..10.0, 2..16),
        bad_index in any::<prop::sample::Index>(),
        bad_value in -5.0f64..=0.0,
    ) {
        let index = bad_index.index(values.len());
        values[index] = bad_value;
        let raw = Array1::from_vec(values);
        let err = normalize(raw.view(), LinkFunction::Identity, 1.0).unwrap_err();
        prop_assert_eq!(err, NormalizeError::NonPositive { index, value: bad_value });
    }
}
