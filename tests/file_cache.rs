use cpue_index::cache::validate_key;
use cpue_index::{
    CacheError, CacheMode, FileCache, LikelihoodFamily, ModelCache, Parameterization,
    YearEffectFit, fit_year_effects, load_or_compute,
};
use ndarray::array;
use std::cell::Cell;
use std::fs;

fn toy_fit() -> Result<YearEffectFit, cpue_index::EstimationError> {
    fit_year_effects(
        &[2010, 2010, 2011, 2011],
        array![1.0, 3.0, 4.0, 4.0].view(),
        LikelihoodFamily::GammaLog,
        Parameterization::TreatmentContrast,
    )
}

#[derive(Debug)]
enum TestError {
    Cache,
    Fit,
}

impl From<CacheError> for TestError {
    fn from(_: CacheError) -> Self {
        TestError::Cache
    }
}

#[test]
fn file_cache_persists_fits_between_instances() {
    let dir = tempfile::tempdir().expect("tempdir");
    let calls = Cell::new(0usize);
    let compute = || {
        calls.set(calls.get() + 1);
        toy_fit().map_err(|_| TestError::Fit)
    };

    let mut cache = FileCache::new(dir.path().join("fits")).expect("cache");
    let first: YearEffectFit =
        load_or_compute(&mut cache, "gamma", CacheMode::Reuse, compute).expect("first");
    assert!(cache.path_for("gamma").expect("path").exists());

    let mut reopened = FileCache::new(dir.path().join("fits")).expect("reopen");
    let second: YearEffectFit = load_or_compute(&mut reopened, "gamma", CacheMode::Reuse, || {
        calls.set(calls.get() + 1);
        toy_fit().map_err(|_| TestError::Fit)
    })
    .expect("second");
    assert_eq!(calls.get(), 1);
    assert_eq!(first.years, second.years);
    assert_eq!(first.coefficients.len(), second.coefficients.len());
    assert!((first.coefficients[0] - second.coefficients[0]).abs() < 1e-12);

    let _third: YearEffectFit =
        load_or_compute(&mut reopened, "gamma", CacheMode::Recompute, || {
            calls.set(calls.get() + 1);
            toy_fit().map_err(|_| TestError::Fit)
        })
        .expect("third");
    assert_eq!(calls.get(), 2);
}

#[test]
fn missing_entry_loads_as_none_and_bad_keys_fail() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cache = FileCache::new(dir.path()).expect("cache");
    assert!(cache.load("absent").expect("load").is_none());
    assert!(matches!(
        cache.store("../escape", "{}"),
        Err(CacheError::InvalidKey(_))
    ));
    assert!(validate_key("ok_key-1.v2").is_ok());
    assert_eq!(cache.root(), dir.path());
}

#[test]
fn corrupt_file_is_reported_instead_of_recomputed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut cache = FileCache::new(dir.path()).expect("cache");
    fs::write(cache.path_for("broken").expect("path"), "{ not json").expect("write");
    let result: Result<YearEffectFit, TestError> =
        load_or_compute(&mut cache, "broken", CacheMode::Reuse, || {
            toy_fit().map_err(|_| TestError::Fit)
        });
    assert!(matches!(result, Err(TestError::Cache)));
}
