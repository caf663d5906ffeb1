//! Anchor CPUE year-effect indices from different GLM families to a common
//! geometric mean so their year-to-year shapes can be compared directly.
//!
//! Library code never calls `println!` or `process::exit`; errors come back as
//! `Result` values and progress goes through the `log` facade.

#![deny(dead_code)]
#![deny(unused_imports)]

pub mod cache;
pub mod compare;
pub mod config;
pub mod estimate;
pub mod normalize;
pub mod probability;
pub mod simulate;
pub mod types;

pub use cache::{CacheError, CacheMode, FileCache, MemoryCache, ModelCache, load_or_compute};
pub use compare::{
    CompareError, ComparisonTable, IndexRow, IndexSeries, data_fingerprint, run_comparison,
};
pub use config::{ComparisonConfig, ConfigError, DeltaSpec, ModelSpec, load_config};
pub use estimate::{
    EstimationError, YearEffectFit, delta_index, fit_year_effects, positive_subset,
};
pub use normalize::{
    NormalizeError, anchor_to_reference, geometric_mean, normalize, normalize_effects,
    normalize_with, reconstruct_reference_level, rescale_to_geometric_mean,
};
pub use simulate::{CpueRecord, SimulatedCpue, SimulationConfig, SimulationError, simulate_cpue};
pub use types::{LikelihoodFamily, LinkFunction, Parameterization, YearEffects};
