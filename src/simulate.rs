//! Seeded synthetic CPUE data on a spatial grid.
//!
//! Spatial and spatio-temporal variation are drawn by process convolution:
//! standard normal weights at random knots smoothed with an exponential
//! kernel. Catches follow a delta-lognormal observation model.

use crate::probability::logistic;
use ndarray::Array1;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Bernoulli, Distribution, LogNormal, Normal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Invalid simulation config: {0}")]
    InvalidConfig(String),

    #[error("Failed to build sampling distribution: {0}")]
    Distribution(String),
}

pub fn default_seed() -> u64 {
    20_190_101
}

pub fn default_first_year() -> i32 {
    2000
}

pub fn default_n_years() -> usize {
    12
}

pub fn default_grid_size() -> usize {
    10
}

pub fn default_samples_per_year() -> usize {
    200
}

pub fn default_year_effect_sd() -> f64 {
    0.4
}

pub fn default_spatial_sd() -> f64 {
    0.5
}

pub fn default_spatial_range() -> f64 {
    0.25
}

pub fn default_spatiotemporal_sd() -> f64 {
    0.2
}

pub fn default_kernel_knots() -> usize {
    40
}

pub fn default_encounter_intercept() -> f64 {
    1.0
}

pub fn default_observation_sd() -> f64 {
    0.6
}

/// Parameters of the synthetic survey.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_first_year")]
    pub first_year: i32,
    #[serde(default = "default_n_years")]
    pub n_years: usize,
    /// Sites per side of the regular grid on the unit square.
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    #[serde(default = "default_samples_per_year")]
    pub samples_per_year: usize,
    #[serde(default = "default_year_effect_sd")]
    pub year_effect_sd: f64,
    #[serde(default = "default_spatial_sd")]
    pub spatial_sd: f64,
    /// Decay length of the exponential kernel, in unit-square coordinates.
    #[serde(default = "default_spatial_range")]
    pub spatial_range: f64,
    #[serde(default = "default_spatiotemporal_sd")]
    pub spatiotemporal_sd: f64,
    #[serde(default = "default_kernel_knots")]
    pub n_kernel_knots: usize,
    /// Log-odds of encounter at a site with zero spatial effect.
    #[serde(default = "default_encounter_intercept")]
    pub encounter_intercept: f64,
    #[serde(default)]
    pub log_mean_intercept: f64,
    #[serde(default = "default_observation_sd")]
    pub observation_sd: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            first_year: default_first_year(),
            n_years: default_n_years(),
            grid_size: default_grid_size(),
            samples_per_year: default_samples_per_year(),
            year_effect_sd: default_year_effect_sd(),
            spatial_sd: default_spatial_sd(),
            spatial_range: default_spatial_range(),
            spatiotemporal_sd: default_spatiotemporal_sd(),
            n_kernel_knots: default_kernel_knots(),
            encounter_intercept: default_encounter_intercept(),
            log_mean_intercept: 0.0,
            observation_sd: default_observation_sd(),
        }
    }
}

impl SimulationConfig {
    /// Same survey without spatial or spatio-temporal structure.
    pub fn non_spatial(self) -> Self {
        Self {
            spatial_sd: 0.0,
            spatiotemporal_sd: 0.0,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        let invalid = |msg: String| Err(SimulationError::InvalidConfig(msg));
        if self.n_years == 0 {
            return invalid("n_years must be at least 1".to_string());
        }
        let last_year = i32::try_from(self.n_years - 1)
            .ok()
            .and_then(|span| self.first_year.checked_add(span));
        if last_year.is_none() {
            return invalid(format!(
                "{} years starting at {} run past the last representable year",
                self.n_years, self.first_year
            ));
        }
        if self.grid_size == 0 {
            return invalid("grid_size must be at least 1".to_string());
        }
        if self.samples_per_year == 0 {
            return invalid("samples_per_year must be at least 1".to_string());
        }
        if self.n_kernel_knots == 0 {
            return invalid("n_kernel_knots must be at least 1".to_string());
        }
        for (name, value) in [
            ("year_effect_sd", self.year_effect_sd),
            ("spatial_sd", self.spatial_sd),
            ("spatiotemporal_sd", self.spatiotemporal_sd),
            ("observation_sd", self.observation_sd),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return invalid(format!("{name} must be finite and non-negative, got {value}"));
            }
        }
        if !(self.spatial_range.is_finite() && self.spatial_range > 0.0) {
            return invalid(format!(
                "spatial_range must be finite and positive, got {}",
                self.spatial_range
            ));
        }
        if !self.encounter_intercept.is_finite() || !self.log_mean_intercept.is_finite() {
            return invalid("intercepts must be finite".to_string());
        }
        Ok(())
    }
}

/// One simulated haul.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpueRecord {
    pub year: i32,
    pub site: usize,
    pub x: f64,
    pub y: f64,
    pub cpue: f64,
}

#[derive(Debug, Clone)]
pub struct SimulatedCpue {
    pub records: Vec<CpueRecord>,
    pub years: Vec<i32>,
    /// Centred log-scale year effects.
    pub true_year_effects: Array1<f64>,
    /// `exp(log_mean_intercept + year_effect)` per year.
    pub true_index: Array1<f64>,
}

impl SimulatedCpue {
    pub fn year_column(&self) -> Vec<i32> {
        self.records.iter().map(|r| r.year).collect()
    }

    pub fn cpue_column(&self) -> Array1<f64> {
        self.records.iter().map(|r| r.cpue).collect()
    }

    pub fn encounter_rate(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let hits = self.records.iter().filter(|r| r.cpue > 0.0).count();
        hits as f64 / self.records.len() as f64
    }
}

fn distribution_error(e: impl std::fmt::Display) -> SimulationError {
    SimulationError::Distribution(e.to_string())
}

fn grid_sites(grid_size: usize) -> Vec<(f64, f64)> {
    let step = 1.0 / grid_size as f64;
    let mut sites = Vec::with_capacity(grid_size * grid_size);
    for i in 0..grid_size {
        for j in 0..grid_size {
            sites.push(((i as f64 + 0.5) * step, (j as f64 + 0.5) * step));
        }
    }
    sites
}

/// Kernel-smoothed Gaussian field evaluated at `sites`, with marginal sd `sd`
/// at every site.
fn kernel_field(
    rng: &mut StdRng,
    std_normal: &Normal<f64>,
    sites: &[(f64, f64)],
    n_knots: usize,
    range: f64,
    sd: f64,
) -> Vec<f64> {
    if sd == 0.0 {
        return vec![0.0; sites.len()];
    }
    let knots: Vec<(f64, f64, f64)> = (0..n_knots)
        .map(|_| {
            let kx = rng.random::<f64>();
            let ky = rng.random::<f64>();
            (kx, ky, std_normal.sample(&mut *rng))
        })
        .collect();
    sites
        .iter()
        .map(|&(sx, sy)| {
            let mut num = 0.0;
            let mut den = 0.0;
            for &(kx, ky, w) in &knots {
                let d = ((sx - kx).powi(2) + (sy - ky).powi(2)).sqrt();
                let k = (-d / range).exp();
                num += w * k;
                den += k * k;
            }
            if den > 0.0 { sd * num / den.sqrt() } else { 0.0 }
        })
        .collect()
}

/// Draw a full synthetic survey. Identical configs give identical output.
pub fn simulate_cpue(config: &SimulationConfig) -> Result<SimulatedCpue, SimulationError> {
    config.validate()?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let std_normal = Normal::new(0.0, 1.0).map_err(distribution_error)?;
    let sites = grid_sites(config.grid_size);

    let mut year_effects = Array1::<f64>::zeros(config.n_years);
    for effect in year_effects.iter_mut() {
        *effect = config.year_effect_sd * std_normal.sample(&mut rng);
    }
    let centre = year_effects.mean().unwrap_or(0.0);
    year_effects -= centre;

    let spatial = kernel_field(
        &mut rng,
        &std_normal,
        &sites,
        config.n_kernel_knots,
        config.spatial_range,
        config.spatial_sd,
    );

    let mut years = Vec::with_capacity(config.n_years);
    let mut records = Vec::with_capacity(config.n_years * config.samples_per_year);
    for (t, &effect) in year_effects.iter().enumerate() {
        let year = config.first_year + t as i32;
        years.push(year);
        let spatiotemporal = kernel_field(
            &mut rng,
            &std_normal,
            &sites,
            config.n_kernel_knots,
            config.spatial_range,
            config.spatiotemporal_sd,
        );
        for _ in 0..config.samples_per_year {
            let site = rng.random_range(0..sites.len());
            let (x, y) = sites[site];
            let p = logistic(config.encounter_intercept + spatial[site]);
            let encountered = Bernoulli::new(p)
                .map_err(distribution_error)?
                .sample(&mut rng);
            let cpue = if encountered {
                let mu = config.log_mean_intercept + effect + spatial[site] + spatiotemporal[site];
                LogNormal::new(mu, config.observation_sd)
                    .map_err(distribution_error)?
                    .sample(&mut rng)
            } else {
                0.0
            };
            records.push(CpueRecord {
                year,
                site,
                x,
                y,
                cpue,
            });
        }
    }

    let true_index = year_effects.mapv(|e| (config.log_mean_intercept + e).exp());
    log::info!(
        "simulated {} hauls over {} years on a {}x{} grid (seed {})",
        records.len(),
        config.n_years,
        config.grid_size,
        config.grid_size,
        config.seed
    );

    Ok(SimulatedCpue {
        records,
        years,
        true_year_effects: year_effects,
        true_index,
    })
}
