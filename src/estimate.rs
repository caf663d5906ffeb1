//! Closed-form year-effect fits for one-way GLMs.
//!
//! With the year factor as the only covariate, the maximum-likelihood level
//! estimate of each family is a per-year summary on the link scale, so no
//! iterative solver is needed. The fits report coefficients in either
//! treatment-contrast or no-intercept form, which is the input the
//! normalizer works from.

use crate::normalize::{NormalizeError, normalize_effects, reconstruct_reference_level};
use crate::probability::{inverse_link_array, logit};
use crate::types::{LikelihoodFamily, LinkFunction, Parameterization, YearEffects};
use ndarray::{Array1, ArrayView1, s};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Years with fewer observations than this are flagged in the log.
const SPARSE_YEAR_OBS: usize = 5;

#[derive(Error, Debug)]
pub enum EstimationError {
    #[error("Input length mismatch: {years} year labels for {responses} responses.")]
    LengthMismatch { years: usize, responses: usize },

    #[error("Cannot fit year effects to an empty data set.")]
    EmptyInput,

    #[error("Treatment contrasts need at least two year levels, found {0}.")]
    TooFewLevels(usize),

    #[error("Response at index {index} is not finite ({value}).")]
    NonFiniteResponse { index: usize, value: f64 },

    #[error("The {family} family requires strictly positive responses; found {value} at index {index}.")]
    NonPositiveResponse {
        family: &'static str,
        index: usize,
        value: f64,
    },

    #[error("The {family} family requires non-negative responses; found {value} at index {index}.")]
    NegativeResponse {
        family: &'static str,
        index: usize,
        value: f64,
    },

    #[error(
        "Encounter share in year {year} is {share}; the logit year effect is unbounded (complete separation)."
    )]
    DegenerateEncounter { year: i32, share: f64 },

    #[error("Mean response in year {year} is zero; the log year effect is unbounded.")]
    ZeroMean { year: i32 },

    #[error("Year levels differ between fits: {left:?} vs {right:?}.")]
    YearMismatch { left: Vec<i32>, right: Vec<i32> },

    #[error(
        "Fit has {coefficients} coefficients and {observation_counts} observation counts for {years} years ({parameterization})."
    )]
    InconsistentFit {
        parameterization: &'static str,
        years: usize,
        coefficients: usize,
        observation_counts: usize,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Fitted one-way year-effect model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearEffectFit {
    pub family: LikelihoodFamily,
    pub parameterization: Parameterization,
    /// Distinct years in ascending order; the first is the reference level.
    pub years: Vec<i32>,
    /// Zero under the no-intercept parameterization.
    pub intercept: f64,
    pub coefficients: YearEffects,
    pub n_obs_by_year: Vec<usize>,
}

impl YearEffectFit {
    pub fn link(&self) -> LinkFunction {
        self.family.link()
    }

    /// Coefficients with the reference level made explicit.
    pub fn full_effects(&self) -> Array1<f64> {
        reconstruct_reference_level(self.coefficients.view(), self.parameterization)
    }

    /// Per-year linear predictor `intercept + effect`.
    pub fn linear_predictors(&self) -> Array1<f64> {
        self.full_effects() + self.intercept
    }

    /// Per-year expected response, the absolute-scale index.
    pub fn response_index(&self) -> Array1<f64> {
        inverse_link_array(self.link(), self.linear_predictors().view())
    }

    /// Check that the coefficient count matches the year levels under the
    /// fit's parameterization. Fits read back from a cache go through this.
    pub fn check_shape(&self) -> Result<(), EstimationError> {
        let expected = match self.parameterization {
            Parameterization::NoIntercept => self.years.len(),
            Parameterization::TreatmentContrast => self.years.len().saturating_sub(1),
        };
        let ordered = self.years.windows(2).all(|w| w[0] < w[1]);
        if self.years.is_empty()
            || !ordered
            || self.coefficients.len() != expected
            || self.n_obs_by_year.len() != self.years.len()
        {
            return Err(EstimationError::InconsistentFit {
                parameterization: self.parameterization.name(),
                years: self.years.len(),
                coefficients: self.coefficients.len(),
                observation_counts: self.n_obs_by_year.len(),
            });
        }
        Ok(())
    }

    /// The reported coefficients anchored to `reference_geometric_mean`.
    pub fn normalized(&self, reference_geometric_mean: f64) -> Result<Array1<f64>, NormalizeError> {
        normalize_effects(
            self.coefficients.view(),
            self.link(),
            self.parameterization,
            reference_geometric_mean,
        )
    }
}

fn validate_response(
    response: ArrayView1<'_, f64>,
    family: LikelihoodFamily,
) -> Result<(), EstimationError> {
    for (index, &value) in response.iter().enumerate() {
        if !value.is_finite() {
            return Err(EstimationError::NonFiniteResponse { index, value });
        }
        match family {
            LikelihoodFamily::LognormalLog | LikelihoodFamily::GammaLog if value <= 0.0 => {
                return Err(EstimationError::NonPositiveResponse {
                    family: family.name(),
                    index,
                    value,
                });
            }
            LikelihoodFamily::PoissonLog | LikelihoodFamily::BinomialLogit if value < 0.0 => {
                return Err(EstimationError::NegativeResponse {
                    family: family.name(),
                    index,
                    value,
                });
            }
            _ => {}
        }
    }
    Ok(())
}

fn level_estimate(
    family: LikelihoodFamily,
    year: i32,
    values: &[f64],
) -> Result<f64, EstimationError> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    match family {
        LikelihoodFamily::GaussianIdentity => Ok(mean),
        LikelihoodFamily::LognormalLog => Ok(values.iter().map(|v| v.ln()).sum::<f64>() / n),
        LikelihoodFamily::GammaLog => Ok(mean.ln()),
        LikelihoodFamily::PoissonLog => {
            if mean <= 0.0 {
                return Err(EstimationError::ZeroMean { year });
            }
            Ok(mean.ln())
        }
        LikelihoodFamily::BinomialLogit => {
            let share = values.iter().filter(|v| **v > 0.0).count() as f64 / n;
            logit(share).map_err(|_| EstimationError::DegenerateEncounter { year, share })
        }
    }
}

/// Fit `g(E[y]) = alpha + beta_year` by maximum likelihood.
///
/// `BinomialLogit` treats any positive response as an encounter, so raw catch
/// rates can be passed directly.
pub fn fit_year_effects(
    years: &[i32],
    response: ArrayView1<'_, f64>,
    family: LikelihoodFamily,
    parameterization: Parameterization,
) -> Result<YearEffectFit, EstimationError> {
    if years.len() != response.len() {
        return Err(EstimationError::LengthMismatch {
            years: years.len(),
            responses: response.len(),
        });
    }
    if years.is_empty() {
        return Err(EstimationError::EmptyInput);
    }
    validate_response(response, family)?;

    let mut groups: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for (&year, &value) in years.iter().zip(response.iter()) {
        groups.entry(year).or_default().push(value);
    }
    if parameterization == Parameterization::TreatmentContrast && groups.len() < 2 {
        return Err(EstimationError::TooFewLevels(groups.len()));
    }

    let mut level_years = Vec::with_capacity(groups.len());
    let mut counts = Vec::with_capacity(groups.len());
    let mut eta = Vec::with_capacity(groups.len());
    for (&year, values) in &groups {
        if values.len() < SPARSE_YEAR_OBS {
            log::warn!(
                "year {} has only {} observations for {}; its effect is poorly determined",
                year,
                values.len(),
                family.name()
            );
        }
        eta.push(level_estimate(family, year, values)?);
        level_years.push(year);
        counts.push(values.len());
    }
    let eta = Array1::from_vec(eta);

    let (intercept, coefficients) = match parameterization {
        Parameterization::NoIntercept => (0.0, eta),
        Parameterization::TreatmentContrast => {
            let base = eta[0];
            (base, eta.slice(s![1..]).mapv(|v| v - base))
        }
    };

    log::debug!(
        "fitted {} year effects ({}, {} levels, {} obs)",
        family.name(),
        parameterization.name(),
        level_years.len(),
        years.len()
    );

    Ok(YearEffectFit {
        family,
        parameterization,
        years: level_years,
        intercept,
        coefficients: YearEffects::new(coefficients),
        n_obs_by_year: counts,
    })
}

/// Observations with a strictly positive response: the positive-catch
/// component of a delta model.
pub fn positive_subset(years: &[i32], response: ArrayView1<'_, f64>) -> (Vec<i32>, Array1<f64>) {
    let (kept_years, kept): (Vec<i32>, Vec<f64>) = years
        .iter()
        .copied()
        .zip(response.iter().copied())
        .filter(|(_, y)| *y > 0.0)
        .unzip();
    (kept_years, Array1::from_vec(kept))
}

/// Delta (hurdle) index: encounter probability times positive catch rate.
pub fn delta_index(
    encounter: &YearEffectFit,
    positive: &YearEffectFit,
) -> Result<Array1<f64>, EstimationError> {
    if encounter.family != LikelihoodFamily::BinomialLogit {
        return Err(EstimationError::InvalidInput(format!(
            "delta index needs a binomial-logit encounter fit, got {}",
            encounter.family.name()
        )));
    }
    if encounter.years != positive.years {
        return Err(EstimationError::YearMismatch {
            left: encounter.years.clone(),
            right: positive.years.clone(),
        });
    }
    Ok(encounter.response_index() * positive.response_index())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn toy_years() -> Vec<i32> {
        vec![2001, 2000, 2000, 2001, 2002, 2002]
    }

    #[test]
    fn lognormal_treatment_contrast_uses_mean_log_differences() {
        let y = array![4.0, 1.0, 4.0, 16.0, 2.0, 8.0];
        let fit = fit_year_effects(
            &toy_years(),
            y.view(),
            LikelihoodFamily::LognormalLog,
            Parameterization::TreatmentContrast,
        )
        .expect("fit");
        assert_eq!(fit.years, vec![2000, 2001, 2002]);
        assert_eq!(fit.n_obs_by_year, vec![2, 2, 2]);
        // Mean logs: ln 2, ln 8, ln 4.
        assert_abs_diff_eq!(fit.intercept, 2f64.ln(), epsilon = 1e-12);
        assert_eq!(fit.coefficients.len(), 2);
        assert_abs_diff_eq!(fit.coefficients[0], 4f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(fit.coefficients[1], 2f64.ln(), epsilon = 1e-12);

        let index = fit.response_index();
        assert_abs_diff_eq!(index[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(index[1], 8.0, epsilon = 1e-12);
        assert_abs_diff_eq!(index[2], 4.0, epsilon = 1e-12);
    }

    #[test]
    fn parameterizations_agree_after_normalization_for_log_links() {
        let y = array![4.0, 1.0, 4.0, 16.0, 2.0, 8.0];
        let contrast = fit_year_effects(
            &toy_years(),
            y.view(),
            LikelihoodFamily::GammaLog,
            Parameterization::TreatmentContrast,
        )
        .expect("contrast fit");
        let free = fit_year_effects(
            &toy_years(),
            y.view(),
            LikelihoodFamily::GammaLog,
            Parameterization::NoIntercept,
        )
        .expect("no-intercept fit");
        assert_eq!(free.coefficients.len(), 3);
        assert_eq!(free.intercept, 0.0);

        let a = contrast.normalized(3.0).expect("normalize contrast");
        let b = free.normalized(3.0).expect("normalize free");
        let eta_a = contrast.linear_predictors();
        let eta_b = free.linear_predictors();
        for i in 0..3 {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-12);
            assert_abs_diff_eq!(eta_a[i], eta_b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn binomial_uses_encounter_share() {
        let years = vec![1, 1, 1, 1, 2, 2, 2, 2];
        let y = array![0.0, 3.0, 0.0, 1.0, 2.0, 5.0, 0.0, 1.0];
        let fit = fit_year_effects(
            &years,
            y.view(),
            LikelihoodFamily::BinomialLogit,
            Parameterization::NoIntercept,
        )
        .expect("fit");
        let p = fit.response_index();
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(p[1], 0.75, epsilon = 1e-12);
    }

    #[test]
    fn binomial_separation_is_reported() {
        let years = vec![1, 1, 2, 2];
        let y = array![0.0, 0.0, 1.0, 0.0];
        let err = fit_year_effects(
            &years,
            y.view(),
            LikelihoodFamily::BinomialLogit,
            Parameterization::TreatmentContrast,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::DegenerateEncounter { year: 1, .. }
        ));
    }

    #[test]
    fn positive_families_reject_zero_catches() {
        let years = vec![1, 2];
        let y = array![0.0, 1.0];
        let err = fit_year_effects(
            &years,
            y.view(),
            LikelihoodFamily::LognormalLog,
            Parameterization::TreatmentContrast,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::NonPositiveResponse { index: 0, .. }
        ));

        let err = fit_year_effects(
            &years,
            y.view(),
            LikelihoodFamily::PoissonLog,
            Parameterization::TreatmentContrast,
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::ZeroMean { year: 1 }));
    }

    #[test]
    fn shape_and_level_errors() {
        let err = fit_year_effects(
            &[1, 2],
            array![1.0].view(),
            LikelihoodFamily::GaussianIdentity,
            Parameterization::NoIntercept,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            EstimationError::LengthMismatch {
                years: 2,
                responses: 1
            }
        ));

        let err = fit_year_effects(
            &[5, 5],
            array![1.0, 2.0].view(),
            LikelihoodFamily::GaussianIdentity,
            Parameterization::TreatmentContrast,
        )
        .unwrap_err();
        assert!(matches!(err, EstimationError::TooFewLevels(1)));

        let single = fit_year_effects(
            &[5, 5],
            array![1.0, 2.0].view(),
            LikelihoodFamily::GaussianIdentity,
            Parameterization::NoIntercept,
        )
        .expect("single level without intercept");
        assert_abs_diff_eq!(single.coefficients[0], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn delta_index_multiplies_components() {
        let years = vec![1, 1, 1, 1, 2, 2, 2, 2];
        let y = array![0.0, 2.0, 0.0, 8.0, 1.0, 1.0, 0.0, 4.0];
        let encounter = fit_year_effects(
            &years,
            y.view(),
            LikelihoodFamily::BinomialLogit,
            Parameterization::TreatmentContrast,
        )
        .expect("encounter");
        let (pos_years, pos_y) = positive_subset(&years, y.view());
        assert_eq!(pos_years, vec![1, 1, 2, 2, 2]);
        let positive = fit_year_effects(
            &pos_years,
            pos_y.view(),
            LikelihoodFamily::LognormalLog,
            Parameterization::TreatmentContrast,
        )
        .expect("positive");
        let index = delta_index(&encounter, &positive).expect("delta");
        // Year 1: p = 0.5, geometric mean of {2, 8} = 4.
        assert_abs_diff_eq!(index[0], 2.0, epsilon = 1e-12);
        // Year 2: p = 0.75, geometric mean of {1, 1, 4} = 4^(1/3).
        assert_abs_diff_eq!(index[1], 0.75 * 4f64.powf(1.0 / 3.0), epsilon = 1e-12);

        assert!(matches!(
            delta_index(&positive, &positive).unwrap_err(),
            EstimationError::InvalidInput(_)
        ));
    }

    #[test]
    fn fit_survives_json_round_trip() {
        let y = array![4.0, 1.0, 4.0, 16.0, 2.0, 8.0];
        let fit = fit_year_effects(
            &toy_years(),
            y.view(),
            LikelihoodFamily::LognormalLog,
            Parameterization::TreatmentContrast,
        )
        .expect("fit");
        let payload = serde_json::to_string(&fit).expect("serialize");
        let back: YearEffectFit = serde_json::from_str(&payload).expect("deserialize");
        assert_eq!(back.years, fit.years);
        assert_eq!(back.family, fit.family);
        for (a, b) in back.coefficients.iter().zip(fit.coefficients.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }
}
