//! Geometric-mean anchoring of year-effect coefficient series.
//!
//! Coefficients from models with different link functions and baseline
//! conventions are mapped to the response scale and rescaled so that their
//! geometric mean equals that of a reference series. After this step only the
//! relative year-to-year shape differs between series.

use crate::probability::inverse_link;
use crate::types::{LinkFunction, Parameterization};
use ndarray::{Array1, ArrayView1};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
    #[error("Cannot normalize an empty coefficient series.")]
    Empty,

    #[error(
        "Transformed value at index {index} is not strictly positive ({value}); the geometric mean is undefined."
    )]
    NonPositive { index: usize, value: f64 },

    #[error("Transformed value at index {index} is not finite ({value}).")]
    NonFinite { index: usize, value: f64 },

    #[error("Reference geometric mean must be finite and strictly positive, got {0}.")]
    InvalidReference(f64),
}

/// Geometric mean of a strictly positive series, evaluated as `exp(mean(ln x))`.
pub fn geometric_mean(values: ArrayView1<'_, f64>) -> Result<f64, NormalizeError> {
    if values.is_empty() {
        return Err(NormalizeError::Empty);
    }
    let mut log_sum = 0.0;
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(NormalizeError::NonFinite { index, value });
        }
        if value <= 0.0 {
            return Err(NormalizeError::NonPositive { index, value });
        }
        log_sum += value.ln();
    }
    Ok((log_sum / values.len() as f64).exp())
}

/// Prepend the implicit zero of the dropped reference level when the source
/// model used treatment contrasts.
pub fn reconstruct_reference_level(
    raw: ArrayView1<'_, f64>,
    parameterization: Parameterization,
) -> Array1<f64> {
    match parameterization {
        Parameterization::NoIntercept => raw.to_owned(),
        Parameterization::TreatmentContrast => {
            let mut full = Array1::<f64>::zeros(raw.len() + 1);
            full.slice_mut(ndarray::s![1..]).assign(&raw);
            full
        }
    }
}

fn check_reference(reference_geometric_mean: f64) -> Result<(), NormalizeError> {
    if reference_geometric_mean.is_finite() && reference_geometric_mean > 0.0 {
        Ok(())
    } else {
        Err(NormalizeError::InvalidReference(reference_geometric_mean))
    }
}

/// Rescale a response-scale series so its geometric mean equals `target`.
pub fn rescale_to_geometric_mean(
    values: ArrayView1<'_, f64>,
    target: f64,
) -> Result<Array1<f64>, NormalizeError> {
    check_reference(target)?;
    let gm = geometric_mean(values)?;
    let factor = target / gm;
    let scaled = values.mapv(|v| v * factor);
    // The factor can push extreme inputs past the f64 range.
    for (index, &value) in scaled.iter().enumerate() {
        if !value.is_finite() {
            return Err(NormalizeError::NonFinite { index, value });
        }
        if value <= 0.0 {
            return Err(NormalizeError::NonPositive { index, value });
        }
    }
    Ok(scaled)
}

/// Rescale `values` to the geometric mean of a whole reference series.
pub fn anchor_to_reference(
    values: ArrayView1<'_, f64>,
    reference: ArrayView1<'_, f64>,
) -> Result<Array1<f64>, NormalizeError> {
    let target = geometric_mean(reference)?;
    rescale_to_geometric_mean(values, target)
}

/// Apply an arbitrary inverse link elementwise, then anchor to
/// `reference_geometric_mean`.
pub fn normalize_with<F>(
    raw: ArrayView1<'_, f64>,
    inverse: F,
    reference_geometric_mean: f64,
) -> Result<Array1<f64>, NormalizeError>
where
    F: Fn(f64) -> f64,
{
    check_reference(reference_geometric_mean)?;
    let transformed = raw.mapv(inverse);
    rescale_to_geometric_mean(transformed.view(), reference_geometric_mean)
}

/// Normalize a full coefficient vector (reference level already explicit).
pub fn normalize(
    raw: ArrayView1<'_, f64>,
    link: LinkFunction,
    reference_geometric_mean: f64,
) -> Result<Array1<f64>, NormalizeError> {
    normalize_with(raw, |eta| inverse_link(link, eta), reference_geometric_mean)
}

/// Normalize coefficients exactly as the source model reported them,
/// reconstructing the reference level first when needed.
pub fn normalize_effects(
    raw: ArrayView1<'_, f64>,
    link: LinkFunction,
    parameterization: Parameterization,
    reference_geometric_mean: f64,
) -> Result<Array1<f64>, NormalizeError> {
    let full = reconstruct_reference_level(raw, parameterization);
    log::debug!(
        "normalizing {} {} coefficients ({} levels) to geometric mean {:.6}",
        parameterization.name(),
        link.name(),
        full.len(),
        reference_geometric_mean
    );
    normalize(full.view(), link, reference_geometric_mean)
}
