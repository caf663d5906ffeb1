use crate::types::LinkFunction;
use ndarray::{Array1, ArrayView1};

/// Logistic function, clamped so the result stays strictly inside (0, 1).
#[inline]
pub fn logistic(x: f64) -> f64 {
    let z = x.clamp(-30.0, 30.0);
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Log-odds of a probability. Returns an error outside the open unit interval.
#[inline]
pub fn logit(p: f64) -> Result<f64, String> {
    if !(p.is_finite() && p > 0.0 && p < 1.0) {
        return Err(format!("logit requires p in (0,1), got {p}"));
    }
    Ok((p / (1.0 - p)).ln())
}

/// Inverse-link transform of a single linear predictor.
#[inline]
pub fn inverse_link(link: LinkFunction, eta: f64) -> f64 {
    match link {
        LinkFunction::Identity => eta,
        LinkFunction::Log => eta.exp(),
        LinkFunction::Logit => logistic(eta),
    }
}

/// Inverse-link transform per link function.
#[inline]
pub fn inverse_link_array(link: LinkFunction, eta: ArrayView1<'_, f64>) -> Array1<f64> {
    eta.mapv(|v| inverse_link(link, v))
}
