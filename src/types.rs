use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};

/// Link between a model's linear predictor and its expected response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LinkFunction {
    Identity,
    Log,
    Logit,
}

impl LinkFunction {
    pub fn name(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Log => "log",
            Self::Logit => "logit",
        }
    }
}

/// Likelihood families a year-effect coefficient vector can come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LikelihoodFamily {
    GaussianIdentity,
    LognormalLog,
    GammaLog,
    PoissonLog,
    BinomialLogit,
}

impl LikelihoodFamily {
    pub fn link(self) -> LinkFunction {
        match self {
            Self::GaussianIdentity => LinkFunction::Identity,
            Self::LognormalLog | Self::GammaLog | Self::PoissonLog => LinkFunction::Log,
            Self::BinomialLogit => LinkFunction::Logit,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::GaussianIdentity => "gaussian-identity",
            Self::LognormalLog => "lognormal-log",
            Self::GammaLog => "gamma-log",
            Self::PoissonLog => "poisson-log",
            Self::BinomialLogit => "binomial-logit",
        }
    }
}

/// How the source model encodes the year factor.
///
/// Under treatment contrasts the first year is absorbed into the intercept and
/// its coefficient is implicitly zero, so the reported vector is one shorter
/// than the number of years.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Parameterization {
    #[default]
    TreatmentContrast,
    NoIntercept,
}

impl Parameterization {
    pub fn name(self) -> &'static str {
        match self {
            Self::TreatmentContrast => "treatment-contrast",
            Self::NoIntercept => "no-intercept",
        }
    }
}

/// Link-scale year-effect coefficients as reported by a model.
#[repr(transparent)]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct YearEffects(pub Array1<f64>);

impl YearEffects {
    pub fn new(values: Array1<f64>) -> Self {
        Self(values)
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }
}

impl Deref for YearEffects {
    type Target = Array1<f64>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for YearEffects {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Array1<f64>> for YearEffects {
    fn from(values: Array1<f64>) -> Self {
        Self(values)
    }
}

impl From<YearEffects> for Array1<f64> {
    fn from(values: YearEffects) -> Self {
        values.0
    }
}
