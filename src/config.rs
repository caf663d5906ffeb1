use crate::cache::{CacheMode, validate_key};
use crate::types::{LikelihoodFamily, Parameterization};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub fn default_cache_dir() -> PathBuf {
    PathBuf::from(".cpue-cache")
}

pub fn default_delta_label() -> String {
    "delta-lognormal".to_string()
}

/// One model whose year effects enter the comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub label: String,
    pub family: LikelihoodFamily,
    #[serde(default)]
    pub parameterization: Parameterization,
    /// Fit only the positive catches (the positive component of a delta model).
    #[serde(default)]
    pub positive_only: bool,
}

impl ModelSpec {
    pub fn new(
        label: impl Into<String>,
        family: LikelihoodFamily,
        parameterization: Parameterization,
    ) -> Self {
        Self {
            label: label.into(),
            family,
            parameterization,
            positive_only: false,
        }
    }

    pub fn positive_only(self) -> Self {
        Self {
            positive_only: true,
            ..self
        }
    }
}

/// Encounter probability times positive lognormal catch rate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeltaSpec {
    #[serde(default = "default_delta_label")]
    pub label: String,
}

impl Default for DeltaSpec {
    fn default() -> Self {
        Self {
            label: default_delta_label(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Model whose absolute-scale index anchors every other series.
    pub reference: ModelSpec,
    /// Rescale the reference itself to this geometric mean first.
    #[serde(default)]
    pub reference_geometric_mean: Option<f64>,
    #[serde(default)]
    pub models: Vec<ModelSpec>,
    #[serde(default)]
    pub delta: Option<DeltaSpec>,
    #[serde(default)]
    pub cache_mode: CacheMode,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            reference: ModelSpec::new(
                "lognormal",
                LikelihoodFamily::LognormalLog,
                Parameterization::NoIntercept,
            )
            .positive_only(),
            reference_geometric_mean: None,
            models: vec![
                ModelSpec::new(
                    "gamma",
                    LikelihoodFamily::GammaLog,
                    Parameterization::TreatmentContrast,
                )
                .positive_only(),
                ModelSpec::new(
                    "poisson",
                    LikelihoodFamily::PoissonLog,
                    Parameterization::TreatmentContrast,
                ),
                ModelSpec::new(
                    "gaussian",
                    LikelihoodFamily::GaussianIdentity,
                    Parameterization::NoIntercept,
                ),
                ModelSpec::new(
                    "encounter",
                    LikelihoodFamily::BinomialLogit,
                    Parameterization::TreatmentContrast,
                ),
            ],
            delta: Some(DeltaSpec::default()),
            cache_mode: CacheMode::Reuse,
            cache_dir: default_cache_dir(),
        }
    }
}

impl ComparisonConfig {
    /// Every series label in table order, reference first.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels = vec![self.reference.label.as_str()];
        labels.extend(self.models.iter().map(|m| m.label.as_str()));
        if let Some(delta) = &self.delta {
            labels.push(delta.label.as_str());
        }
        labels
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for label in self.labels() {
            validate_key(label).map_err(|_| {
                ConfigError::Invalid(format!(
                    "label '{label}' must be non-empty and use only [A-Za-z0-9._-]"
                ))
            })?;
            if !seen.insert(label) {
                return Err(ConfigError::Invalid(format!("duplicate label '{label}'")));
            }
        }
        if let Some(gm) = self.reference_geometric_mean {
            if !(gm.is_finite() && gm > 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "reference_geometric_mean must be finite and positive, got {gm}"
                )));
            }
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<ComparisonConfig, ConfigError> {
    let payload = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ComparisonConfig =
        serde_json::from_str(&payload).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    log::debug!(
        "loaded comparison config '{}' with {} series",
        path.display(),
        config.labels().len()
    );
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ComparisonConfig::default();
        config.validate().expect("default config");
        assert_eq!(
            config.labels(),
            vec!["lognormal", "gamma", "poisson", "gaussian", "encounter", "delta-lognormal"]
        );
    }

    #[test]
    fn minimal_json_gets_defaults() {
        let config: ComparisonConfig = serde_json::from_str(
            r#"{
                "reference": {"label": "ref", "family": "lognormal-log", "positive_only": true},
                "models": [{"label": "g", "family": "gamma-log", "parameterization": "no-intercept"}]
            }"#,
        )
        .expect("parse");
        assert_eq!(config.reference.parameterization, Parameterization::TreatmentContrast);
        assert!(config.reference.positive_only);
        assert_eq!(config.models[0].parameterization, Parameterization::NoIntercept);
        assert!(!config.models[0].positive_only);
        assert_eq!(config.cache_mode, CacheMode::Reuse);
        assert_eq!(config.cache_dir, default_cache_dir());
        assert!(config.delta.is_none());
        config.validate().expect("valid");
    }

    #[test]
    fn duplicate_and_unsafe_labels_are_rejected() {
        let mut config = ComparisonConfig::default();
        config.models[0].label = "lognormal".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = ComparisonConfig::default();
        config.models[1].label = "has space".to_string();
        assert!(config.validate().is_err());

        let config = ComparisonConfig {
            reference_geometric_mean: Some(-1.0),
            ..ComparisonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_reports_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
