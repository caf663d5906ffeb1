//! Merge normalized year-effect series from several models into one table.

use crate::cache::{CacheError, CacheMode, ModelCache, load_or_compute};
use crate::config::{ComparisonConfig, ConfigError, ModelSpec};
use crate::estimate::{
    EstimationError, YearEffectFit, delta_index, fit_year_effects, positive_subset,
};
use crate::normalize::{NormalizeError, geometric_mean, rescale_to_geometric_mean};
use crate::types::{LikelihoodFamily, Parameterization};
use comfy_table::{Cell, ContentArrangement, Row, Table, presets::UTF8_FULL};
use csv::WriterBuilder;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompareError {
    #[error("Normalization failed: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Year-effect fit failed: {0}")]
    Estimation(#[from] EstimationError),

    #[error("Model cache failed: {0}")]
    Cache(#[from] CacheError),

    #[error("{0}")]
    Config(#[from] ConfigError),

    #[error("Series '{label}' covers years {found:?}, expected {expected:?}.")]
    YearMismatch {
        label: String,
        expected: Vec<i32>,
        found: Vec<i32>,
    },

    #[error("Series '{label}' has {values} values for {years} years.")]
    LengthMismatch {
        label: String,
        values: usize,
        years: usize,
    },

    #[error("Duplicate series label '{0}'.")]
    DuplicateLabel(String),

    #[error("Failed to write comparison table '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// A labelled response-scale index, one value per year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSeries {
    pub label: String,
    pub years: Vec<i32>,
    pub values: Array1<f64>,
}

impl IndexSeries {
    pub fn new(label: impl Into<String>, years: Vec<i32>, values: Array1<f64>) -> Self {
        Self {
            label: label.into(),
            years,
            values,
        }
    }

    pub fn geometric_mean(&self) -> Result<f64, NormalizeError> {
        geometric_mean(self.values.view())
    }
}

/// One row of the long-format table used for plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRow {
    pub model: String,
    pub year: i32,
    pub index: f64,
}

/// Series anchored to a common geometric mean. The first series is the
/// reference.
#[derive(Debug, Clone)]
pub struct ComparisonTable {
    reference_geometric_mean: f64,
    series: Vec<IndexSeries>,
}

impl ComparisonTable {
    pub fn new(reference: IndexSeries) -> Result<Self, CompareError> {
        if reference.values.len() != reference.years.len() {
            return Err(CompareError::LengthMismatch {
                label: reference.label,
                values: reference.values.len(),
                years: reference.years.len(),
            });
        }
        let reference_geometric_mean = reference.geometric_mean()?;
        log::debug!(
            "reference '{}' anchors the table at geometric mean {:.6}",
            reference.label,
            reference_geometric_mean
        );
        Ok(Self {
            reference_geometric_mean,
            series: vec![reference],
        })
    }

    pub fn reference(&self) -> &IndexSeries {
        &self.series[0]
    }

    pub fn years(&self) -> &[i32] {
        &self.series[0].years
    }

    pub fn reference_geometric_mean(&self) -> f64 {
        self.reference_geometric_mean
    }

    pub fn series(&self) -> &[IndexSeries] {
        &self.series
    }

    pub fn get(&self, label: &str) -> Option<&IndexSeries> {
        self.series.iter().find(|s| s.label == label)
    }

    fn check_incoming(&self, label: &str, years: &[i32]) -> Result<(), CompareError> {
        if self.get(label).is_some() {
            return Err(CompareError::DuplicateLabel(label.to_string()));
        }
        if years != self.years() {
            return Err(CompareError::YearMismatch {
                label: label.to_string(),
                expected: self.years().to_vec(),
                found: years.to_vec(),
            });
        }
        Ok(())
    }

    fn push(&mut self, series: IndexSeries) -> &IndexSeries {
        let idx = self.series.len();
        self.series.push(series);
        &self.series[idx]
    }

    /// Normalize a fit's reported coefficients onto the reference scale.
    pub fn add_fit(
        &mut self,
        label: &str,
        fit: &YearEffectFit,
    ) -> Result<&IndexSeries, CompareError> {
        self.check_incoming(label, &fit.years)?;
        let values = fit.normalized(self.reference_geometric_mean)?;
        if values.len() != fit.years.len() {
            return Err(CompareError::LengthMismatch {
                label: label.to_string(),
                values: values.len(),
                years: fit.years.len(),
            });
        }
        Ok(self.push(IndexSeries::new(label, fit.years.clone(), values)))
    }

    /// Rescale a series that is already on the response scale.
    pub fn add_response_series(
        &mut self,
        label: &str,
        years: &[i32],
        values: ArrayView1<'_, f64>,
    ) -> Result<&IndexSeries, CompareError> {
        self.check_incoming(label, years)?;
        if values.len() != years.len() {
            return Err(CompareError::LengthMismatch {
                label: label.to_string(),
                values: values.len(),
                years: years.len(),
            });
        }
        let values = rescale_to_geometric_mean(values, self.reference_geometric_mean)?;
        Ok(self.push(IndexSeries::new(label, years.to_vec(), values)))
    }

    /// Long format: one row per series and year.
    pub fn rows(&self) -> Vec<IndexRow> {
        self.series
            .iter()
            .flat_map(|s| {
                s.years.iter().zip(s.values.iter()).map(|(&year, &index)| IndexRow {
                    model: s.label.clone(),
                    year,
                    index,
                })
            })
            .collect()
    }

    /// Largest absolute log ratio between a series and the reference.
    pub fn max_log_deviation(&self, label: &str) -> Option<f64> {
        let series = self.get(label)?;
        let reference = self.reference();
        series
            .values
            .iter()
            .zip(reference.values.iter())
            .map(|(s, r)| (s / r).ln().abs())
            .reduce(f64::max)
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), CompareError> {
        let csv_error = |source| CompareError::Csv {
            path: path.to_path_buf(),
            source,
        };
        let mut wtr = WriterBuilder::new()
            .has_headers(true)
            .from_path(path)
            .map_err(csv_error)?;
        for row in self.rows() {
            wtr.serialize(row).map_err(csv_error)?;
        }
        wtr.flush().map_err(|e| csv_error(e.into()))?;
        log::info!("wrote comparison table: {}", path.display());
        Ok(())
    }

    /// Wide console view: one column per series plus a deviation footer.
    pub fn render(&self) -> Table {
        let mut table = Table::new();
        let mut header = vec!["Year".to_string()];
        header.extend(self.series.iter().map(|s| s.label.clone()));
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(header);

        for (i, year) in self.years().iter().enumerate() {
            let mut row = vec![Cell::new(year)];
            row.extend(
                self.series
                    .iter()
                    .map(|s| Cell::new(format!("{:.4}", s.values[i]))),
            );
            table.add_row(Row::from(row));
        }

        let mut footer = vec![Cell::new("max |log ratio|")];
        footer.extend(self.series.iter().map(|s| {
            let dev = self.max_log_deviation(&s.label).unwrap_or(0.0);
            Cell::new(format!("{dev:.4}"))
        }));
        table.add_row(Row::from(footer));
        table
    }
}

/// FNV-1a over the input columns; part of every cache key so that a changed
/// data set never reuses stale fits.
pub fn data_fingerprint(years: &[i32], response: ArrayView1<'_, f64>) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = OFFSET;
    let mut eat = |bytes: &[u8]| {
        for &b in bytes {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(PRIME);
        }
    };
    for &year in years {
        eat(&year.to_le_bytes());
    }
    for &value in response.iter() {
        eat(&value.to_bits().to_le_bytes());
    }
    hash
}

fn cache_key(spec: &ModelSpec, fingerprint: u64) -> String {
    let subset = if spec.positive_only { ".positive" } else { "" };
    format!(
        "{}.{}.{}{}.{:016x}",
        spec.label,
        spec.family.name(),
        spec.parameterization.name(),
        subset,
        fingerprint
    )
}

fn fit_spec(
    spec: &ModelSpec,
    years: &[i32],
    response: ArrayView1<'_, f64>,
) -> Result<YearEffectFit, CompareError> {
    let fit = if spec.positive_only {
        let (pos_years, pos_response) = positive_subset(years, response);
        fit_year_effects(
            &pos_years,
            pos_response.view(),
            spec.family,
            spec.parameterization,
        )?
    } else {
        fit_year_effects(years, response, spec.family, spec.parameterization)?
    };
    Ok(fit)
}

fn fit_cached(
    spec: &ModelSpec,
    years: &[i32],
    response: ArrayView1<'_, f64>,
    fingerprint: u64,
    mode: CacheMode,
    cache: &mut dyn ModelCache,
) -> Result<YearEffectFit, CompareError> {
    let key = cache_key(spec, fingerprint);
    let fit: YearEffectFit =
        load_or_compute(cache, &key, mode, || fit_spec(spec, years, response))?;
    fit.check_shape()?;
    Ok(fit)
}

/// Fit every configured model and anchor all series to the reference.
pub fn run_comparison(
    config: &ComparisonConfig,
    years: &[i32],
    response: ArrayView1<'_, f64>,
    cache: &mut dyn ModelCache,
) -> Result<ComparisonTable, CompareError> {
    config.validate()?;
    let fingerprint = data_fingerprint(years, response);
    let mode = config.cache_mode;

    let reference_fit = fit_cached(&config.reference, years, response, fingerprint, mode, cache)?;
    let mut reference_values = reference_fit.response_index();
    if let Some(target) = config.reference_geometric_mean {
        reference_values = rescale_to_geometric_mean(reference_values.view(), target)?;
    }
    let mut table = ComparisonTable::new(IndexSeries::new(
        config.reference.label.as_str(),
        reference_fit.years.clone(),
        reference_values,
    ))?;

    for spec in &config.models {
        let fit = fit_cached(spec, years, response, fingerprint, mode, cache)?;
        table.add_fit(&spec.label, &fit)?;
    }

    if let Some(delta) = &config.delta {
        let encounter_spec = ModelSpec::new(
            format!("{}.encounter", delta.label),
            LikelihoodFamily::BinomialLogit,
            Parameterization::TreatmentContrast,
        );
        let positive_spec = ModelSpec::new(
            format!("{}.catch", delta.label),
            LikelihoodFamily::LognormalLog,
            Parameterization::TreatmentContrast,
        )
        .positive_only();
        let encounter = fit_cached(&encounter_spec, years, response, fingerprint, mode, cache)?;
        let positive = fit_cached(&positive_spec, years, response, fingerprint, mode, cache)?;
        let index = delta_index(&encounter, &positive)?;
        table.add_response_series(&delta.label, &encounter.years, index.view())?;
    }

    log::info!(
        "compared {} series over {} years (reference '{}', geometric mean {:.4})",
        table.series().len(),
        table.years().len(),
        table.reference().label,
        table.reference_geometric_mean()
    );
    Ok(table)
}
