// filter/pipeline.rs

use log::{debug, info};

use super::{
    AffyProbeNameFilter, AffyProbePattern, Filter, FilterConfig, RowLevelFilter,
    RowLevelFilterMethod, RowMissingFilter,
};
use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;

/// Standard filtering applied to an experiment's processed data before analysis.
#[derive(Debug, Clone, Default)]
pub struct ExpressionExperimentFilter {
    config: FilterConfig,
}

impl ExpressionExperimentFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Runs every enabled step in order.
    ///
    /// `detection_calls`, when given, decides which values count as present for the
    /// minimum-present-fraction step.
    pub fn filter(
        &self,
        data: &ExpressionDataMatrix,
        detection_calls: Option<&ExpressionDataMatrix>,
    ) -> Result<ExpressionDataMatrix> {
        if data.columns() < FilterConfig::MINIMUM_SAMPLE {
            return Err(PreprocessError::InsufficientSamples {
                found: data.columns(),
                required: FilterConfig::MINIMUM_SAMPLE,
            });
        }
        info!(
            "Filtering {} rows x {} columns with settings:\n{}",
            data.rows(),
            data.columns(),
            self.config
        );

        let mut filtered = data.clone();

        if self.config.remove_affy_controls {
            filtered = AffyProbeNameFilter::new(&[AffyProbePattern::Affx]).filter(&filtered)?;
            info!("After removing control probes: {} rows", filtered.rows());
        }

        if self.config.is_min_present_fraction_set() && self.config.min_present_fraction() > 0.0 {
            let mut missing = RowMissingFilter::new(self.config.min_present_fraction())?;
            if let Some(calls) = detection_calls {
                missing = missing.with_detection_calls(calls.clone());
            }
            filtered = missing.filter(&filtered)?;
            info!("After present-fraction filter: {} rows", filtered.rows());
        } else {
            debug!("Skipping present-fraction filter");
        }

        filtered = self.expression_filter(&filtered)?;
        filtered = self.variance_filter(&filtered)?;

        if filtered.rows() < FilterConfig::MINIMUM_ROWS_TO_BOTHER {
            return Err(PreprocessError::InsufficientProbes {
                found: filtered.rows(),
                required: FilterConfig::MINIMUM_ROWS_TO_BOTHER,
            });
        }
        info!("{} rows left after filtering", filtered.rows());
        Ok(filtered)
    }

    fn expression_filter(&self, data: &ExpressionDataMatrix) -> Result<ExpressionDataMatrix> {
        let low = self.config.low_expression_cut();
        let high = self.config.high_expression_cut();
        let use_low = self.config.is_low_expression_cut_set() && low > 0.0;
        let use_high = high > 0.0;
        if !use_low && !use_high {
            debug!("Skipping expression level filter");
            return Ok(data.clone());
        }

        let mut row_level = RowLevelFilter::new(RowLevelFilterMethod::Mean);
        if use_low {
            row_level.set_low_cut_as(low, true)?;
        }
        if use_high {
            row_level.set_high_cut_as(high, true)?;
        }
        let out = row_level.filter(data)?;
        info!("After expression level filter: {} rows", out.rows());
        Ok(out)
    }

    fn variance_filter(&self, data: &ExpressionDataMatrix) -> Result<ExpressionDataMatrix> {
        let cut = self.config.low_variance_cut();
        if !self.config.is_low_variance_cut_set() || cut <= 0.0 {
            debug!("Skipping variance filter");
            return Ok(data.clone());
        }
        let mut row_level = RowLevelFilter::new(RowLevelFilterMethod::Range);
        row_level.set_low_cut_as(cut, true)?;
        let out = row_level.filter(data)?;
        info!("After variance filter: {} rows", out.rows());
        Ok(out)
    }
}
