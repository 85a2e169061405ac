// filter/row_missing.rs

use log::{info, warn};
use rayon::prelude::*;

use super::Filter;
use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;

/// Keeps rows with enough present values.
///
/// Without detection calls a value is present when it is not missing. With a call
/// matrix (1.0 present, 0.0 absent, NaN unknown) a value is present when its call is
/// 1.0; calls are matched to the data by design element and bio assay.
#[derive(Debug, Clone)]
pub struct RowMissingFilter {
    min_present_fraction: f64,
    detection_calls: Option<ExpressionDataMatrix>,
}

impl RowMissingFilter {
    pub fn new(min_present_fraction: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&min_present_fraction) {
            return Err(PreprocessError::InvalidArgument(format!(
                "Minimum present fraction must be between 0 and 1, got {}",
                min_present_fraction
            )));
        }
        Ok(Self {
            min_present_fraction,
            detection_calls: None,
        })
    }

    pub fn with_detection_calls(mut self, calls: ExpressionDataMatrix) -> Self {
        self.detection_calls = Some(calls);
        self
    }

    pub fn min_present_fraction(&self) -> f64 {
        self.min_present_fraction
    }

    /// Number of present values in one row of `data`.
    fn present_count(&self, data: &ExpressionDataMatrix, row: usize) -> usize {
        match &self.detection_calls {
            None => data.row(row).iter().filter(|v| !v.is_nan()).count(),
            Some(calls) => {
                let Some(call_row) = calls.row_for(data.design_element_for_row(row)) else {
                    return 0;
                };
                data.bio_assays()
                    .iter()
                    .filter(|ba| {
                        calls
                            .column_for_bio_assay(ba.id)
                            .is_some_and(|c| call_row[c] == 1.0)
                    })
                    .count()
            }
        }
    }
}

impl Filter for RowMissingFilter {
    fn filter(&self, data: &ExpressionDataMatrix) -> Result<ExpressionDataMatrix> {
        if data.columns() == 0 {
            return Ok(data.clone());
        }
        if let Some(calls) = &self.detection_calls {
            let unmatched = data
                .bio_assays()
                .iter()
                .filter(|ba| calls.column_for_bio_assay(ba.id).is_none())
                .count();
            if unmatched > 0 {
                warn!(
                    "{} bio assays have no detection calls; their values count as absent.",
                    unmatched
                );
            }
        }

        let required = (self.min_present_fraction * data.columns() as f64).ceil() as usize;
        let kept: Vec<usize> = (0..data.rows())
            .into_par_iter()
            .filter(|&i| self.present_count(data, i) >= required)
            .collect();

        info!(
            "There are {} rows left after removing rows with fewer than {} present values.",
            kept.len(),
            required
        );
        data.select_rows(&kept)
    }
}
