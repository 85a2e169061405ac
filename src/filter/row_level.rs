// filter/row_level.rs

use log::{debug, info};
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

use super::{is_valid_fraction, Filter};
use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::stats;

/// Per-row summary used as the filtering criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RowLevelFilterMethod {
    Min,
    #[default]
    Max,
    Median,
    Mean,
    Range,
    Cv,
}

impl RowLevelFilterMethod {
    /// Criterion for one row. Missing values are skipped; a row with nothing left to
    /// summarize scores 0.0.
    pub fn criterion(&self, values: &[f64]) -> f64 {
        let value = match self {
            RowLevelFilterMethod::Min => stats::min(values),
            RowLevelFilterMethod::Max => stats::max(values),
            RowLevelFilterMethod::Median => stats::median(values),
            RowLevelFilterMethod::Mean => stats::mean(values),
            RowLevelFilterMethod::Range => stats::range(values),
            RowLevelFilterMethod::Cv => stats::cv(values),
        };
        value.unwrap_or(0.0)
    }
}

impl fmt::Display for RowLevelFilterMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RowLevelFilterMethod::Min => "MIN",
            RowLevelFilterMethod::Max => "MAX",
            RowLevelFilterMethod::Median => "MEDIAN",
            RowLevelFilterMethod::Mean => "MEAN",
            RowLevelFilterMethod::Range => "RANGE",
            RowLevelFilterMethod::Cv => "CV",
        };
        f.write_str(s)
    }
}

impl FromStr for RowLevelFilterMethod {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "min" => Ok(RowLevelFilterMethod::Min),
            "max" => Ok(RowLevelFilterMethod::Max),
            "median" => Ok(RowLevelFilterMethod::Median),
            "mean" => Ok(RowLevelFilterMethod::Mean),
            "range" => Ok(RowLevelFilterMethod::Range),
            "cv" => Ok(RowLevelFilterMethod::Cv),
            other => Err(PreprocessError::InvalidArgument(format!(
                "Unknown row filter method '{}'. Use min, max, median, mean, range or cv.",
                other
            ))),
        }
    }
}

/// Removes rows whose criterion falls outside `[low, high]`.
///
/// Cuts are absolute values unless flagged as fractions, in which case they are
/// resolved against the sorted criteria: a low fraction of 0.1 drops the lowest 10%
/// of rows, a high fraction of 0.1 drops the highest 10%.
#[derive(Debug, Clone)]
pub struct RowLevelFilter {
    low_cut: f64,
    high_cut: f64,
    use_low_as_fraction: bool,
    use_high_as_fraction: bool,
    remove_all_negative: bool,
    method: RowLevelFilterMethod,
}

impl Default for RowLevelFilter {
    fn default() -> Self {
        Self {
            low_cut: -f64::MAX,
            high_cut: f64::MAX,
            use_low_as_fraction: false,
            use_high_as_fraction: false,
            remove_all_negative: false,
            method: RowLevelFilterMethod::Max,
        }
    }
}

impl RowLevelFilter {
    pub fn new(method: RowLevelFilterMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn method(&self) -> RowLevelFilterMethod {
        self.method
    }

    pub fn set_method(&mut self, method: RowLevelFilterMethod) {
        self.method = method;
    }

    pub fn set_low_cut(&mut self, low_cut: f64) {
        self.low_cut = low_cut;
    }

    pub fn set_low_cut_as(&mut self, low_cut: f64, is_fraction: bool) -> Result<()> {
        self.set_low_cut(low_cut);
        self.set_use_low_cut_as_fraction(is_fraction)
    }

    pub fn set_high_cut(&mut self, high_cut: f64) {
        self.high_cut = high_cut;
    }

    pub fn set_high_cut_as(&mut self, high_cut: f64, is_fraction: bool) -> Result<()> {
        self.set_high_cut(high_cut);
        self.set_use_high_cut_as_fraction(is_fraction)
    }

    pub fn set_use_low_cut_as_fraction(&mut self, setting: bool) -> Result<()> {
        if setting && !is_valid_fraction(self.low_cut) {
            return Err(invalid_fraction("low", self.low_cut));
        }
        self.use_low_as_fraction = setting;
        Ok(())
    }

    pub fn set_use_high_cut_as_fraction(&mut self, setting: bool) -> Result<()> {
        if setting && !is_valid_fraction(self.high_cut) {
            return Err(invalid_fraction("high", self.high_cut));
        }
        self.use_high_as_fraction = setting;
        Ok(())
    }

    /// Interpret both cuts as fractions (or both as values).
    pub fn set_use_as_fraction(&mut self, setting: bool) -> Result<()> {
        self.set_use_high_cut_as_fraction(setting)?;
        self.set_use_low_cut_as_fraction(setting)
    }

    /// Exclude rows whose values are all negative (or missing) from the row count
    /// used to resolve fraction cuts. Rows are not removed by this setting alone.
    pub fn set_remove_all_negative(&mut self, setting: bool) {
        info!("Rows with all negative values will be removed PRIOR TO applying fraction-based criteria.");
        self.remove_all_negative = setting;
    }

    fn resolve_high_cut(&self, sorted: &[f64], considered_rows: usize) -> Result<f64> {
        if !self.use_high_as_fraction {
            return Ok(self.high_cut);
        }
        if !is_valid_fraction(self.high_cut) {
            return Err(PreprocessError::IllegalState(
                "High level cut must be a fraction between 0 and 1".to_string(),
            ));
        }
        let index = (considered_rows as f64 * (1.0 - self.high_cut)).ceil() as i64 - 1;
        let index = index.max(0) as usize;
        debug!("High cut fraction {} resolved at sorted index {}.", self.high_cut, index);
        Ok(sorted[index])
    }

    fn resolve_low_cut(&self, sorted: &[f64], considered_rows: usize, start_index: usize) -> Result<f64> {
        if !self.use_low_as_fraction {
            return Ok(self.low_cut);
        }
        if !is_valid_fraction(self.low_cut) {
            return Err(PreprocessError::IllegalState(
                "Low level cut must be a fraction between 0 and 1".to_string(),
            ));
        }
        let index = start_index + (considered_rows as f64 * self.low_cut).floor() as usize;
        let index = index.min(sorted.len() - 1);
        debug!("Low cut fraction {} resolved at sorted index {}.", self.low_cut, index);
        Ok(sorted[index])
    }
}

fn invalid_fraction(which: &str, value: f64) -> PreprocessError {
    PreprocessError::InvalidArgument(format!(
        "Value for {} cut ({}) is invalid for use as a fraction, must be >0.0 and <1.0",
        which, value
    ))
}

impl Filter for RowLevelFilter {
    fn filter(&self, data: &ExpressionDataMatrix) -> Result<ExpressionDataMatrix> {
        if self.low_cut == -f64::MAX && self.high_cut == f64::MAX {
            info!("No filtering requested");
            return Ok(data.clone());
        }

        let num_rows = data.rows();
        if num_rows == 0 {
            return Ok(data.clone());
        }
        let num_cols = data.columns();

        let per_row: Vec<(f64, bool)> = (0..num_rows)
            .into_par_iter()
            .map(|i| {
                let values = data.row(i).to_vec();
                let num_neg = values.iter().filter(|v| v.is_nan() || **v < 0.0).count();
                (self.method.criterion(&values), num_neg == num_cols)
            })
            .collect();

        let criteria: Vec<f64> = per_row.iter().map(|&(c, _)| c).collect();
        let num_all_neg = per_row.iter().filter(|&&(_, neg)| neg).count();

        let mut sorted = criteria.clone();
        sorted.sort_by(f64::total_cmp);

        let (considered_rows, start_index) = if self.remove_all_negative {
            (num_rows - num_all_neg, num_all_neg)
        } else {
            (num_rows, 0)
        };

        let real_high_cut = self.resolve_high_cut(&sorted, considered_rows)?;
        let real_low_cut = self.resolve_low_cut(&sorted, considered_rows, start_index)?;
        debug!(
            "Filtering on {} between {} and {} ({} rows all negative).",
            self.method, real_low_cut, real_high_cut, num_all_neg
        );

        let kept: Vec<usize> = criteria
            .iter()
            .enumerate()
            .filter(|&(_, &c)| c >= real_low_cut && c <= real_high_cut)
            .map(|(i, _)| i)
            .collect();

        info!("There are {} rows left after filtering.", kept.len());
        data.select_rows(&kept)
    }
}
