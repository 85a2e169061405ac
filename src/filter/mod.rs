// filter/mod.rs
//
// Row filters over expression matrices and the configurable pipeline that chains them.

pub mod affy_probe_name;
pub mod config;
pub mod pipeline;
pub mod row_level;
pub mod row_missing;

pub use affy_probe_name::{AffyProbeNameFilter, AffyProbePattern};
pub use config::FilterConfig;
pub use pipeline::ExpressionExperimentFilter;
pub use row_level::{RowLevelFilter, RowLevelFilterMethod};
pub use row_missing::RowMissingFilter;

use crate::error::Result;
use crate::matrix::ExpressionDataMatrix;

/// A transformation that removes rows from a matrix.
///
/// Implementations never modify their input; the returned matrix keeps the row and
/// column identities of the rows that survive.
pub trait Filter {
    fn filter(&self, data: &ExpressionDataMatrix) -> Result<ExpressionDataMatrix>;
}

/// Returns true when `value` can be used as a fraction: strictly between 0 and 1.
pub fn is_valid_fraction(value: f64) -> bool {
    value > 0.0 && value < 1.0
}
