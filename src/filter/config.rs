// filter/config.rs

use std::fmt;

/// Settings for the filtering pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterConfig {
    min_present_fraction: f64,
    low_expression_cut: f64,
    high_expression_cut: f64,
    low_variance_cut: f64,
    min_present_fraction_is_set: bool,
    low_expression_cut_is_set: bool,
    low_variance_cut_is_set: bool,
    pub remove_affy_controls: bool,
}

impl FilterConfig {
    /// How many samples a dataset needs before it is worth analyzing.
    pub const MINIMUM_SAMPLE: usize = 5;

    /// Fewer rows than this, and we bail.
    pub const MINIMUM_ROWS_TO_BOTHER: usize = 100;

    pub const DEFAULT_HIGHEXPRESSION_CUT: f64 = 0.0;
    pub const DEFAULT_LOWEXPRESSIONCUT: f64 = 0.3;
    pub const DEFAULT_LOWVARIANCECUT: f64 = 0.05;
    pub const DEFAULT_TOOSMALLTOKEEP: f64 = 0.5;
    pub const DEFAULT_MINPRESENT_FRACTION: f64 = 0.3;

    pub fn min_present_fraction(&self) -> f64 {
        self.min_present_fraction
    }

    pub fn set_min_present_fraction(&mut self, value: f64) {
        self.min_present_fraction_is_set = true;
        self.min_present_fraction = value;
    }

    pub fn is_min_present_fraction_set(&self) -> bool {
        self.min_present_fraction_is_set
    }

    pub fn low_expression_cut(&self) -> f64 {
        self.low_expression_cut
    }

    pub fn set_low_expression_cut(&mut self, value: f64) {
        self.low_expression_cut_is_set = true;
        self.low_expression_cut = value;
    }

    pub fn is_low_expression_cut_set(&self) -> bool {
        self.low_expression_cut_is_set
    }

    pub fn high_expression_cut(&self) -> f64 {
        self.high_expression_cut
    }

    pub fn set_high_expression_cut(&mut self, value: f64) {
        self.high_expression_cut = value;
    }

    pub fn low_variance_cut(&self) -> f64 {
        self.low_variance_cut
    }

    pub fn set_low_variance_cut(&mut self, value: f64) {
        self.low_variance_cut_is_set = true;
        self.low_variance_cut = value;
    }

    pub fn is_low_variance_cut_set(&self) -> bool {
        self.low_variance_cut_is_set
    }

    /// Turn off the present-fraction, expression and variance steps.
    pub fn disable_row_filters(&mut self) {
        self.min_present_fraction_is_set = false;
        self.low_expression_cut_is_set = false;
        self.low_variance_cut_is_set = false;
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            min_present_fraction: Self::DEFAULT_MINPRESENT_FRACTION,
            low_expression_cut: Self::DEFAULT_LOWEXPRESSIONCUT,
            high_expression_cut: Self::DEFAULT_HIGHEXPRESSION_CUT,
            low_variance_cut: Self::DEFAULT_LOWVARIANCECUT,
            min_present_fraction_is_set: true,
            low_expression_cut_is_set: true,
            low_variance_cut_is_set: true,
            remove_affy_controls: true,
        }
    }
}

/// Header lines written at the top of filtered output files.
impl fmt::Display for FilterConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# highExpressionCut {}", self.high_expression_cut)?;
        writeln!(f, "# lowExpressionCut {}", self.low_expression_cut)?;
        writeln!(f, "# minPresentFraction {}", self.min_present_fraction)?;
        writeln!(f, "# lowVarianceCut {}", self.low_variance_cut)
    }
}
