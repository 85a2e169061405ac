// filter/affy_probe_name.rs

use log::info;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::Filter;
use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::model::DesignElement;

/// Affymetrix probe-set families that can be removed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffyProbePattern {
    /// Sense-strand probes (`_st`).
    St,
    /// Control probes (`AFFX`).
    Affx,
    /// Gene-family probes (`_f_at`).
    F,
    /// Cross-hybridizing probes (`_x_at`).
    X,
    /// Probes shared by several transcripts of a gene (`_g_at`).
    G,
}

impl AffyProbePattern {
    pub fn token(&self) -> &'static str {
        match self {
            AffyProbePattern::St => "_st",
            AffyProbePattern::Affx => "AFFX",
            AffyProbePattern::F => "_f_at",
            AffyProbePattern::X => "_x_at",
            AffyProbePattern::G => "_g_at",
        }
    }
}

impl fmt::Display for AffyProbePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AffyProbePattern::St => "ST",
            AffyProbePattern::Affx => "AFFX",
            AffyProbePattern::F => "F",
            AffyProbePattern::X => "X",
            AffyProbePattern::G => "G",
        };
        f.write_str(s)
    }
}

impl FromStr for AffyProbePattern {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ST" => Ok(AffyProbePattern::St),
            "AFFX" => Ok(AffyProbePattern::Affx),
            "F" => Ok(AffyProbePattern::F),
            "X" => Ok(AffyProbePattern::X),
            "G" => Ok(AffyProbePattern::G),
            other => Err(PreprocessError::InvalidArgument(format!(
                "Unknown probe pattern '{}'. Use ST, AFFX, F, X or G.",
                other
            ))),
        }
    }
}

/// Drops rows whose probe name matches any of the enabled patterns.
///
/// Each requested pattern enables exactly its own rule.
#[derive(Debug, Clone, Default)]
pub struct AffyProbeNameFilter {
    skip_st: bool,
    skip_affx: bool,
    skip_f: bool,
    skip_x: bool,
    skip_g: bool,
}

impl AffyProbeNameFilter {
    pub fn new(criteria: &[AffyProbePattern]) -> Self {
        let requested: HashSet<AffyProbePattern> = criteria.iter().copied().collect();
        Self {
            skip_st: requested.contains(&AffyProbePattern::St),
            skip_affx: requested.contains(&AffyProbePattern::Affx),
            skip_f: requested.contains(&AffyProbePattern::F),
            skip_x: requested.contains(&AffyProbePattern::X),
            skip_g: requested.contains(&AffyProbePattern::G),
        }
    }

    pub fn enabled(&self) -> Vec<AffyProbePattern> {
        [
            (self.skip_st, AffyProbePattern::St),
            (self.skip_affx, AffyProbePattern::Affx),
            (self.skip_f, AffyProbePattern::F),
            (self.skip_x, AffyProbePattern::X),
            (self.skip_g, AffyProbePattern::G),
        ]
        .into_iter()
        .filter_map(|(on, p)| on.then_some(p))
        .collect()
    }

    /// Name the rules are applied to: the sequence name when there is one.
    fn resolve_name(design_element: &DesignElement) -> &str {
        match &design_element.biological_characteristic {
            Some(sequence) => &sequence.name,
            None => &design_element.name,
        }
    }

    pub fn is_excluded(&self, design_element: &DesignElement) -> bool {
        let name = Self::resolve_name(design_element);
        (self.skip_st && name.contains(AffyProbePattern::St.token()))
            || (self.skip_affx && name.contains(AffyProbePattern::Affx.token()))
            || (self.skip_f && name.contains(AffyProbePattern::F.token()))
            || (self.skip_x && name.contains(AffyProbePattern::X.token()))
            || (self.skip_g && name.contains(AffyProbePattern::G.token()))
    }
}

impl Filter for AffyProbeNameFilter {
    fn filter(&self, data: &ExpressionDataMatrix) -> Result<ExpressionDataMatrix> {
        let kept: Vec<usize> = data
            .design_elements()
            .iter()
            .enumerate()
            .filter(|(_, de)| !self.is_excluded(de))
            .map(|(i, _)| i)
            .collect();

        info!("There are {} rows left after filtering.", kept.len());
        data.select_rows(&kept)
    }
}
