// svd/value_object.rs

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PreprocessError, Result};
use crate::model::ExperimentalFactor;

/// Stored summary of an experiment's SVD and its factor analysis.
///
/// Columns of `v_matrix` line up with `bio_material_ids`. Correlations and p-values
/// are keyed by component, then by experimental factor id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvdValueObject {
    id: u64,
    bio_material_ids: Vec<u64>,
    variance_fractions: Vec<f64>,
    v_matrix: Array2<f64>,
    date_correlations: BTreeMap<usize, f64>,
    factor_correlations: BTreeMap<usize, BTreeMap<u64, f64>>,
    factor_pvalues: BTreeMap<usize, BTreeMap<u64, f64>>,
    factor_names: BTreeMap<u64, String>,
}

impl SvdValueObject {
    pub fn new(
        id: u64,
        bio_material_ids: Vec<u64>,
        variance_fractions: Vec<f64>,
        v_matrix: Array2<f64>,
    ) -> Result<Self> {
        if bio_material_ids.len() != v_matrix.ncols() {
            return Err(PreprocessError::InvalidArgument(format!(
                "Bio material ordering has {} entries but the V matrix has {} columns",
                bio_material_ids.len(),
                v_matrix.ncols()
            )));
        }
        if variance_fractions.len() != v_matrix.nrows() {
            return Err(PreprocessError::InvalidArgument(format!(
                "{} variance fractions for {} components",
                variance_fractions.len(),
                v_matrix.nrows()
            )));
        }
        Ok(Self {
            id,
            bio_material_ids,
            variance_fractions,
            v_matrix,
            date_correlations: BTreeMap::new(),
            factor_correlations: BTreeMap::new(),
            factor_pvalues: BTreeMap::new(),
            factor_names: BTreeMap::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn bio_material_ids(&self) -> &[u64] {
        &self.bio_material_ids
    }

    pub fn variance_fractions(&self) -> &[f64] {
        &self.variance_fractions
    }

    /// Components x bio materials.
    pub fn v_matrix(&self) -> &Array2<f64> {
        &self.v_matrix
    }

    pub fn date_correlations(&self) -> &BTreeMap<usize, f64> {
        &self.date_correlations
    }

    pub fn factor_correlations(&self) -> &BTreeMap<usize, BTreeMap<u64, f64>> {
        &self.factor_correlations
    }

    pub fn factor_pvalues(&self) -> &BTreeMap<usize, BTreeMap<u64, f64>> {
        &self.factor_pvalues
    }

    pub fn factor_names(&self) -> &BTreeMap<u64, String> {
        &self.factor_names
    }

    pub fn set_pc_date_correlation(&mut self, component: usize, correlation: f64) {
        self.date_correlations.insert(component, correlation);
    }

    pub fn set_pc_factor_correlation(&mut self, component: usize, factor: &ExperimentalFactor, correlation: f64) {
        self.factor_names.insert(factor.id, factor.name.clone());
        self.factor_correlations
            .entry(component)
            .or_default()
            .insert(factor.id, correlation);
    }

    pub fn set_pc_factor_pvalue(&mut self, component: usize, factor: &ExperimentalFactor, pvalue: f64) {
        self.factor_names.insert(factor.id, factor.name.clone());
        self.factor_pvalues
            .entry(component)
            .or_default()
            .insert(factor.id, pvalue);
    }
}
