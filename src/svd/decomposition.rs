// svd/decomposition.rs

use log::{debug, info, warn};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::model::{BioAssay, DesignElement};
use crate::stats;

/// Thin SVD of a row-centered expression matrix.
///
/// Only rows without missing values take part. Components are ordered by decreasing
/// singular value; `v_t` holds one eigengene per row, one column per sample.
#[derive(Debug, Clone)]
pub struct ExpressionDataSvd {
    design_elements: Vec<DesignElement>,
    bio_assays: Vec<BioAssay>,
    u: Array2<f64>,
    singular_values: Array1<f64>,
    v_t: Array2<f64>,
    variance_fractions: Vec<f64>,
}

impl ExpressionDataSvd {
    /// With `normalize`, rows are scaled to unit variance after centering.
    pub fn new(data: &ExpressionDataMatrix, normalize: bool) -> Result<Self> {
        let complete: Vec<usize> = (0..data.rows())
            .filter(|&i| data.row(i).iter().all(|v| !v.is_nan()))
            .collect();
        let dropped = data.rows() - complete.len();
        if dropped > 0 {
            warn!("{} rows with missing values were left out of the SVD", dropped);
        }
        if complete.len() < 2 || data.columns() < 2 {
            return Err(PreprocessError::InvalidArgument(format!(
                "SVD needs at least 2 complete rows and 2 columns, got {} x {}",
                complete.len(),
                data.columns()
            )));
        }

        let n_rows = complete.len();
        let n_cols = data.columns();
        let mut centered = DMatrix::<f64>::zeros(n_rows, n_cols);
        for (r, &i) in complete.iter().enumerate() {
            let row = data.row(i).to_vec();
            let mean = stats::mean(&row).unwrap_or(0.0);
            let scale = if normalize {
                stats::variance(&row).map(f64::sqrt).filter(|sd| *sd > 0.0).unwrap_or(1.0)
            } else {
                1.0
            };
            for (j, v) in row.iter().enumerate() {
                centered[(r, j)] = (v - mean) / scale;
            }
        }

        debug!("Decomposing {} x {} matrix", n_rows, n_cols);
        let svd = centered.svd(true, true);
        let u = svd
            .u
            .ok_or_else(|| PreprocessError::Numerical("SVD did not produce U".to_string()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| PreprocessError::Numerical("SVD did not produce V".to_string()))?;
        let s = svd.singular_values;

        let mut order: Vec<usize> = (0..s.len()).collect();
        order.sort_by(|&a, &b| s[b].total_cmp(&s[a]));

        let total: f64 = s.iter().map(|x| x * x).sum();
        if total <= 0.0 {
            return Err(PreprocessError::InvalidArgument(
                "Matrix has no variance after centering".to_string(),
            ));
        }

        let k = order.len();
        let u = Array2::from_shape_fn((n_rows, k), |(i, c)| u[(i, order[c])]);
        let v_t = Array2::from_shape_fn((k, n_cols), |(c, j)| v_t[(order[c], j)]);
        let singular_values: Array1<f64> = order.iter().map(|&c| s[c]).collect();
        let variance_fractions: Vec<f64> = singular_values.iter().map(|x| x * x / total).collect();

        info!(
            "SVD done: {} components, first explains {:.3} of the variance",
            k,
            variance_fractions.first().copied().unwrap_or(0.0)
        );

        Ok(Self {
            design_elements: complete
                .iter()
                .map(|&i| data.design_element_for_row(i).clone())
                .collect(),
            bio_assays: data.bio_assays().to_vec(),
            u,
            singular_values,
            v_t,
            variance_fractions,
        })
    }

    pub fn num_components(&self) -> usize {
        self.singular_values.len()
    }

    pub fn u(&self) -> &Array2<f64> {
        &self.u
    }

    pub fn singular_values(&self) -> &Array1<f64> {
        &self.singular_values
    }

    /// Components x samples.
    pub fn v_t(&self) -> &Array2<f64> {
        &self.v_t
    }

    pub fn eigengene(&self, component: usize) -> ArrayView1<'_, f64> {
        self.v_t.row(component)
    }

    pub fn variance_fractions(&self) -> &[f64] {
        &self.variance_fractions
    }

    /// Rows that took part in the decomposition, in `u` row order.
    pub fn design_elements(&self) -> &[DesignElement] {
        &self.design_elements
    }

    pub fn bio_assays(&self) -> &[BioAssay] {
        &self.bio_assays
    }
}
