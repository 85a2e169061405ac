// matrix.rs

use log::debug;
use ndarray::{Array2, ArrayView1, Axis};
use std::collections::HashMap;

use crate::error::{PreprocessError, Result};
use crate::model::{BioAssay, BioMaterial, DesignElement};

/// Expression values keyed by design element (rows) and bio assay (columns).
///
/// Missing values are NaN. Subsetting never renumbers identities: every row keeps
/// its `DesignElement` and every column its `BioAssay`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionDataMatrix {
    design_elements: Vec<DesignElement>,
    bio_assays: Vec<BioAssay>,
    data: Array2<f64>,
    row_index: HashMap<u64, usize>,
}

impl ExpressionDataMatrix {
    pub fn new(
        design_elements: Vec<DesignElement>,
        bio_assays: Vec<BioAssay>,
        data: Array2<f64>,
    ) -> Result<Self> {
        let (n_rows, n_cols) = data.dim();
        if design_elements.len() != n_rows {
            return Err(PreprocessError::DimensionMismatch {
                expected: format!("{} design elements", n_rows),
                got: format!("{} design elements", design_elements.len()),
            });
        }
        if bio_assays.len() != n_cols {
            return Err(PreprocessError::DimensionMismatch {
                expected: format!("{} bio assays", n_cols),
                got: format!("{} bio assays", bio_assays.len()),
            });
        }

        let mut row_index = HashMap::with_capacity(n_rows);
        for (i, de) in design_elements.iter().enumerate() {
            if row_index.insert(de.id, i).is_some() {
                return Err(PreprocessError::InvalidArgument(format!(
                    "Design element {} (id={}) appears more than once",
                    de.name, de.id
                )));
            }
        }

        Ok(Self {
            design_elements,
            bio_assays,
            data,
            row_index,
        })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn columns(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &Array2<f64> {
        &self.data
    }

    pub fn get(&self, row: usize, column: usize) -> f64 {
        self.data[[row, column]]
    }

    pub fn row(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.row(index)
    }

    /// Row for a design element, or `None` when the element is not in this matrix.
    pub fn row_for(&self, design_element: &DesignElement) -> Option<ArrayView1<'_, f64>> {
        self.row_index
            .get(&design_element.id)
            .map(|&i| self.data.row(i))
    }

    pub fn column(&self, index: usize) -> ArrayView1<'_, f64> {
        self.data.column(index)
    }

    pub fn design_elements(&self) -> &[DesignElement] {
        &self.design_elements
    }

    pub fn design_element_for_row(&self, index: usize) -> &DesignElement {
        &self.design_elements[index]
    }

    pub fn bio_assays(&self) -> &[BioAssay] {
        &self.bio_assays
    }

    pub fn bio_assay_for_column(&self, index: usize) -> &BioAssay {
        &self.bio_assays[index]
    }

    pub fn bio_material_for_column(&self, index: usize) -> &BioMaterial {
        &self.bio_assays[index].sample_used
    }

    /// Column holding the given bio material, if any.
    pub fn column_for_bio_material(&self, bio_material_id: u64) -> Option<usize> {
        self.bio_assays
            .iter()
            .position(|ba| ba.sample_used.id == bio_material_id)
    }

    pub fn column_for_bio_assay(&self, bio_assay_id: u64) -> Option<usize> {
        self.bio_assays.iter().position(|ba| ba.id == bio_assay_id)
    }

    pub fn has_missing_values(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }

    /// New matrix containing the listed rows, in the listed order.
    pub fn select_rows(&self, kept: &[usize]) -> Result<Self> {
        if let Some(&bad) = kept.iter().find(|&&i| i >= self.rows()) {
            return Err(PreprocessError::InvalidArgument(format!(
                "Row index {} out of range for matrix with {} rows",
                bad,
                self.rows()
            )));
        }
        let data = self.data.select(Axis(0), kept);
        let design_elements = kept
            .iter()
            .map(|&i| self.design_elements[i].clone())
            .collect();
        debug!("Selected {} of {} rows.", kept.len(), self.rows());
        Self::new(design_elements, self.bio_assays.clone(), data)
    }

    /// New matrix containing the rows for the given design elements; elements not
    /// present here are ignored.
    pub fn select_design_elements(&self, elements: &[DesignElement]) -> Result<Self> {
        let kept: Vec<usize> = elements
            .iter()
            .filter_map(|de| self.row_index.get(&de.id).copied())
            .collect();
        self.select_rows(&kept)
    }

    /// New matrix restricted to the given bio assays (matched by id), in that order.
    pub fn select_bio_assays(&self, bio_assays: &[BioAssay]) -> Result<Self> {
        let mut cols = Vec::with_capacity(bio_assays.len());
        for ba in bio_assays {
            let col = self
                .bio_assays
                .iter()
                .position(|b| b.id == ba.id)
                .ok_or_else(|| {
                    PreprocessError::InvalidArgument(format!(
                        "Bio assay {} (id={}) is not a column of this matrix",
                        ba.name, ba.id
                    ))
                })?;
            cols.push(col);
        }
        let data = self.data.select(Axis(1), &cols);
        let assays = cols.iter().map(|&c| self.bio_assays[c].clone()).collect();
        Self::new(self.design_elements.clone(), assays, data)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::model::{ArrayDesign, BioMaterial};

    pub(crate) fn bio_assays(n: usize) -> Vec<BioAssay> {
        let ad = ArrayDesign { id: 1, short_name: "GPL1".to_string() };
        (0..n)
            .map(|i| BioAssay {
                id: i as u64 + 1,
                name: format!("ba{}", i),
                array_design_used: ad.clone(),
                processing_date: None,
                sample_used: BioMaterial {
                    id: 1000 + i as u64,
                    name: format!("bm{}", i),
                    factor_values: Vec::new(),
                },
            })
            .collect()
    }

    pub(crate) fn matrix_from_rows(names: &[&str], rows: &[&[f64]]) -> ExpressionDataMatrix {
        let n_cols = rows.first().map_or(0, |r| r.len());
        let flat: Vec<f64> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        let data = Array2::from_shape_vec((rows.len(), n_cols), flat).unwrap();
        let elements = names
            .iter()
            .enumerate()
            .map(|(i, n)| DesignElement::new(i as u64 + 1, *n))
            .collect();
        ExpressionDataMatrix::new(elements, bio_assays(n_cols), data).unwrap()
    }
}
