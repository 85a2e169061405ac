// model.rs
//
// Domain entities shared by the matrix, filtering, missing-value and SVD code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::quantitation::QuantitationType;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BioSequence {
    pub name: String,
}

/// A row identity: one assayed feature (probe / probe set).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DesignElement {
    pub id: u64,
    pub name: String,
    pub biological_characteristic: Option<BioSequence>,
}

impl DesignElement {
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            biological_characteristic: None,
        }
    }

    pub fn with_sequence(mut self, sequence_name: impl Into<String>) -> Self {
        self.biological_characteristic = Some(BioSequence {
            name: sequence_name.into(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArrayDesign {
    pub id: u64,
    pub short_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentalFactor {
    pub id: u64,
    pub name: String,
}

/// Value of one experimental factor for a sample.
///
/// Continuous factors carry a `measurement`; categorical ones only a label, and their
/// `id` is what the factor analysis uses as a group key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorValue {
    pub id: u64,
    pub experimental_factor: ExperimentalFactor,
    pub value: Option<String>,
    pub measurement: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioMaterial {
    pub id: u64,
    pub name: String,
    pub factor_values: Vec<FactorValue>,
}

/// A column identity: one hybridization / sequencing run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioAssay {
    pub id: u64,
    pub name: String,
    pub array_design_used: ArrayDesign,
    pub processing_date: Option<DateTime<Utc>>,
    pub sample_used: BioMaterial,
}

/// The ordered set of bio assays a batch of data vectors was measured on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BioAssayDimension {
    pub id: u64,
    pub name: String,
    pub bio_assays: Vec<BioAssay>,
}

impl BioAssayDimension {
    pub fn array_designs(&self) -> BTreeSet<&ArrayDesign> {
        self.bio_assays
            .iter()
            .map(|ba| &ba.array_design_used)
            .collect()
    }
}

/// One vector of data for a design element, stored as raw bytes.
#[derive(Debug, Clone)]
pub struct DesignElementDataVector {
    pub experiment_id: u64,
    pub design_element: DesignElement,
    pub quantitation_type: Arc<QuantitationType>,
    pub bio_assay_dimension: Arc<BioAssayDimension>,
    pub data: Vec<u8>,
}

impl DesignElementDataVector {
    /// Decodes byte-encoded boolean data (one byte per value, non-zero is true).
    pub fn booleans(&self) -> Vec<bool> {
        bytes_to_booleans(&self.data)
    }
}

pub fn booleans_to_bytes(values: &[bool]) -> Vec<u8> {
    values.iter().map(|&b| u8::from(b)).collect()
}

pub fn bytes_to_booleans(bytes: &[u8]) -> Vec<bool> {
    bytes.iter().map(|&b| b != 0).collect()
}

#[derive(Debug, Clone, Default)]
pub struct ExpressionExperiment {
    pub id: u64,
    pub short_name: String,
    pub name: String,
    pub bio_assays: Vec<BioAssay>,
    pub quantitation_types: Vec<Arc<QuantitationType>>,
    pub raw_expression_data_vectors: Vec<DesignElementDataVector>,
}

impl ExpressionExperiment {
    pub fn new(id: u64, short_name: impl Into<String>) -> Self {
        let short_name = short_name.into();
        Self {
            id,
            name: short_name.clone(),
            short_name,
            ..Default::default()
        }
    }

    pub fn array_designs_used(&self) -> BTreeSet<&ArrayDesign> {
        self.bio_assays
            .iter()
            .map(|ba| &ba.array_design_used)
            .collect()
    }

    /// Experimental factors referenced by any sample, ordered by id.
    pub fn experimental_factors(&self) -> BTreeSet<&ExperimentalFactor> {
        self.bio_assays
            .iter()
            .flat_map(|ba| ba.sample_used.factor_values.iter())
            .map(|fv| &fv.experimental_factor)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boolean_byte_encoding() {
        let calls = vec![true, false, false, true];
        let bytes = booleans_to_bytes(&calls);
        assert_eq!(bytes, vec![1, 0, 0, 1]);
        assert_eq!(bytes_to_booleans(&bytes), calls);
    }

    #[test]
    fn test_experimental_factors_are_deduplicated() {
        let treatment = ExperimentalFactor { id: 7, name: "treatment".into() };
        let ad = ArrayDesign { id: 1, short_name: "GPL1".into() };
        let mut ee = ExpressionExperiment::new(3, "GSE3");
        for i in 0..3u64 {
            ee.bio_assays.push(BioAssay {
                id: i,
                name: format!("ba{}", i),
                array_design_used: ad.clone(),
                processing_date: None,
                sample_used: BioMaterial {
                    id: 100 + i,
                    name: format!("bm{}", i),
                    factor_values: vec![FactorValue {
                        id: 50 + i % 2,
                        experimental_factor: treatment.clone(),
                        value: Some("x".into()),
                        measurement: None,
                    }],
                },
            });
        }
        assert_eq!(ee.experimental_factors().len(), 1);
        assert_eq!(ee.array_designs_used().len(), 1);
    }
}
