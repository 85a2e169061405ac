// missing_values.rs
//
// Present/absent calls for two-colour arrays, from the signal-to-background ratio of
// each channel.

use log::{info, warn};
use ndarray::{Array2, ArrayView1};
use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditEventType, AuditTrailService};
use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::model::{
    booleans_to_bytes, ArrayDesign, BioAssayDimension, DesignElementDataVector, ExpressionExperiment,
};
use crate::quantitation::QuantitationType;
use crate::source::ExpressionDataMatrixBuilder;

pub const DEFAULT_SIGNAL_TO_NOISE_THRESHOLD: f64 = 2.0;

const PROGRESS_INTERVAL: usize = 4000;

/// True when either channel's signal exceeds its background times `threshold`.
///
/// A spot with no signal on either channel is absent.
pub fn compute_call(threshold: f64, sig_a: f64, sig_b: f64, bkg_a: f64, bkg_b: f64) -> bool {
    if sig_a.is_nan() && sig_b.is_nan() {
        return false;
    }
    sig_a > bkg_a * threshold || sig_b > bkg_b * threshold
}

/// The matrices one detection-call computation reads. Columns are matched by position.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelMatrices<'a> {
    pub preferred: Option<&'a ExpressionDataMatrix>,
    pub signal_a: Option<&'a ExpressionDataMatrix>,
    pub signal_b: Option<&'a ExpressionDataMatrix>,
    pub background_a: Option<&'a ExpressionDataMatrix>,
    pub background_b: Option<&'a ExpressionDataMatrix>,
}

#[derive(Debug, Clone)]
pub struct TwoChannelMissingValues {
    signal_to_noise_threshold: f64,
    extra_missing_value_indicators: Vec<f64>,
}

impl Default for TwoChannelMissingValues {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNAL_TO_NOISE_THRESHOLD)
    }
}

impl TwoChannelMissingValues {
    /// `signal_to_noise_threshold` is something like 1.5 or 2.0.
    pub fn new(signal_to_noise_threshold: f64) -> Self {
        Self {
            signal_to_noise_threshold,
            extra_missing_value_indicators: Vec::new(),
        }
    }

    /// Preferred values equal to one of these are treated as missing.
    pub fn with_extra_missing_value_indicators(mut self, indicators: &[f64]) -> Self {
        self.extra_missing_value_indicators = indicators.to_vec();
        self
    }

    pub fn signal_to_noise_threshold(&self) -> f64 {
        self.signal_to_noise_threshold
    }

    fn is_missing(&self, value: f64) -> bool {
        value.is_nan() || self.extra_missing_value_indicators.contains(&value)
    }

    /// Calls for every bio-assay dimension of the experiment, restricted to
    /// `array_design` when one is given.
    ///
    /// Each dimension gets its own slice of the channel matrices. A dimension whose
    /// bio assays span several array designs cannot be handled.
    pub fn compute_missing_values(
        &self,
        experiment: &mut ExpressionExperiment,
        builder: &dyn ExpressionDataMatrixBuilder,
        array_design: Option<&ArrayDesign>,
    ) -> Result<Vec<DesignElementDataVector>> {
        let dimensions = builder.bio_assay_dimensions(array_design);
        if dimensions.is_empty() {
            warn!(
                "No bio assay dimensions found for experiment {}; nothing to do.",
                experiment.short_name
            );
        }

        let mut results = Vec::new();
        for dimension in dimensions {
            let designs = dimension.array_designs();
            if designs.len() > 1 {
                return Err(PreprocessError::InvalidArgument(format!(
                    "Can't handle vectors with multiple array designs represented (dimension {})",
                    dimension.name
                )));
            }
            let Some(ad) = designs.into_iter().next().cloned() else {
                warn!("Dimension {} has no bio assays, skipping.", dimension.name);
                continue;
            };

            let preferred = slice_for_dimension(builder.preferred_data(&ad), &dimension)?;
            let signal_a = slice_for_dimension(builder.signal_channel_a(&ad), &dimension)?;
            let signal_b = slice_for_dimension(builder.signal_channel_b(&ad), &dimension)?;
            let background_a = slice_for_dimension(builder.background_channel_a(&ad), &dimension)?;
            let background_b = slice_for_dimension(builder.background_channel_b(&ad), &dimension)?;

            let channels = ChannelMatrices {
                preferred: preferred.as_ref(),
                signal_a: signal_a.as_ref(),
                signal_b: signal_b.as_ref(),
                background_a: background_a.as_ref(),
                background_b: background_b.as_ref(),
            };
            results.extend(self.compute_missing_values_for_dimension(experiment, &dimension, channels)?);
        }
        Ok(results)
    }

    /// One detection-call vector per design element of signal channel A.
    ///
    /// The new quantitation type is added to the experiment.
    pub fn compute_missing_values_for_dimension(
        &self,
        experiment: &mut ExpressionExperiment,
        dimension: &Arc<BioAssayDimension>,
        channels: ChannelMatrices<'_>,
    ) -> Result<Vec<DesignElementDataVector>> {
        let (preferred, signal_a, signal_b) = self.validate(&channels)?;

        let present = Arc::new(QuantitationType::detection_call(self.signal_to_noise_threshold));
        experiment.quantitation_types.push(Arc::clone(&present));

        let num_cols = preferred.columns();
        let mut results = Vec::with_capacity(signal_a.rows());

        for (i, design_element) in signal_a.design_elements().iter().enumerate() {
            let pref_row = preferred.row_for(design_element);
            let sig_a_row = signal_a.row(i);
            let sig_b_row = signal_b.row_for(design_element);
            let bkg_a_row = channels.background_a.and_then(|m| m.row_for(design_element));
            let bkg_b_row = channels.background_b.and_then(|m| m.row_for(design_element));

            let calls: Vec<bool> = (0..num_cols)
                .map(|col| {
                    // a missing preferred value stays missing
                    let pref = pref_row.as_ref().map_or(f64::NAN, |r| r[col]);
                    if self.is_missing(pref) {
                        return false;
                    }
                    let bkg_a = value_or_zero(bkg_a_row.as_ref(), col);
                    let bkg_b = value_or_zero(bkg_b_row.as_ref(), col);
                    // an absent signal row reads as zero, a NaN signal stays NaN
                    let sig_a = sig_a_row[col];
                    let sig_b = sig_b_row.as_ref().map_or(0.0, |r| r[col]);
                    compute_call(self.signal_to_noise_threshold, sig_a, sig_b, bkg_a, bkg_b)
                })
                .collect();

            results.push(DesignElementDataVector {
                experiment_id: experiment.id,
                design_element: design_element.clone(),
                quantitation_type: Arc::clone(&present),
                bio_assay_dimension: Arc::clone(dimension),
                data: booleans_to_bytes(&calls),
            });

            if results.len() % PROGRESS_INTERVAL == 0 {
                info!(
                    "{} vectors examined for missing values, {} vectors generated so far.",
                    i + 1,
                    results.len()
                );
            }
        }

        info!("Finished: {} vectors examined for missing values", results.len());
        Ok(results)
    }

    fn validate<'a>(
        &self,
        channels: &ChannelMatrices<'a>,
    ) -> Result<(&'a ExpressionDataMatrix, &'a ExpressionDataMatrix, &'a ExpressionDataMatrix)> {
        let (Some(preferred), Some(signal_a), Some(signal_b)) =
            (channels.preferred, channels.signal_a, channels.signal_b)
        else {
            return Err(PreprocessError::InvalidArgument(
                "Must have preferred and both signal channel matrices".to_string(),
            ));
        };

        let empty_background = [channels.background_a, channels.background_b]
            .iter()
            .flatten()
            .any(|m| m.rows() == 0);
        if empty_background {
            return Err(PreprocessError::InvalidArgument(
                "Background values must not be empty when supplied".to_string(),
            ));
        }

        if signal_a.rows() != signal_b.rows() {
            warn!(
                "Row counts probably should match in channel A and B: {} != {}",
                signal_a.rows(),
                signal_b.rows()
            );
        }
        if signal_a.rows() != preferred.rows() {
            warn!(
                "Row counts probably should match in channel A and preferred data: {} != {}",
                signal_a.rows(),
                preferred.rows()
            );
        }
        if let (Some(a), Some(b)) = (channels.background_a, channels.background_b) {
            if a.rows() != b.rows() {
                warn!("Row counts probably should match for background: {} != {}", a.rows(), b.rows());
            }
        }

        if self.signal_to_noise_threshold <= 0.0 {
            return Err(PreprocessError::InvalidArgument(format!(
                "Signal-to-noise threshold must be greater than zero, got {}",
                self.signal_to_noise_threshold
            )));
        }

        let mut column_counts = vec![preferred.columns(), signal_a.columns(), signal_b.columns()];
        column_counts.extend(channels.background_a.map(|m| m.columns()));
        column_counts.extend(channels.background_b.map(|m| m.columns()));
        if column_counts.iter().any(|&c| c != preferred.columns()) {
            return Err(PreprocessError::InvalidArgument(format!(
                "Number of samples doesn't match: {:?}",
                column_counts
            )));
        }

        Ok((preferred, signal_a, signal_b))
    }
}

fn value_or_zero(row: Option<&ArrayView1<'_, f64>>, col: usize) -> f64 {
    match row {
        Some(r) if !r[col].is_nan() => r[col],
        _ => 0.0,
    }
}

/// Restricts a channel matrix to the columns of one dimension, in dimension order.
fn slice_for_dimension(
    data: Option<&ExpressionDataMatrix>,
    dimension: &BioAssayDimension,
) -> Result<Option<ExpressionDataMatrix>> {
    let Some(data) = data else {
        return Ok(None);
    };
    let same_columns = data.bio_assays().len() == dimension.bio_assays.len()
        && data
            .bio_assays()
            .iter()
            .zip(&dimension.bio_assays)
            .all(|(a, b)| a.id == b.id);
    if same_columns {
        Ok(Some(data.clone()))
    } else {
        data.select_bio_assays(&dimension.bio_assays).map(Some)
    }
}

/// Lays detection-call vectors out as a matrix: 1.0 present, 0.0 absent, NaN where a
/// design element has no call for a bio assay.
pub fn detection_call_matrix(vectors: &[DesignElementDataVector]) -> Result<ExpressionDataMatrix> {
    let mut design_elements = Vec::new();
    let mut row_of: HashMap<u64, usize> = HashMap::new();
    let mut bio_assays = Vec::new();
    let mut col_of: HashMap<u64, usize> = HashMap::new();

    for vector in vectors {
        if vector.data.len() != vector.bio_assay_dimension.bio_assays.len() {
            return Err(PreprocessError::DimensionMismatch {
                expected: format!("{} calls", vector.bio_assay_dimension.bio_assays.len()),
                got: format!("{} calls for {}", vector.data.len(), vector.design_element.name),
            });
        }
        row_of.entry(vector.design_element.id).or_insert_with(|| {
            design_elements.push(vector.design_element.clone());
            design_elements.len() - 1
        });
        for ba in &vector.bio_assay_dimension.bio_assays {
            col_of.entry(ba.id).or_insert_with(|| {
                bio_assays.push(ba.clone());
                bio_assays.len() - 1
            });
        }
    }

    let mut data = Array2::from_elem((design_elements.len(), bio_assays.len()), f64::NAN);
    for vector in vectors {
        let row = row_of[&vector.design_element.id];
        for (ba, present) in vector.bio_assay_dimension.bio_assays.iter().zip(vector.booleans()) {
            data[[row, col_of[&ba.id]]] = if present { 1.0 } else { 0.0 };
        }
    }
    ExpressionDataMatrix::new(design_elements, bio_assays, data)
}

/// Stores freshly computed detection calls with their experiment.
#[derive(Clone, Copy)]
pub struct MissingValueHelper<'a> {
    audit_trail: &'a dyn AuditTrailService,
}

impl<'a> MissingValueHelper<'a> {
    pub fn new(audit_trail: &'a dyn AuditTrailService) -> Self {
        Self { audit_trail }
    }

    pub fn persist(
        &self,
        experiment: &mut ExpressionExperiment,
        vectors: Vec<DesignElementDataVector>,
    ) -> Result<usize> {
        let count = vectors.len();
        info!("Persisting {} vectors ... ", count);
        experiment.raw_expression_data_vectors.extend(vectors);
        self.audit_trail.add_update_event(
            experiment.id,
            AuditEventType::MissingValueAnalysis,
            "Computed missing value data",
        )?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditTrail;
    use crate::matrix::test_support::{bio_assays, matrix_from_rows};
    use crate::model::{ArrayDesign, BioAssay, DesignElement};
    use crate::quantitation::{GeneralType, PrimitiveType, StandardQuantitationType};
    use crate::source::{Channel, InMemoryDataSource};

    const NA: f64 = f64::NAN;

    fn dimension(assays: Vec<BioAssay>) -> Arc<BioAssayDimension> {
        Arc::new(BioAssayDimension {
            id: 1,
            name: "dim".into(),
            bio_assays: assays,
        })
    }

    #[test]
    fn test_compute_call() {
        assert!(compute_call(2.0, 10.0, 1.0, 1.0, 1.0));
        assert!(!compute_call(1.0, 1.0, 1.0, 1.0, 1.0));
        assert!(!compute_call(2.0, NA, NA, 1.0, 1.0));
        // one missing channel leaves the decision to the other
        assert!(compute_call(2.0, NA, 5.0, 1.0, 1.0));
    }

    #[test]
    fn test_calls_for_dimension() {
        let preferred = matrix_from_rows(&["p1", "p2"], &[&[1.0, NA, 1.0], &[1.0, 1.0, -99.0]]);
        let signal_a = matrix_from_rows(&["p1", "p2"], &[&[10.0, 10.0, 1.0], &[1.0, 1.0, 10.0]]);
        let signal_b = matrix_from_rows(&["p1", "p2"], &[&[1.0, 1.0, 1.0], &[NA, 8.0, 1.0]]);
        // background only for p1; p2 reads as zero background
        let background_a = matrix_from_rows(&["p1"], &[&[2.0, 2.0, 2.0]]);

        let mut ee = ExpressionExperiment::new(1, "GSE1");
        let tcmv = TwoChannelMissingValues::new(2.0).with_extra_missing_value_indicators(&[-99.0]);
        let vectors = tcmv
            .compute_missing_values_for_dimension(
                &mut ee,
                &dimension(bio_assays(3)),
                ChannelMatrices {
                    preferred: Some(&preferred),
                    signal_a: Some(&signal_a),
                    signal_b: Some(&signal_b),
                    background_a: Some(&background_a),
                    background_b: None,
                },
            )
            .unwrap();

        assert_eq!(vectors.len(), 2);
        // p1, last column: channel B has no background, so any signal is present
        assert_eq!(vectors[0].booleans(), vec![true, false, true]);
        assert_eq!(vectors[1].booleans(), vec![true, true, false]);
        assert_eq!(vectors[0].data, vec![1, 0, 1]);

        assert_eq!(ee.quantitation_types.len(), 1);
        let qt = &vectors[0].quantitation_type;
        assert_eq!(qt.name, "Detection call");
        assert!(qt.description.contains("threshold of 2"));
        assert_eq!(qt.general_type, GeneralType::Categorical);
        assert_eq!(qt.representation, PrimitiveType::Boolean);
        assert_eq!(qt.kind, StandardQuantitationType::PresentAbsent);
    }

    #[test]
    fn test_validation_failures() {
        let m = matrix_from_rows(&["p1"], &[&[1.0, 2.0, 3.0]]);
        let narrow = matrix_from_rows(&["p1"], &[&[1.0, 2.0]]);
        let empty = ExpressionDataMatrix::new(vec![], bio_assays(3), Array2::zeros((0, 3))).unwrap();
        let dim = dimension(bio_assays(3));
        let mut ee = ExpressionExperiment::new(1, "GSE1");

        let full = ChannelMatrices {
            preferred: Some(&m),
            signal_a: Some(&m),
            signal_b: Some(&m),
            ..Default::default()
        };

        let missing_b = ChannelMatrices { signal_b: None, ..full };
        assert!(TwoChannelMissingValues::default()
            .compute_missing_values_for_dimension(&mut ee, &dim, missing_b)
            .is_err());

        let empty_bkg = ChannelMatrices { background_b: Some(&empty), ..full };
        assert!(TwoChannelMissingValues::default()
            .compute_missing_values_for_dimension(&mut ee, &dim, empty_bkg)
            .is_err());

        let mismatched = ChannelMatrices { signal_a: Some(&narrow), ..full };
        assert!(TwoChannelMissingValues::default()
            .compute_missing_values_for_dimension(&mut ee, &dim, mismatched)
            .is_err());

        assert!(TwoChannelMissingValues::new(0.0)
            .compute_missing_values_for_dimension(&mut ee, &dim, full)
            .is_err());

        assert!(TwoChannelMissingValues::default()
            .compute_missing_values_for_dimension(&mut ee, &dim, full)
            .is_ok());
    }

    #[test]
    fn test_mixed_array_designs_in_one_dimension_rejected() {
        let mut assays = bio_assays(2);
        assays[1].array_design_used = ArrayDesign { id: 2, short_name: "GPL2".into() };
        let mut source = InMemoryDataSource::new();
        source.add_dimension(dimension(assays));

        let mut ee = ExpressionExperiment::new(1, "GSE1");
        let err = TwoChannelMissingValues::default()
            .compute_missing_values(&mut ee, &source, None)
            .unwrap_err();
        assert!(matches!(err, PreprocessError::InvalidArgument(_)));
    }

    #[test]
    fn test_experiment_level_uses_dimension_slices() {
        // channel matrices hold four columns, the dimension only the last three
        let all = bio_assays(4);
        let dim = dimension(all[1..].to_vec());
        let ad = all[0].array_design_used.clone();

        let mut source = InMemoryDataSource::new();
        source.add_dimension(Arc::clone(&dim));
        let signal = matrix_from_rows(&["p1", "p2"], &[&[0.0, 9.0, 1.0, 9.0], &[5.0, 5.0, 5.0, 5.0]]);
        let bkg = matrix_from_rows(&["p1", "p2"], &[&[1.0, 1.0, 1.0, 1.0], &[3.0, 3.0, 3.0, 3.0]]);
        source.set_channel(&ad, Channel::Preferred, signal.clone());
        source.set_channel(&ad, Channel::SignalA, signal.clone());
        source.set_channel(&ad, Channel::SignalB, signal);
        source.set_channel(&ad, Channel::BackgroundA, bkg.clone());
        source.set_channel(&ad, Channel::BackgroundB, bkg);

        let mut ee = ExpressionExperiment::new(1, "GSE1");
        let vectors = TwoChannelMissingValues::new(2.0)
            .compute_missing_values(&mut ee, &source, Some(&ad))
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].booleans(), vec![true, false, true]);
        assert_eq!(vectors[1].booleans(), vec![false, false, false]);
        assert!(Arc::ptr_eq(&vectors[0].bio_assay_dimension, &dim));
    }

    #[test]
    fn test_call_matrix_and_persist() {
        let preferred = matrix_from_rows(&["p1", "p2"], &[&[1.0, 1.0], &[1.0, 1.0]]);
        let signal = matrix_from_rows(&["p1", "p2"], &[&[5.0, 0.5], &[0.5, 5.0]]);
        let mut ee = ExpressionExperiment::new(8, "GSE8");
        let vectors = TwoChannelMissingValues::new(1.5)
            .compute_missing_values_for_dimension(
                &mut ee,
                &dimension(bio_assays(2)),
                ChannelMatrices {
                    preferred: Some(&preferred),
                    signal_a: Some(&signal),
                    signal_b: Some(&signal),
                    background_a: Some(&preferred),
                    background_b: Some(&preferred),
                },
            )
            .unwrap();

        let calls = detection_call_matrix(&vectors).unwrap();
        assert_eq!(calls.row_for(&DesignElement::new(1, "p1")).unwrap().to_vec(), vec![1.0, 0.0]);
        assert_eq!(calls.row_for(&DesignElement::new(2, "p2")).unwrap().to_vec(), vec![0.0, 1.0]);

        let trail = InMemoryAuditTrail::new();
        let stored = MissingValueHelper::new(&trail).persist(&mut ee, vectors).unwrap();
        assert_eq!(stored, 2);
        assert_eq!(ee.raw_expression_data_vectors.len(), 2);
        let events = trail.events_for(8);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::MissingValueAnalysis);
    }
}
