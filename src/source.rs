// source.rs
//
// Where the analyses get their matrices from.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::model::{ArrayDesign, BioAssayDimension, ExpressionExperiment};

/// The channels a two-colour platform can supply for one array design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Preferred,
    SignalA,
    SignalB,
    BackgroundA,
    BackgroundB,
}

/// Supplies the raw channel matrices of an experiment.
pub trait ExpressionDataMatrixBuilder {
    /// Dimensions the data was measured on, restricted to `array_design` when given.
    fn bio_assay_dimensions(&self, array_design: Option<&ArrayDesign>) -> Vec<Arc<BioAssayDimension>>;

    fn channel(&self, array_design: &ArrayDesign, channel: Channel) -> Option<&ExpressionDataMatrix>;

    fn preferred_data(&self, array_design: &ArrayDesign) -> Option<&ExpressionDataMatrix> {
        self.channel(array_design, Channel::Preferred)
    }

    fn signal_channel_a(&self, array_design: &ArrayDesign) -> Option<&ExpressionDataMatrix> {
        self.channel(array_design, Channel::SignalA)
    }

    fn signal_channel_b(&self, array_design: &ArrayDesign) -> Option<&ExpressionDataMatrix> {
        self.channel(array_design, Channel::SignalB)
    }

    fn background_channel_a(&self, array_design: &ArrayDesign) -> Option<&ExpressionDataMatrix> {
        self.channel(array_design, Channel::BackgroundA)
    }

    fn background_channel_b(&self, array_design: &ArrayDesign) -> Option<&ExpressionDataMatrix> {
        self.channel(array_design, Channel::BackgroundB)
    }
}

/// Supplies the processed (analysis-ready) matrix of an experiment.
pub trait ProcessedDataVectorSource: Send + Sync {
    fn processed_data_matrix(&self, experiment: &ExpressionExperiment) -> Result<ExpressionDataMatrix>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryDataSource {
    dimensions: Vec<Arc<BioAssayDimension>>,
    channels: HashMap<(u64, Channel), ExpressionDataMatrix>,
    processed: HashMap<u64, ExpressionDataMatrix>,
}

impl InMemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dimension(&mut self, dimension: Arc<BioAssayDimension>) {
        self.dimensions.push(dimension);
    }

    pub fn set_channel(&mut self, array_design: &ArrayDesign, channel: Channel, data: ExpressionDataMatrix) {
        self.channels.insert((array_design.id, channel), data);
    }

    pub fn set_processed(&mut self, experiment_id: u64, data: ExpressionDataMatrix) {
        self.processed.insert(experiment_id, data);
    }
}

impl ExpressionDataMatrixBuilder for InMemoryDataSource {
    fn bio_assay_dimensions(&self, array_design: Option<&ArrayDesign>) -> Vec<Arc<BioAssayDimension>> {
        self.dimensions
            .iter()
            .filter(|dim| match array_design {
                None => true,
                Some(ad) => dim.bio_assays.iter().any(|ba| ba.array_design_used.id == ad.id),
            })
            .cloned()
            .collect()
    }

    fn channel(&self, array_design: &ArrayDesign, channel: Channel) -> Option<&ExpressionDataMatrix> {
        self.channels.get(&(array_design.id, channel))
    }
}

impl ProcessedDataVectorSource for InMemoryDataSource {
    fn processed_data_matrix(&self, experiment: &ExpressionExperiment) -> Result<ExpressionDataMatrix> {
        self.processed.get(&experiment.id).cloned().ok_or_else(|| {
            PreprocessError::InvalidArgument(format!(
                "No processed data for experiment {} (id={})",
                experiment.short_name, experiment.id
            ))
        })
    }
}
