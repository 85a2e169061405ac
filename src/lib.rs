// lib.rs
//
// Preprocessing of expression-profiling data: probe and row filtering, two-channel
// detection calls, and SVD-based comparison of eigengenes with sample annotations.

pub mod audit;
pub mod error;
pub mod filter;
pub mod io;
pub mod matrix;
pub mod missing_values;
pub mod model;
pub mod quantitation;
pub mod source;
pub mod stats;
pub mod svd;

pub use error::{PreprocessError, Result};
pub use matrix::ExpressionDataMatrix;

pub mod prelude {
    pub use crate::audit::{AuditEventType, AuditTrailService, InMemoryAuditTrail};
    pub use crate::error::{PreprocessError, Result};
    pub use crate::filter::{
        AffyProbeNameFilter, AffyProbePattern, ExpressionExperimentFilter, Filter, FilterConfig,
        RowLevelFilter, RowLevelFilterMethod, RowMissingFilter,
    };
    pub use crate::matrix::ExpressionDataMatrix;
    pub use crate::missing_values::{
        compute_call, detection_call_matrix, ChannelMatrices, MissingValueHelper, TwoChannelMissingValues,
    };
    pub use crate::model::*;
    pub use crate::source::{Channel, ExpressionDataMatrixBuilder, InMemoryDataSource, ProcessedDataVectorSource};
    pub use crate::svd::{ExpressionDataSvd, SvdService, SvdValueObject};
}
