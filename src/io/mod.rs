// io/mod.rs
//
// Plain-file form of a dataset: a JSON manifest, a sample sheet and TSV matrices.

pub mod dataset;
pub mod samples;
pub mod tsv;

pub use dataset::{load_dataset, read_manifest, ChannelFiles, Dataset, DatasetManifest, MANIFEST_FILE};
pub use samples::read_sample_sheet;
pub use tsv::{read_matrix, write_matrix, DesignElementRegistry};
