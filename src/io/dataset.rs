// io/dataset.rs

use log::info;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::samples::read_sample_sheet;
use super::tsv::{read_matrix, DesignElementRegistry};
use crate::error::{PreprocessError, Result};
use crate::matrix::ExpressionDataMatrix;
use crate::model::{BioAssay, BioAssayDimension, ExpressionExperiment};
use crate::source::{Channel, InMemoryDataSource};

pub const MANIFEST_FILE: &str = "dataset.json";

/// Channel files of one array design, relative to the dataset directory.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelFiles {
    pub preferred: PathBuf,
    pub signal_a: PathBuf,
    pub signal_b: PathBuf,
    #[serde(default)]
    pub background_a: Option<PathBuf>,
    #[serde(default)]
    pub background_b: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetManifest {
    pub id: u64,
    pub short_name: String,
    #[serde(default)]
    pub name: Option<String>,
    pub samples: PathBuf,
    #[serde(default)]
    pub processed: Option<PathBuf>,
    /// Keyed by array design short name.
    #[serde(default)]
    pub channels: BTreeMap<String, ChannelFiles>,
}

/// Everything read from a dataset directory.
#[derive(Debug)]
pub struct Dataset {
    pub dir: PathBuf,
    pub experiment: ExpressionExperiment,
    pub source: InMemoryDataSource,
    pub processed: Option<ExpressionDataMatrix>,
}

impl Dataset {
    pub fn processed(&self) -> Result<&ExpressionDataMatrix> {
        self.processed.as_ref().ok_or_else(|| {
            PreprocessError::InvalidArgument(format!(
                "Dataset {} has no processed data file",
                self.dir.display()
            ))
        })
    }
}

pub fn read_manifest(dir: &Path) -> Result<DatasetManifest> {
    let file = File::open(dir.join(MANIFEST_FILE))?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn read_matrix_file(
    path: &Path,
    bio_assays: &HashMap<String, BioAssay>,
    registry: &mut DesignElementRegistry,
) -> Result<ExpressionDataMatrix> {
    let reader = BufReader::new(File::open(path)?);
    read_matrix(reader, &path.display().to_string(), bio_assays, registry)
}

/// Loads the manifest, the sample sheet and every matrix it names.
///
/// One bio-assay dimension is made per array design, holding that design's bio
/// assays in sample sheet order.
pub fn load_dataset(dir: &Path) -> Result<Dataset> {
    let manifest = read_manifest(dir)?;
    info!("Loading dataset {} (id={}) from {}", manifest.short_name, manifest.id, dir.display());

    let samples_path = dir.join(&manifest.samples);
    let bio_assays = read_sample_sheet(
        BufReader::new(File::open(&samples_path)?),
        &samples_path.display().to_string(),
    )?;

    let mut experiment = ExpressionExperiment::new(manifest.id, manifest.short_name.clone());
    if let Some(name) = &manifest.name {
        experiment.name = name.clone();
    }
    experiment.bio_assays = bio_assays;

    let by_name: HashMap<String, BioAssay> = experiment
        .bio_assays
        .iter()
        .map(|ba| (ba.name.clone(), ba.clone()))
        .collect();
    let mut registry = DesignElementRegistry::new();
    let mut source = InMemoryDataSource::new();

    for ad in experiment.array_designs_used() {
        source.add_dimension(Arc::new(BioAssayDimension {
            id: ad.id,
            name: format!("{}/{}", experiment.short_name, ad.short_name),
            bio_assays: experiment
                .bio_assays
                .iter()
                .filter(|ba| ba.array_design_used.id == ad.id)
                .cloned()
                .collect(),
        }));
    }

    for (ad_name, files) in &manifest.channels {
        let ad = experiment
            .array_designs_used()
            .into_iter()
            .find(|ad| &ad.short_name == ad_name)
            .cloned()
            .ok_or_else(|| {
                PreprocessError::InvalidArgument(format!(
                    "Channels given for array design {} which no sample uses",
                    ad_name
                ))
            })?;

        let wanted = [
            (Channel::Preferred, Some(&files.preferred)),
            (Channel::SignalA, Some(&files.signal_a)),
            (Channel::SignalB, Some(&files.signal_b)),
            (Channel::BackgroundA, files.background_a.as_ref()),
            (Channel::BackgroundB, files.background_b.as_ref()),
        ];
        for (channel, path) in wanted {
            if let Some(path) = path {
                let m = read_matrix_file(&dir.join(path), &by_name, &mut registry)?;
                source.set_channel(&ad, channel, m);
            }
        }
    }

    let processed = match &manifest.processed {
        Some(path) => {
            let m = read_matrix_file(&dir.join(path), &by_name, &mut registry)?;
            source.set_processed(experiment.id, m.clone());
            Some(m)
        }
        None => None,
    };

    info!(
        "Dataset {}: {} bio assays, {} design elements",
        experiment.short_name,
        experiment.bio_assays.len(),
        registry.len()
    );
    Ok(Dataset {
        dir: dir.to_path_buf(),
        experiment,
        source,
        processed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ExpressionDataMatrixBuilder, ProcessedDataVectorSource};
    use std::fs;

    #[test]
    fn test_load_dataset_directory() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(
            p.join(MANIFEST_FILE),
            r#"{"id": 3, "short_name": "GSE3", "samples": "samples.tsv", "processed": "processed.tsv",
                "channels": {"GPL1": {"preferred": "pref.tsv", "signal_a": "a.tsv", "signal_b": "b.tsv"}}}"#,
        )
        .unwrap();
        fs::write(
            p.join("samples.tsv"),
            "bioassay\tbiomaterial_id\tarray_design\tprocessing_date\n\
             s1\t1\tGPL1\t\n\
             s2\t2\tGPL1\t\n",
        )
        .unwrap();
        for f in ["processed.tsv", "pref.tsv", "a.tsv", "b.tsv"] {
            fs::write(p.join(f), "probe\ts1\ts2\nx\t1\t2\ny\t3\tNA\n").unwrap();
        }

        let ds = load_dataset(p).unwrap();
        assert_eq!(ds.experiment.id, 3);
        assert_eq!(ds.processed().unwrap().rows(), 2);
        let dims = ds.source.bio_assay_dimensions(None);
        assert_eq!(dims.len(), 1);
        assert_eq!(dims[0].bio_assays.len(), 2);
        let ad = &dims[0].bio_assays[0].array_design_used;
        assert!(ds.source.signal_channel_b(ad).is_some());
        assert!(ds.source.background_channel_a(ad).is_none());
        assert_eq!(ds.source.processed_data_matrix(&ds.experiment).unwrap().rows(), 2);
    }

    #[test]
    fn test_unknown_array_design_in_channels() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path();
        fs::write(
            p.join(MANIFEST_FILE),
            r#"{"id": 1, "short_name": "GSE1", "samples": "samples.tsv",
                "channels": {"GPL9": {"preferred": "x", "signal_a": "x", "signal_b": "x"}}}"#,
        )
        .unwrap();
        fs::write(p.join("samples.tsv"), "bioassay\tbiomaterial_id\tarray_design\tprocessing_date\ns1\t1\tGPL1\t\n")
            .unwrap();
        assert!(matches!(load_dataset(p), Err(PreprocessError::InvalidArgument(_))));
    }
}
