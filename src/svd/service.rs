// svd/service.rs

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ExpressionDataSvd, SvdValueObject};
use crate::audit::{AuditEventType, AuditTrailService};
use crate::error::{PreprocessError, Result};
use crate::model::{ExperimentalFactor, ExpressionExperiment};
use crate::source::ProcessedDataVectorSource;
use crate::stats;

/// Only the leading components are compared with the sample annotations.
pub const MAX_EIGEN_GENES_TO_TEST: usize = 5;

/// Fewest non-missing values a factor needs before it is compared with an eigengene.
pub const MINIMUM_POINTS_TO_COMPARE_TO_EIGENGENE: usize = 3;

const EE_REPORT_DIR: &str = "ExpressionExperimentReports";
const EE_SVD_DIR: &str = "SVD";
const EE_SVD_SUMMARY: &str = "SVDSummary";

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Runs SVDs, relates the eigengenes to dates and factors, and keeps the reports.
///
/// Work on one experiment is serialized; different experiments run concurrently.
pub struct SvdService {
    home: PathBuf,
    data_source: Arc<dyn ProcessedDataVectorSource>,
    audit_trail: Arc<dyn AuditTrailService>,
    normalize: bool,
    locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl SvdService {
    pub fn new(
        home: impl Into<PathBuf>,
        data_source: Arc<dyn ProcessedDataVectorSource>,
        audit_trail: Arc<dyn AuditTrailService>,
    ) -> Self {
        Self {
            home: home.into(),
            data_source,
            audit_trail,
            normalize: false,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    pub fn report_dir(&self) -> PathBuf {
        self.home.join(EE_REPORT_DIR).join(EE_SVD_DIR)
    }

    pub fn report_path(&self, id: u64) -> PathBuf {
        self.report_dir().join(format!("{}.{}", EE_SVD_SUMMARY, id))
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<u64, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Runs `work` while holding the experiment's lock. The lock entry is dropped
    /// once no other caller holds or waits on it.
    fn with_experiment_lock<T>(&self, id: u64, work: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(self.lock_map().entry(id).or_default());
        let result = {
            let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            work()
        };

        let mut locks = self.lock_map();
        // one reference in the map, one here
        if Arc::strong_count(&lock) == 2 {
            locks.remove(&id);
        }
        result
    }

    /// Decomposes the experiment's processed data, compares the eigengenes with the
    /// sample annotations, stores the report and records the analysis.
    pub fn svd(&self, experiment: &ExpressionExperiment) -> Result<SvdValueObject> {
        self.with_experiment_lock(experiment.id, || self.svd_locked(experiment))
    }

    fn svd_locked(&self, experiment: &ExpressionExperiment) -> Result<SvdValueObject> {
        info!("Running SVD for {} (id={})", experiment.short_name, experiment.id);
        let matrix = self.data_source.processed_data_matrix(experiment)?;
        let svd = ExpressionDataSvd::new(&matrix, self.normalize)?;

        let bio_material_ids = svd.bio_assays().iter().map(|ba| ba.sample_used.id).collect();
        let svo = SvdValueObject::new(
            experiment.id,
            bio_material_ids,
            svd.variance_fractions().to_vec(),
            svd.v_t().clone(),
        )?;

        let svo = factor_analysis(experiment, svo)?;
        self.save_value_object(&svo);
        self.audit_trail.add_update_event(
            experiment.id,
            AuditEventType::PcaAnalysis,
            &format!("SVD with {} components", svo.variance_fractions().len()),
        )?;
        Ok(svo)
    }

    /// Runs [`SvdService::svd`] for each experiment; failures are logged and left out.
    pub fn svd_all(&self, experiments: &[ExpressionExperiment]) -> Vec<SvdValueObject> {
        experiments
            .par_iter()
            .filter_map(|ee| match self.svd(ee) {
                Ok(svo) => Some(svo),
                Err(e) => {
                    error!("SVD failed for {} (id={}): {}", ee.short_name, ee.id, e);
                    None
                }
            })
            .collect()
    }

    /// Redoes the factor analysis of an existing SVD result and stores it.
    pub fn svd_factor_analysis(
        &self,
        experiment: &ExpressionExperiment,
        svo: SvdValueObject,
    ) -> Result<SvdValueObject> {
        self.with_experiment_lock(experiment.id, || {
            let svo = factor_analysis(experiment, svo)?;
            self.save_value_object(&svo);
            Ok(svo)
        })
    }

    /// The stored report, or `None` if there is none or it cannot be read.
    pub fn retrieve_svd(&self, id: u64) -> Option<SvdValueObject> {
        let path = self.report_path(id);
        if !path.exists() {
            return None;
        }
        match read_value_object(&path) {
            Ok(svo) => Some(svo),
            Err(e) => {
                warn!("Unable to read report object for id={}: {}", id, e);
                None
            }
        }
    }

    fn save_value_object(&self, svo: &SvdValueObject) {
        if let Err(e) = self.write_value_object(svo) {
            warn!("Could not save SVD report for id={}: {}", svo.id(), e);
        }
    }

    fn write_value_object(&self, svo: &SvdValueObject) -> Result<()> {
        fs::create_dir_all(self.report_dir())?;
        let path = self.report_path(svo.id());
        let tmp = self.report_dir().join(format!("{}.{}.tmp", EE_SVD_SUMMARY, svo.id()));

        let written = File::create(&tmp).map_err(PreprocessError::from).and_then(|file| {
            let mut writer = BufWriter::new(file);
            bincode::serialize_into(&mut writer, svo)?;
            writer.flush()?;
            Ok(())
        });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        // the previous report stays in place until the new one is complete
        fs::rename(&tmp, &path)?;
        debug!("Wrote {}", path.display());
        Ok(())
    }
}

fn read_value_object(path: &Path) -> Result<SvdValueObject> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

/// Rounds to the nearest hour; half past rounds up.
fn round_to_hour(date: DateTime<Utc>) -> DateTime<Utc> {
    let millis = date.timestamp_millis();
    let rounded = (millis + MILLIS_PER_HOUR / 2).div_euclid(MILLIS_PER_HOUR) * MILLIS_PER_HOUR;
    DateTime::from_timestamp_millis(rounded).unwrap_or(date)
}

#[derive(Default)]
struct FactorData {
    values: HashMap<u64, f64>,
    has_measurements: bool,
    has_labels: bool,
}

fn factor_analysis(experiment: &ExpressionExperiment, mut svo: SvdValueObject) -> Result<SvdValueObject> {
    let v = svo.v_matrix();
    if v.nrows() == 0 || v.ncols() == 0 {
        return Err(PreprocessError::InvalidArgument("SVD must already be run".to_string()));
    }

    let mut dates: HashMap<u64, Option<DateTime<Utc>>> = HashMap::new();
    let mut factors: BTreeMap<ExperimentalFactor, FactorData> = BTreeMap::new();

    for bio_assay in &experiment.bio_assays {
        let bm = &bio_assay.sample_used;
        dates.insert(bm.id, bio_assay.processing_date);
        for fv in &bm.factor_values {
            let data = factors.entry(fv.experimental_factor.clone()).or_default();
            let value = match &fv.measurement {
                Some(m) => {
                    data.has_measurements = true;
                    m.trim().parse::<f64>().unwrap_or_else(|_| {
                        warn!("Measurement wasn't a number for factor value {}: '{}'", fv.id, m);
                        f64::NAN
                    })
                }
                None => {
                    data.has_labels = true;
                    fv.id as f64
                }
            };
            data.values.insert(bm.id, value);
        }
    }

    let with_dates = dates.values().filter(|d| d.is_some()).count();
    if with_dates == 0 && factors.is_empty() {
        warn!("No factor or date information to compare to the eigengenes");
        return Ok(svo);
    }

    let bio_materials = svo.bio_material_ids().to_vec();
    if bio_materials.is_empty() {
        return Err(PreprocessError::IllegalState(
            "SVD did not have biomaterial information".to_string(),
        ));
    }

    for (factor, data) in factors.iter_mut() {
        if data.has_measurements && data.has_labels {
            warn!("{} mixes measured and categorical values; treating it as continuous", factor.name);
        }
        for id in &bio_materials {
            if !data.values.contains_key(id) {
                warn!(
                    "Incomplete factor value information for {} (biomaterial id={} missing a value)",
                    factor.name, id
                );
                data.values.insert(*id, f64::NAN);
            }
        }
    }

    let date_values: Option<Vec<f64>> = if with_dates > 2 {
        let values: Vec<f64> = bio_materials
            .iter()
            .map(|id| match dates.get(id).copied().flatten() {
                Some(d) => round_to_hour(d).timestamp_millis() as f64,
                None => f64::NAN,
            })
            .collect();
        if values.iter().any(|v| v.is_nan()) {
            warn!("Incomplete date information");
        }
        Some(values)
    } else {
        warn!("Insufficient date information to compare to eigengenes");
        None
    };

    let components = svo.v_matrix().nrows().min(MAX_EIGEN_GENES_TO_TEST);
    for component in 0..components {
        let eigengene = svo.v_matrix().row(component).to_vec();

        if let Some(dates) = &date_values {
            let correlation = stats::spearman_rank_correlation(&eigengene, dates)?;
            svo.set_pc_date_correlation(component, correlation);
        }

        for (factor, data) in &factors {
            let fvs: Vec<f64> = bio_materials.iter().map(|id| data.values[id]).collect();
            let not_missing = fvs.iter().filter(|v| !v.is_nan()).count();
            if not_missing < MINIMUM_POINTS_TO_COMPARE_TO_EIGENGENE {
                warn!("Insufficient data to compare {} to eigengenes", factor.name);
                continue;
            }

            if data.has_measurements {
                let correlation = stats::spearman_rank_correlation(&eigengene, &fvs)?;
                svo.set_pc_factor_correlation(component, factor, correlation);
                continue;
            }

            let (values, groups): (Vec<f64>, Vec<i64>) = eigengene
                .iter()
                .zip(&fvs)
                .filter(|(_, g)| !g.is_nan())
                .map(|(&e, &g)| (e, g as i64))
                .unzip();
            let mut distinct = groups.clone();
            distinct.sort_unstable();
            distinct.dedup();

            if distinct.len() < 2 {
                warn!("Factor had less than two groups: {}, SVD comparison can't be done.", factor.name);
                continue;
            }
            if values.len() < MINIMUM_POINTS_TO_COMPARE_TO_EIGENGENE {
                warn!("Too few non-missing values for factor to compare to eigengenes: {}", factor.name);
                continue;
            }

            if distinct.len() == 2 {
                // two levels: rank correlation against the surrogate ids
                let correlation = stats::spearman_rank_correlation(&eigengene, &fvs)?;
                svo.set_pc_factor_correlation(component, factor, correlation);
            } else {
                let pvalue = stats::kruskal_wallis(&values, &groups)?;
                svo.set_pc_factor_pvalue(component, factor, pvalue);
            }
        }
    }

    Ok(svo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::InMemoryAuditTrail;
    use crate::matrix::ExpressionDataMatrix;
    use crate::model::{ArrayDesign, BioAssay, BioMaterial, DesignElement, FactorValue};
    use crate::source::InMemoryDataSource;
    use chrono::TimeZone;
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn categorical(factor: &ExperimentalFactor, fv_id: u64) -> FactorValue {
        FactorValue {
            id: fv_id,
            experimental_factor: factor.clone(),
            value: Some(format!("level{}", fv_id)),
            measurement: None,
        }
    }

    fn experiment(id: u64, n: u64) -> ExpressionExperiment {
        let treatment = ExperimentalFactor { id: 1, name: "treatment".into() };
        let sex = ExperimentalFactor { id: 2, name: "sex".into() };
        let age = ExperimentalFactor { id: 3, name: "age".into() };
        let batch = ExperimentalFactor { id: 4, name: "batch".into() };
        let ad = ArrayDesign { id: 1, short_name: "GPL1".into() };

        let mut ee = ExpressionExperiment::new(id, format!("GSE{}", id));
        for i in 0..n {
            let mut factor_values = vec![
                categorical(&treatment, 11 + i % 3),
                categorical(&sex, 21 + i % 2),
                FactorValue {
                    id: 30 + i,
                    experimental_factor: age.clone(),
                    value: None,
                    measurement: Some(format!("{}", 20 + i * 3)),
                },
            ];
            if i < 2 {
                factor_values.push(categorical(&batch, 41 + i));
            }
            ee.bio_assays.push(BioAssay {
                id: i + 1,
                name: format!("ba{}", i),
                array_design_used: ad.clone(),
                processing_date: Some(Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 10, 0, 0).unwrap()),
                sample_used: BioMaterial {
                    id: 100 + i,
                    name: format!("bm{}", i),
                    factor_values,
                },
            });
        }
        ee
    }

    fn processed(ee: &ExpressionExperiment, n_rows: usize, seed: u64) -> ExpressionDataMatrix {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(5.0, 1.0).unwrap();
        let data = Array2::from_shape_fn((n_rows, ee.bio_assays.len()), |_| normal.sample(&mut rng));
        let elements = (0..n_rows)
            .map(|i| DesignElement::new(i as u64 + 1, format!("probe{}", i)))
            .collect();
        ExpressionDataMatrix::new(elements, ee.bio_assays.clone(), data).unwrap()
    }

    fn service(home: &Path, experiments: &[ExpressionExperiment]) -> (SvdService, Arc<InMemoryAuditTrail>) {
        let mut source = InMemoryDataSource::new();
        for (k, ee) in experiments.iter().enumerate() {
            source.set_processed(ee.id, processed(ee, 30, k as u64 + 1));
        }
        let audit = Arc::new(InMemoryAuditTrail::new());
        let svc = SvdService::new(home, Arc::new(source), audit.clone());
        (svc, audit)
    }

    #[test]
    fn test_svd_factor_analysis_and_report_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let ee = experiment(7, 9);
        let (svc, audit) = service(dir.path(), std::slice::from_ref(&ee));

        let svo = svc.svd(&ee).unwrap();
        assert_eq!(svo.bio_material_ids(), &[100, 101, 102, 103, 104, 105, 106, 107, 108]);
        assert_eq!(svo.v_matrix().dim(), (9, 9));

        // only the first five components are examined
        assert_eq!(svo.date_correlations().len(), MAX_EIGEN_GENES_TO_TEST);
        assert!(!svo.date_correlations().contains_key(&5));

        let correlations = &svo.factor_correlations()[&0];
        assert!(correlations.contains_key(&2), "two-level factor is correlated");
        assert!(correlations.contains_key(&3), "measured factor is correlated");
        assert!(!correlations.contains_key(&4), "factor with two values is skipped");
        let p = svo.factor_pvalues()[&0][&1];
        assert!((0.0..=1.0).contains(&p));
        assert_eq!(svo.factor_names()[&1], "treatment");

        assert!(svc.report_path(7).ends_with("ExpressionExperimentReports/SVD/SVDSummary.7"));
        let stored = svc.retrieve_svd(7).unwrap();
        assert_eq!(stored.id(), 7);
        assert_eq!(stored.v_matrix(), svo.v_matrix());
        assert_eq!(stored.factor_pvalues(), svo.factor_pvalues());
        assert_eq!(stored.date_correlations(), svo.date_correlations());

        let events = audit.events_for(7);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::PcaAnalysis);
    }

    #[test]
    fn test_retrieve_missing_or_corrupt_report() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(dir.path(), &[]);
        assert!(svc.retrieve_svd(12345).is_none());

        fs::create_dir_all(svc.report_dir()).unwrap();
        fs::write(svc.report_path(3), b"not a report").unwrap();
        assert!(svc.retrieve_svd(3).is_none());
    }

    #[test]
    fn test_factor_analysis_requires_v_matrix() {
        let dir = tempfile::tempdir().unwrap();
        let ee = experiment(1, 4);
        let (svc, _) = service(dir.path(), &[]);
        let empty = SvdValueObject::new(1, vec![], vec![], Array2::zeros((0, 0))).unwrap();
        assert!(svc.svd_factor_analysis(&ee, empty).is_err());
    }

    #[test]
    fn test_rerun_factor_analysis_overwrites_report() {
        let dir = tempfile::tempdir().unwrap();
        let ee = experiment(2, 6);
        let (svc, _) = service(dir.path(), std::slice::from_ref(&ee));
        let svo = svc.svd(&ee).unwrap();

        // drop the annotations and redo the comparison
        let mut bare = ee.clone();
        for ba in &mut bare.bio_assays {
            ba.processing_date = None;
            ba.sample_used.factor_values.clear();
        }
        let redone = svc.svd_factor_analysis(&bare, svo).unwrap();
        assert!(!redone.date_correlations().is_empty());
        let stored = svc.retrieve_svd(2).unwrap();
        assert_eq!(stored.date_correlations(), redone.date_correlations());
    }

    #[test]
    fn test_svd_all_runs_experiments_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let experiments: Vec<ExpressionExperiment> = (1..=4).map(|id| experiment(id, 6)).collect();
        let (svc, audit) = service(dir.path(), &experiments);
        let mut missing = experiments.clone();
        missing.push(ExpressionExperiment::new(99, "GSE99"));

        let results = svc.svd_all(&missing);
        assert_eq!(results.len(), 4);
        assert_eq!(audit.events().len(), 4);
        for id in 1..=4 {
            assert!(svc.report_path(id).exists());
        }
        assert!(!svc.report_path(99).exists());
    }

    #[test]
    fn test_single_level_factor_and_two_dates_are_not_compared() {
        let dir = tempfile::tempdir().unwrap();
        let strain = ExperimentalFactor { id: 5, name: "strain".into() };
        let ad = ArrayDesign { id: 1, short_name: "GPL1".into() };
        let mut ee = ExpressionExperiment::new(8, "GSE8");
        for i in 0..6u64 {
            ee.bio_assays.push(BioAssay {
                id: i + 1,
                name: format!("ba{}", i),
                array_design_used: ad.clone(),
                processing_date: (i < 2).then(|| Utc.with_ymd_and_hms(2024, 2, 1 + i as u32, 9, 0, 0).unwrap()),
                sample_used: BioMaterial {
                    id: 100 + i,
                    name: format!("bm{}", i),
                    factor_values: vec![categorical(&strain, 51)],
                },
            });
        }
        let (svc, _) = service(dir.path(), std::slice::from_ref(&ee));

        let svo = svc.svd(&ee).unwrap();
        assert!(!svo.variance_fractions().is_empty());
        assert!(svo.date_correlations().is_empty());
        assert!(svo.factor_correlations().values().all(|m| !m.contains_key(&5)));
        assert!(svo.factor_pvalues().values().all(|m| !m.contains_key(&5)));
    }

    #[test]
    fn test_failed_save_keeps_previous_report() {
        let dir = tempfile::tempdir().unwrap();
        let ee = experiment(3, 6);
        let (svc, _) = service(dir.path(), std::slice::from_ref(&ee));
        let svo = svc.svd(&ee).unwrap();

        // a directory in the way of the temporary file makes the write fail
        let tmp = svc.report_dir().join("SVDSummary.3.tmp");
        fs::create_dir(&tmp).unwrap();
        let mut bare = ee.clone();
        for ba in &mut bare.bio_assays {
            ba.sample_used.factor_values.clear();
        }
        svc.svd_factor_analysis(&bare, svo.clone()).unwrap();
        let stored = svc.retrieve_svd(3).unwrap();
        assert_eq!(stored.v_matrix(), svo.v_matrix());
        assert_eq!(stored.factor_pvalues(), svo.factor_pvalues());

        fs::remove_dir(&tmp).unwrap();
        svc.svd_factor_analysis(&bare, svo).unwrap();
        assert!(!tmp.exists());
        assert!(svc.retrieve_svd(3).is_some());
    }

    #[test]
    fn test_lock_entries_released_after_use() {
        let dir = tempfile::tempdir().unwrap();
        let experiments: Vec<ExpressionExperiment> = (1..=3).map(|id| experiment(id, 6)).collect();
        let (svc, _) = service(dir.path(), &experiments);

        svc.svd(&experiments[0]).unwrap();
        assert!(svc.lock_map().is_empty());
        assert_eq!(svc.svd_all(&experiments).len(), 3);
        assert!(svc.lock_map().is_empty());
    }

    #[test]
    fn test_round_to_hour() {
        let d = Utc.with_ymd_and_hms(2024, 3, 28, 13, 30, 0).unwrap();
        assert_eq!(round_to_hour(d), Utc.with_ymd_and_hms(2024, 3, 28, 14, 0, 0).unwrap());
        let d = Utc.with_ymd_and_hms(2024, 3, 28, 13, 29, 59).unwrap();
        assert_eq!(round_to_hour(d), Utc.with_ymd_and_hms(2024, 3, 28, 13, 0, 0).unwrap());
    }
}
