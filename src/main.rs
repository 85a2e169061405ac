// main.rs

// --- External Crate Imports ---
use anyhow::{anyhow, Error, Result};
use clap::Parser;
use env_logger;
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, error, info, warn};
use num_cpus;

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Instant,
};

use expression_preprocess::prelude::*;
use expression_preprocess::io::{load_dataset, write_matrix, Dataset};

// --- Main Function ---
fn main() -> Result<(), Error> {
    let total_time_start = Instant::now();
    let cli_args = cli::CliArgs::parse();

    // Initialize logger
    let log_level = cli_args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to Info.",
                cli_args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    info!("Starting expression_preprocess with args: {:?}", cli_args);

    // Configure Rayon thread pool
    let num_threads = cli_args.threads.unwrap_or_else(num_cpus::get);
    info!("Using {} threads for parallel operations.", num_threads);
    rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()?;

    let audit = Arc::new(InMemoryAuditTrail::new());

    match &cli_args.command {
        cli::Command::Filter(args) => commands::run_filter(args, audit.as_ref())?,
        cli::Command::MissingValues(args) => commands::run_missing_values(args, audit.as_ref())?,
        cli::Command::Svd(args) => commands::run_svd(args, &cli_args.home, audit.clone())?,
        cli::Command::ShowSvd(args) => commands::run_show_svd(args, &cli_args.home)?,
    }

    for event in audit.events() {
        debug!(
            "Audit trail: experiment {} {} '{}'",
            event.experiment_id, event.event_type, event.note
        );
    }
    info!(
        "expression_preprocess finished successfully in {:.2?}.",
        total_time_start.elapsed()
    );
    Ok(())
}

// --- Module Implementations ---

mod cli {
    use clap::{Args, Parser, Subcommand};
    use expression_preprocess::filter::{AffyProbePattern, FilterConfig};
    use expression_preprocess::missing_values::DEFAULT_SIGNAL_TO_NOISE_THRESHOLD;
    use std::path::PathBuf;

    #[derive(Parser, Debug)]
    #[command(author, version, about = "Filtering, detection calls and SVD factor analysis for expression data.", long_about = None, propagate_version = true)]
    pub(crate) struct CliArgs {
        #[command(subcommand)]
        pub(crate) command: Command,

        #[arg(short = 't', long, global = true)]
        pub(crate) threads: Option<usize>,

        #[arg(long, default_value = "Info", global = true)]
        pub(crate) log_level: String,

        /// Root directory for stored SVD reports.
        #[arg(long, default_value = ".", global = true)]
        pub(crate) home: PathBuf,
    }

    #[derive(Subcommand, Debug)]
    pub(crate) enum Command {
        /// Filter the processed matrix of a dataset.
        Filter(FilterArgs),
        /// Compute two-channel detection calls.
        MissingValues(MissingValuesArgs),
        /// Run SVD and factor analysis on one or more datasets.
        Svd(SvdArgs),
        /// Print a stored SVD report as JSON.
        ShowSvd(ShowSvdArgs),
    }

    #[derive(Args, Debug)]
    pub(crate) struct FilterArgs {
        #[arg(short = 'd', long, required = true)]
        pub(crate) dataset: PathBuf,

        #[arg(short, long = "out", required = true)]
        pub(crate) output_prefix: String,

        #[arg(long, default_value_t = FilterConfig::DEFAULT_MINPRESENT_FRACTION)]
        pub(crate) min_present_fraction: f64,

        #[arg(long, default_value_t = FilterConfig::DEFAULT_LOWEXPRESSIONCUT)]
        pub(crate) low_expression_cut: f64,

        #[arg(long, default_value_t = FilterConfig::DEFAULT_HIGHEXPRESSION_CUT)]
        pub(crate) high_expression_cut: f64,

        #[arg(long, default_value_t = FilterConfig::DEFAULT_LOWVARIANCECUT)]
        pub(crate) low_variance_cut: f64,

        #[arg(long)]
        pub(crate) keep_affy_controls: bool,

        /// Extra probe-name rules applied before the pipeline (ST, AFFX, F, X, G).
        #[arg(long, value_delimiter = ',')]
        pub(crate) probe_patterns: Vec<AffyProbePattern>,

        /// Count present values from detection calls computed from the dataset's channels.
        #[arg(long)]
        pub(crate) use_detection_calls: bool,

        #[arg(long, default_value_t = DEFAULT_SIGNAL_TO_NOISE_THRESHOLD)]
        pub(crate) threshold: f64,
    }

    #[derive(Args, Debug)]
    pub(crate) struct MissingValuesArgs {
        #[arg(short = 'd', long, required = true)]
        pub(crate) dataset: PathBuf,

        #[arg(short, long = "out", required = true)]
        pub(crate) output_prefix: String,

        #[arg(long, default_value_t = DEFAULT_SIGNAL_TO_NOISE_THRESHOLD)]
        pub(crate) threshold: f64,

        /// Preferred values equal to this are treated as missing. May be repeated.
        #[arg(long = "missing-indicator", allow_negative_numbers = true)]
        pub(crate) missing_indicators: Vec<f64>,

        /// Restrict to one array design (short name).
        #[arg(long)]
        pub(crate) array_design: Option<String>,
    }

    #[derive(Args, Debug)]
    pub(crate) struct SvdArgs {
        #[arg(short = 'd', long = "dataset", required = true, num_args = 1..)]
        pub(crate) datasets: Vec<PathBuf>,

        /// Write a per-dataset summary table with this prefix.
        #[arg(short, long = "out")]
        pub(crate) output_prefix: Option<String>,

        /// Scale rows to unit variance before the decomposition.
        #[arg(long)]
        pub(crate) normalize: bool,

        /// Run the default filtering pipeline on the processed data first.
        #[arg(long)]
        pub(crate) filter: bool,
    }

    #[derive(Args, Debug)]
    pub(crate) struct ShowSvdArgs {
        #[arg(long, required = true)]
        pub(crate) id: u64,
    }
}

mod commands {
    use super::{anyhow, cli, error, info, output_writer, warn, Result};
    use super::{load_dataset, Arc, Dataset, Path, PathBuf, ProgressBar, ProgressStyle};
    use expression_preprocess::prelude::*;
    use rayon::prelude::*;

    fn detection_calls(
        dataset: &mut Dataset,
        tcmv: &TwoChannelMissingValues,
        array_design: Option<&str>,
    ) -> Result<Vec<DesignElementDataVector>> {
        let ad = match array_design {
            Some(name) => Some(
                dataset
                    .experiment
                    .array_designs_used()
                    .into_iter()
                    .find(|ad| ad.short_name == name)
                    .cloned()
                    .ok_or_else(|| anyhow!("Array design {} is not used by this dataset", name))?,
            ),
            None => None,
        };
        let vectors = tcmv.compute_missing_values(&mut dataset.experiment, &dataset.source, ad.as_ref())?;
        Ok(vectors)
    }

    pub(crate) fn run_filter(args: &cli::FilterArgs, audit: &dyn AuditTrailService) -> Result<()> {
        let mut dataset = load_dataset(&args.dataset)?;

        let mut config = FilterConfig::default();
        config.set_min_present_fraction(args.min_present_fraction);
        config.set_low_expression_cut(args.low_expression_cut);
        config.set_high_expression_cut(args.high_expression_cut);
        config.set_low_variance_cut(args.low_variance_cut);
        config.remove_affy_controls = !args.keep_affy_controls;

        let calls = if args.use_detection_calls {
            let vectors = detection_calls(&mut dataset, &TwoChannelMissingValues::new(args.threshold), None)?;
            let calls = detection_call_matrix(&vectors)?;
            MissingValueHelper::new(audit).persist(&mut dataset.experiment, vectors)?;
            Some(calls)
        } else {
            None
        };

        let mut data = dataset.processed()?.clone();
        if !args.probe_patterns.is_empty() {
            data = AffyProbeNameFilter::new(&args.probe_patterns).filter(&data)?;
        }

        let filtered = ExpressionExperimentFilter::new(config.clone()).filter(&data, calls.as_ref())?;
        info!(
            "{}: kept {} of {} rows",
            dataset.experiment.short_name,
            filtered.rows(),
            data.rows()
        );
        output_writer::write_filtered_matrix(&args.output_prefix, &filtered, &config)
    }

    pub(crate) fn run_missing_values(args: &cli::MissingValuesArgs, audit: &dyn AuditTrailService) -> Result<()> {
        let mut dataset = load_dataset(&args.dataset)?;
        let tcmv = TwoChannelMissingValues::new(args.threshold)
            .with_extra_missing_value_indicators(&args.missing_indicators);

        let vectors = detection_calls(&mut dataset, &tcmv, args.array_design.as_deref())?;
        if vectors.is_empty() {
            warn!("No detection calls were computed for {}", dataset.experiment.short_name);
            return Ok(());
        }
        let calls = detection_call_matrix(&vectors)?;
        let present = vectors.iter().flat_map(|v| v.booleans()).filter(|&b| b).count();
        let total: usize = vectors.iter().map(|v| v.data.len()).sum();
        info!(
            "{}: {} of {} calls present ({:.1}%)",
            dataset.experiment.short_name,
            present,
            total,
            100.0 * present as f64 / total.max(1) as f64
        );

        let stored = MissingValueHelper::new(audit).persist(&mut dataset.experiment, vectors)?;
        info!("Attached {} detection call vectors to {}", stored, dataset.experiment.short_name);
        output_writer::write_detection_calls(&args.output_prefix, &calls)
    }

    pub(crate) fn run_svd(args: &cli::SvdArgs, home: &Path, audit: Arc<InMemoryAuditTrail>) -> Result<()> {
        let mut source = InMemoryDataSource::new();
        let mut experiments = Vec::with_capacity(args.datasets.len());
        for dir in &args.datasets {
            let dataset = load_dataset(dir)?;
            let mut processed = dataset.processed()?.clone();
            if args.filter {
                processed = ExpressionExperimentFilter::default().filter(&processed, None)?;
            }
            source.set_processed(dataset.experiment.id, processed);
            experiments.push(dataset.experiment);
        }

        let service = SvdService::new(home.to_path_buf(), Arc::new(source), audit).with_normalize(args.normalize);

        info!("Running SVD on {} dataset(s) in parallel...", experiments.len());
        let pb_style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} datasets ({percent}%) ETA: {eta}",
            )
            .map_err(|e| anyhow!("Failed to create progress bar style: {}", e))?
            .progress_chars("=> ");
        let pb = ProgressBar::new(experiments.len() as u64).with_style(pb_style);

        let results: Vec<Result<SvdValueObject>> = experiments
            .par_iter()
            .map(|ee| {
                let result = service
                    .svd(ee)
                    .map_err(|e| anyhow!("SVD failed for {} (id={}): {}", ee.short_name, ee.id, e));
                pb.inc(1);
                result
            })
            .collect();
        pb.finish_with_message("SVD complete.");

        let mut failures = 0;
        for (ee, result) in experiments.iter().zip(results) {
            match result {
                Ok(svo) => {
                    info!(
                        "{}: report stored at {}",
                        ee.short_name,
                        service.report_path(svo.id()).display()
                    );
                    if let Some(prefix) = &args.output_prefix {
                        let path = PathBuf::from(format!("{}.{}", prefix, ee.short_name));
                        output_writer::write_svd_summary(&path.to_string_lossy(), &svo)?;
                    }
                }
                Err(e) => {
                    error!("{}", e);
                    failures += 1;
                }
            }
        }
        if failures > 0 {
            return Err(anyhow!("SVD failed for {} dataset(s). See errors above.", failures));
        }
        Ok(())
    }

    pub(crate) fn run_show_svd(args: &cli::ShowSvdArgs, home: &Path) -> Result<()> {
        let service = SvdService::new(
            home.to_path_buf(),
            Arc::new(InMemoryDataSource::new()),
            Arc::new(InMemoryAuditTrail::new()),
        );
        let svo = service
            .retrieve_svd(args.id)
            .ok_or_else(|| anyhow!("No readable SVD report for id {} under {}", args.id, home.display()))?;
        let json = serde_json::to_string_pretty(&svo)?;
        println!("{}", json);
        Ok(())
    }
}

mod output_writer {
    use super::{anyhow, info, write_matrix, BufWriter, File, Result, Write};
    use expression_preprocess::filter::FilterConfig;
    use expression_preprocess::matrix::ExpressionDataMatrix;
    use expression_preprocess::svd::SvdValueObject;

    fn create_output_file(prefix: &str, suffix: &str) -> Result<BufWriter<File>> {
        let filename = format!("{}.{}", prefix, suffix);
        File::create(&filename)
            .map(BufWriter::new)
            .map_err(|e| anyhow!("Failed to create output file {}: {}", filename, e))
    }

    pub(crate) fn write_filtered_matrix(
        output_prefix: &str,
        matrix: &ExpressionDataMatrix,
        config: &FilterConfig,
    ) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "filtered.tsv")?;
        info!("Writing filtered matrix to {}.filtered.tsv", output_prefix);
        write_matrix(&mut writer, matrix, Some(&config.to_string()))?;
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_detection_calls(output_prefix: &str, calls: &ExpressionDataMatrix) -> Result<()> {
        let mut writer = create_output_file(output_prefix, "calls.tsv")?;
        info!("Writing detection calls to {}.calls.tsv", output_prefix);
        write_matrix(&mut writer, calls, None)?;
        writer.flush()?;
        Ok(())
    }

    pub(crate) fn write_svd_summary(output_prefix: &str, svo: &SvdValueObject) -> Result<()> {
        if svo.variance_fractions().is_empty() {
            info!("No components to write.");
            return Ok(());
        }
        let mut writer = create_output_file(output_prefix, "svd.tsv")?;
        info!("Writing SVD summary to {}.svd.tsv", output_prefix);

        let factor_ids: Vec<u64> = svo.factor_names().keys().copied().collect();
        write!(writer, "PC\tVarianceFraction\tDateCorrelation")?;
        for id in &factor_ids {
            let name = &svo.factor_names()[id];
            write!(writer, "\t{}_correlation\t{}_pvalue", name, name)?;
        }
        writeln!(writer)?;

        for (component, fraction) in svo.variance_fractions().iter().enumerate() {
            write!(writer, "{}\t{:.6}", component + 1, fraction)?;
            write_cell(&mut writer, svo.date_correlations().get(&component))?;
            for id in &factor_ids {
                let correlation = svo.factor_correlations().get(&component).and_then(|m| m.get(id));
                let pvalue = svo.factor_pvalues().get(&component).and_then(|m| m.get(id));
                write_cell(&mut writer, correlation)?;
                write_cell(&mut writer, pvalue)?;
            }
            writeln!(writer)?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_cell<W: Write>(writer: &mut W, value: Option<&f64>) -> Result<()> {
        match value {
            Some(v) if !v.is_nan() => write!(writer, "\t{:.6}", v)?,
            _ => write!(writer, "\tNA")?,
        }
        Ok(())
    }
}
