//! External merger.

use log;
use rayon::prelude::*;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::budget::MemoryBudget;
use crate::discovery::{self, SourceFile, RUN_EXTENSION};
use crate::merger::BinaryHeapMerger;
use crate::reader::MappedReader;
use crate::record::{AcceptAll, RecordFilter};
use crate::stream::{RecordStream, StreamError};
use crate::writer::MappedWriter;

/// Default name of the final output file.
pub const DEFAULT_OUTPUT_NAME: &str = "MKTDATA.dat";

/// Default name prefix of run files, followed by the run number and [`RUN_EXTENSION`].
pub const DEFAULT_RUN_PREFIX: &str = "output_";

/// Merging error.
#[derive(Debug)]
pub enum MergeError {
    /// No working-memory budget configured and host memory discovery is unavailable.
    NoBudget,
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Input or run directory listing error.
    Discovery { path: PathBuf, source: io::Error },
    /// Input or run file opening, stat or mapping error.
    Open { path: PathBuf, source: io::Error },
    /// Remapping error in the middle of a stream.
    Read(StreamError),
    /// Output file creation, growth, flush or truncation error.
    Output { path: PathBuf, source: io::Error },
    /// Merge cancelled through the cancel flag.
    Cancelled,
}

impl Error for MergeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            MergeError::NoBudget => None,
            MergeError::ThreadPoolBuildError(err) => Some(err),
            MergeError::Discovery { source, .. } => Some(source),
            MergeError::Open { source, .. } => Some(source),
            MergeError::Read(err) => Some(err),
            MergeError::Output { source, .. } => Some(source),
            MergeError::Cancelled => None,
        }
    }
}

impl Display for MergeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            MergeError::NoBudget => write!(f, "working-memory budget is not configured"),
            MergeError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            MergeError::Discovery { path, source } => {
                write!(f, "directory {} listing failed: {}", path.display(), source)
            }
            MergeError::Open { path, source } => write!(f, "input file {} not opened: {}", path.display(), source),
            MergeError::Read(err) => write!(f, "input stream error: {}", err),
            MergeError::Output { path, source } => {
                write!(f, "output file {} not written: {}", path.display(), source)
            }
            MergeError::Cancelled => write!(f, "merge cancelled"),
        }
    }
}

/// Merge statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Number of run files involved.
    pub runs: usize,
    /// Number of records written.
    pub records: u64,
    /// Number of dropped input lines.
    pub skipped: u64,
    /// Size of the written file(s).
    pub bytes_written: u64,
}

/// External merger builder. Provides methods for [`ExternalMerger`] initialization.
#[derive(Clone, Default)]
pub struct ExternalMergerBuilder {
    /// Number of run-building groups processed in parallel.
    threads_number: Option<usize>,
    /// Directory to store run files and the final output in.
    work_dir: Option<Box<Path>>,
    output_name: Option<String>,
    run_prefix: Option<String>,
    budget: Option<MemoryBudget>,
    budget_fraction: Option<f64>,
    /// Run stream window size override.
    window_size: Option<usize>,
    filter: Option<Arc<dyn RecordFilter>>,
    cancel_flag: Option<Arc<AtomicBool>>,
    remove_runs: bool,
}

impl ExternalMergerBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalMergerBuilder::default()
    }

    /// Builds an [`ExternalMerger`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalMerger, MergeError> {
        let budget = match self.budget {
            Some(budget) => budget,
            None => Self::host_budget()?,
        };
        let budget = match self.budget_fraction {
            Some(fraction) => budget.with_fraction(fraction),
            None => budget,
        };
        if budget.total() == 0 {
            return Err(MergeError::NoBudget);
        }

        let threads_number = self.threads_number.unwrap_or(1).max(1);
        log::info!(
            "working-memory budget: {} bytes ({} usable)",
            budget.total(),
            budget.usable()
        );

        return Ok(ExternalMerger {
            thread_pool: ExternalMerger::init_thread_pool(threads_number)?,
            threads_number,
            budget,
            work_dir: self.work_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            output_name: self.output_name.unwrap_or_else(|| DEFAULT_OUTPUT_NAME.to_string()),
            run_prefix: self.run_prefix.unwrap_or_else(|| DEFAULT_RUN_PREFIX.to_string()),
            window_size: self.window_size.filter(|&size| size > 0),
            filter: self.filter.unwrap_or_else(|| Arc::new(AcceptAll)),
            cancel_flag: self.cancel_flag,
            remove_runs: self.remove_runs,
        });
    }

    #[cfg(feature = "host-memory")]
    fn host_budget() -> Result<MemoryBudget, MergeError> {
        Ok(MemoryBudget::from_host())
    }

    #[cfg(not(feature = "host-memory"))]
    fn host_budget() -> Result<MemoryBudget, MergeError> {
        Err(MergeError::NoBudget)
    }

    /// Sets number of run-building groups processed in parallel. The budget is shared between them.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalMergerBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets directory to be used to store run files and the final output.
    pub fn with_work_dir(mut self, path: &Path) -> ExternalMergerBuilder {
        self.work_dir = Some(path.into());
        return self;
    }

    /// Sets the final output file name.
    pub fn with_output_name(mut self, name: impl Into<String>) -> ExternalMergerBuilder {
        self.output_name = Some(name.into());
        return self;
    }

    /// Sets the run file name prefix.
    pub fn with_run_prefix(mut self, prefix: impl Into<String>) -> ExternalMergerBuilder {
        self.run_prefix = Some(prefix.into());
        return self;
    }

    /// Sets an explicit working-memory budget instead of the host memory.
    pub fn with_budget(mut self, budget: MemoryBudget) -> ExternalMergerBuilder {
        self.budget = Some(budget);
        return self;
    }

    /// Sets the budget safety fraction used by both phases.
    pub fn with_budget_fraction(mut self, fraction: f64) -> ExternalMergerBuilder {
        self.budget_fraction = Some(fraction);
        return self;
    }

    /// Sets the window size of run streams, overriding the one derived from the budget.
    pub fn with_window_size(mut self, window_size: usize) -> ExternalMergerBuilder {
        self.window_size = Some(window_size);
        return self;
    }

    /// Sets the record validity filter.
    pub fn with_filter(mut self, filter: impl RecordFilter + 'static) -> ExternalMergerBuilder {
        self.filter = Some(Arc::new(filter));
        return self;
    }

    /// Sets a flag checked between records; once raised the merge stops with [`MergeError::Cancelled`].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> ExternalMergerBuilder {
        self.cancel_flag = Some(flag);
        return self;
    }

    /// Removes run files after a successful consolidation.
    pub fn with_remove_runs(mut self, remove_runs: bool) -> ExternalMergerBuilder {
        self.remove_runs = remove_runs;
        return self;
    }
}

/// External merger.
///
/// Merges many individually sorted source files into one file sorted by the record timestamp prefix in two
/// phases: source files are grouped so that every group fits the working-memory budget and each group is
/// merged into a run file, then all run files are merged through bounded windows into the final output.
pub struct ExternalMerger {
    /// Run-building thread pool.
    thread_pool: rayon::ThreadPool,
    threads_number: usize,
    budget: MemoryBudget,
    work_dir: PathBuf,
    output_name: String,
    run_prefix: String,
    window_size: Option<usize>,
    filter: Arc<dyn RecordFilter>,
    cancel_flag: Option<Arc<AtomicBool>>,
    remove_runs: bool,
}

impl ExternalMerger {
    fn init_thread_pool(threads_number: usize) -> Result<rayon::ThreadPool, MergeError> {
        log::info!("initializing thread-pool (threads: {})", threads_number);
        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .build()
            .map_err(|err| MergeError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    pub fn budget(&self) -> &MemoryBudget {
        &self.budget
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path of the final output file.
    pub fn output_path(&self) -> PathBuf {
        self.work_dir.join(&self.output_name)
    }

    /// Path of the run file number `n`.
    pub fn run_path(&self, n: usize) -> PathBuf {
        self.work_dir.join(format!("{}{}{}", self.run_prefix, n, RUN_EXTENSION))
    }

    /// Discovers source files in `input_dir` and merges them into the final output.
    ///
    /// # Arguments
    /// * `input_dir` - Directory holding the source files
    /// * `marker` - Source file name marker, see [`discovery::find_sources`]
    pub fn merge_dir(&self, input_dir: &Path, marker: &str) -> Result<MergeStats, MergeError> {
        let sources = discovery::find_sources(input_dir, marker).map_err(|err| MergeError::Discovery {
            path: input_dir.to_path_buf(),
            source: err,
        })?;
        log::info!("found {} source files in {}", sources.len(), input_dir.display());

        self.merge(&sources)
    }

    /// Merges source files into the final output: builds runs, then consolidates them.
    pub fn merge(&self, sources: &[SourceFile]) -> Result<MergeStats, MergeError> {
        let (runs, run_stats) = self.build_runs(sources)?;
        let stats = self.consolidate(&runs)?;

        if self.remove_runs {
            for run in &runs {
                if let Err(err) = fs::remove_file(run) {
                    log::warn!("run file {} not removed: {}", run.display(), err);
                }
            }
        }

        return Ok(MergeStats {
            skipped: run_stats.skipped,
            ..stats
        });
    }

    /// Splits `sources` into contiguous groups whose total size fits `budget`.
    /// A single source exceeding the budget forms a group of its own.
    pub fn partition<'a>(sources: &'a [SourceFile], budget: &MemoryBudget) -> Vec<&'a [SourceFile]> {
        let limit = budget.usable();
        let mut groups = Vec::new();
        let mut start = 0;
        let mut group_len = 0u64;

        for (idx, source) in sources.iter().enumerate() {
            if idx > start && group_len + source.len > limit {
                groups.push(&sources[start..idx]);
                start = idx;
                group_len = 0;
            }
            group_len += source.len;
        }
        if start < sources.len() {
            groups.push(&sources[start..]);
        }

        return groups;
    }

    /// Phase 1: merges every budget-sized group of sources into its own run file.
    /// Returns run file paths in group order.
    pub fn build_runs(&self, sources: &[SourceFile]) -> Result<(Vec<PathBuf>, MergeStats), MergeError> {
        let group_budget = self.budget.split(self.threads_number);
        let groups = Self::partition(sources, &group_budget);
        log::info!(
            "building {} runs from {} source files (group budget: {} bytes)",
            groups.len(),
            sources.len(),
            group_budget.usable()
        );

        let results: Result<Vec<MergeStats>, MergeError> = self.thread_pool.install(|| {
            groups
                .par_iter()
                .enumerate()
                .map(|(n, group)| self.build_run(n, group, &group_budget))
                .collect()
        });

        let mut total = MergeStats::default();
        for stats in results? {
            total.runs += stats.runs;
            total.records += stats.records;
            total.skipped += stats.skipped;
            total.bytes_written += stats.bytes_written;
        }
        if total.skipped > 0 {
            log::warn!("{} input lines skipped as invalid or malformed", total.skipped);
        }
        log::info!("run building done: {:?}", total);

        let runs = (0..groups.len()).map(|n| self.run_path(n)).collect();
        return Ok((runs, total));
    }

    fn build_run(&self, n: usize, group: &[SourceFile], budget: &MemoryBudget) -> Result<MergeStats, MergeError> {
        let run_path = self.run_path(n);
        let group_len: u64 = group.iter().map(|source| source.len).sum();
        log::debug!(
            "building run {} from {} source files ({} bytes)",
            run_path.display(),
            group.len(),
            group_len
        );

        let mut streams = Vec::with_capacity(group.len());
        for source in group {
            let window_size = source.len.min(budget.usable()) as usize;
            let reader = MappedReader::open(&source.path, window_size).map_err(|err| MergeError::Open {
                path: source.path.clone(),
                source: err,
            })?;
            streams.push(RecordStream::source(reader, source.id.clone(), self.filter.clone()));
        }

        let writer = MappedWriter::create(&run_path, group_len.saturating_mul(2), budget.output_buffer())
            .map_err(|err| MergeError::Output {
                path: run_path.clone(),
                source: err,
            })?;

        let stats = self.merge_streams(streams, writer)?;
        return Ok(MergeStats { runs: 1, ..stats });
    }

    /// Phase 2: merges the run files found in the work directory into the final output. Only files named
    /// after the configured run prefix are taken, in run number order.
    pub fn consolidate_dir(&self) -> Result<MergeStats, MergeError> {
        let runs = discovery::find_runs(&self.work_dir, &self.run_prefix, RUN_EXTENSION).map_err(|err| {
            MergeError::Discovery {
                path: self.work_dir.clone(),
                source: err,
            }
        })?;

        self.consolidate(&runs)
    }

    /// Phase 2: merges run files into the final output, reading every run through a bounded window.
    pub fn consolidate(&self, runs: &[PathBuf]) -> Result<MergeStats, MergeError> {
        let output_path = self.output_path();
        let window_size = self.window_size.unwrap_or_else(|| self.budget.window_size(runs.len()));
        log::info!(
            "consolidating {} runs into {} (window: {} bytes)",
            runs.len(),
            output_path.display(),
            window_size
        );

        let mut streams = Vec::with_capacity(runs.len());
        let mut runs_len = 0u64;
        for run in runs {
            let reader = MappedReader::open(run, window_size).map_err(|err| MergeError::Open {
                path: run.clone(),
                source: err,
            })?;
            runs_len += reader.file_len();
            streams.push(RecordStream::run(reader));
        }

        let writer = MappedWriter::create(&output_path, runs_len, self.budget.output_buffer()).map_err(|err| {
            MergeError::Output {
                path: output_path.clone(),
                source: err,
            }
        })?;

        let stats = self.merge_streams(streams, writer)?;
        let stats = MergeStats {
            runs: runs.len(),
            ..stats
        };
        log::info!("consolidation done: {:?}", stats);

        return Ok(stats);
    }

    fn is_cancelled(&self) -> bool {
        match &self.cancel_flag {
            Some(flag) => flag.load(Ordering::Relaxed),
            None => false,
        }
    }

    fn merge_streams(&self, streams: Vec<RecordStream>, mut writer: MappedWriter) -> Result<MergeStats, MergeError> {
        let output_path = writer.path().to_path_buf();
        let mut merger = BinaryHeapMerger::new(streams);
        let mut records = 0u64;

        loop {
            if self.is_cancelled() {
                log::warn!("merge into {} cancelled", output_path.display());
                return Err(MergeError::Cancelled);
            }

            let record = match merger.next() {
                Some(record) => record.map_err(MergeError::Read)?,
                None => break,
            };
            writer.append_record(&record).map_err(|err| MergeError::Output {
                path: output_path.clone(),
                source: err,
            })?;
            records += 1;
        }

        let skipped: u64 = merger.chunks().iter().map(|stream| stream.skipped()).sum();
        // unmap and close inputs before finalizing the output
        drop(merger);

        let bytes_written = writer.finalize().map_err(|err| MergeError::Output {
            path: output_path.clone(),
            source: err,
        })?;

        return Ok(MergeStats {
            runs: 0,
            records,
            skipped,
            bytes_written,
        });
    }
}
