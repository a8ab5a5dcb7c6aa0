use std::path;
use std::process;
use std::time::Instant;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use ext_merge::discovery::{self, SOURCE_MARKER};
use ext_merge::sort::DEFAULT_OUTPUT_NAME;
use ext_merge::{ExternalMerger, ExternalMergerBuilder, MarkerFilter, MemoryBudget, PrefixRangeFilter, RecordFilter};

fn main() {
    let started = Instant::now();
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let phase: Phase = arg_parser.value_of_t_or_exit("phase");
    let fraction: f64 = arg_parser.value_of_t_or_exit("fraction");
    let input_dir = path::Path::new(arg_parser.value_of("input_dir").expect("value has default"));
    let work_dir = path::Path::new(arg_parser.value_of("work_dir").expect("value has default"));
    let output = arg_parser.value_of("output").expect("value has default");
    let source_marker = arg_parser.value_of("source_marker").expect("value has default");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));

    let mut merger_builder = ExternalMergerBuilder::new()
        .with_work_dir(work_dir)
        .with_output_name(output)
        .with_budget_fraction(fraction)
        .with_remove_runs(arg_parser.is_present("remove_runs"));

    if let Some(threads) = threads {
        merger_builder = merger_builder.with_threads_number(threads);
    }

    if let Some(memory) = arg_parser.value_of("memory") {
        let memory = memory.parse::<ByteSize>().expect("value is pre-validated").as_u64();
        merger_builder = merger_builder.with_budget(MemoryBudget::new(memory));
    }

    if let Some(window) = arg_parser.value_of("window") {
        let window = window.parse::<ByteSize>().expect("value is pre-validated").as_u64();
        merger_builder = merger_builder.with_window_size(window as usize);
    }

    let marker_filter = arg_parser.value_of("filter").map(MarkerFilter::new);
    let from = arg_parser.value_of("from");
    let to = arg_parser.value_of("to");
    let range_filter = (from.is_some() || to.is_some()).then(|| PrefixRangeFilter::new(from, to));
    if marker_filter.is_some() || range_filter.is_some() {
        merger_builder = merger_builder.with_filter(move |line: &[u8]| {
            marker_filter.as_ref().map_or(true, |filter| filter.accept(line))
                && range_filter.as_ref().map_or(true, |filter| filter.accept(line))
        });
    }

    let merger: ExternalMerger = match merger_builder.build() {
        Ok(merger) => merger,
        Err(err) => {
            log::error!("merger initialization error: {}", err);
            process::exit(1);
        }
    };

    let result = match phase {
        Phase::All => merger.merge_dir(input_dir, source_marker),
        Phase::Runs => match discovery::find_sources(input_dir, source_marker) {
            Ok(sources) => merger.build_runs(&sources).map(|(_, stats)| stats),
            Err(err) => {
                log::error!("input directory {} listing error: {}", input_dir.display(), err);
                process::exit(1);
            }
        },
        Phase::Consolidate => merger.consolidate_dir(),
    };

    match result {
        Ok(stats) => log::info!(
            "{} records ({} bytes) written from {} runs, {} lines skipped",
            stats.records,
            stats.bytes_written,
            stats.runs,
            stats.skipped
        ),
        Err(err) => {
            log::error!("data merging error: {}", err);
            process::exit(1);
        }
    }

    log::info!("entire process took {} msec", started.elapsed().as_millis());
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum Phase {
    All,
    Runs,
    Consolidate,
}

impl Phase {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Phase::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <Phase as clap::ArgEnum>::from_str(s, false)
    }
}

fn validate_bytesize(v: &str) -> Result<(), String> {
    match v.parse::<ByteSize>() {
        Ok(_) => Ok(()),
        Err(err) => Err(format!("Size format incorrect: {}", err)),
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("ext-merge")
        .about("external merger of time-ordered event files")
        .arg(
            clap::Arg::new("input_dir")
                .short('i')
                .long("input-dir")
                .help("directory holding the source files")
                .takes_value(true)
                .default_value("."),
        )
        .arg(
            clap::Arg::new("work_dir")
                .short('d')
                .long("work-dir")
                .help("directory to store run files and the final output in")
                .takes_value(true)
                .default_value("."),
        )
        .arg(
            clap::Arg::new("output")
                .short('o')
                .long("output")
                .help("final output file name")
                .takes_value(true)
                .default_value(DEFAULT_OUTPUT_NAME),
        )
        .arg(
            clap::Arg::new("source_marker")
                .long("source-marker")
                .help("source file name marker, the part of the name before it is the source identifier")
                .takes_value(true)
                .default_value(SOURCE_MARKER),
        )
        .arg(
            clap::Arg::new("phase")
                .short('p')
                .long("phase")
                .help("merge phase to run")
                .takes_value(true)
                .default_value("all")
                .possible_values(Phase::possible_values()),
        )
        .arg(
            clap::Arg::new("memory")
                .short('m')
                .long("memory")
                .help("working-memory budget, host memory size if not set")
                .takes_value(true)
                .validator(validate_bytesize),
        )
        .arg(
            clap::Arg::new("fraction")
                .short('f')
                .long("fraction")
                .help("budget safety fraction")
                .takes_value(true)
                .default_value("0.8"),
        )
        .arg(
            clap::Arg::new("window")
                .short('w')
                .long("window")
                .help("run file read window size, derived from the budget if not set")
                .takes_value(true)
                .validator(validate_bytesize),
        )
        .arg(
            clap::Arg::new("filter")
                .long("filter")
                .help("keep only records containing this marker")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("from")
                .long("from")
                .help("keep only records with timestamp prefix not less than this one")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("to")
                .long("to")
                .help("keep only records with timestamp prefix less than this one")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of run groups to merge in parallel")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("remove_runs")
                .long("remove-runs")
                .help("remove run files after consolidation"),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("info")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
