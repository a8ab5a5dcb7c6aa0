//! `ext-merge` is a rust external k-way merge of time-ordered event files.
//!
//! It consolidates many small per-source files, each sorted by a fixed-width timestamp prefix, into one
//! globally time-ordered file while buffering less than a configured working-memory budget. Merging is
//! achieved in two passes. During the first pass source files are grouped so that every group fits the
//! budget and each group is merged into a sorted run file, during the second pass all run files are merged
//! together into the final output. For more information see
//! [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Windowed memory maps:**
//!   inputs are read through bounded page-aligned mapped windows that move forward as records are consumed,
//!   the output is written through a mapping that grows on demand and is truncated to its exact size.
//! * **Provenance:**
//!   every output record carries the identifier of its source right after the timestamp prefix.
//! * **Configurable validity filter:**
//!   lines rejected by a [`RecordFilter`] or too short to carry a timestamp are dropped.
//! * **Multithreading support:**
//!   first pass groups can be merged in parallel, sharing the memory budget.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use log;
//!
//! use ext_merge::{ExternalMerger, ExternalMergerBuilder, MarkerFilter, MemoryBudget};
//!
//! fn main() {
//!     let merger: ExternalMerger = ExternalMergerBuilder::new()
//!         .with_work_dir(Path::new("./"))
//!         .with_budget(MemoryBudget::new(512 * 1024 * 1024))
//!         .with_filter(MarkerFilter::new("2021"))
//!         .build()
//!         .unwrap();
//!
//!     let stats = merger.merge_dir(Path::new("./data"), ".txt").unwrap();
//!     log::info!("{} records merged into {}", stats.records, merger.output_path().display());
//! }
//! ```

pub mod budget;
pub mod discovery;
pub mod merger;
pub mod page;
pub mod reader;
pub mod record;
pub mod sort;
pub mod stream;
pub mod writer;

pub use budget::MemoryBudget;
pub use discovery::{find_runs, find_sources, SourceFile};
pub use merger::BinaryHeapMerger;
pub use reader::MappedReader;
pub use record::{
    extract_next, AcceptAll, MalformedRecordError, MarkerFilter, PrefixRangeFilter, Record, RecordFilter,
    PREFIX_WIDTH,
};
pub use sort::{ExternalMerger, ExternalMergerBuilder, MergeError, MergeStats};
pub use stream::{RecordStream, StreamError};
pub use writer::MappedWriter;
