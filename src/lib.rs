//! # Ironlog
//!
//! A **parallel batch converter** from web-server access logs into a queryable
//! SQLite database. Each line becomes a request row (parsed, or raw when it
//! does not match the log format), request headers become header rows, and
//! remote addresses can be enriched with city and ASN data from MaxMind
//! databases.
//!
//! ## Key Features
//!
//! - **Memory-aware sizing** - batch and chunk sizes derived from available
//!   memory and the measured size of a line, or fixed explicitly
//! - **Parallel workers** - parsing and enrichment run on a `rayon` pool; one
//!   coordinator thread owns the database
//! - **Ordered or unordered fan-in** - write rows in completion order, or in
//!   input order for deterministic output
//! - **One transaction per batch** - a failed batch is rolled back as a whole;
//!   earlier batches stay committed
//! - **Apache `LogFormat` strings** - including nicknames like `combined`
//! - **Compressed input** - gzip, zstd, bzip2 and xz (optional via features)
//!
//! ## Quick Start
//!
//! ```no_run
//! use ironlog::{Enricher, MaxMindCity, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let enricher = Enricher::disabled().with_city(Arc::new(MaxMindCity::open("GeoLite2-City.mmdb")?));
//! let config = PipelineConfig::new("access.log", "access.log.sqlite3").ordered();
//! let metrics = Pipeline::new(config, enricher).run()?;
//! println!("{} lines, {} unparsed", metrics.lines_processed, metrics.raw_failures);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Planning
//!
//! Before any line is processed the input is counted
//! ([`count_lines`](io::count_lines)) and a prefix is sampled
//! ([`estimate_line_footprint`](io::estimate_line_footprint)). A
//! [`SizingStrategy`] turns these into a [`BatchPlan`]:
//!
//! ```text
//! max lines in memory = budget / bytes per line
//! batch size          = max(1, max lines / workers)
//! chunk size          = max(1, batch size / workers)
//! ```
//!
//! ### Batches and chunks
//!
//! A **batch** is read, processed and committed as a unit; the next batch is
//! not read until the previous one is committed. Within a batch, lines are
//! split into **chunks**, one per worker task.
//!
//! ### Enrichment
//!
//! An [`Enricher`] combines a [`CityLookup`] and an [`AsnLookup`], either of
//! which may be absent. Both answers are folded into one [`EnrichmentRecord`],
//! which replaces any earlier row for the same address.
//!
//! ### Errors
//!
//! Fallible operations return [`anyhow::Result`]. Conditions a caller may want
//! to react to are [`EtlError`] variants, recoverable with
//! `error.downcast_ref::<EtlError>()`.
//!
//! ## Testing
//!
//! The [`testing`] module provides log fixtures and in-memory lookup services,
//! so complete runs can be tested without MaxMind files.

pub mod cli;
pub mod enrich;
pub mod error;
pub mod format;
pub mod io;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod planner;
pub mod progress;
pub mod record;
pub mod store;
pub mod testing;

pub use enrich::{AsnInfo, AsnLookup, CityInfo, CityLookup, Enricher, LookupError, MaxMindAsn, MaxMindCity};
pub use error::EtlError;
pub use format::{FormatError, FormatSpec, parse_line};
pub use metrics::RunMetrics;
pub use pipeline::{FanIn, Pipeline, PipelineConfig};
pub use planner::{BatchPlan, FixedSize, MemoryBudget, SizingInput, SizingStrategy, plan_batches};
pub use progress::Progress;
pub use record::{EnrichmentRecord, LineOutcome, ParsedRecord, Processed, RawFailure};
pub use store::{BatchStats, BatchWriter, Store, TableCounts};
