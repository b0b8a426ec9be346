//! Testing utilities for conversion runs.
//!
//! - **Fixtures**: ready-made access-log lines and a helper to write them to disk
//! - **Lookups**: in-memory city/ASN services, so enrichment can be exercised
//!   without MaxMind database files
//!
//! # Quick Start
//!
//! ```no_run
//! use ironlog::testing::*;
//! use ironlog::{Enricher, Pipeline, PipelineConfig};
//! use std::sync::Arc;
//!
//! # fn main() -> anyhow::Result<()> {
//! let dir = tempfile::tempdir()?;
//! let log = write_log_file(dir.path(), "access.log", &[combined_line("8.8.8.8", 200)])?;
//! let enricher = Enricher::disabled()
//!     .with_asn(Arc::new(StaticAsnLookup::default().with("8.8.8.8", 15169, "GOOGLE")));
//! let summary = Pipeline::new(PipelineConfig::new(&log, dir.path().join("out.sqlite3")), enricher).run()?;
//! assert_eq!(summary.lines_processed, 1);
//! # Ok(())
//! # }
//! ```

pub mod fixtures;
pub mod lookups;

pub use fixtures::*;
pub use lookups::*;
