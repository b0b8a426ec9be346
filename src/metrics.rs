//! Counters and timings of a conversion run.
//!
//! A [`RunMetrics`] is filled batch by batch by the pipeline and returned from
//! [`Pipeline::run`](crate::Pipeline::run). It can be printed for the
//! operator or saved as JSON next to the output database.
//!
//! # Example
//!
//! ```no_run
//! use ironlog::{Enricher, Pipeline, PipelineConfig};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = PipelineConfig::new("access.log", "access.log.sqlite3");
//! let metrics = Pipeline::new(config, Enricher::disabled()).run()?;
//! metrics.print();
//! metrics.save_to_file("metrics.json")?;
//! # Ok(())
//! # }
//! ```

use crate::planner::BatchPlan;
use crate::progress::throughput;
use crate::store::BatchStats;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Summary of one run.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    /// Lines reported by the line counter.
    pub total_lines: u64,
    /// Lines written to the store.
    pub lines_processed: u64,
    /// Request rows with parsed fields.
    pub structured: u64,
    /// Request rows holding only the raw line.
    pub raw_failures: u64,
    pub header_rows: u64,
    pub geolocation_upserts: u64,
    pub batches_committed: u64,
    pub batch_size: usize,
    pub chunk_size: usize,
    pub parallelism: usize,
    /// Estimated bytes per line used for sizing.
    pub bytes_per_line: u64,
    #[serde(serialize_with = "as_millis")]
    pub elapsed: Duration,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

impl RunMetrics {
    /// Metrics for a run about to start with `plan`.
    #[must_use]
    pub fn planned(plan: &BatchPlan, bytes_per_line: u64) -> Self {
        Self {
            total_lines: plan.total_lines,
            batch_size: plan.batch_size,
            chunk_size: plan.chunk_size,
            parallelism: plan.parallelism,
            bytes_per_line,
            ..Self::default()
        }
    }

    /// Fold in a committed batch.
    pub fn record_batch(&mut self, stats: &BatchStats) {
        self.lines_processed += stats.requests();
        self.structured += stats.structured;
        self.raw_failures += stats.raw_failures;
        self.header_rows += stats.header_rows;
        self.geolocation_upserts += stats.geolocation_upserts;
        self.batches_committed += 1;
    }

    /// Lines per second over the whole run.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        throughput(self.lines_processed, self.elapsed)
    }

    /// All metrics as a JSON object, plus the derived throughput.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or_else(|_| json!({}));
        if let Value::Object(map) = &mut value {
            let elapsed = map.remove("elapsed").unwrap_or(Value::Null);
            map.insert("elapsed_ms".to_string(), elapsed);
            map.insert("lines_per_second".to_string(), json!(self.throughput().round()));
        }
        value
    }

    /// Print a human-readable summary to stdout.
    pub fn print(&self) {
        println!("\n========== Run Metrics ==========");
        println!(
            "Elapsed: {:.3}s ({:.0} lines/s)",
            self.elapsed.as_secs_f64(),
            self.throughput()
        );
        println!("---------------------------------");
        println!("lines: {}/{}", self.lines_processed, self.total_lines);
        println!("structured: {}", self.structured);
        println!("raw_failures: {}", self.raw_failures);
        println!("header_rows: {}", self.header_rows);
        println!("geolocation_upserts: {}", self.geolocation_upserts);
        println!(
            "batches: {} (batch {}, chunk {}, {} workers)",
            self.batches_committed, self.batch_size, self.chunk_size, self.parallelism
        );
        println!("=================================\n");
    }

    /// Save [`to_json`](Self::to_json) to `path`, pretty-printed.
    ///
    /// # Errors
    /// Returns an error if the file cannot be created or written to.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let formatted = serde_json::to_string_pretty(&self.to_json())?;
        let mut file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        file.write_all(formatted.as_bytes())
            .with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }
}
