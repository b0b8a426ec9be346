//! The conversion run: count, plan, then fan each batch out to a worker pool
//! and fan the results back in to the single writer.
//!
//! ```text
//!            LineBatches ──batch──▶ coordinator
//!                                      │ chunks
//!                    ┌─────────────────┼─────────────────┐
//!                    ▼                 ▼                 ▼
//!                 worker            worker            worker      parse + enrich
//!                    └────(idx, Vec<Processed>) channel──┘
//!                                      ▼
//!                              fan-in (ordered or not)
//!                                      ▼
//!                            BatchWriter (one transaction)
//! ```
//!
//! Workers only read the compiled format and the lookup services, so they
//! share nothing mutable. The coordinator thread owns the [`Store`] and is the
//! only writer. A batch is committed before the next one is read, which keeps
//! at most `batch_size` lines in flight.

use crate::enrich::{Enricher, LookupError};
use crate::error::EtlError;
use crate::format::FormatSpec;
use crate::io::{DEFAULT_SAMPLE_LINES, LineBatches, count_lines, estimate_line_footprint};
use crate::metrics::RunMetrics;
use crate::planner::{MemoryBudget, SizingInput, SizingStrategy};
use crate::progress::Progress;
use crate::record::{LineOutcome, Processed};
use crate::store::{BatchStats, Store};
use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info};

/// Order in which finished chunks reach the writer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FanIn {
    /// Write each chunk as soon as its worker finishes.
    #[default]
    Unordered,
    /// Write chunks in input order; request ids then follow line numbers.
    Ordered,
}

/// Everything a run needs besides the lookup services and the sizing strategy.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: FormatSpec,
    pub fan_in: FanIn,
    /// Worker count.
    pub parallelism: usize,
    /// Lines sampled for the footprint estimate.
    pub sample_lines: usize,
    /// Draw the progress line on stderr.
    pub show_progress: bool,
}

impl PipelineConfig {
    /// Combined format, unordered fan-in, one worker per CPU, no progress line.
    pub fn new(input: impl AsRef<Path>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.as_ref().to_path_buf(),
            output: output.as_ref().to_path_buf(),
            format: FormatSpec::combined(),
            fan_in: FanIn::default(),
            parallelism: num_cpus::get().max(1),
            sample_lines: DEFAULT_SAMPLE_LINES,
            show_progress: false,
        }
    }

    #[must_use]
    pub fn with_format(mut self, format: FormatSpec) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_fan_in(mut self, fan_in: FanIn) -> Self {
        self.fan_in = fan_in;
        self
    }

    /// Shorthand for `with_fan_in(FanIn::Ordered)`.
    #[must_use]
    pub fn ordered(self) -> Self {
        self.with_fan_in(FanIn::Ordered)
    }

    /// Set the worker count; 0 is treated as 1.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    #[must_use]
    pub fn with_sample_lines(mut self, sample_lines: usize) -> Self {
        self.sample_lines = sample_lines;
        self
    }

    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}

/// The per-line unit of work: parse, then enrich parsed lines.
struct Worker<'a> {
    format: &'a FormatSpec,
    enricher: &'a Enricher,
}

impl Worker<'_> {
    fn process_line(&self, line: &str) -> Result<Processed, LookupError> {
        let outcome = self.format.parse_line(line);
        let enrichment = match &outcome {
            LineOutcome::Parsed(record) if self.enricher.is_enabled() => record
                .remote_address
                .as_deref()
                .map(|address| self.enricher.resolve(address))
                .transpose()?,
            _ => None,
        };
        Ok(Processed { outcome, enrichment })
    }

    fn process_chunk(&self, lines: &[String]) -> Result<Vec<Processed>, LookupError> {
        lines.iter().map(|line| self.process_line(line)).collect()
    }
}

/// Releases chunk results in index order.
struct ReorderBuffer<T> {
    next: usize,
    pending: BTreeMap<usize, T>,
}

impl<T> ReorderBuffer<T> {
    fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Accept chunk `idx` and return every chunk that is now in sequence.
    fn push(&mut self, idx: usize, item: T) -> Vec<T> {
        self.pending.insert(idx, item);
        let mut ready = Vec::new();
        while let Some(item) = self.pending.remove(&self.next) {
            ready.push(item);
            self.next += 1;
        }
        ready
    }
}

/// Dispatch `lines` to `pool` in chunks and feed the results to `sink` on the
/// calling thread.
///
/// Stops at the first worker or sink error; chunks still running are waited
/// for and their results discarded.
fn fan_out<F>(
    pool: &ThreadPool,
    worker: &Worker<'_>,
    lines: &[String],
    chunk_size: usize,
    fan_in: FanIn,
    mut sink: F,
) -> Result<()>
where
    F: FnMut(Vec<Processed>) -> Result<()>,
{
    let (tx, rx) = crossbeam_channel::unbounded::<(usize, Result<Vec<Processed>, LookupError>)>();
    pool.in_place_scope(|scope| {
        for (idx, chunk) in lines.chunks(chunk_size.max(1)).enumerate() {
            let tx = tx.clone();
            scope.spawn(move |_| {
                // rx outlives the scope, so the send cannot fail.
                let _ = tx.send((idx, worker.process_chunk(chunk)));
            });
        }
        drop(tx);

        let mut reorder = ReorderBuffer::new();
        for (idx, result) in &rx {
            let items = result?;
            match fan_in {
                FanIn::Unordered => sink(items)?,
                FanIn::Ordered => {
                    for ready in reorder.push(idx, items) {
                        sink(ready)?;
                    }
                }
            }
        }
        Ok(())
    })
}

/// A configured conversion run.
pub struct Pipeline {
    config: PipelineConfig,
    enricher: Enricher,
    sizing: Box<dyn SizingStrategy>,
}

impl Pipeline {
    /// A run sized by [`MemoryBudget::default`].
    pub fn new(config: PipelineConfig, enricher: Enricher) -> Self {
        Self {
            config,
            enricher,
            sizing: Box::new(MemoryBudget::default()),
        }
    }

    #[must_use]
    pub fn with_sizing(mut self, sizing: Box<dyn SizingStrategy>) -> Self {
        self.sizing = sizing;
        self
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Convert the input into a fresh store at the configured output path.
    ///
    /// # Errors
    /// - [`EtlError::InputNotFile`] if the input is not a regular file;
    /// - [`EtlError::StoreCreate`] if the store cannot be created;
    /// - [`EtlError::BatchFailed`] if a batch could not be written. Batches
    ///   committed before it stay in the store.
    pub fn run(&self) -> Result<RunMetrics> {
        if !self.config.input.is_file() {
            return Err(EtlError::InputNotFile(self.config.input.clone()).into());
        }
        let mut store = Store::create(&self.config.output)?;
        let metrics = self.run_with_store(&mut store);
        let closed = store.close();
        let metrics = metrics?;
        closed?;
        Ok(metrics)
    }

    /// Convert the input into an already open store.
    ///
    /// # Errors
    /// As [`run`](Self::run), minus store creation.
    pub fn run_with_store(&self, store: &mut Store) -> Result<RunMetrics> {
        let started = Instant::now();
        let config = &self.config;

        let total_lines = count_lines(&config.input)?;
        let bytes_per_line = estimate_line_footprint(&config.input, config.sample_lines)?;
        let plan = self.sizing.plan(&SizingInput {
            total_lines,
            bytes_per_line,
            parallelism: config.parallelism,
        });
        info!(
            input = %config.input.display(),
            strategy = self.sizing.name(),
            bytes_per_line,
            fan_in = ?config.fan_in,
            "{plan}"
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(plan.parallelism)
            .thread_name(|i| format!("ironlog-worker-{i}"))
            .build()
            .context("build worker pool")?;
        let worker = Worker {
            format: &config.format,
            enricher: &self.enricher,
        };

        let mut metrics = RunMetrics::planned(&plan, bytes_per_line);
        let mut progress = Progress::new(total_lines, config.show_progress);
        let mut batches = LineBatches::open(&config.input, plan.batch_size)?;
        for (i, lines) in batches.by_ref().enumerate() {
            let lines = lines?;
            let stats = self.write_batch(i + 1, &lines, plan.chunk_size, &pool, &worker, store, &mut progress)?;
            metrics.record_batch(&stats);
        }
        if batches.lines_read() > total_lines {
            debug!(
                counted = total_lines,
                read = batches.lines_read(),
                "final line has no terminator"
            );
        }
        progress.finish();

        metrics.elapsed = started.elapsed();
        info!(
            lines = metrics.lines_processed,
            raw = metrics.raw_failures,
            "completed in {:.2} seconds",
            metrics.elapsed.as_secs_f64()
        );
        Ok(metrics)
    }

    /// Process and commit one batch, rolling it back on any failure.
    #[allow(clippy::too_many_arguments)]
    fn write_batch(
        &self,
        batch: usize,
        lines: &[String],
        chunk_size: usize,
        pool: &ThreadPool,
        worker: &Worker<'_>,
        store: &mut Store,
        progress: &mut Progress,
    ) -> Result<BatchStats> {
        let mut writer = store.begin_batch().map_err(|e| EtlError::batch_failed(batch, e))?;
        let written = fan_out(pool, worker, lines, chunk_size, self.config.fan_in, |items| {
            for item in &items {
                writer.write(item)?;
            }
            progress.advance(items.len() as u64);
            Ok(())
        });

        if let Err(e) = written {
            error!(batch, error = %e, "batch failed, rolling back");
            if let Err(rollback) = writer.rollback() {
                error!(batch, error = %rollback, "rollback failed");
            }
            return Err(EtlError::batch_failed(batch, e).into());
        }
        let stats = writer.commit().map_err(|e| EtlError::batch_failed(batch, e))?;
        debug!(
            batch,
            lines = lines.len(),
            structured = stats.structured,
            raw = stats.raw_failures,
            headers = stats.header_rows,
            geolocation = stats.geolocation_upserts,
            "committed batch"
        );
        Ok(stats)
    }
}
