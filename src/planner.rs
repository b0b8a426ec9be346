//! Batch planning: how many lines to hold in memory and how to split them.
//!
//! The planner turns a handful of measurements into a [`BatchPlan`]:
//!
//! 1. **Max lines in memory** -- `floor(budget / bytes_per_line)`.
//! 2. **Batch size** -- max lines divided across the worker count, so that every
//!    worker's share of in-flight lines fits the budget. Clamped to 1.
//! 3. **Chunk size** -- batch size divided across the worker count again; a
//!    chunk is the unit handed to one worker, small enough that a batch spreads
//!    over all workers and large enough to amortise dispatch. Clamped to 1.
//!
//! The arithmetic lives in [`plan_batches`], which is pure. How the inputs are
//! obtained is a [`SizingStrategy`]: [`MemoryBudget`] derives them from system
//! memory, [`FixedSize`] ignores measurements entirely. The pipeline only ever
//! sees the resulting plan.

use std::fmt::{Display, Formatter, Result as FormatResult};
use sysinfo::System;
use tracing::debug;

/// Fraction of available memory the default strategy is allowed to use.
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.7;

/// Measurements a sizing strategy works from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SizingInput {
    /// Lines in the input file.
    pub total_lines: u64,
    /// Estimated footprint of one line, in bytes (at least 1).
    pub bytes_per_line: u64,
    /// Number of workers.
    pub parallelism: usize,
}

/// The sizing decision for one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchPlan {
    /// Lines that fit the memory budget; `None` for fixed plans.
    pub max_lines_in_memory: Option<u64>,
    /// Lines read, processed and committed together.
    pub batch_size: usize,
    /// Lines handed to one worker at a time.
    pub chunk_size: usize,
    /// Number of workers.
    pub parallelism: usize,
    /// Lines in the input file.
    pub total_lines: u64,
}

impl BatchPlan {
    /// Number of batches the input will be split into.
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.total_lines.div_ceil(self.batch_size as u64)
    }
}

impl Display for BatchPlan {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(
            f,
            "{} lines on {} cores, {} lines per batch, {} lines per chunk",
            self.total_lines, self.parallelism, self.batch_size, self.chunk_size
        )?;
        if let Some(max) = self.max_lines_in_memory {
            write!(f, " (at most {max} lines in memory)")?;
        }
        Ok(())
    }
}

/// Compute a plan from a memory budget.
///
/// ```
/// use ironlog::planner::plan_batches;
///
/// let plan = plan_batches(1_000_000, 100, 50_000, 4);
/// assert_eq!(plan.max_lines_in_memory, Some(10_000));
/// assert_eq!(plan.batch_size, 2_500);
/// assert_eq!(plan.chunk_size, 625);
/// ```
#[must_use]
pub fn plan_batches(budget_bytes: u64, bytes_per_line: u64, total_lines: u64, parallelism: usize) -> BatchPlan {
    let parallelism = parallelism.max(1);
    let max_lines = budget_bytes / bytes_per_line.max(1);
    let batch_size = usize::try_from(max_lines / parallelism as u64)
        .unwrap_or(usize::MAX)
        .max(1);
    let chunk_size = (batch_size / parallelism).max(1);
    BatchPlan {
        max_lines_in_memory: Some(max_lines),
        batch_size,
        chunk_size,
        parallelism,
        total_lines,
    }
}

/// A way of choosing batch and chunk sizes.
pub trait SizingStrategy: Send + Sync {
    /// Short label for logs.
    fn name(&self) -> &str;

    /// Produce the plan for the measured input.
    fn plan(&self, input: &SizingInput) -> BatchPlan;
}

/// Size batches so that in-flight lines fit a memory budget.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryBudget {
    /// Budget in bytes.
    pub bytes: u64,
}

impl MemoryBudget {
    /// A fixed budget, mostly useful in tests.
    #[must_use]
    pub fn new(bytes: u64) -> Self {
        Self { bytes }
    }

    /// `fraction` of the memory currently available on this machine.
    #[must_use]
    pub fn from_system(fraction: f64) -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        let available = sys.available_memory();
        let bytes = (available as f64 * fraction.clamp(0.0, 1.0)) as u64;
        debug!(available, fraction, bytes, "derived memory budget");
        Self { bytes }
    }
}

impl Default for MemoryBudget {
    fn default() -> Self {
        Self::from_system(DEFAULT_MEMORY_FRACTION)
    }
}

impl SizingStrategy for MemoryBudget {
    fn name(&self) -> &str {
        "memory-budget"
    }

    fn plan(&self, input: &SizingInput) -> BatchPlan {
        plan_batches(self.bytes, input.bytes_per_line, input.total_lines, input.parallelism)
    }
}

/// Use explicit sizes regardless of measurements.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedSize {
    pub batch_size: usize,
    pub chunk_size: usize,
}

impl FixedSize {
    #[must_use]
    pub fn new(batch_size: usize, chunk_size: usize) -> Self {
        Self { batch_size, chunk_size }
    }
}

impl SizingStrategy for FixedSize {
    fn name(&self) -> &str {
        "fixed"
    }

    fn plan(&self, input: &SizingInput) -> BatchPlan {
        BatchPlan {
            max_lines_in_memory: None,
            batch_size: self.batch_size.max(1),
            chunk_size: self.chunk_size.max(1),
            parallelism: input.parallelism.max(1),
            total_lines: input.total_lines,
        }
    }
}
