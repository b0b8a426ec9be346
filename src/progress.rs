//! Live progress and throughput of a run.
//!
//! [`Progress`] counts processed lines against the expected total and renders
//! `count/total rate r/s elapsed s` on an `indicatif` status line. Rendering is
//! throttled; the counters themselves are exact after every call to
//! [`Progress::advance`].

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// Minimum time between two redraws of the status line.
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Format the operator-facing status line.
///
/// ```
/// use ironlog::progress::status_line;
/// use std::time::Duration;
///
/// assert_eq!(status_line(500, 1000, Duration::from_secs(2)), "500/1000 250r/s 2s");
/// ```
#[must_use]
pub fn status_line(count: u64, total: u64, elapsed: Duration) -> String {
    format!(
        "{count}/{total} {:.0}r/s {:.0}s",
        throughput(count, elapsed),
        elapsed.as_secs_f64()
    )
}

/// Lines per second; zero before any time has passed.
#[must_use]
pub fn throughput(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { count as f64 / secs } else { 0.0 }
}

/// Tracks processed lines for one run.
pub struct Progress {
    total: u64,
    count: u64,
    started: Instant,
    last_draw: Instant,
    bar: ProgressBar,
}

impl Progress {
    /// Start tracking a run of `total` lines, drawing to stderr when `visible`.
    #[must_use]
    pub fn new(total: u64, visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total), target);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        let now = Instant::now();
        Self {
            total,
            count: 0,
            started: now,
            last_draw: now,
            bar,
        }
    }

    /// Record `n` more processed lines. The total grows if the count passes it.
    pub fn advance(&mut self, n: u64) {
        self.count += n;
        if self.count > self.total {
            self.total = self.count;
            self.bar.set_length(self.total);
        }
        self.bar.set_position(self.count);
        if self.last_draw.elapsed() >= REDRAW_INTERVAL {
            self.last_draw = Instant::now();
            self.bar.set_message(self.status_line());
        }
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.total
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Processed lines per second since the start.
    #[must_use]
    pub fn throughput(&self) -> f64 {
        throughput(self.count, self.elapsed())
    }

    /// The current status line.
    #[must_use]
    pub fn status_line(&self) -> String {
        status_line(self.count, self.total, self.elapsed())
    }

    /// Clear the status line and return the total elapsed time.
    pub fn finish(self) -> Duration {
        let elapsed = self.elapsed();
        self.bar.finish_and_clear();
        elapsed
    }
}
