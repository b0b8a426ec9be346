//! Command-line surface of the `ironlog` binary.
//!
//! Parsing is done by `clap`; [`Cli::into_run`] then validates every path and
//! opens the lookup databases, so a bad argument fails before any line is read.

use crate::enrich::{Enricher, MaxMindAsn, MaxMindCity};
use crate::error::EtlError;
use crate::format::FormatSpec;
use crate::logging::{LogConfig, LogFormat, LogLevel};
use crate::pipeline::{FanIn, Pipeline, PipelineConfig};
use crate::planner::{FixedSize, MemoryBudget, SizingStrategy};
use anyhow::{Result, bail};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// City database picked up from the working directory when `--geolocate` is absent.
pub const DEFAULT_CITY_DB: &str = "GeoLite2-City.mmdb";

/// ASN database picked up from the working directory when `--asn` is absent.
pub const DEFAULT_ASN_DB: &str = "GeoLite2-ASN.mmdb";

/// Convert a web-server access log into an SQLite database.
#[derive(Parser, Debug)]
#[command(name = "ironlog")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log file to convert
    pub logfile: PathBuf,

    /// Output database (default: <logfile>.sqlite3)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// MaxMind City database used to geolocate addresses
    #[arg(short = 'g', long = "geolocate", env = "IRONLOG_CITY_DB")]
    pub city_db: Option<PathBuf>,

    /// MaxMind ASN database used to resolve address ownership
    #[arg(short, long = "asn", env = "IRONLOG_ASN_DB")]
    pub asn_db: Option<PathBuf>,

    /// Log format string or nickname (combined, common, vhost_combined, referer, agent)
    #[arg(short, long, default_value = "combined")]
    pub format: String,

    /// Write rows in input order instead of completion order
    #[arg(long)]
    pub ordered: bool,

    /// Worker threads (default: number of CPUs)
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Fixed lines per batch instead of memory-based sizing
    #[arg(long, requires = "chunk_size")]
    pub batch_size: Option<usize>,

    /// Fixed lines per chunk (with --batch-size)
    #[arg(long, requires = "batch_size")]
    pub chunk_size: Option<usize>,

    /// Fraction of available memory to size batches against
    #[arg(long, default_value_t = crate::planner::DEFAULT_MEMORY_FRACTION)]
    pub memory_fraction: f64,

    /// Lines sampled to estimate memory per line
    #[arg(long, default_value_t = crate::io::DEFAULT_SAMPLE_LINES)]
    pub sample_lines: usize,

    /// Save run metrics as JSON to this file
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,

    /// Do not draw the progress line
    #[arg(long)]
    pub no_progress: bool,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log line format (text or json)
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

/// A validated invocation, ready to execute.
pub struct Run {
    pub pipeline: Pipeline,
    pub metrics_out: Option<PathBuf>,
}

impl Cli {
    pub fn log_config(&self) -> LogConfig {
        LogConfig::new()
            .with_level(LogLevel::from_verbosity(self.verbose))
            .with_format(self.log_format)
    }

    /// Output path: `--output`, or the log file name with `.sqlite3` appended.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let mut name = self.logfile.as_os_str().to_os_string();
            name.push(".sqlite3");
            PathBuf::from(name)
        })
    }

    /// Validate the arguments and build the pipeline they describe.
    ///
    /// # Errors
    /// [`EtlError::InputNotFile`], [`EtlError::InvalidFormat`] or
    /// [`EtlError::LookupDatabase`]; also a plain error for out-of-range
    /// numeric options.
    pub fn into_run(self) -> Result<Run> {
        if !self.logfile.is_file() {
            return Err(EtlError::InputNotFile(self.logfile.clone()).into());
        }
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            bail!("--memory-fraction must be in (0, 1], got {}", self.memory_fraction);
        }
        let format = FormatSpec::parse(&self.format).map_err(|e| EtlError::InvalidFormat(e.to_string()))?;

        let mut enricher = Enricher::disabled();
        if let Some(path) = resolve_database(self.city_db.as_deref(), DEFAULT_CITY_DB) {
            enricher = enricher.with_city(Arc::new(MaxMindCity::open(&path)?));
        }
        if let Some(path) = resolve_database(self.asn_db.as_deref(), DEFAULT_ASN_DB) {
            enricher = enricher.with_asn(Arc::new(MaxMindAsn::open(&path)?));
        }

        let mut config = PipelineConfig::new(&self.logfile, self.output_path())
            .with_format(format)
            .with_sample_lines(self.sample_lines)
            .with_progress(!self.no_progress);
        if self.ordered {
            config = config.with_fan_in(FanIn::Ordered);
        }
        if let Some(threads) = self.threads {
            config = config.with_parallelism(threads);
        }

        let sizing: Box<dyn SizingStrategy> = match (self.batch_size, self.chunk_size) {
            (Some(batch), Some(chunk)) => Box::new(FixedSize::new(batch, chunk)),
            _ => Box::new(MemoryBudget::from_system(self.memory_fraction)),
        };

        Ok(Run {
            pipeline: Pipeline::new(config, enricher).with_sizing(sizing),
            metrics_out: self.metrics_out,
        })
    }
}

/// An explicit path is always used (and must open); the default is used only
/// if it exists in the working directory.
fn resolve_database(explicit: Option<&Path>, default: &str) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let path = PathBuf::from(default);
            if path.is_file() {
                Some(path)
            } else {
                debug!(path = default, "default lookup database not found, skipping");
                None
            }
        }
    }
}
