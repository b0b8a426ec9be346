//! Input side of the pipeline: compressed-or-plain log files read as lines.

pub mod compression;
pub mod lines;

pub use compression::{DecompressionCodec, auto_detect_reader, open_log, register_codec};
pub use lines::{DEFAULT_SAMPLE_LINES, LineBatches, count_lines, estimate_line_footprint};
