//! Line-level access to a log file: counting, sampling and batched streaming.
//!
//! - [`count_lines`] counts `\n` bytes block by block without splitting lines.
//! - [`estimate_line_footprint`] samples a prefix to estimate bytes per line.
//! - [`LineBatches`] streams the file as `Vec<String>` batches of bounded size.
//!
//! All three go through [`open_log`](crate::io::compression::open_log) and thus
//! handle compressed input transparently.

use crate::io::compression::open_log;
use anyhow::{Context, Result};
use std::io::{BufRead, ErrorKind, Read};
use std::path::{Path, PathBuf};

/// Block size used by [`count_lines`].
pub const COUNT_BLOCK_SIZE: usize = 1024 * 1024;

/// Default number of lines sampled by [`estimate_line_footprint`].
pub const DEFAULT_SAMPLE_LINES: usize = 1000;

/// Count the line terminators (`\n`) in a log file.
///
/// The file is read in [`COUNT_BLOCK_SIZE`] blocks, so memory use does not
/// depend on file size. A final line without a terminator is not counted,
/// though [`LineBatches`] still yields it.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn count_lines(path: impl AsRef<Path>) -> Result<u64> {
    let path = path.as_ref();
    let mut reader = open_log(path)?;
    let mut block = vec![0u8; COUNT_BLOCK_SIZE];
    let mut total: u64 = 0;
    loop {
        let n = match reader.read(&mut block) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).with_context(|| format!("count lines in {}", path.display())),
        };
        total += block[..n].iter().filter(|&&b| b == b'\n').count() as u64;
    }
    Ok(total)
}

/// Estimate the mean in-memory footprint of one line, in bytes.
///
/// Reads up to `sample` lines. The footprint of a line is its raw length
/// (terminator included) plus the size of an owned `String`. The mean is
/// rounded and never below 1; an empty file (or `sample == 0`) yields 1.
///
/// # Errors
/// Returns an error if the file cannot be opened or read.
pub fn estimate_line_footprint(path: impl AsRef<Path>, sample: usize) -> Result<u64> {
    let path = path.as_ref();
    let mut reader = open_log(path)?;
    let mut buf = Vec::new();
    let mut bytes: u64 = 0;
    let mut lines: u64 = 0;
    while (lines as usize) < sample {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("sample line {} in {}", lines + 1, path.display()))?;
        if n == 0 {
            break;
        }
        bytes += (n + size_of::<String>()) as u64;
        lines += 1;
    }
    if lines == 0 {
        return Ok(1);
    }
    Ok(((bytes as f64) / (lines as f64)).round().max(1.0) as u64)
}

/// Strip one trailing `\n` or `\r\n` and decode lossily.
///
/// Invalid UTF-8 is replaced rather than rejected, so an oddly encoded line
/// still reaches the parser (and becomes a raw row at worst).
pub(crate) fn decode_line(mut raw: &[u8]) -> String {
    if let Some(rest) = raw.strip_suffix(b"\n") {
        raw = rest.strip_suffix(b"\r").unwrap_or(rest);
    }
    String::from_utf8_lossy(raw).into_owned()
}

/// Iterator over consecutive batches of at most `batch_size` lines.
///
/// Only one batch is materialised at a time; the next one is read when the
/// caller asks for it, which is what bounds the pipeline's working set.
pub struct LineBatches {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    batch_size: usize,
    line_no: u64,
    buf: Vec<u8>,
    done: bool,
}

impl LineBatches {
    /// Open `path` for batched reading. A `batch_size` of 0 is treated as 1.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: impl AsRef<Path>, batch_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let reader = open_log(&path)?;
        Ok(Self {
            path,
            reader,
            batch_size: batch_size.max(1),
            line_no: 0,
            buf: Vec::new(),
            done: false,
        })
    }

    /// Number of lines handed out so far.
    #[must_use]
    pub fn lines_read(&self) -> u64 {
        self.line_no
    }

    fn next_batch(&mut self) -> Result<Vec<String>> {
        let mut batch = Vec::new();
        while batch.len() < self.batch_size {
            self.buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .with_context(|| format!("read line {} in {}", self.line_no + 1, self.path.display()))?;
            if n == 0 {
                self.done = true;
                break;
            }
            self.line_no += 1;
            batch.push(decode_line(&self.buf));
        }
        Ok(batch)
    }
}

impl Iterator for LineBatches {
    type Item = Result<Vec<String>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_batch() {
            Ok(batch) if batch.is_empty() => None,
            Ok(batch) => Some(Ok(batch)),
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
