//! Pre-built log lines and files for common test scenarios.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// User agent used by [`combined_line`].
pub const SAMPLE_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Referer used by [`combined_line`].
pub const SAMPLE_REFERER: &str = "https://example.com/start.html";

/// A line that matches no standard log format.
pub const GARBAGE_LINE: &str = "this line is definitely not an access log entry";

/// A combined-format line for `address` answering with `status`.
///
/// # Example
///
/// ```
/// use ironlog::testing::combined_line;
///
/// let line = combined_line("192.0.2.10", 404);
/// assert!(line.starts_with("192.0.2.10 - - ["));
/// assert!(line.contains("\" 404 "));
/// ```
#[must_use]
pub fn combined_line(address: &str, status: u16) -> String {
    format!(
        r#"{address} - - [16/Oct/2026:08:30:00 +0200] "GET /index.html HTTP/1.1" {status} 5120 "{SAMPLE_REFERER}" "{SAMPLE_USER_AGENT}""#
    )
}

/// A small mixed log: five well-formed lines from three addresses and one
/// garbage line.
#[must_use]
pub fn sample_log_lines() -> Vec<String> {
    vec![
        combined_line("192.0.2.10", 200),
        combined_line("198.51.100.7", 301),
        GARBAGE_LINE.to_string(),
        combined_line("192.0.2.10", 404),
        combined_line("2001:db8::1", 200),
        r#"203.0.113.5 - alice [16/Oct/2026:08:31:12 +0200] "POST /login HTTP/2.0" 302 - "-" "curl/8.5.0""#.to_string(),
    ]
}

/// `n` well-formed lines cycling through a few addresses and statuses.
#[must_use]
pub fn generated_log_lines(n: usize) -> Vec<String> {
    const ADDRESSES: [&str; 4] = ["192.0.2.10", "192.0.2.11", "198.51.100.7", "203.0.113.5"];
    const STATUSES: [u16; 4] = [200, 200, 404, 500];
    (0..n)
        .map(|i| combined_line(ADDRESSES[i % ADDRESSES.len()], STATUSES[i % STATUSES.len()]))
        .collect()
}

/// Write `lines` to `dir/name`, each terminated by `\n`, and return the path.
///
/// # Errors
/// Returns an error if the file cannot be created or written.
pub fn write_log_file<S: AsRef<str>>(dir: &Path, name: &str, lines: &[S]) -> Result<PathBuf> {
    let path = dir.join(name);
    let file = File::create(&path).with_context(|| format!("create {}", path.display()))?;
    let mut w = BufWriter::new(file);
    for line in lines {
        w.write_all(line.as_ref().as_bytes())?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(path)
}
