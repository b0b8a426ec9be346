//! Values flowing from the workers to the writer.
//!
//! Everything here is produced once by a worker, moved through the fan-in
//! channel and consumed by [`crate::store`]; nothing is mutated in between.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// One successfully parsed log line.
///
/// Scalar fields are `None` when the active format has no directive for them
/// or the line carried `-`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParsedRecord {
    pub timestamp: Option<DateTime<FixedOffset>>,
    pub remote_address: Option<String>,
    pub request_line: Option<String>,
    pub status: Option<u16>,
    pub bytes_sent: Option<u64>,
    pub remote_user: Option<String>,
    /// The line exactly as read (terminator stripped).
    pub raw_line: String,
    /// Request headers in line order; duplicates are kept.
    pub headers: Vec<(String, Option<String>)>,
}

/// A line that did not match the active format.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RawFailure {
    pub raw_line: String,
}

/// Result of parsing one line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum LineOutcome {
    Parsed(ParsedRecord),
    Raw(RawFailure),
}

impl LineOutcome {
    #[must_use]
    pub fn raw_line(&self) -> &str {
        match self {
            Self::Parsed(record) => &record.raw_line,
            Self::Raw(failure) => &failure.raw_line,
        }
    }

    #[must_use]
    pub fn is_parsed(&self) -> bool {
        matches!(self, Self::Parsed(_))
    }
}

/// Geographic and network metadata for one address.
///
/// Written as a whole row: a later record for the same address replaces every
/// column, including the ones it leaves null.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EnrichmentRecord {
    pub ip_address: String,
    pub city: Option<String>,
    pub postal: Option<String>,
    pub country: Option<String>,
    pub continent: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub radius: Option<u16>,
    pub asn: Option<u32>,
    pub asn_org: Option<String>,
}

impl EnrichmentRecord {
    /// A record with every dimension unknown.
    #[must_use]
    pub fn empty(ip_address: impl Into<String>) -> Self {
        Self {
            ip_address: ip_address.into(),
            ..Self::default()
        }
    }
}

/// What a worker hands to the writer for one line.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Processed {
    pub outcome: LineOutcome,
    /// Present when enrichment is enabled and the line has a remote address.
    pub enrichment: Option<EnrichmentRecord>,
}
