//! Apache `LogFormat` strings compiled into line matchers.
//!
//! A [`FormatSpec`] is built once at startup from a format such as
//! [`COMBINED`] and shared read-only by every worker. Each `%` directive
//! becomes one capture group of an anchored [`Regex`]; literal text is matched
//! verbatim. Directives between double quotes accept Apache's escaped strings,
//! bare directives match up to the next space.
//!
//! Parsing a line never fails: a line that does not match, or whose timestamp
//! or numbers do not parse, comes back as [`LineOutcome::Raw`].

use crate::record::{LineOutcome, ParsedRecord, RawFailure};
use chrono::DateTime;
use regex::Regex;
use std::fmt;
use thiserror::Error;

/// NCSA extended/combined log format.
pub const COMBINED: &str = r#"%h %l %u %t "%r" %>s %b "%{Referer}i" "%{User-Agent}i""#;
/// Common Log Format.
pub const COMMON: &str = r#"%h %l %u %t "%r" %>s %b"#;
/// Combined format prefixed with the virtual host and port.
pub const VHOST_COMBINED: &str = r#"%v:%p %h %l %u %t "%r" %>s %O "%{Referer}i" "%{User-Agent}i""#;
/// Apache's `referer` log.
pub const REFERER: &str = "%{Referer}i -> %U";
/// Apache's `agent` log.
pub const AGENT: &str = "%{User-agent}i";

const CLF_TIME: &str = "%d/%b/%Y:%H:%M:%S %z";
const QUOTED: &str = r#"((?:[^"\\]|\\.)*)"#;
const BARE: &str = r"(\S*)";
const NUMBER: &str = r"(-|\d+)";
const SECONDS: &str = r"(-|\d+(?:\.\d+)?)";

/// A format string that cannot be compiled.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("format string is empty")]
    Empty,
    #[error("unsupported directive '{directive}' at byte {position}")]
    UnsupportedDirective { directive: String, position: usize },
    #[error("unterminated '%{{' at byte {position}")]
    Unterminated { position: usize },
    #[error("format string ends with a bare '%'")]
    Dangling,
}

/// What a capture group feeds into.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Field {
    RemoteHost,
    RemoteAddr,
    RemoteUser,
    Time,
    RequestLine,
    FinalStatus,
    OriginalStatus,
    Bytes,
    RequestHeader(String),
    Ignored,
}

/// A compiled log format.
#[derive(Clone)]
pub struct FormatSpec {
    source: String,
    regex: Regex,
    fields: Vec<Field>,
}

impl fmt::Debug for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatSpec").field("source", &self.source).finish_non_exhaustive()
    }
}

impl Default for FormatSpec {
    fn default() -> Self {
        Self::combined()
    }
}

impl FormatSpec {
    /// The combined log format.
    #[must_use]
    pub fn combined() -> Self {
        Self::parse(COMBINED).unwrap_or_else(|e| unreachable!("built-in format is valid: {e}"))
    }

    /// Resolve a format nickname (`combined`, `common`, ...).
    #[must_use]
    pub fn nickname(name: &str) -> Option<&'static str> {
        match name.to_ascii_lowercase().as_str() {
            "combined" => Some(COMBINED),
            "common" | "clf" => Some(COMMON),
            "vhost_combined" => Some(VHOST_COMBINED),
            "referer" => Some(REFERER),
            "agent" => Some(AGENT),
            _ => None,
        }
    }

    /// Compile a format string or nickname.
    ///
    /// # Errors
    /// Returns a [`FormatError`] for empty formats and unsupported directives.
    pub fn parse(format: &str) -> Result<Self, FormatError> {
        let source = Self::nickname(format).unwrap_or(format);
        if source.is_empty() {
            return Err(FormatError::Empty);
        }

        let mut pattern = String::from("^");
        let mut fields = Vec::new();
        let mut literal = String::new();
        let bytes = source.as_bytes();
        let mut i = 0;

        while i < bytes.len() {
            if bytes[i] != b'%' {
                let ch = source[i..].chars().next().unwrap_or_default();
                literal.push(ch);
                i += ch.len_utf8();
                continue;
            }
            let start = i;
            i += 1;
            if i >= bytes.len() {
                return Err(FormatError::Dangling);
            }
            if bytes[i] == b'%' {
                literal.push('%');
                i += 1;
                continue;
            }

            // Modifiers: `<`/`>` and status conditions like `400,501` or `!200`.
            let mut redirect = None;
            while i < bytes.len() && matches!(bytes[i], b'<' | b'>' | b'!' | b',' | b'0'..=b'9') {
                if matches!(bytes[i], b'<' | b'>') {
                    redirect = Some(bytes[i]);
                }
                i += 1;
            }

            let mut argument = None;
            if i < bytes.len() && bytes[i] == b'{' {
                let close = source[i..]
                    .find('}')
                    .ok_or(FormatError::Unterminated { position: start })?;
                argument = Some(source[i + 1..i + close].to_string());
                i += close + 1;
            }

            let Some(letter) = source[i.min(source.len())..].chars().next() else {
                return Err(FormatError::Dangling);
            };
            i += letter.len_utf8();

            let quoted = literal.ends_with('"');
            pattern.push_str(&regex::escape(&literal));
            literal.clear();

            let text = if quoted { QUOTED } else { BARE };
            let (field, group) = match (letter, argument) {
                ('h', None) => (Field::RemoteHost, text),
                ('a', None) => (Field::RemoteAddr, text),
                ('u', None) => (Field::RemoteUser, text),
                ('t', None) => (Field::Time, r"\[([^\]]*)\]"),
                ('r', None) => (Field::RequestLine, text),
                ('s', None) if redirect == Some(b'>') => (Field::FinalStatus, NUMBER),
                ('s', None) => (Field::OriginalStatus, NUMBER),
                ('b' | 'B' | 'O', None) => (Field::Bytes, NUMBER),
                ('i', Some(name)) => (Field::RequestHeader(name), text),
                ('o' | 'e' | 'n' | 'C', Some(_)) => (Field::Ignored, text),
                ('A' | 'f' | 'H' | 'l' | 'm' | 'q' | 'U' | 'v' | 'V', None) => (Field::Ignored, text),
                ('p' | 'P' | 'k' | 'I' | 'D', None) => (Field::Ignored, NUMBER),
                ('T', None) => (Field::Ignored, SECONDS),
                (other, argument) => {
                    let directive = match argument {
                        Some(arg) => format!("%{{{arg}}}{other}"),
                        None => format!("%{other}"),
                    };
                    return Err(FormatError::UnsupportedDirective { directive, position: start });
                }
            };
            pattern.push_str(group);
            fields.push(field);
        }
        pattern.push_str(&regex::escape(&literal));
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| FormatError::UnsupportedDirective {
            directive: e.to_string(),
            position: 0,
        })?;
        Ok(Self {
            source: source.to_string(),
            regex,
            fields,
        })
    }

    /// The format string this was compiled from.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Whether lines in this format carry request headers.
    #[must_use]
    pub fn has_headers(&self) -> bool {
        self.fields.iter().any(|f| matches!(f, Field::RequestHeader(_)))
    }

    /// Parse one line; never fails.
    #[must_use]
    pub fn parse_line(&self, line: &str) -> LineOutcome {
        match self.try_parse(line) {
            Some(record) => LineOutcome::Parsed(record),
            None => LineOutcome::Raw(RawFailure {
                raw_line: line.to_string(),
            }),
        }
    }

    fn try_parse(&self, line: &str) -> Option<ParsedRecord> {
        let caps = self.regex.captures(line)?;
        let mut record = ParsedRecord {
            timestamp: None,
            remote_address: None,
            request_line: None,
            status: None,
            bytes_sent: None,
            remote_user: None,
            raw_line: line.to_string(),
            headers: Vec::new(),
        };
        let mut remote_addr = None;
        let mut original_status = None;

        for (field, value) in self.fields.iter().zip(caps.iter().skip(1)) {
            let value = value.map_or("", |m| m.as_str());
            match field {
                Field::RemoteHost => record.remote_address = address(value),
                Field::RemoteAddr => remote_addr = address(value),
                Field::RemoteUser => record.remote_user = dash_to_none(value).map(unescape),
                Field::Time => {
                    record.timestamp = Some(DateTime::parse_from_str(value, CLF_TIME).ok()?);
                }
                Field::RequestLine => record.request_line = dash_to_none(value).map(unescape),
                Field::FinalStatus => record.status = parse_number(value)?,
                Field::OriginalStatus => original_status = parse_number(value)?,
                Field::Bytes => record.bytes_sent = parse_number(value)?,
                Field::RequestHeader(name) => {
                    record.headers.push((name.clone(), dash_to_none(value).map(unescape)));
                }
                Field::Ignored => {}
            }
        }
        if record.remote_address.is_none() {
            record.remote_address = remote_addr;
        }
        if record.status.is_none() {
            record.status = original_status;
        }
        Some(record)
    }
}

/// Worker entry point: parse `line` under `format`.
#[must_use]
pub fn parse_line(line: &str, format: &FormatSpec) -> LineOutcome {
    format.parse_line(line)
}

fn dash_to_none(value: &str) -> Option<&str> {
    (value != "-").then_some(value)
}

/// A host of `-` or nothing at all is null.
fn address(value: &str) -> Option<String> {
    dash_to_none(value).filter(|v| !v.is_empty()).map(str::to_string)
}

/// `-` is null; anything else must parse or the whole line is rejected.
fn parse_number<N: std::str::FromStr>(value: &str) -> Option<Option<N>> {
    match value {
        "-" => Some(None),
        v => v.parse().ok().map(Some),
    }
}

/// Decode Apache's escapes (`\"`, `\\`, `\n`, `\t`, `\xHH`).
fn unescape(value: &str) -> String {
    if !value.contains('\\') {
        return value.to_string();
    }
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => out.push(b'\n'),
            b't' => out.push(b'\t'),
            b'r' => out.push(b'\r'),
            b'x' if i + 4 <= bytes.len() => {
                match std::str::from_utf8(&bytes[i + 2..i + 4]).ok().and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 4;
                        continue;
                    }
                    None => out.extend_from_slice(b"\\x"),
                }
            }
            other => out.push(other),
        }
        i += 2;
    }
    String::from_utf8_lossy(&out).into_owned()
}
