//! SQLite output store and its single writer.
//!
//! A [`Store`] owns the only connection to the output database. Rows are
//! written through a [`BatchWriter`], which wraps one transaction per batch of
//! input lines: either every row of the batch becomes visible at
//! [`BatchWriter::commit`], or none does (explicit [`BatchWriter::rollback`],
//! or dropping the writer).
//!
//! Within a transaction a request row is always inserted before its header
//! rows, which reference it through `last_insert_rowid()`.

use crate::error::EtlError;
use crate::record::{EnrichmentRecord, LineOutcome, ParsedRecord, Processed};
use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, params};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Schema applied to every new store.
pub const SCHEMA: &str = r"
CREATE TABLE requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT,
    remote_address TEXT,
    request_line TEXT,
    status INTEGER,
    bytes_sent INTEGER,
    remote_user TEXT,
    raw_line TEXT NOT NULL
);

CREATE TABLE headers (
    request_id INTEGER NOT NULL REFERENCES requests(id),
    name TEXT NOT NULL,
    value TEXT
);

CREATE TABLE ip_geolocation (
    ip_address TEXT PRIMARY KEY,
    city TEXT,
    postal TEXT,
    country TEXT,
    continent TEXT,
    latitude REAL,
    longitude REAL,
    radius INTEGER,
    asn INTEGER,
    asn_org TEXT
);

CREATE INDEX idx_headers_request ON headers(request_id);
CREATE INDEX idx_requests_remote_address ON requests(remote_address);
";

const INSERT_RAW: &str = "INSERT INTO requests (raw_line) VALUES (?1)";

const INSERT_REQUEST: &str = "INSERT INTO requests \
    (timestamp, remote_address, request_line, status, bytes_sent, remote_user, raw_line) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

const INSERT_HEADER: &str = "INSERT INTO headers (request_id, name, value) VALUES (?1, ?2, ?3)";

const UPSERT_GEOLOCATION: &str = "INSERT OR REPLACE INTO ip_geolocation \
    (ip_address, city, postal, country, continent, latitude, longitude, radius, asn, asn_org) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)";

/// Row counts of one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub structured: u64,
    pub raw_failures: u64,
    pub header_rows: u64,
    pub geolocation_upserts: u64,
}

impl BatchStats {
    /// Request rows written (structured + raw).
    #[must_use]
    pub fn requests(&self) -> u64 {
        self.structured + self.raw_failures
    }
}

/// Row counts of the whole store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub requests: u64,
    pub headers: u64,
    pub ip_geolocation: u64,
}

/// The output database.
pub struct Store {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Store {
    /// Create a fresh store at `path`, replacing any existing file.
    ///
    /// # Errors
    /// Returns [`EtlError::StoreCreate`] if the database cannot be opened or
    /// the schema cannot be applied.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            std::fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
        let conn = Connection::open(path)
            .and_then(|conn| Self::init(&conn).map(|()| conn))
            .map_err(|source| EtlError::StoreCreate {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), "created output store");
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// A throwaway in-memory store.
    ///
    /// # Errors
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory database")?;
        Self::init(&conn).context("apply schema")?;
        Ok(Self { conn, path: None })
    }

    fn init(conn: &Connection) -> rusqlite::Result<()> {
        conn.pragma_update(None, "foreign_keys", true)?;
        conn.execute_batch(SCHEMA)
    }

    /// File backing this store, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Read access to the underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Start the transaction for one batch.
    ///
    /// # Errors
    /// Returns an error if the transaction cannot be opened.
    pub fn begin_batch(&mut self) -> Result<BatchWriter<'_>> {
        let tx = self.conn.transaction().context("begin batch transaction")?;
        Ok(BatchWriter {
            tx,
            stats: BatchStats::default(),
        })
    }

    /// Write `items` as one committed batch.
    ///
    /// # Errors
    /// Returns an error, with nothing committed, if any row fails.
    pub fn write_batch<'a>(&mut self, items: impl IntoIterator<Item = &'a Processed>) -> Result<BatchStats> {
        let mut writer = self.begin_batch()?;
        for item in items {
            writer.write(item)?;
        }
        writer.commit()
    }

    /// Current row counts of the three tables.
    ///
    /// # Errors
    /// Returns an error if a count query fails.
    pub fn table_counts(&self) -> Result<TableCounts> {
        let count = |table: &str| -> Result<u64> {
            self.conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
                .map(|n| n as u64)
                .with_context(|| format!("count rows in {table}"))
        };
        Ok(TableCounts {
            requests: count("requests")?,
            headers: count("headers")?,
            ip_geolocation: count("ip_geolocation")?,
        })
    }

    /// Close the connection, surfacing any error SQLite reports on close.
    ///
    /// # Errors
    /// Returns an error if SQLite fails to close the database cleanly.
    pub fn close(self) -> Result<()> {
        self.conn.close().map_err(|(_, e)| e).context("close output store")
    }
}

/// Writes the rows of one batch inside a single transaction.
pub struct BatchWriter<'a> {
    tx: Transaction<'a>,
    stats: BatchStats,
}

impl BatchWriter<'_> {
    /// Write the rows for one processed line.
    ///
    /// # Errors
    /// Returns an error if any statement fails; the transaction stays open and
    /// should be rolled back.
    pub fn write(&mut self, item: &Processed) -> Result<()> {
        match &item.outcome {
            LineOutcome::Raw(failure) => {
                self.tx
                    .prepare_cached(INSERT_RAW)?
                    .execute(params![failure.raw_line])
                    .context("insert raw request row")?;
                self.stats.raw_failures += 1;
            }
            LineOutcome::Parsed(record) => {
                self.insert_request(record)?;
                if let Some(enrichment) = &item.enrichment {
                    self.upsert_geolocation(enrichment)?;
                }
            }
        }
        Ok(())
    }

    fn insert_request(&mut self, record: &ParsedRecord) -> Result<()> {
        self.tx
            .prepare_cached(INSERT_REQUEST)?
            .execute(params![
                record.timestamp.map(|t| t.to_rfc3339()),
                record.remote_address,
                record.request_line,
                record.status,
                record.bytes_sent,
                record.remote_user,
                record.raw_line,
            ])
            .context("insert request row")?;
        let request_id = self.tx.last_insert_rowid();
        self.stats.structured += 1;

        let mut insert_header = self.tx.prepare_cached(INSERT_HEADER)?;
        for (name, value) in &record.headers {
            insert_header
                .execute(params![request_id, name, value])
                .with_context(|| format!("insert header '{name}' of request {request_id}"))?;
            self.stats.header_rows += 1;
        }
        Ok(())
    }

    fn upsert_geolocation(&mut self, e: &EnrichmentRecord) -> Result<()> {
        self.tx
            .prepare_cached(UPSERT_GEOLOCATION)?
            .execute(params![
                e.ip_address,
                e.city,
                e.postal,
                e.country,
                e.continent,
                e.latitude,
                e.longitude,
                e.radius,
                e.asn,
                e.asn_org,
            ])
            .with_context(|| format!("upsert geolocation of {}", e.ip_address))?;
        self.stats.geolocation_upserts += 1;
        Ok(())
    }

    /// Counts of rows written so far in this batch.
    #[must_use]
    pub fn stats(&self) -> BatchStats {
        self.stats
    }

    /// Commit the batch.
    ///
    /// # Errors
    /// Returns an error if the commit fails; nothing of the batch is kept.
    pub fn commit(self) -> Result<BatchStats> {
        self.tx.commit().context("commit batch transaction")?;
        Ok(self.stats)
    }

    /// Discard every row written in this batch.
    ///
    /// # Errors
    /// Returns an error if SQLite fails to roll back.
    pub fn rollback(self) -> Result<()> {
        self.tx.rollback().context("roll back batch transaction")
    }
}
