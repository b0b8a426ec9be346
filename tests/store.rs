//! Result writer behaviour on an in-memory or temporary store.

use anyhow::Result;
use ironlog::testing::combined_line;
use ironlog::{EnrichmentRecord, FormatSpec, LineOutcome, Processed, RawFailure, Store, TableCounts};

fn processed(address: &str, status: u16, enrichment: Option<EnrichmentRecord>) -> Processed {
    Processed {
        outcome: FormatSpec::combined().parse_line(&combined_line(address, status)),
        enrichment,
    }
}

#[test]
fn test_raw_rows_have_only_the_line() -> Result<()> {
    let mut store = Store::open_in_memory()?;
    let item = Processed {
        outcome: LineOutcome::Raw(RawFailure {
            raw_line: "garbage".to_string(),
        }),
        enrichment: None,
    };
    let stats = store.write_batch([&item])?;
    assert_eq!(stats.raw_failures, 1);

    let row: (Option<String>, Option<String>, Option<i64>, String) = store.connection().query_row(
        "SELECT timestamp, remote_address, status, raw_line FROM requests",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;
    assert_eq!(row, (None, None, None, "garbage".to_string()));
    assert_eq!(store.table_counts()?.headers, 0);
    Ok(())
}

#[test]
fn test_headers_reference_their_request_in_order() -> Result<()> {
    let mut store = Store::open_in_memory()?;
    store.write_batch([&processed("192.0.2.1", 200, None), &processed("192.0.2.2", 500, None)])?;

    let rows: Vec<(i64, String)> = store
        .connection()
        .prepare("SELECT request_id, name FROM headers ORDER BY rowid")?
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    assert_eq!(
        rows,
        vec![
            (1, "Referer".to_string()),
            (1, "User-Agent".to_string()),
            (2, "Referer".to_string()),
            (2, "User-Agent".to_string()),
        ]
    );
    Ok(())
}

#[test]
fn test_geolocation_upsert_replaces_the_whole_row() -> Result<()> {
    let mut store = Store::open_in_memory()?;
    let first = EnrichmentRecord {
        city: Some("London".to_string()),
        asn: Some(20712),
        asn_org: Some("Andrews & Arnold".to_string()),
        ..EnrichmentRecord::empty("192.0.2.1")
    };
    let second = EnrichmentRecord {
        city: Some("Paris".to_string()),
        ..EnrichmentRecord::empty("192.0.2.1")
    };
    store.write_batch([&processed("192.0.2.1", 200, Some(first))])?;
    store.write_batch([&processed("192.0.2.1", 404, Some(second))])?;

    let rows: Vec<(String, Option<String>, Option<i64>)> = store
        .connection()
        .prepare("SELECT ip_address, city, asn FROM ip_geolocation")?
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<rusqlite::Result<_>>()?;
    assert_eq!(rows, vec![("192.0.2.1".to_string(), Some("Paris".to_string()), None)]);
    Ok(())
}

#[test]
fn test_rollback_discards_the_batch() -> Result<()> {
    let mut store = Store::open_in_memory()?;
    store.write_batch([&processed("192.0.2.1", 200, None)])?;

    let mut writer = store.begin_batch()?;
    writer.write(&processed("192.0.2.2", 200, None))?;
    assert_eq!(writer.stats().structured, 1);
    writer.rollback()?;

    let counts = store.table_counts()?;
    assert_eq!(counts.requests, 1);
    assert_eq!(counts.headers, 2);
    Ok(())
}

#[test]
fn test_create_replaces_existing_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.sqlite3");
    std::fs::write(&path, b"stale contents")?;
    let store = Store::create(&path)?;
    assert_eq!(store.table_counts()?, TableCounts::default());
    assert_eq!(store.path(), Some(path.as_path()));
    store.close()
}
