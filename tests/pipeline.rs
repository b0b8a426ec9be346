//! End-to-end conversion runs against real SQLite files.

use anyhow::Result;
use ironlog::io::count_lines;
use ironlog::testing::*;
use ironlog::{Enricher, EtlError, FanIn, FixedSize, FormatSpec, MemoryBudget, Pipeline, PipelineConfig, Store};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;

fn count(conn: &Connection, sql: &str) -> Result<i64> {
    Ok(conn.query_row(sql, [], |r| r.get(0))?)
}

fn three_line_log(dir: &Path) -> Result<std::path::PathBuf> {
    write_log_file(
        dir,
        "access.log",
        &[
            combined_line("192.0.2.10", 200),
            GARBAGE_LINE.to_string(),
            combined_line("192.0.2.10", 404),
        ],
    )
}

#[test]
fn test_three_lines_with_lookups() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = three_line_log(dir.path())?;
    let out = dir.path().join("out.sqlite3");
    let enricher = Enricher::disabled()
        .with_city(Arc::new(StaticCityLookup::default().with("192.0.2.10", sample_city("London"))))
        .with_asn(Arc::new(StaticAsnLookup::default().with("192.0.2.10", 64_496, "Example Net")));

    let metrics = Pipeline::new(PipelineConfig::new(&log, &out).with_parallelism(2), enricher)
        .with_sizing(Box::new(FixedSize::new(3, 1)))
        .run()?;
    assert_eq!(metrics.lines_processed, 3);
    assert_eq!(metrics.structured, 2);
    assert_eq!(metrics.raw_failures, 1);
    assert_eq!(metrics.geolocation_upserts, 2);

    let conn = Connection::open(&out)?;
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM requests")?, 3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM requests WHERE status IS NOT NULL")?, 2);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM headers")?, 4);
    assert_eq!(
        count(
            &conn,
            "SELECT COUNT(*) FROM headers h JOIN requests r ON r.id = h.request_id WHERE r.status IS NULL"
        )?,
        0
    );
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM ip_geolocation")?, 1);
    let (city, asn, org): (String, i64, String) = conn.query_row(
        "SELECT city, asn, asn_org FROM ip_geolocation WHERE ip_address = '192.0.2.10'",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;
    assert_eq!((city.as_str(), asn, org.as_str()), ("London", 64_496, "Example Net"));
    Ok(())
}

#[test]
fn test_three_lines_without_lookups() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = three_line_log(dir.path())?;
    let out = dir.path().join("out.sqlite3");

    let metrics = Pipeline::new(PipelineConfig::new(&log, &out), Enricher::disabled()).run()?;
    assert_eq!(metrics.lines_processed, 3);
    assert_eq!(metrics.geolocation_upserts, 0);

    let conn = Connection::open(&out)?;
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM requests")?, 3);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM headers")?, 4);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM ip_geolocation")?, 0);
    Ok(())
}

#[test]
fn test_unresolvable_address_gets_a_null_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = write_log_file(dir.path(), "access.log", &[combined_line("198.51.100.99", 200)])?;
    let out = dir.path().join("out.sqlite3");
    let enricher = Enricher::disabled().with_city(Arc::new(StaticCityLookup::default()));

    Pipeline::new(PipelineConfig::new(&log, &out), enricher).run()?;

    let conn = Connection::open(&out)?;
    let (city, asn): (Option<String>, Option<i64>) =
        conn.query_row("SELECT city, asn FROM ip_geolocation", [], |r| Ok((r.get(0)?, r.get(1)?)))?;
    assert_eq!((city, asn), (None, None));
    Ok(())
}

#[test]
fn test_request_rows_match_line_count() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut lines = generated_log_lines(1_500);
    lines.insert(700, GARBAGE_LINE.to_string());
    lines.push(String::new());
    let log = write_log_file(dir.path(), "access.log", &lines)?;
    let out = dir.path().join("out.sqlite3");

    // A small budget forces many batches.
    let metrics = Pipeline::new(PipelineConfig::new(&log, &out).with_parallelism(3), Enricher::disabled())
        .with_sizing(Box::new(MemoryBudget::new(64 * 1024)))
        .run()?;
    assert!(metrics.batches_committed > 1);

    let expected = count_lines(&log)?;
    assert_eq!(expected, 1_502);
    assert_eq!(metrics.lines_processed, expected);
    let conn = Connection::open(&out)?;
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM requests")? as u64, expected);
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM requests WHERE status IS NULL")?, 2);
    Ok(())
}

#[test]
fn test_missing_host_gets_no_geolocation_row() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let lines = [
        r#"- - - [01/Jan/2024:00:00:00 +0000] "GET / HTTP/1.1" 200 5 "-" "curl""#.to_string(),
        combined_line("192.0.2.10", 200),
    ];
    let log = write_log_file(dir.path(), "access.log", &lines)?;
    let out = dir.path().join("out.sqlite3");
    let enricher =
        Enricher::disabled().with_city(Arc::new(StaticCityLookup::default().with("192.0.2.10", sample_city("London"))));

    let metrics = Pipeline::new(PipelineConfig::new(&log, &out).ordered(), enricher).run()?;
    assert_eq!(metrics.structured, 2);
    assert_eq!(metrics.geolocation_upserts, 1);

    let conn = Connection::open(&out)?;
    let address: Option<String> = conn.query_row("SELECT remote_address FROM requests WHERE id = 1", [], |r| r.get(0))?;
    assert_eq!(address, None);
    let keys: Vec<String> = conn
        .prepare("SELECT ip_address FROM ip_geolocation")?
        .query_map([], |r| r.get(0))?
        .collect::<rusqlite::Result<_>>()?;
    assert_eq!(keys, vec!["192.0.2.10"]);
    Ok(())
}

#[test]
fn test_repeated_header_rows_keep_line_order() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = write_log_file(dir.path(), "access.log", &[r#"192.0.2.1 "a=1" "b=2""#])?;
    let out = dir.path().join("out.sqlite3");
    let format = FormatSpec::parse(r#"%h "%{Cookie}i" "%{Cookie}i""#)?;

    let metrics = Pipeline::new(PipelineConfig::new(&log, &out).with_format(format), Enricher::disabled()).run()?;
    assert_eq!(metrics.structured, 1);
    assert_eq!(metrics.header_rows, 2);

    let conn = Connection::open(&out)?;
    let rows: Vec<(i64, String, Option<String>)> = conn
        .prepare("SELECT request_id, name, value FROM headers ORDER BY rowid")?
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))?
        .collect::<rusqlite::Result<_>>()?;
    assert_eq!(
        rows,
        vec![
            (1, "Cookie".to_string(), Some("a=1".to_string())),
            (1, "Cookie".to_string(), Some("b=2".to_string())),
        ]
    );
    Ok(())
}

#[test]
fn test_unterminated_last_line_is_still_written() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("access.log");
    std::fs::write(
        &log,
        format!("{}\n{}", combined_line("192.0.2.1", 200), combined_line("192.0.2.2", 404)),
    )?;
    let out = dir.path().join("out.sqlite3");

    let metrics = Pipeline::new(PipelineConfig::new(&log, &out).ordered(), Enricher::disabled()).run()?;
    assert_eq!(count_lines(&log)?, 1);
    assert_eq!(metrics.total_lines, 1);
    assert_eq!(metrics.lines_processed, 2);

    let conn = Connection::open(&out)?;
    let status: i64 = conn.query_row("SELECT status FROM requests WHERE id = 2", [], |r| r.get(0))?;
    assert_eq!(status, 404);
    Ok(())
}

#[test]
fn test_parsed_fields_are_stored() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = write_log_file(dir.path(), "access.log", &sample_log_lines())?;
    let out = dir.path().join("out.sqlite3");

    Pipeline::new(PipelineConfig::new(&log, &out).ordered(), Enricher::disabled())
        .with_sizing(Box::new(FixedSize::new(4, 2)))
        .run()?;

    let conn = Connection::open(&out)?;
    type Row = (
        Option<String>,
        Option<String>,
        Option<String>,
        Option<i64>,
        Option<i64>,
        Option<String>,
    );
    let select = "SELECT timestamp, remote_address, request_line, status, bytes_sent, remote_user \
                  FROM requests WHERE id = ?1";
    let row = |id: i64| -> Result<Row> {
        Ok(conn.query_row(select, [id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?, r.get(5)?))
        })?)
    };

    assert_eq!(
        row(1)?,
        (
            Some("2026-10-16T08:30:00+02:00".to_string()),
            Some("192.0.2.10".to_string()),
            Some("GET /index.html HTTP/1.1".to_string()),
            Some(200),
            Some(5120),
            None,
        )
    );
    assert_eq!(row(3)?, (None, None, None, None, None, None));
    assert_eq!(
        row(6)?,
        (
            Some("2026-10-16T08:31:12+02:00".to_string()),
            Some("203.0.113.5".to_string()),
            Some("POST /login HTTP/2.0".to_string()),
            Some(302),
            None,
            Some("alice".to_string()),
        )
    );

    let raw: String = conn.query_row("SELECT raw_line FROM requests WHERE id = 3", [], |r| r.get(0))?;
    assert_eq!(raw, GARBAGE_LINE);

    let headers: Vec<(String, Option<String>)> = conn
        .prepare("SELECT name, value FROM headers WHERE request_id = 6 ORDER BY rowid")?
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<rusqlite::Result<_>>()?;
    assert_eq!(
        headers,
        vec![
            ("Referer".to_string(), None),
            ("User-Agent".to_string(), Some("curl/8.5.0".to_string())),
        ]
    );
    Ok(())
}

#[test]
fn test_ordered_fan_in_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let lines = generated_log_lines(300);
    let log = write_log_file(dir.path(), "access.log", &lines)?;

    let run = |name: &str| -> Result<Vec<(i64, String)>> {
        let out = dir.path().join(name);
        let config = PipelineConfig::new(&log, &out)
            .with_fan_in(FanIn::Ordered)
            .with_parallelism(4);
        Pipeline::new(config, Enricher::disabled())
            .with_sizing(Box::new(FixedSize::new(64, 3)))
            .run()?;
        let conn = Connection::open(&out)?;
        let rows = conn
            .prepare("SELECT id, raw_line FROM requests ORDER BY id")?
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(rows)
    };

    let first = run("first.sqlite3")?;
    let expected: Vec<(i64, String)> = lines.iter().cloned().enumerate().map(|(i, l)| (i as i64 + 1, l)).collect();
    assert_eq!(first, expected);
    assert_eq!(run("second.sqlite3")?, first);
    Ok(())
}

#[test]
fn test_last_occurrence_wins_across_batches() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let lines = vec![
        combined_line("192.0.2.10", 200),
        combined_line("192.0.2.11", 200),
        combined_line("192.0.2.10", 500),
    ];
    let log = write_log_file(dir.path(), "access.log", &lines)?;
    let mut store = Store::open_in_memory()?;
    let enricher = Enricher::disabled().with_asn(Arc::new(
        StaticAsnLookup::default()
            .with("192.0.2.10", 64_496, "Example Net")
            .with("192.0.2.11", 64_497, "Other Net"),
    ));

    let metrics = Pipeline::new(PipelineConfig::new(&log, "unused.sqlite3").ordered(), enricher)
        .with_sizing(Box::new(FixedSize::new(1, 1)))
        .run_with_store(&mut store)?;
    assert_eq!(metrics.batches_committed, 3);
    assert_eq!(metrics.geolocation_upserts, 3);

    let counts = store.table_counts()?;
    assert_eq!(counts.requests, 3);
    assert_eq!(counts.ip_geolocation, 2);
    Ok(())
}

#[test]
fn test_existing_output_is_replaced() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = three_line_log(dir.path())?;
    let out = dir.path().join("out.sqlite3");

    let pipeline = Pipeline::new(PipelineConfig::new(&log, &out), Enricher::disabled());
    pipeline.run()?;
    pipeline.run()?;

    let conn = Connection::open(&out)?;
    assert_eq!(count(&conn, "SELECT COUNT(*) FROM requests")?, 3);
    Ok(())
}

#[test]
fn test_missing_input_is_rejected_before_any_work() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("out.sqlite3");

    let err = Pipeline::new(PipelineConfig::new(dir.path(), &out), Enricher::disabled())
        .run()
        .err()
        .ok_or_else(|| anyhow::anyhow!("a directory is not a log file"))?;
    assert!(matches!(err.downcast_ref::<EtlError>(), Some(EtlError::InputNotFile(_))));
    assert!(!out.exists());
    Ok(())
}

#[test]
fn test_empty_log_creates_empty_store() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = dir.path().join("empty.log");
    std::fs::write(&log, "")?;
    let out = dir.path().join("out.sqlite3");

    let metrics = Pipeline::new(PipelineConfig::new(&log, &out), Enricher::disabled()).run()?;
    assert_eq!(metrics.lines_processed, 0);
    assert_eq!(metrics.batches_committed, 0);
    assert!(out.is_file());
    Ok(())
}

#[test]
fn test_metrics_are_saved_as_json() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let log = three_line_log(dir.path())?;
    let metrics = Pipeline::new(
        PipelineConfig::new(&log, dir.path().join("out.sqlite3")),
        Enricher::disabled(),
    )
    .run()?;

    let path = dir.path().join("metrics.json");
    metrics.save_to_file(&path)?;
    let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
    assert_eq!(value["lines_processed"], 3);
    assert_eq!(value["raw_failures"], 1);
    assert_eq!(value["total_lines"], 3);
    Ok(())
}
