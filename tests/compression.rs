#[cfg(feature = "compression-gzip")]
mod gzip_input {
    use anyhow::Result;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use ironlog::io::{LineBatches, auto_detect_reader, count_lines, estimate_line_footprint};
    use ironlog::testing::*;
    use ironlog::{Enricher, Pipeline, PipelineConfig};
    use std::fs::File;
    use std::io::{Read, Write};
    use std::path::{Path, PathBuf};

    fn write_gzip(dir: &Path, name: &str, lines: &[String]) -> Result<PathBuf> {
        let path = dir.join(name);
        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes())?;
            encoder.write_all(b"\n")?;
        }
        encoder.finish()?;
        Ok(path)
    }

    #[test]
    fn test_gzip_log_is_counted_and_converted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let lines = sample_log_lines();
        let log = write_gzip(dir.path(), "access.log.gz", &lines)?;

        assert_eq!(count_lines(&log)?, lines.len() as u64);
        assert!(estimate_line_footprint(&log, 100)? > 100);

        let metrics = Pipeline::new(
            PipelineConfig::new(&log, dir.path().join("out.sqlite3")),
            Enricher::disabled(),
        )
        .run()?;
        assert_eq!(metrics.lines_processed, 6);
        assert_eq!(metrics.raw_failures, 1);
        Ok(())
    }

    #[test]
    fn test_gzip_detected_without_extension() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let log = write_gzip(dir.path(), "access.log", &generated_log_lines(10))?;

        let batches: Vec<Vec<String>> = LineBatches::open(&log, 4)?.collect::<Result<_>>()?;
        let sizes: Vec<usize> = batches.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(batches[0][0], combined_line("192.0.2.10", 200));
        Ok(())
    }

    #[test]
    fn test_gzip_stream_detected_by_magic() -> Result<()> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"line one\nline two\n")?;
        let compressed = encoder.finish()?;

        let mut reader = auto_detect_reader(std::io::Cursor::new(compressed), "access.log.1")?;
        let mut out = String::new();
        reader.read_to_string(&mut out)?;
        assert_eq!(out, "line one\nline two\n");
        Ok(())
    }
}

#[test]
fn test_plain_text_passes_through() -> anyhow::Result<()> {
    use std::io::Read;

    let data = b"GET / HTTP/1.1\n".to_vec();
    let mut reader = ironlog::io::auto_detect_reader(std::io::Cursor::new(data.clone()), "access.log")?;
    let mut out = Vec::new();
    reader.read_to_end(&mut out)?;
    assert_eq!(out, data);
    Ok(())
}

#[test]
fn test_plain_batches_strip_terminators() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("crlf.log");
    std::fs::write(&path, "first\r\nsecond\nthird")?;

    let mut batches = ironlog::io::LineBatches::open(&path, 2)?;
    assert_eq!(batches.next().transpose()?, Some(vec!["first".to_string(), "second".to_string()]));
    assert_eq!(batches.next().transpose()?, Some(vec!["third".to_string()]));
    assert!(batches.next().is_none());
    assert_eq!(batches.lines_read(), 3);
    Ok(())
}
