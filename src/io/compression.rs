//! Transparent decompression of access-log input.
//!
//! Rotated access logs are usually compressed (`access.log.2.gz`), so every
//! reader in [`crate::io`] goes through [`open_log`], which picks a codec by
//! file extension first and falls back to the stream's magic bytes.
//!
//! ## Built-in codecs
//!
//! - **Gzip** (`.gz`) - feature `compression-gzip`
//! - **Zstd** (`.zst`) - feature `compression-zstd`
//! - **Bzip2** (`.bz2`) - feature `compression-bzip2`
//! - **Xz** (`.xz`) - feature `compression-xz`
//!
//! Additional codecs can be plugged in with [`register_codec`].
//!
//! Compressed streams cannot seek, so counting, sampling and processing each
//! decompress the file from the start.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::{Arc, RwLock};

/// Read buffer used for every opened log.
const READ_BUFFER: usize = 1024 * 1024;

static CODEC_REGISTRY: RwLock<Option<Vec<Arc<dyn DecompressionCodec>>>> = RwLock::new(None);

fn builtin_codecs() -> Vec<Arc<dyn DecompressionCodec>> {
    vec![
        #[cfg(feature = "compression-gzip")]
        Arc::new(GzipCodec),
        #[cfg(feature = "compression-zstd")]
        Arc::new(ZstdCodec),
        #[cfg(feature = "compression-bzip2")]
        Arc::new(Bzip2Codec),
        #[cfg(feature = "compression-xz")]
        Arc::new(XzCodec),
    ]
}

fn registered_codecs() -> Vec<Arc<dyn DecompressionCodec>> {
    if let Ok(lock) = CODEC_REGISTRY.read()
        && let Some(codecs) = lock.as_ref()
    {
        return codecs.clone();
    }
    let mut lock = CODEC_REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    lock.get_or_insert_with(builtin_codecs).clone()
}

/// Register an additional codec, consulted after the built-in ones.
pub fn register_codec(codec: Arc<dyn DecompressionCodec>) {
    let mut lock = CODEC_REGISTRY.write().unwrap_or_else(|e| e.into_inner());
    lock.get_or_insert_with(builtin_codecs).push(codec);
}

/// A decompression algorithm that can be detected from a path or a stream.
///
/// Implementations are stored in a global registry and must be `Send + Sync`.
pub trait DecompressionCodec: Send + Sync {
    /// Codec name used in error context (e.g. "gzip").
    fn name(&self) -> &str;

    /// Lowercase file extensions including the leading dot.
    fn extensions(&self) -> &[&str];

    /// Magic bytes at the start of the stream, if the format has any.
    fn magic_bytes(&self) -> Option<&[u8]>;

    /// Wrap `reader` so that reading yields decompressed bytes.
    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>>;
}

fn detect_from_extension(path: &Path) -> Option<Arc<dyn DecompressionCodec>> {
    let name = path.to_string_lossy().to_lowercase();
    registered_codecs()
        .into_iter()
        .find(|codec| codec.extensions().iter().any(|ext| name.ends_with(ext)))
}

fn detect_from_magic<R: BufRead>(reader: &mut R) -> Option<Arc<dyn DecompressionCodec>> {
    let head = reader.fill_buf().ok()?;
    if head.is_empty() {
        return None;
    }
    registered_codecs().into_iter().find(|codec| {
        codec
            .magic_bytes()
            .is_some_and(|magic| head.len() >= magic.len() && head.starts_with(magic))
    })
}

/// Wrap `reader` with the codec matching `path_hint`, or the stream's magic
/// bytes, or nothing.
///
/// # Errors
/// Returns an error if the codec fails to initialise on the stream.
pub fn auto_detect_reader<R: Read + Send + 'static>(
    reader: R,
    path_hint: impl AsRef<Path>,
) -> Result<Box<dyn BufRead + Send>> {
    let path_hint = path_hint.as_ref();
    if let Some(codec) = detect_from_extension(path_hint) {
        let inner = codec
            .wrap_reader(Box::new(reader))
            .with_context(|| format!("wrap reader with {} codec", codec.name()))?;
        return Ok(Box::new(BufReader::with_capacity(READ_BUFFER, inner)));
    }

    let mut buffered = BufReader::with_capacity(READ_BUFFER, reader);
    if let Some(codec) = detect_from_magic(&mut buffered) {
        let inner = codec
            .wrap_reader(Box::new(buffered))
            .with_context(|| format!("wrap reader with {} codec", codec.name()))?;
        return Ok(Box::new(BufReader::with_capacity(READ_BUFFER, inner)));
    }
    Ok(Box::new(buffered))
}

/// Open a log file for buffered reading, decompressing it when needed.
///
/// # Errors
/// Returns an error if the file cannot be opened or its codec fails.
pub fn open_log(path: impl AsRef<Path>) -> Result<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    auto_detect_reader(file, path).with_context(|| format!("setup decompression for {}", path.display()))
}

// ============================================================================
// Built-in codecs
// ============================================================================

#[cfg(feature = "compression-gzip")]
struct GzipCodec;

#[cfg(feature = "compression-gzip")]
impl DecompressionCodec for GzipCodec {
    fn name(&self) -> &str {
        "gzip"
    }

    fn extensions(&self) -> &[&str] {
        &[".gz", ".gzip"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x1f, 0x8b])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        // logrotate concatenates members when appending; read all of them
        Ok(Box::new(flate2::read::MultiGzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-zstd")]
struct ZstdCodec;

#[cfg(feature = "compression-zstd")]
impl DecompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        "zstd"
    }

    fn extensions(&self) -> &[&str] {
        &[".zst", ".zstd"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0x28, 0xb5, 0x2f, 0xfd])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        zstd::stream::read::Decoder::new(reader).map(|d| Box::new(d) as Box<dyn Read + Send>)
    }
}

#[cfg(feature = "compression-bzip2")]
struct Bzip2Codec;

#[cfg(feature = "compression-bzip2")]
impl DecompressionCodec for Bzip2Codec {
    fn name(&self) -> &str {
        "bzip2"
    }

    fn extensions(&self) -> &[&str] {
        &[".bz2", ".bzip2"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(b"BZh")
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(bzip2::read::MultiBzDecoder::new(reader)))
    }
}

#[cfg(feature = "compression-xz")]
struct XzCodec;

#[cfg(feature = "compression-xz")]
impl DecompressionCodec for XzCodec {
    fn name(&self) -> &str {
        "xz"
    }

    fn extensions(&self) -> &[&str] {
        &[".xz"]
    }

    fn magic_bytes(&self) -> Option<&[u8]> {
        Some(&[0xfd, 0x37, 0x7a, 0x58, 0x5a, 0x00])
    }

    fn wrap_reader(&self, reader: Box<dyn Read + Send>) -> std::io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(reader)))
    }
}
