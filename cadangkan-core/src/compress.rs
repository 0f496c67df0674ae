//! Streaming compression with simultaneous checksumming.
//!
//! The dump subprocess's stdout is piped through here straight into the
//! artifact file: one pass, no intermediate temp file, no full payload in
//! memory. The SHA-256 digest is computed over the bytes as they are written
//! to disk, i.e. over the *compressed* stream, so the recorded checksum
//! verifies the artifact at rest rather than the logical dump.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use std::str::FromStr;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Compression codec for backup artifacts.
///
/// `zstd` is reserved in the sidecar format but not implemented; selecting it
/// fails fast when the engine is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    None,
    Zstd,
}

impl Compression {
    /// Artifact filename extension for this codec.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "sql.gz",
            Compression::None => "sql",
            Compression::Zstd => "sql.zst",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Compression::Gzip => write!(f, "gzip"),
            Compression::None => write!(f, "none"),
            Compression::Zstd => write!(f, "zstd"),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gzip" => Ok(Compression::Gzip),
            "none" => Ok(Compression::None),
            "zstd" => Ok(Compression::Zstd),
            other => Err(Error::Validation(format!(
                "Unknown compression codec '{other}' (expected gzip, none or zstd)"
            ))),
        }
    }
}

/// Outcome of one streaming pass.
#[derive(Debug)]
pub struct StreamStats {
    /// Bytes consumed from the input (the uncompressed dump).
    pub bytes_read: u64,
    /// Bytes written to the artifact file.
    pub bytes_written: u64,
    /// `sha256:<hex>` over the written bytes.
    pub checksum: String,
}

/// Writer adapter that feeds every written byte into a SHA-256 accumulator.
struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: AsyncWrite + Unpin> HashingWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    fn finish(self) -> (u64, String) {
        (self.written, format_checksum(&self.hasher.finalize()))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for HashingWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        let me = self.get_mut();
        match Pin::new(&mut me.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                me.hasher.update(&buf[..n]);
                me.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Streams bytes into a stored artifact, compressing and hashing in one pass.
#[derive(Debug, Clone, Copy)]
pub struct CompressionEngine {
    codec: Compression,
}

impl CompressionEngine {
    /// Build an engine for the given codec. Fails fast for codecs that are
    /// declared but not implemented.
    pub fn new(codec: Compression) -> Result<Self> {
        if codec == Compression::Zstd {
            return Err(Error::NotImplemented("zstd compression"));
        }
        Ok(Self { codec })
    }

    pub fn codec(&self) -> Compression {
        self.codec
    }

    /// Copy `input` through the codec into `dest`, returning byte counts and
    /// the checksum of the stored bytes.
    pub async fn stream_compress<R>(&self, mut input: R, dest: &Path) -> Result<StreamStats>
    where
        R: AsyncRead + Unpin,
    {
        let file = File::create(dest).await.map_err(|e| Error::Storage {
            op: "create",
            path: dest.to_path_buf(),
            source: e,
        })?;
        let hashing = HashingWriter::new(file);

        match self.codec {
            Compression::Gzip => {
                let mut encoder =
                    async_compression::tokio::write::GzipEncoder::new(hashing);
                let bytes_read = tokio::io::copy(&mut input, &mut encoder)
                    .await
                    .map_err(|e| Error::Compression(e.to_string()))?;
                encoder
                    .shutdown()
                    .await
                    .map_err(|e| Error::Compression(e.to_string()))?;
                let (bytes_written, checksum) = encoder.into_inner().finish();
                Ok(StreamStats {
                    bytes_read,
                    bytes_written,
                    checksum,
                })
            }
            Compression::None => {
                let mut hashing = hashing;
                let bytes_read = tokio::io::copy(&mut input, &mut hashing)
                    .await
                    .map_err(|e| Error::Compression(e.to_string()))?;
                hashing
                    .shutdown()
                    .await
                    .map_err(|e| Error::Compression(e.to_string()))?;
                let (bytes_written, checksum) = hashing.finish();
                Ok(StreamStats {
                    bytes_read,
                    bytes_written,
                    checksum,
                })
            }
            Compression::Zstd => Err(Error::NotImplemented("zstd compression")),
        }
    }

    /// Open a stored artifact as a stream of the original uncompressed
    /// bytes. Codec errors (truncated or corrupt streams) surface as read
    /// errors rather than silent truncation.
    pub async fn open_decompressed(
        &self,
        path: &Path,
    ) -> Result<Box<dyn AsyncRead + Unpin + Send>> {
        let file = File::open(path).await.map_err(|e| Error::Storage {
            op: "open",
            path: path.to_path_buf(),
            source: e,
        })?;
        match self.codec {
            Compression::Gzip => Ok(Box::new(
                async_compression::tokio::bufread::GzipDecoder::new(BufReader::new(file)),
            )),
            Compression::None => Ok(Box::new(file)),
            Compression::Zstd => Err(Error::NotImplemented("zstd compression")),
        }
    }
}

/// Recompute the `sha256:<hex>` checksum of a file as stored on disk.
pub async fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).await.map_err(|e| Error::Storage {
        op: "open",
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format_checksum(&hasher.finalize()))
}

fn format_checksum(digest: &[u8]) -> String {
    let mut out = String::with_capacity(7 + digest.len() * 2);
    out.push_str("sha256:");
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_gzip_round_trip() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dump.sql.gz");
        let payload = b"CREATE TABLE t (id INT);\nINSERT INTO t VALUES (1),(2),(3);\n".repeat(100);

        let engine = CompressionEngine::new(Compression::Gzip).unwrap();
        let stats = engine.stream_compress(payload.as_slice(), &dest).await.unwrap();

        assert_eq!(stats.bytes_read, payload.len() as u64);
        assert!(stats.bytes_written > 0);
        assert!(stats.bytes_written < stats.bytes_read); // repetitive input compresses

        let mut reader = engine.open_decompressed(&dest).await.unwrap();
        let mut restored = Vec::new();
        reader.read_to_end(&mut restored).await.unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn test_none_round_trip() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dump.sql");
        let payload = b"SELECT 1;\n".to_vec();

        let engine = CompressionEngine::new(Compression::None).unwrap();
        let stats = engine.stream_compress(payload.as_slice(), &dest).await.unwrap();
        assert_eq!(stats.bytes_read, payload.len() as u64);
        assert_eq!(stats.bytes_written, payload.len() as u64);

        let mut reader = engine.open_decompressed(&dest).await.unwrap();
        let mut restored = Vec::new();
        reader.read_to_end(&mut restored).await.unwrap();
        assert_eq!(restored, payload);
    }

    #[tokio::test]
    async fn test_checksum_matches_stored_bytes() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dump.sql.gz");
        let engine = CompressionEngine::new(Compression::Gzip).unwrap();
        let stats = engine
            .stream_compress(&b"some dump content"[..], &dest)
            .await
            .unwrap();

        assert!(stats.checksum.starts_with("sha256:"));
        assert_eq!(stats.checksum.len(), "sha256:".len() + 64);

        // Re-reading the artifact must reproduce the recorded checksum.
        let recomputed = hash_file(&dest).await.unwrap();
        assert_eq!(recomputed, stats.checksum);

        let size = std::fs::metadata(&dest).unwrap().len();
        assert_eq!(size, stats.bytes_written);
    }

    #[tokio::test]
    async fn test_zstd_fails_fast() {
        match CompressionEngine::new(Compression::Zstd) {
            Err(Error::NotImplemented(what)) => assert!(what.contains("zstd")),
            other => panic!("expected NotImplemented, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_corrupt_gzip_surfaces_error() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("dump.sql.gz");
        std::fs::write(&dest, b"this is not a gzip stream").unwrap();

        let engine = CompressionEngine::new(Compression::Gzip).unwrap();
        let mut reader = engine.open_decompressed(&dest).await.unwrap();
        let mut sink = Vec::new();
        assert!(reader.read_to_end(&mut sink).await.is_err());
    }

    #[test]
    fn test_codec_parsing_and_extensions() {
        assert_eq!("gzip".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!("lz4".parse::<Compression>().is_err());
        assert_eq!(Compression::Gzip.extension(), "sql.gz");
        assert_eq!(Compression::None.extension(), "sql");
        assert_eq!(Compression::Zstd.extension(), "sql.zst");
    }
}
