//! [EXPANDED] `ByteSource`: the boundary the spec calls "the HTTP/WebDAV
//! transport to the upstream store" and keeps out of core. Digest
//! computation only ever needs "the size" and "a byte range", so that's the
//! entire trait surface; a production deployment plugs in a WebDAV client,
//! tests and local-disk deployments use [`LocalByteSource`].

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use crate::error::{CatalogError, Result};

#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes, without reading content.
    async fn size(&self, path: &Path) -> Result<u64>;

    /// Last-modified time, used as the other half of the HashIndex cache
    /// key alongside size.
    async fn mtime(&self, path: &Path) -> Result<DateTime<Utc>>;

    /// Read exactly `len` bytes starting at `offset`. Must not read
    /// anything outside that range.
    async fn read_range(&self, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Read the whole file. Used by stage-3 background digests that need
    /// a full scan (SHA-1/256/3/MD5/CRC32/BTIHv2).
    async fn read_to_end(&self, path: &Path) -> Result<Vec<u8>> {
        let size = self.size(path).await?;
        self.read_range(path, 0, size).await
    }
}

/// Reads from the local filesystem. Used directly when the catalog root is
/// a local mount, and as the implementation backing tests.
pub struct LocalByteSource {
    pub root: PathBuf,
}

impl LocalByteSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl ByteSource for LocalByteSource {
    async fn size(&self, path: &Path) -> Result<u64> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        Ok(meta.len())
    }

    async fn mtime(&self, path: &Path) -> Result<DateTime<Utc>> {
        let meta = tokio::fs::metadata(self.resolve(path))
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        let modified = meta.modified().map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn read_range(&self, path: &Path, offset: u64, len: u64) -> Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(self.resolve(path))
            .await
            .map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        file.seek(SeekFrom::Start(offset)).await.map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await.map_err(|e| CatalogError::TransientIo(e.to_string()))?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn reads_exact_range() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.bin");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(&(0u8..255).collect::<Vec<_>>()).unwrap();
        drop(f);

        let src = LocalByteSource::new(dir.path());
        let size = src.size(Path::new("f.bin")).await.unwrap();
        assert_eq!(size, 255);
        let chunk = src.read_range(Path::new("f.bin"), 10, 5).await.unwrap();
        assert_eq!(chunk, vec![10, 11, 12, 13, 14]);
    }
}
