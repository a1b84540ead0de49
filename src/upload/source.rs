//! Byte-range readers over the source archive

use crate::error::{PusherError, Result};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

pub type ChunkReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Opens `len` bytes of `path` starting at `offset`.
///
/// Every chunk opens its own reader, so implementations must not share a
/// cursor between calls.
#[async_trait]
pub trait RangeSource: Send + Sync {
    async fn open_range(&self, path: &Path, offset: u64, len: u64) -> Result<ChunkReader>;
}

/// Reads ranges straight from a file on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRangeSource;

#[async_trait]
impl RangeSource for FileRangeSource {
    async fn open_range(&self, path: &Path, offset: u64, len: u64) -> Result<ChunkReader> {
        let mut file = tokio::fs::File::open(path).await?;

        let file_len = file.metadata().await?.len();
        if offset.saturating_add(len) > file_len {
            return Err(PusherError::Parse(format!(
                "{} is truncated: range {}..{} exceeds file size {}",
                path.display(),
                offset,
                offset + len,
                file_len
            )));
        }

        file.seek(SeekFrom::Start(offset)).await?;
        Ok(Box::new(file.take(len)))
    }
}
