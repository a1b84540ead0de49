//! Chunk planning and the sequential chunk loop

use crate::error::Result;
use crate::session::SessionTracker;
use crate::upload::source::RangeSource;
use crate::upload::transport::ChunkTransport;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use url::Url;

pub const DEFAULT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;

/// One fixed-size slice of an item, relative to the item's first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

/// Ascending, non-overlapping ranges covering `[0, size)`.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<ChunkRange> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::with_capacity(size.div_ceil(chunk_size) as usize);
    let mut offset = 0;
    let mut index = 0;
    while offset < size {
        let len = chunk_size.min(size - offset);
        ranges.push(ChunkRange { index, offset, len });
        offset += len;
        index += 1;
    }
    ranges
}

/// Invoked with `(item name, cumulative bytes acknowledged for the item)`.
pub type ProgressCallback = Arc<dyn Fn(&str, u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOptions {
    pub chunk_size: u64,
    /// `1` uploads chunks in order; more runs a worker pool
    pub workers: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 1,
        }
    }
}

/// One payload to place at `url`, read from `source_path` at `offset`.
#[derive(Debug, Clone)]
pub struct ItemUpload {
    pub name: String,
    pub source_path: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub url: Url,
}

/// Chunks of one item acknowledged during the current run.
///
/// A whole-item retry consults the ledger so that acknowledged chunks are not
/// sent twice.
#[derive(Debug, Default)]
pub struct ChunkLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    completed: BTreeSet<u64>,
    bytes: u64,
}

impl ChunkLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_done(&self, index: u64) -> bool {
        self.state().completed.contains(&index)
    }

    pub fn completed_bytes(&self) -> u64 {
        self.state().bytes
    }

    pub fn completed_chunks(&self) -> usize {
        self.state().completed.len()
    }

    pub fn pending(&self, plan: &[ChunkRange]) -> Vec<ChunkRange> {
        let state = self.state();
        plan.iter()
            .filter(|range| !state.completed.contains(&range.index))
            .copied()
            .collect()
    }
}

pub struct ChunkedUploader {
    pub(crate) source: Arc<dyn RangeSource>,
    pub(crate) transport: Arc<dyn ChunkTransport>,
    pub(crate) tracker: Arc<SessionTracker>,
    pub(crate) options: UploadOptions,
    pub(crate) progress: Option<ProgressCallback>,
}

impl ChunkedUploader {
    pub fn new(
        source: Arc<dyn RangeSource>,
        transport: Arc<dyn ChunkTransport>,
        tracker: Arc<SessionTracker>,
        options: UploadOptions,
    ) -> Self {
        Self {
            source,
            transport,
            tracker,
            options,
            progress: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    /// Uploads every chunk of `item` not yet in `ledger`.
    ///
    /// Returns the first chunk failure. Chunks acknowledged before the failure
    /// stay in the ledger and in the tracker.
    pub async fn stream_item(&self, item: &ItemUpload, ledger: &ChunkLedger) -> Result<()> {
        let plan = plan_chunks(item.size, self.options.chunk_size);
        let pending = ledger.pending(&plan);

        tracing::debug!(
            file = %item.name,
            chunks = plan.len(),
            pending = pending.len(),
            workers = self.options.workers,
            "streaming item"
        );

        if pending.is_empty() {
            self.tracker.record_progress(&item.name, ledger.completed_bytes());
            return Ok(());
        }

        let start = Instant::now();
        if self.options.workers > 1 {
            self.stream_parallel(item, ledger, pending).await?;
        } else {
            self.stream_sequential(item, ledger, pending).await?;
        }

        tracing::info!(
            file = %item.name,
            bytes = item.size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "item streamed"
        );
        Ok(())
    }

    async fn stream_sequential(
        &self,
        item: &ItemUpload,
        ledger: &ChunkLedger,
        pending: Vec<ChunkRange>,
    ) -> Result<()> {
        for range in pending {
            self.send_chunk(item, range).await?;
            self.acknowledge(item, ledger, range);
        }
        Ok(())
    }

    pub(crate) async fn send_chunk(&self, item: &ItemUpload, range: ChunkRange) -> Result<()> {
        let absolute = item.offset + range.offset;
        tracing::debug!(file = %item.name, chunk = range.index, offset = absolute, len = range.len, "uploading chunk");

        let reader = self
            .source
            .open_range(&item.source_path, absolute, range.len)
            .await?;

        self.transport
            .put_chunk(&item.url, reader, range.len)
            .await
            .inspect_err(|e| {
                tracing::warn!(file = %item.name, chunk = range.index, offset = absolute, error = %e, "chunk failed");
            })
    }

    /// Records a finished chunk in the ledger, tracker and callback under the
    /// ledger lock so cumulative counts are reported in order.
    pub(crate) fn acknowledge(&self, item: &ItemUpload, ledger: &ChunkLedger, range: ChunkRange) {
        let mut state = ledger.state();
        if !state.completed.insert(range.index) {
            return;
        }
        state.bytes += range.len;
        let cumulative = state.bytes;

        self.tracker.record_progress(&item.name, cumulative);
        if let Some(callback) = &self.progress {
            callback(&item.name, cumulative);
        }
    }
}
