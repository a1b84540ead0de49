//! Worker pool over the chunks of a single item

use crate::error::{PusherError, Result};
use crate::upload::chunked::{ChunkLedger, ChunkRange, ChunkedUploader, ItemUpload};
use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub const MAX_WORKERS: usize = 10;

impl ChunkedUploader {
    /// Runs `workers` concurrent loops pulling chunks from a shared queue.
    ///
    /// A failing worker records its error and keeps pulling; the pool drains
    /// the whole queue before the first recorded error is returned.
    pub(crate) async fn stream_parallel(
        &self,
        item: &ItemUpload,
        ledger: &ChunkLedger,
        pending: Vec<ChunkRange>,
    ) -> Result<()> {
        let workers = self.options.workers.clamp(1, MAX_WORKERS).min(pending.len());
        let queue = Mutex::new(VecDeque::from(pending));
        let first_error: Mutex<Option<PusherError>> = Mutex::new(None);
        let failures = AtomicUsize::new(0);

        tracing::debug!(file = %item.name, workers, "starting chunk workers");

        let worker_loops = (0..workers).map(|worker_id| {
            let queue = &queue;
            let first_error = &first_error;
            let failures = &failures;
            async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(|p| p.into_inner())
                        .pop_front();
                    let Some(range) = next else {
                        break;
                    };

                    tracing::trace!(worker = worker_id, chunk = range.index, "worker picked chunk");
                    match self.send_chunk(item, range).await {
                        Ok(()) => self.acknowledge(item, ledger, range),
                        Err(e) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                        }
                    }
                }
            }
        });

        join_all(worker_loops).await;

        match first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
            Some(error) => {
                tracing::warn!(
                    file = %item.name,
                    failed_chunks = failures.load(Ordering::Relaxed),
                    completed_chunks = ledger.completed_chunks(),
                    "parallel upload finished with failures"
                );
                Err(error)
            }
            None => Ok(()),
        }
    }
}
