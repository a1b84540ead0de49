//! End-to-end transfer of an indexed archive to a datastore
//!
//! Disks are uploaded in archive order. Each disk is wrapped in the retry
//! executor as a whole; inside a run, chunks that were already acknowledged are
//! not re-sent by later attempts. Once every disk is complete the descriptor is
//! handed to the hypervisor and the session file is removed.

use crate::archive::{ArchiveEntry, ArchivePackage};
use crate::config::UploadConfig;
use crate::error::{PusherError, Result};
use crate::hypervisor::{DestinationHandle, HypervisorClient};
use crate::retry::{AttemptFailure, RetryExecutor, RetrySpec};
use crate::session::{SessionTracker, UploadSession};
use crate::upload::{
    ChunkLedger, ChunkTransport, ChunkedUploader, ItemUpload, ProgressCallback, RangeSource,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

/// Invoked with `(item name, attempt, error, delay before next attempt)`.
pub type RetryCallback = Arc<dyn Fn(&str, u32, &PusherError, Duration) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub vm_name: String,
    pub datastore: String,
    pub network: String,
    pub upload: UploadConfig,
    pub retry: RetrySpec,
    /// Scratch directory for extraction mode
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Session state right before the session file was removed
    pub session: UploadSession,
    pub items_uploaded: usize,
    pub items_skipped: usize,
    pub elapsed: Duration,
}

pub struct TransferJob {
    package: ArchivePackage,
    settings: TransferSettings,
    tracker: Arc<SessionTracker>,
    hypervisor: Arc<dyn HypervisorClient>,
    source: Arc<dyn RangeSource>,
    uploader: ChunkedUploader,
    retry: RetryExecutor,
    on_retry: Option<RetryCallback>,
}

impl TransferJob {
    pub fn new(
        package: ArchivePackage,
        settings: TransferSettings,
        tracker: Arc<SessionTracker>,
        hypervisor: Arc<dyn HypervisorClient>,
        source: Arc<dyn RangeSource>,
        transport: Arc<dyn ChunkTransport>,
    ) -> Self {
        let uploader = ChunkedUploader::new(
            Arc::clone(&source),
            transport,
            Arc::clone(&tracker),
            settings.upload.upload_options(),
        );
        let retry = RetryExecutor::new(settings.retry.clone());

        Self {
            package,
            settings,
            tracker,
            hypervisor,
            source,
            uploader,
            retry,
            on_retry: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.uploader = self.uploader.with_progress_callback(callback);
        self
    }

    pub fn with_retry_callback(mut self, callback: RetryCallback) -> Self {
        self.on_retry = Some(callback);
        self
    }

    pub fn tracker(&self) -> &Arc<SessionTracker> {
        &self.tracker
    }

    /// Runs the transfer. On failure the session is persisted so a later run
    /// can skip the disks that finished.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<TransferReport> {
        self.tracker.start_autosave(self.settings.upload.save_interval);

        match self.run_inner(cancel).await {
            Ok(report) => Ok(report),
            Err(e) => {
                if let Err(persist_error) = self.tracker.close() {
                    tracing::error!(error = %persist_error, "failed to persist session after error");
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&self, cancel: &CancellationToken) -> Result<TransferReport> {
        let start = Instant::now();

        self.with_retry(cancel, "connect", || self.hypervisor.connect())
            .await?;
        let destination = self
            .with_retry(cancel, "datastore lookup", || {
                self.hypervisor.lookup_destination(&self.settings.datastore)
            })
            .await?;

        if self.settings.upload.verify_checksums {
            let package = self.package.clone();
            tokio::task::spawn_blocking(move || package.validate_checksums()).await??;
            tracing::info!("archive checksums verified");
        }

        for payload in &self.package.payloads {
            self.tracker.register_item(
                &payload.name,
                payload.size,
                payload.checksum.as_ref().map(|c| c.hex().to_string()),
            );
        }

        let mut items_uploaded = 0;
        let mut items_skipped = 0;
        for payload in &self.package.payloads {
            if self.tracker.is_item_complete(&payload.name) {
                tracing::info!(file = %payload.name, "already uploaded, skipping");
                items_skipped += 1;
                continue;
            }

            self.tracker.restart_item(&payload.name);
            self.transfer_item(cancel, payload, &destination).await?;
            self.tracker.mark_item_complete(&payload.name);
            items_uploaded += 1;
        }

        let descriptor = self.package.read_descriptor()?;
        self.with_retry(cancel, "VM creation", || {
            self.hypervisor.create_item_from_descriptor(
                &descriptor,
                &self.settings.vm_name,
                &destination,
                &self.settings.network,
            )
        })
        .await?;

        let session = self.tracker.snapshot();
        self.tracker.delete()?;

        Ok(TransferReport {
            session,
            items_uploaded,
            items_skipped,
            elapsed: start.elapsed(),
        })
    }

    async fn transfer_item(
        &self,
        cancel: &CancellationToken,
        payload: &ArchiveEntry,
        destination: &DestinationHandle,
    ) -> Result<()> {
        let remote_path = format!("{}/{}", self.settings.vm_name, payload.name);
        let url = self.hypervisor.build_upload_url(destination, &remote_path)?;

        let (source_path, offset, extracted) = if self.settings.upload.stream {
            (self.package.path.clone(), payload.offset, None)
        } else {
            let path = self.extract_payload(payload).await?;
            (path.clone(), 0, Some(path))
        };

        let item = ItemUpload {
            name: payload.name.clone(),
            source_path,
            offset,
            size: payload.size,
            url,
        };
        let ledger = ChunkLedger::new();

        tracing::info!(file = %item.name, size = item.size, offset = payload.offset, "uploading disk");
        let result = self
            .retry
            .execute(
                cancel,
                |_| self.uploader.stream_item(&item, &ledger),
                |failure| self.note_retry(&item.name, failure),
            )
            .await;

        if let Some(path) = extracted {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::warn!(file = %path.display(), error = %e, "failed to remove extracted disk");
            }
        }
        result
    }

    fn note_retry(&self, name: &str, failure: &AttemptFailure<'_>) {
        self.tracker.increment_retry_count();
        if let Some(callback) = &self.on_retry {
            callback(name, failure.attempt, failure.error, failure.delay);
        }
    }

    async fn with_retry<T, Op, Fut>(&self, cancel: &CancellationToken, label: &str, mut op: Op) -> Result<T>
    where
        Op: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.retry
            .execute(cancel, |_| op(), |failure| self.note_retry(label, failure))
            .await
    }

    /// Copies one disk out of the archive into the work directory.
    async fn extract_payload(&self, payload: &ArchiveEntry) -> Result<PathBuf> {
        let file_name = Path::new(&payload.name)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| payload.name.replace('/', "_"));
        let target = self
            .settings
            .work_dir
            .join(format!("{}-{}", self.tracker.session_id(), file_name));

        tracing::info!(file = %payload.name, target = %target.display(), "extracting disk");
        let mut reader = self
            .source
            .open_range(&self.package.path, payload.offset, payload.size)
            .await?;
        let mut output = tokio::fs::File::create(&target).await?;
        let copied = tokio::io::copy(&mut reader, &mut output).await?;
        output.flush().await?;

        if copied != payload.size {
            return Err(PusherError::Parse(format!(
                "extracted {} bytes of {}, expected {}",
                copied, payload.name, payload.size
            )));
        }
        Ok(target)
    }
}
