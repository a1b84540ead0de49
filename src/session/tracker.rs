//! Concurrent, periodically persisted upload progress
//!
//! [`SessionTracker`] is the only owner of the [`UploadSession`]. Uploader
//! workers mutate it through the methods below; readers get deep copies.
//! A background tokio task writes the session file on a fixed interval (the
//! file I/O itself runs on the blocking pool), and
//! [`SessionTracker::close`] stops that task and writes one final time.

use crate::error::{PusherError, Result};
use crate::session::types::{ItemProgress, UploadSession, chunk_count};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::sync::oneshot;

struct Shared {
    session: RwLock<UploadSession>,
    session_file: PathBuf,
    /// Serializes writers of the session file; `true` once autosave is stopped.
    write_lock: Mutex<bool>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, UploadSession> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UploadSession> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_guard(&self) -> MutexGuard<'_, bool> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist_locked(&self) -> Result<()> {
        let snapshot = self.read().clone();
        write_session_file(&self.session_file, &snapshot)
    }
}

pub struct SessionTracker {
    shared: Arc<Shared>,
    chunk_size: u64,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl SessionTracker {
    /// Wraps a fresh or loaded session. Autosave is not running until
    /// [`start_autosave`](Self::start_autosave) is called.
    pub fn new(session: UploadSession, session_file: PathBuf, chunk_size: u64) -> Self {
        Self {
            shared: Arc::new(Shared {
                session: RwLock::new(session),
                session_file,
                write_lock: Mutex::new(false),
            }),
            chunk_size: chunk_size.max(1),
            stop: Mutex::new(None),
        }
    }

    /// Reads a persisted session without starting a tracker.
    pub fn load_from(path: &Path) -> Result<UploadSession> {
        let data = std::fs::read(path).map_err(|e| {
            PusherError::Session(format!("failed to read session file {}: {}", path.display(), e))
        })?;
        serde_json::from_slice(&data).map_err(|e| {
            PusherError::Session(format!("failed to parse session file {}: {}", path.display(), e))
        })
    }

    /// Rebuilds a tracker from a persisted session file.
    pub fn resume(path: &Path, chunk_size: u64) -> Result<Self> {
        let session = Self::load_from(path)?;
        tracing::info!(session = %session.session_id, file = %path.display(), "loaded upload session");
        Ok(Self::new(session, path.to_path_buf(), chunk_size))
    }

    pub fn session_file(&self) -> &Path {
        &self.shared.session_file
    }

    pub fn session_id(&self) -> String {
        self.shared.read().session_id.clone()
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Spawns the periodic persistence task on the current tokio runtime.
    pub fn start_autosave(&self, interval: Duration) {
        let (tx, mut rx) = oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap_or_else(|p| p.into_inner());
            drop(stop.take());
            *stop = Some(tx);
        }
        *self.shared.write_guard() = false;

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let writer = Arc::clone(&shared);
                        let saved = tokio::task::spawn_blocking(move || {
                            let stopped = writer.write_guard();
                            if *stopped {
                                return None;
                            }
                            Some(writer.persist_locked())
                        })
                        .await;
                        match saved {
                            Ok(Some(Ok(()))) => {}
                            Ok(Some(Err(e))) => tracing::error!(error = %e, "failed to auto-save session"),
                            Ok(None) => break,
                            Err(e) => {
                                tracing::error!(error = %e, "session auto-save task failed");
                                break;
                            }
                        }
                    }
                    _ = &mut rx => break,
                }
            }
            tracing::trace!("session autosave stopped");
        });
    }

    /// Stops the autosave task. Returns `false` if it was not running.
    pub fn stop_autosave(&self) -> bool {
        *self.shared.write_guard() = true;
        let sender = self.stop.lock().unwrap_or_else(|p| p.into_inner()).take();
        match sender {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    /// Adds an item; an item already known from a loaded session is kept as is.
    pub fn register_item(&self, name: &str, size: u64, checksum: Option<String>) {
        let mut session = self.shared.write();
        if session.files.contains_key(name) {
            return;
        }
        session
            .files
            .insert(name.to_string(), ItemProgress::new(name, size, self.chunk_size, checksum));
        session.total_size += size;
        session.is_completed = false;
        session.last_update = Utc::now();
    }

    /// Resets an incomplete item to zero bytes before it is uploaded again.
    pub fn restart_item(&self, name: &str) {
        let mut session = self.shared.write();
        let Some(item) = session.files.get_mut(name) else {
            return;
        };
        if item.is_completed || item.uploaded_size == 0 {
            return;
        }
        let discarded = item.uploaded_size;
        let now = Utc::now();
        item.uploaded_size = 0;
        item.chunks_uploaded = 0;
        item.start_time = now;
        item.last_update = now;
        session.uploaded_size = session.uploaded_size.saturating_sub(discarded);
        session.last_update = now;
        tracing::debug!(file = name, discarded, "restarting partially uploaded item");
    }

    /// Records the absolute number of bytes acknowledged for an item.
    ///
    /// Values below the current count are ignored; values above the item size
    /// are clamped to it.
    pub fn record_progress(&self, name: &str, uploaded: u64) {
        let mut session = self.shared.write();
        let chunk_size = self.chunk_size;
        let now = Utc::now();

        let Some(item) = session.files.get_mut(name) else {
            tracing::warn!(file = name, "progress reported for unregistered item");
            return;
        };

        let uploaded = uploaded.min(item.total_size);
        if uploaded <= item.uploaded_size && !(uploaded == item.total_size && !item.is_completed) {
            return;
        }

        let delta = uploaded - item.uploaded_size;
        item.uploaded_size = uploaded;
        item.chunks_uploaded = chunk_count(uploaded, chunk_size);
        item.last_update = now;
        let reached_end = uploaded == item.total_size;
        if reached_end {
            item.is_completed = true;
        }

        session.uploaded_size += delta;
        session.last_update = now;
        if reached_end {
            session.is_completed = session.files.values().all(|f| f.is_completed);
        }
    }

    /// Forces an item to fully uploaded. Calling it again has no further effect.
    pub fn mark_item_complete(&self, name: &str) {
        let mut session = self.shared.write();
        let now = Utc::now();

        if let Some(item) = session.files.get_mut(name) {
            let remaining = item.remaining();
            item.uploaded_size = item.total_size;
            item.chunks_uploaded = item.chunks_total;
            item.is_completed = true;
            item.last_update = now;
            session.uploaded_size += remaining;
            session.last_update = now;
        }

        session.is_completed = session.files.values().all(|f| f.is_completed);
    }

    pub fn increment_retry_count(&self) {
        let mut session = self.shared.write();
        session.retry_attempts += 1;
        session.last_update = Utc::now();
    }

    /// Deep copy of the current session state.
    pub fn snapshot(&self) -> UploadSession {
        self.shared.read().clone()
    }

    pub fn is_item_complete(&self, name: &str) -> bool {
        self.shared
            .read()
            .files
            .get(name)
            .is_some_and(|f| f.is_completed)
    }

    pub fn item_progress(&self, name: &str) -> Option<ItemProgress> {
        self.shared.read().files.get(name).cloned()
    }

    /// `(percentage, uploaded, total)` across all items
    pub fn overall_progress(&self) -> (f64, u64, u64) {
        let session = self.shared.read();
        (session.percentage(), session.uploaded_size, session.total_size)
    }

    /// Average bytes per second since the session started
    pub fn upload_speed(&self) -> f64 {
        let session = self.shared.read();
        let elapsed = (Utc::now() - session.start_time).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return 0.0;
        }
        session.uploaded_size as f64 / elapsed
    }

    pub fn eta(&self) -> Option<Duration> {
        let speed = self.upload_speed();
        if speed <= 0.0 {
            return None;
        }
        let (_, uploaded, total) = self.overall_progress();
        Duration::try_from_secs_f64(total.saturating_sub(uploaded) as f64 / speed).ok()
    }

    pub fn progress_bar(&self, width: usize) -> String {
        let (percentage, uploaded, total) = self.overall_progress();
        let width = if width == 0 { 50 } else { width };
        let filled = ((percentage * width as f64 / 100.0) as usize).min(width);

        format!(
            "[{}{}] {:.1}% ({}/{})",
            "█".repeat(filled),
            "░".repeat(width - filled),
            percentage,
            crate::output::format_size(uploaded),
            crate::output::format_size(total)
        )
    }

    /// Writes the session file immediately.
    pub fn persist_now(&self) -> Result<()> {
        let _guard = self.shared.write_guard();
        self.shared.persist_locked()
    }

    /// Stops autosave and writes the final state.
    pub fn close(&self) -> Result<()> {
        self.stop_autosave();
        self.persist_now()
    }

    /// Stops autosave and removes the session file without a final write.
    pub fn delete(&self) -> Result<()> {
        self.stop_autosave();
        let _guard = self.shared.write_guard();
        match std::fs::remove_file(&self.shared.session_file) {
            Ok(()) => {
                tracing::debug!(file = %self.shared.session_file.display(), "removed session file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PusherError::Session(format!(
                "failed to remove session file {}: {}",
                self.shared.session_file.display(),
                e
            ))),
        }
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.stop_autosave();
    }
}

/// Write-then-rename so a crash never leaves a truncated session file.
fn write_session_file(path: &Path, session: &UploadSession) -> Result<()> {
    let data = serde_json::to_vec_pretty(session)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    std::fs::write(&tmp_path, &data).map_err(|e| {
        PusherError::Session(format!("failed to write session file {}: {}", tmp_path.display(), e))
    })?;
    std::fs::rename(&tmp_path, path).map_err(|e| {
        PusherError::Session(format!("failed to replace session file {}: {}", path.display(), e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: u64 = 4;

    fn tracker_in(dir: &Path) -> SessionTracker {
        let session = UploadSession::new("42", "appliance.ova", "esx01", "datastore1", "web");
        SessionTracker::new(session, dir.join(".upload-session-42.json"), CHUNK)
    }

    #[test]
    fn test_register_and_record_progress() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.register_item("disk2.vmdk", 6, Some("aa".into()));

        tracker.record_progress("disk1.vmdk", 4);
        tracker.record_progress("disk1.vmdk", 4);
        let item = tracker.item_progress("disk1.vmdk").unwrap();
        assert_eq!(item.uploaded_size, 4);
        assert_eq!(item.chunks_total, 3);
        assert_eq!(item.chunks_uploaded, 1);

        let (_, uploaded, total) = tracker.overall_progress();
        assert_eq!(uploaded, 4);
        assert_eq!(total, 16);
    }

    #[test]
    fn test_decreasing_progress_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);

        tracker.record_progress("disk1.vmdk", 8);
        tracker.record_progress("disk1.vmdk", 3);
        assert_eq!(tracker.item_progress("disk1.vmdk").unwrap().uploaded_size, 8);

        tracker.record_progress("disk1.vmdk", 500);
        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.files["disk1.vmdk"].uploaded_size, 10);
        assert!(snapshot.uploaded_size <= snapshot.total_size);
    }

    #[test]
    fn test_mark_complete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.register_item("disk2.vmdk", 6, None);

        tracker.record_progress("disk1.vmdk", 4);
        tracker.mark_item_complete("disk1.vmdk");
        tracker.mark_item_complete("disk1.vmdk");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.uploaded_size, 10);
        assert!(snapshot.files["disk1.vmdk"].is_completed);
        assert_eq!(snapshot.files["disk1.vmdk"].chunks_uploaded, 3);
        assert!(!snapshot.is_completed);

        tracker.mark_item_complete("disk2.vmdk");
        assert!(tracker.snapshot().is_completed);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);

        let before = tracker.snapshot();
        tracker.record_progress("disk1.vmdk", 8);
        tracker.increment_retry_count();

        assert_eq!(before.uploaded_size, 0);
        assert_eq!(before.retry_attempts, 0);
        assert_eq!(tracker.snapshot().retry_attempts, 1);
    }

    #[test]
    fn test_restart_item_discards_partial_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.register_item("disk2.vmdk", 6, None);
        tracker.mark_item_complete("disk2.vmdk");
        tracker.record_progress("disk1.vmdk", 8);

        tracker.restart_item("disk1.vmdk");
        tracker.restart_item("disk2.vmdk");

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.files["disk1.vmdk"].uploaded_size, 0);
        assert_eq!(snapshot.files["disk2.vmdk"].uploaded_size, 6);
        assert_eq!(snapshot.uploaded_size, 6);
    }

    #[test]
    fn test_persist_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, Some("0a1b".into()));
        tracker.register_item("disk2.vmdk", 6, None);
        tracker.record_progress("disk1.vmdk", 4);
        tracker.mark_item_complete("disk2.vmdk");
        tracker.increment_retry_count();

        tracker.persist_now().unwrap();
        let loaded = SessionTracker::load_from(tracker.session_file()).unwrap();
        assert_eq!(loaded, tracker.snapshot());
    }

    #[test]
    fn test_delete_removes_file_and_skips_final_write() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.persist_now().unwrap();
        assert!(tracker.session_file().exists());

        tracker.delete().unwrap();
        assert!(!tracker.session_file().exists());
        tracker.delete().unwrap();
    }

    #[test]
    fn test_progress_bar_format() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.record_progress("disk1.vmdk", 5);

        let bar = tracker.progress_bar(10);
        assert!(bar.starts_with("[█████░░░░░] 50.0%"), "{bar}");
    }

    #[tokio::test]
    async fn test_autosave_writes_periodically_and_stops_once() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);

        tracker.start_autosave(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(tracker.session_file().exists());

        assert!(tracker.stop_autosave());
        assert!(!tracker.stop_autosave());

        tracker.delete().unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!tracker.session_file().exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_autosave_picks_up_latest_progress() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.start_autosave(Duration::from_millis(10));

        tracker.record_progress("disk1.vmdk", 8);
        tokio::time::sleep(Duration::from_millis(200)).await;
        tracker.stop_autosave();

        let loaded = SessionTracker::load_from(tracker.session_file()).unwrap();
        assert_eq!(loaded.files["disk1.vmdk"].uploaded_size, 8);
    }

    #[tokio::test]
    async fn test_close_writes_final_state() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(dir.path());
        tracker.start_autosave(Duration::from_secs(3600));
        tracker.register_item("disk1.vmdk", 10, None);
        tracker.record_progress("disk1.vmdk", 7);

        tracker.close().unwrap();
        let loaded = SessionTracker::load_from(tracker.session_file()).unwrap();
        assert_eq!(loaded.files["disk1.vmdk"].uploaded_size, 7);
    }
}
