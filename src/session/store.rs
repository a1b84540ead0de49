//! Discovery of persisted session files in a working directory

use crate::error::{PusherError, Result};
use crate::session::tracker::SessionTracker;
use crate::session::types::UploadSession;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const SESSION_PREFIX: &str = ".upload-session-";
const SESSION_SUFFIX: &str = ".json";

pub fn session_file_name(session_id: &str) -> String {
    format!("{}{}{}", SESSION_PREFIX, session_id, SESSION_SUFFIX)
}

/// Extracts the id from a file name such as `.upload-session-1700000000.json`.
pub fn session_id_from_file_name(file_name: &str) -> Option<&str> {
    file_name
        .strip_prefix(SESSION_PREFIX)?
        .strip_suffix(SESSION_SUFFIX)
        .filter(|id| !id.is_empty())
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    directory: PathBuf,
}

impl SessionStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn current_dir() -> Self {
        Self::new(".")
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.directory.join(session_file_name(session_id))
    }

    /// All session files in the directory, sorted by name.
    pub fn find_sessions(&self) -> Result<Vec<PathBuf>> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PusherError::Session(format!(
                    "failed to search for session files in {}: {}",
                    self.directory.display(),
                    e
                )));
            }
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if session_id_from_file_name(name).is_some() && entry.file_type()?.is_file() {
                sessions.push(entry.path());
            }
        }
        sessions.sort();
        Ok(sessions)
    }

    /// The session file modified most recently.
    pub fn most_recent(&self) -> Result<Option<PathBuf>> {
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for path in self.find_sessions()? {
            let modified = std::fs::metadata(&path)?.modified()?;
            if newest.as_ref().is_none_or(|(time, _)| modified > *time) {
                newest = Some((modified, path));
            }
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// The session file whose name carries exactly this id.
    pub fn find_by_id(&self, session_id: &str) -> Result<Option<PathBuf>> {
        Ok(self.find_sessions()?.into_iter().find(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .and_then(session_id_from_file_name)
                == Some(session_id)
        }))
    }

    /// Loads every readable session; unreadable files are reported and skipped.
    pub fn load_all(&self) -> Result<Vec<(PathBuf, UploadSession)>> {
        let mut sessions = Vec::new();
        for path in self.find_sessions()? {
            match SessionTracker::load_from(&path) {
                Ok(session) => sessions.push((path, session)),
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "skipping unreadable session file"),
            }
        }
        Ok(sessions)
    }

    /// Removes all session files, returning how many were deleted.
    pub fn remove_all(&self) -> Result<usize> {
        let mut removed = 0;
        for path in self.find_sessions()? {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(file = %path.display(), error = %e, "failed to remove session file"),
            }
        }
        Ok(removed)
    }
}
