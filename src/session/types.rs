//! Persisted upload session model
//!
//! The JSON layout (camelCase keys, RFC 3339 timestamps) is the on-disk session
//! file format and must stay stable across releases so that older sessions can
//! still be resumed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Chunks needed to cover `size` bytes; zero-length items have no chunks.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    let chunk_size = chunk_size.max(1);
    size.div_ceil(chunk_size)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub file_name: String,
    pub total_size: u64,
    pub uploaded_size: u64,
    pub chunks_total: u64,
    pub chunks_uploaded: u64,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub is_completed: bool,
    /// Expected checksum of the item, whatever algorithm the manifest used
    #[serde(rename = "sha1Hash", default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ItemProgress {
    pub fn new(file_name: &str, total_size: u64, chunk_size: u64, checksum: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            file_name: file_name.to_string(),
            total_size,
            uploaded_size: 0,
            chunks_total: chunk_count(total_size, chunk_size),
            chunks_uploaded: 0,
            start_time: now,
            last_update: now,
            is_completed: false,
            checksum,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.uploaded_size)
    }

    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return if self.is_completed { 100.0 } else { 0.0 };
        }
        self.uploaded_size as f64 / self.total_size as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub session_id: String,
    #[serde(rename = "ovaFile")]
    pub archive_path: String,
    #[serde(rename = "esxiHost")]
    pub host: String,
    pub datastore: String,
    pub vm_name: String,
    pub total_size: u64,
    pub uploaded_size: u64,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub is_completed: bool,
    #[serde(default)]
    pub files: BTreeMap<String, ItemProgress>,
    #[serde(default)]
    pub retry_attempts: u64,
}

impl UploadSession {
    pub fn new(session_id: &str, archive_path: &str, host: &str, datastore: &str, vm_name: &str) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.to_string(),
            archive_path: archive_path.to_string(),
            host: host.to_string(),
            datastore: datastore.to_string(),
            vm_name: vm_name.to_string(),
            total_size: 0,
            uploaded_size: 0,
            start_time: now,
            last_update: now,
            is_completed: false,
            files: BTreeMap::new(),
            retry_attempts: 0,
        }
    }

    /// Session ids are the Unix timestamp of the run that created them.
    pub fn generate_id() -> String {
        Utc::now().timestamp().to_string()
    }

    pub fn percentage(&self) -> f64 {
        if self.total_size == 0 {
            return 0.0;
        }
        self.uploaded_size as f64 / self.total_size as f64 * 100.0
    }

    pub fn completed_items(&self) -> usize {
        self.files.values().filter(|f| f.is_completed).count()
    }

    pub fn elapsed(&self) -> chrono::Duration {
        self.last_update - self.start_time
    }
}
