//! OVA archive model
//!
//! An OVA is a plain TAR container holding one OVF descriptor, one or more VMDK
//! disks, and optionally a manifest (`.mf`) and a signing certificate (`.cert`).
//! Entries are located by absolute byte offset so that disks can be streamed
//! straight out of the container without extraction.

pub mod checksum;
pub mod index;
pub mod manifest;

pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumUtils};
pub use index::ArchiveIndexer;
pub use manifest::Manifest;

use crate::error::{PusherError, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Descriptor,
    Payload,
    Manifest,
    Signature,
    Other,
}

impl EntryKind {
    pub fn from_name(name: &str) -> Self {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        match extension.as_deref() {
            Some("ovf") => EntryKind::Descriptor,
            Some("vmdk") => EntryKind::Payload,
            Some("mf") => EntryKind::Manifest,
            Some("cert") => EntryKind::Signature,
            _ => EntryKind::Other,
        }
    }
}

/// A regular file inside the archive.
///
/// `offset` is the position of the first data byte in the container file, so
/// `[offset, offset + size)` is exactly the entry's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    pub name: String,
    pub size: u64,
    pub offset: u64,
    pub kind: EntryKind,
    pub checksum: Option<Checksum>,
}

impl ArchiveEntry {
    pub fn end_offset(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone)]
pub struct ArchivePackage {
    pub path: PathBuf,
    pub total_size: u64,
    pub descriptor: ArchiveEntry,
    pub payloads: Vec<ArchiveEntry>,
    pub manifest: Option<ArchiveEntry>,
    pub signature: Option<ArchiveEntry>,
    /// All regular-file records in archive order
    pub entries: Vec<ArchiveEntry>,
}

impl ArchivePackage {
    pub fn index(path: &Path) -> Result<Self> {
        ArchiveIndexer::index(path)
    }

    pub fn total_payload_size(&self) -> u64 {
        self.payloads.iter().map(|p| p.size).sum()
    }

    pub fn list_entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    pub fn payload(&self, name: &str) -> Option<&ArchiveEntry> {
        self.payloads.iter().find(|p| p.name == name)
    }

    /// OVF descriptor text, needed by the item-creation step.
    pub fn read_descriptor(&self) -> Result<String> {
        let bytes = index::read_entry_bytes(&self.path, &self.descriptor)?;
        String::from_utf8(bytes).map_err(|e| {
            PusherError::Parse(format!(
                "descriptor {} is not valid UTF-8: {}",
                self.descriptor.name, e
            ))
        })
    }

    /// Verifies the descriptor and every disk against the manifest.
    pub fn validate_checksums(&self) -> Result<()> {
        ChecksumUtils::validate_entry(&self.path, &self.descriptor)?;
        for payload in &self.payloads {
            ChecksumUtils::validate_entry(&self.path, payload)?;
        }
        Ok(())
    }
}
