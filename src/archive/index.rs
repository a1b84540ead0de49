//! Single-pass TAR indexing
//!
//! [`ArchiveIndexer`] walks the container once and records, for every regular
//! file, its name, size and the absolute offset of its data. Payload bytes are
//! never read during indexing; the tar reader skips over them.

use crate::archive::manifest::Manifest;
use crate::archive::{ArchiveEntry, ArchivePackage, EntryKind};
use crate::error::{PusherError, Result};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;
use tar::Archive;

pub struct ArchiveIndexer;

impl ArchiveIndexer {
    /// Index an OVA archive and attach manifest checksums to its entries.
    pub fn index(archive_path: &Path) -> Result<ArchivePackage> {
        let total_size = std::fs::metadata(archive_path)?.len();
        let entries = Self::scan(archive_path)?;

        let mut descriptor: Option<ArchiveEntry> = None;
        let mut payloads = Vec::new();
        let mut manifest = None;
        let mut signature = None;
        let mut seen_payloads = HashSet::new();

        for entry in &entries {
            match entry.kind {
                EntryKind::Descriptor => {
                    if let Some(existing) = &descriptor {
                        return Err(PusherError::Parse(format!(
                            "archive contains more than one OVF descriptor: {} and {}",
                            existing.name, entry.name
                        )));
                    }
                    descriptor = Some(entry.clone());
                }
                EntryKind::Payload => {
                    if !seen_payloads.insert(entry.name.clone()) {
                        return Err(PusherError::Parse(format!(
                            "duplicate disk entry in archive: {}",
                            entry.name
                        )));
                    }
                    payloads.push(entry.clone());
                }
                EntryKind::Manifest => manifest = Some(entry.clone()),
                EntryKind::Signature => signature = Some(entry.clone()),
                EntryKind::Other => {}
            }
        }

        let mut descriptor = descriptor.ok_or_else(|| {
            PusherError::MissingRequiredEntry("no OVF descriptor found in archive".to_string())
        })?;

        if payloads.is_empty() {
            return Err(PusherError::MissingRequiredEntry(
                "no VMDK disk entries found in archive".to_string(),
            ));
        }

        if let Some(manifest_entry) = &manifest {
            let bytes = read_entry_bytes(archive_path, manifest_entry)?;
            let parsed = Manifest::parse(&String::from_utf8_lossy(&bytes));
            tracing::debug!(
                manifest = %manifest_entry.name,
                checksums = parsed.len(),
                "parsed archive manifest"
            );

            descriptor.checksum = parsed.get(&descriptor.name).cloned();
            for payload in payloads.iter_mut() {
                payload.checksum = parsed.get(&payload.name).cloned();
            }
        }

        tracing::info!(
            archive = %archive_path.display(),
            entries = entries.len(),
            disks = payloads.len(),
            "indexed archive"
        );

        Ok(ArchivePackage {
            path: archive_path.to_path_buf(),
            total_size,
            descriptor,
            payloads,
            manifest,
            signature,
            entries,
        })
    }

    /// Every regular-file record in archive order, with true data offsets.
    pub fn scan(archive_path: &Path) -> Result<Vec<ArchiveEntry>> {
        let file = File::open(archive_path)?;
        let mut archive = Archive::new(BufReader::new(file));

        let mut entries = Vec::new();
        let records = archive
            .entries()
            .map_err(|e| PusherError::Parse(format!("Failed to read tar entries: {}", e)))?;

        for record in records {
            let entry = record
                .map_err(|e| PusherError::Parse(format!("Failed to read tar entry: {}", e)))?;

            if !entry.header().entry_type().is_file() {
                continue;
            }

            let name = entry
                .path()
                .map_err(|e| PusherError::Parse(format!("Failed to read entry path: {}", e)))?
                .to_string_lossy()
                .to_string();

            let kind = EntryKind::from_name(&name);
            tracing::trace!(entry = %name, size = entry.size(), offset = entry.raw_file_position(), ?kind, "tar record");

            entries.push(ArchiveEntry {
                name,
                size: entry.size(),
                offset: entry.raw_file_position(),
                kind,
                checksum: None,
            });
        }

        Ok(entries)
    }
}

/// Reads exactly the bytes of one entry.
pub fn read_entry_bytes(archive_path: &Path, entry: &ArchiveEntry) -> Result<Vec<u8>> {
    let mut file = File::open(archive_path)?;
    file.seek(SeekFrom::Start(entry.offset))?;

    let mut data = Vec::with_capacity(entry.size as usize);
    file.take(entry.size).read_to_end(&mut data)?;

    if data.len() as u64 != entry.size {
        return Err(PusherError::Parse(format!(
            "archive truncated while reading {}: expected {} bytes, read {}",
            entry.name,
            entry.size,
            data.len()
        )));
    }

    Ok(data)
}
