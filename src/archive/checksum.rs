//! Checksum utilities for archive entries
//!
//! OVA manifests record either SHA1 (older exporters) or SHA256 digests. The
//! algorithm travels with the hash so that validation can pick the right hasher.

use crate::archive::ArchiveEntry;
use crate::error::{PusherError, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    Sha1,
    Sha256,
}

impl ChecksumAlgorithm {
    /// Parses the algorithm token used in manifest lines, e.g. `SHA1` or `SHA256`.
    pub fn from_manifest_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "SHA1" => Some(ChecksumAlgorithm::Sha1),
            "SHA256" => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }

    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha1 => 40,
            ChecksumAlgorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Sha1 => write!(f, "SHA1"),
            ChecksumAlgorithm::Sha256 => write!(f, "SHA256"),
        }
    }
}

/// An expected digest; the hex form is always stored lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    hex: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, hex: &str) -> Self {
        Self {
            algorithm,
            hex: hex.trim().to_ascii_lowercase(),
        }
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Case-insensitive comparison against a computed hex digest
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.hex.eq_ignore_ascii_case(actual_hex.trim())
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Checksum computation and validation over byte ranges of an archive
pub struct ChecksumUtils;

impl ChecksumUtils {
    pub fn compute_hex(algorithm: ChecksumAlgorithm, data: &[u8]) -> String {
        let mut hasher = Hasher::new(algorithm);
        hasher.update(data);
        hasher.finalize_hex()
    }

    /// Streams exactly `size` bytes starting at `offset` through the hasher.
    pub fn compute_range_hex(
        archive_path: &Path,
        offset: u64,
        size: u64,
        algorithm: ChecksumAlgorithm,
    ) -> Result<String> {
        let mut file = File::open(archive_path)?;
        file.seek(SeekFrom::Start(offset))?;

        let mut reader = BufReader::with_capacity(1024 * 1024, file).take(size);
        let mut hasher = Hasher::new(algorithm);
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut processed = 0u64;

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
            processed += bytes_read as u64;
        }

        if processed != size {
            return Err(PusherError::Parse(format!(
                "archive truncated: expected {} bytes at offset {}, read {}",
                size, offset, processed
            )));
        }

        Ok(hasher.finalize_hex())
    }

    /// Validates an entry against its recorded checksum.
    ///
    /// Entries without a recorded checksum always validate.
    pub fn validate_entry(archive_path: &Path, entry: &ArchiveEntry) -> Result<()> {
        let Some(expected) = &entry.checksum else {
            return Ok(());
        };

        let actual =
            Self::compute_range_hex(archive_path, entry.offset, entry.size, expected.algorithm)?;

        if !expected.matches(&actual) {
            return Err(PusherError::ChecksumMismatch {
                name: entry.name.clone(),
                expected: expected.hex().to_string(),
                actual,
            });
        }

        tracing::debug!(file = %entry.name, algorithm = %expected.algorithm, "checksum verified");
        Ok(())
    }
}
