//! Parser for OVA manifest (`.mf`) files
//!
//! Lines look like `SHA1(disk1.vmdk)= 0123abcd...` or `SHA256 (disk1.vmdk) = ...`.
//! Anything that does not fit that shape is skipped.

use crate::archive::checksum::{Checksum, ChecksumAlgorithm};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, Checksum>,
}

impl Manifest {
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();

        for line in content.lines() {
            if let Some((name, checksum)) = parse_line(line) {
                entries.insert(name, checksum);
            }
        }

        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&Checksum> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Checksum)> {
        self.entries.iter()
    }
}

fn parse_line(line: &str) -> Option<(String, Checksum)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let open = line.find('(')?;
    let algorithm = ChecksumAlgorithm::from_manifest_token(&line[..open])?;

    let rest = &line[open + 1..];
    let close = rest.find(')')?;
    let name = &rest[..close];
    if name.is_empty() {
        return None;
    }

    let value = rest[close + 1..].trim_start().strip_prefix('=')?.trim_start();
    let hex_len = value
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(value.len());
    if hex_len == 0 {
        return None;
    }

    Some((name.to_string(), Checksum::new(algorithm, &value[..hex_len])))
}
