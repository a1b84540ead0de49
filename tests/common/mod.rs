#![allow(dead_code)]

pub mod http;

use std::fs::File;
use std::path::{Path, PathBuf};

pub const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Envelope>
  <VirtualSystem ovf:id="web01">
    <Item><rasd:Connection>bridged</rasd:Connection></Item>
  </VirtualSystem>
</Envelope>
"#;

/// Writes a tar archive with the given `(name, content)` records in order.
pub fn write_ova(dir: &Path, file_name: &str, records: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(file_name);
    let mut builder = tar::Builder::new(File::create(&path).unwrap());
    for (name, data) in records {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap().sync_all().unwrap();
    path
}

/// Deterministic, non-repeating-looking disk content.
pub fn disk_bytes(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}
