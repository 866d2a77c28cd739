/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The mutable counterpart to [`crate::datapack::DataPack`]: accumulates
//! revisions in memory and flushes them into a new, immutable pack pair
//! named after the SHA1 of its data file.
//!
//! A delta's base must already have been `add`ed to the same writer for the
//! on-disk chain to resolve; otherwise the entry is written with a null
//! delta base, i.e. as if it were a full text.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use byteorder::BigEndian;
use byteorder::WriteBytesExt;

use crate::dataindex::write_index;
use crate::dataindex::IndexEntry;
use crate::dataindex::NO_BASE;
use crate::datapack::DataPackVersion;
use crate::key::Key;
use crate::metadata::Metadata;
use crate::mutablepack::flush_pack_pair;
use crate::mutablepack::FlushedPack;

struct PendingEntry {
    key: Key,
    delta_base: Option<Key>,
    delta: Vec<u8>,
    metadata: Metadata,
}

pub struct MutableDataPack {
    dir: PathBuf,
    entries: Vec<PendingEntry>,
    seen: HashMap<Key, usize>,
}

impl MutableDataPack {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MutableDataPack {
            dir: dir.into(),
            entries: Vec::new(),
            seen: HashMap::new(),
        }
    }

    pub fn add(&mut self, key: Key, delta_base: Option<Key>, delta: Vec<u8>, metadata: Metadata) {
        let position = self.entries.len();
        self.seen.insert(key.clone(), position);
        self.entries.push(PendingEntry {
            key,
            delta_base,
            delta,
            metadata: metadata.normalized(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush(self) -> Result<Option<FlushedPack>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        let mut data_buf = vec![u8::from(DataPackVersion::One)];
        let mut offsets = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let offset = data_buf.len() as u64;
            let base_node = entry
                .delta_base
                .as_ref()
                .filter(|base_key| self.seen.contains_key(*base_key))
                .map(|base_key| base_key.node)
                .unwrap_or_else(crate::node::Node::null);

            data_buf.write_u16::<BigEndian>(entry.key.path.as_byte_slice().len() as u16)?;
            data_buf.write_all(entry.key.path.as_byte_slice())?;
            data_buf.write_all(entry.key.node.as_ref())?;
            data_buf.write_all(base_node.as_ref())?;
            data_buf.write_u64::<BigEndian>(entry.delta.len() as u64)?;
            data_buf.write_all(&entry.delta)?;
            entry.metadata.write(&mut data_buf)?;

            let size = data_buf.len() as u64 - offset;
            offsets.push((offset, size));
        }

        let mut index_entries: Vec<(usize, IndexEntry)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                (
                    i,
                    IndexEntry {
                        node: entry.key.node,
                        delta_base_location: NO_BASE,
                        pack_offset: offsets[i].0,
                        pack_size: offsets[i].1,
                    },
                )
            })
            .collect();
        index_entries.sort_by_key(|(_, e)| e.node);

        // original entry index -> sorted position, so delta_base_location
        // can reference the sorted index rather than insertion order.
        let mut sorted_position_of = HashMap::new();
        for (sorted_pos, (original_i, _)) in index_entries.iter().enumerate() {
            sorted_position_of.insert(*original_i, sorted_pos);
        }

        let final_entries: Vec<IndexEntry> = index_entries
            .iter()
            .map(|(original_i, entry)| {
                let mut entry = *entry;
                let original = &self.entries[*original_i];
                entry.delta_base_location = original
                    .delta_base
                    .as_ref()
                    .and_then(|base_key| self.seen.get(base_key))
                    .and_then(|base_original_i| sorted_position_of.get(base_original_i))
                    .map(|pos| *pos as i32)
                    .unwrap_or(NO_BASE);
                entry
            })
            .collect();

        let mut index_buf = vec![];
        write_index(&mut index_buf, &final_entries)?;

        flush_pack_pair(&self.dir, &data_buf, &index_buf, "datapack", "dataidx")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::dataindex::DataIndex;
    use crate::datapack::DataPack;
    use crate::key::testutil::key;
    use crate::store::Store;

    #[test]
    fn test_flush_writes_readable_pack() {
        let dir = TempDir::new().unwrap();
        let mut writer = MutableDataPack::new(dir.path());
        writer.add(key("a", "1"), None, b"hello".to_vec(), Metadata::default());
        writer.add(
            key("a", "2"),
            Some(key("a", "1")),
            b"hello!".to_vec(),
            Metadata::default(),
        );
        let flushed = writer.flush().unwrap().unwrap();

        let stem = flushed.pack_path.with_extension("");
        let pack = DataPack::new(&stem).unwrap();
        assert_eq!(pack.len(), 2);
        assert!(pack.get(&key("a", "1")).is_ok());
    }

    #[test]
    fn test_delta_with_missing_base_becomes_fulltext() {
        let dir = TempDir::new().unwrap();
        let mut writer = MutableDataPack::new(dir.path());
        writer.add(
            key("a", "1"),
            Some(key("a", "nonexistent-base")),
            b"standalone".to_vec(),
            Metadata::default(),
        );
        let flushed = writer.flush().unwrap().unwrap();
        let stem = flushed.pack_path.with_extension("");
        let pack = DataPack::new(&stem).unwrap();
        assert_eq!(pack.get(&key("a", "1")).unwrap(), b"standalone");
    }

    #[test]
    fn test_empty_writer_flushes_nothing() {
        let dir = TempDir::new().unwrap();
        let writer = MutableDataPack::new(dir.path());
        assert!(writer.flush().unwrap().is_none());
    }

    #[test]
    fn test_index_entries_sorted_by_node() {
        let dir = TempDir::new().unwrap();
        let mut writer = MutableDataPack::new(dir.path());
        writer.add(key("a", "9"), None, b"x".to_vec(), Metadata::default());
        writer.add(key("a", "1"), None, b"y".to_vec(), Metadata::default());
        let flushed = writer.flush().unwrap().unwrap();
        let index_bytes = std::fs::read(&flushed.index_path).unwrap();
        let index = DataIndex::new(&index_bytes).unwrap();
        let first = index.get_entry(0);
        let second = index.get_entry(1);
        assert!(first.node < second.node);
    }
}
