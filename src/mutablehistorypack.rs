/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The mutable counterpart to [`crate::historypack::HistoryPack`].

use std::path::PathBuf;

use anyhow::Result;
use byteorder::BigEndian;
use byteorder::WriteBytesExt;

use crate::historyindex::write_index;
use crate::historyindex::HistoryIndexEntry;
use crate::historypack::HISTORYPACK_VERSION;
use crate::key::Key;
use crate::key::NodeInfo;
use crate::mutablepack::flush_pack_pair;
use crate::mutablepack::FlushedPack;

struct PendingEntry {
    key: Key,
    info: NodeInfo,
}

pub struct MutableHistoryPack {
    dir: PathBuf,
    entries: Vec<PendingEntry>,
}

impl MutableHistoryPack {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        MutableHistoryPack {
            dir: dir.into(),
            entries: Vec::new(),
        }
    }

    pub fn add(&mut self, key: Key, info: NodeInfo) {
        self.entries.push(PendingEntry { key, info });
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn flush(self) -> Result<Option<FlushedPack>> {
        if self.entries.is_empty() {
            return Ok(None);
        }

        let mut data_buf = vec![HISTORYPACK_VERSION];
        let mut raw_entries: Vec<(Key, HistoryIndexEntry)> = Vec::with_capacity(self.entries.len());
        for pending in &self.entries {
            let offset = data_buf.len() as u64;
            let copyfrom = pending.info.copyfrom(&pending.key.path);

            data_buf.write_u16::<BigEndian>(pending.key.path.as_byte_slice().len() as u16)?;
            data_buf.write_all(pending.key.path.as_byte_slice())?;
            data_buf.write_all(pending.key.node.as_ref())?;
            data_buf.write_all(pending.info.parents[0].node.as_ref())?;
            data_buf.write_all(pending.info.parents[1].node.as_ref())?;
            data_buf.write_all(pending.info.linknode.as_ref())?;
            let copyfrom_bytes: &[u8] = copyfrom.as_ref().map(|p| p.as_byte_slice()).unwrap_or(&[]);
            data_buf.write_u16::<BigEndian>(copyfrom_bytes.len() as u16)?;
            data_buf.write_all(copyfrom_bytes)?;

            let size = data_buf.len() as u64 - offset;
            raw_entries.push((
                pending.key.clone(),
                HistoryIndexEntry {
                    node: pending.key.node,
                    pack_offset: offset,
                    pack_size: size,
                },
            ));
        }

        raw_entries.sort_by_key(|(key, _)| key.clone());
        let index_entries: Vec<HistoryIndexEntry> = raw_entries.into_iter().map(|(_, e)| e).collect();

        let mut index_buf = vec![];
        write_index(&mut index_buf, &index_entries)?;

        flush_pack_pair(&self.dir, &data_buf, &index_buf, "histpack", "histidx")
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::historypack::HistoryPack;
    use crate::key::testutil::key;
    use crate::key::testutil::node;
    use crate::path::RepoPathBuf;
    use crate::store::HistoryStore;

    #[test]
    fn test_flush_and_read_back() {
        let dir = TempDir::new().unwrap();
        let mut writer = MutableHistoryPack::new(dir.path());
        writer.add(
            key("a", "2"),
            NodeInfo {
                parents: [key("a", "1"), Key::default()],
                linknode: node("9"),
            },
        );
        let flushed = writer.flush().unwrap().unwrap();

        let pack = HistoryPack::new(flushed.pack_path.with_extension("")).unwrap();
        let info = pack.get_node_info(&key("a", "2")).unwrap();
        assert_eq!(info.parents[0].node, node("1"));
        assert_eq!(info.linknode, node("9"));
    }

    #[test]
    fn test_copyfrom_recorded_on_rename() {
        let dir = TempDir::new().unwrap();
        let mut writer = MutableHistoryPack::new(dir.path());
        writer.add(
            key("b", "2"),
            NodeInfo {
                parents: [key("a", "1"), Key::default()],
                linknode: node("9"),
            },
        );
        let flushed = writer.flush().unwrap().unwrap();

        let pack = HistoryPack::new(flushed.pack_path.with_extension("")).unwrap();
        let info = pack.get_node_info(&key("b", "2")).unwrap();
        assert_eq!(info.copyfrom(&RepoPathBuf::from("b")), Some(RepoPathBuf::from("a")));
    }

    #[test]
    fn test_empty_writer_flushes_nothing() {
        let dir = TempDir::new().unwrap();
        let writer = MutableHistoryPack::new(dir.path());
        assert!(writer.flush().unwrap().is_none());
    }
}
