/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The `.histidx` file: a fanout table followed by a flat, node-sorted list
//! of index entries pointing into the sibling `.histpack`. Unlike the data
//! index there is no delta chain to resolve, so each entry just records
//! where its revision lives.
//!
//! ```text
//! histidx    = <version: 1 byte> <config: 1 byte> <fanouttable> <index>
//! index      = [<indexentry>,...]
//! indexentry = <node: 20 byte>
//!              <pack entry offset: 8 byte unsigned int>
//!              <pack entry size: 8 byte unsigned int>
//! ```

use std::io::Write;

use anyhow::bail;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::WriteBytesExt;

use crate::fanouttable::FanoutSize;
use crate::fanouttable::FanoutTable;
use crate::fanouttable::FanoutTableWriter;
use crate::node::Node;
use crate::node::NODE_LEN;

pub const INDEX_VERSION: u8 = 0;
const ENTRY_LEN: usize = NODE_LEN + 8 + 8;

#[derive(Clone, Copy, Debug)]
pub struct HistoryIndexEntry {
    pub node: Node,
    pub pack_offset: u64,
    pub pack_size: u64,
}

pub struct HistoryIndex<'a> {
    raw: &'a [u8],
    fanout_size: FanoutSize,
    entry_count: usize,
}

impl<'a> HistoryIndex<'a> {
    pub fn new(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < 2 {
            bail!("histidx file too small");
        }
        let version = raw[0];
        if version != INDEX_VERSION {
            bail!("unsupported histidx version {}", version);
        }
        let header_len = 2;
        let remaining = raw.len() - header_len;
        for fanout_size in [FanoutSize::Large, FanoutSize::Small] {
            let fanout_len = fanout_size.byte_len();
            if remaining < fanout_len {
                continue;
            }
            let index_len = remaining - fanout_len;
            if index_len % ENTRY_LEN == 0 {
                let entry_count = index_len / ENTRY_LEN;
                if FanoutSize::for_entry_count(entry_count) == fanout_size {
                    return Ok(HistoryIndex {
                        raw: &raw[header_len..],
                        fanout_size,
                        entry_count,
                    });
                }
            }
        }
        bail!("histidx file size does not match any known fanout/entry layout");
    }

    fn index_bytes(&self) -> &[u8] {
        &self.raw[self.fanout_size.byte_len()..]
    }

    fn entry_at(&self, position: usize) -> HistoryIndexEntry {
        let bytes = self.index_bytes();
        let offset = position * ENTRY_LEN;
        let entry = &bytes[offset..offset + ENTRY_LEN];
        let node = Node::from_slice(&entry[..NODE_LEN]).expect("fixed-size slice");
        let pack_offset = BigEndian::read_u64(&entry[NODE_LEN..NODE_LEN + 8]);
        let pack_size = BigEndian::read_u64(&entry[NODE_LEN + 8..NODE_LEN + 16]);
        HistoryIndexEntry {
            node,
            pack_offset,
            pack_size,
        }
    }

    pub fn len(&self) -> usize {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn get_entry(&self, position: usize) -> HistoryIndexEntry {
        self.entry_at(position)
    }

    pub fn find(&self, node: &Node) -> Vec<HistoryIndexEntry> {
        // A (path, node) pair may appear more than once across merges of the
        // same history pack, so callers that want every recorded parent set
        // must scan the whole contiguous run, not just the first hit.
        let fanout = FanoutTable::new(&self.raw[..self.fanout_size.byte_len()], self.fanout_size);
        let (mut lo, hi) = fanout.get_bounds(node.as_ref());
        let mut hi = hi.unwrap_or(self.entry_count);
        let mut first = None;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry_at(mid);
            match entry.node.cmp(node) {
                std::cmp::Ordering::Equal => {
                    first = Some(mid);
                    hi = mid;
                }
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        let mut out = Vec::new();
        if let Some(mut pos) = first {
            while pos < self.entry_count {
                let entry = self.entry_at(pos);
                if &entry.node != node {
                    break;
                }
                out.push(entry);
                pos += 1;
            }
        }
        out
    }

    pub fn iter(&self) -> impl Iterator<Item = HistoryIndexEntry> + '_ {
        (0..self.entry_count).map(move |i| self.entry_at(i))
    }
}

pub fn write_index<T: Write>(writer: &mut T, entries: &[HistoryIndexEntry]) -> Result<()> {
    let fanout_size = FanoutSize::for_entry_count(entries.len());
    writer.write_u8(INDEX_VERSION)?;
    writer.write_u8(0)?;

    let mut fanout_writer = FanoutTableWriter::new(fanout_size);
    let mut last_prefix: Option<[u8; 2]> = None;
    for (i, entry) in entries.iter().enumerate() {
        let prefix = [entry.node.as_ref()[0], entry.node.as_ref()[1]];
        if last_prefix != Some(prefix) {
            fanout_writer.set(&prefix, i as u32);
            last_prefix = Some(prefix);
        }
    }
    writer.write_all(&fanout_writer.finish())?;

    for entry in entries {
        writer.write_all(entry.node.as_ref())?;
        writer.write_u64::<BigEndian>(entry.pack_offset)?;
        writer.write_u64::<BigEndian>(entry.pack_size)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::testutil::node;

    #[test]
    fn test_roundtrip_find() {
        let mut entries = vec![
            HistoryIndexEntry {
                node: node("1"),
                pack_offset: 0,
                pack_size: 10,
            },
            HistoryIndexEntry {
                node: node("2"),
                pack_offset: 10,
                pack_size: 12,
            },
        ];
        entries.sort_by_key(|e| e.node);
        let mut buf = vec![];
        write_index(&mut buf, &entries).unwrap();
        let index = HistoryIndex::new(&buf).unwrap();
        let found = index.find(&node("2"));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pack_offset, 10);
    }

    #[test]
    fn test_find_missing_returns_empty() {
        let entries = vec![HistoryIndexEntry {
            node: node("1"),
            pack_offset: 0,
            pack_size: 10,
        }];
        let mut buf = vec![];
        write_index(&mut buf, &entries).unwrap();
        let index = HistoryIndex::new(&buf).unwrap();
        assert!(index.find(&node("9")).is_empty());
    }
}
