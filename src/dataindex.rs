/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The `.dataidx` file: a fanout table followed by a flat, node-sorted list
//! of index entries, each pointing at where its revision lives in the
//! sibling `.datapack` and at the index position of its delta base.
//!
//! ```text
//! dataidx   = <version: 1 byte> <config: 1 byte> <fanouttable> <index>
//! index     = [<indexentry>,...]
//! indexentry = <node: 20 byte>
//!              <deltabase location: 4 byte signed int>
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

pub const INDEX_VERSION: u8 = 1;
const ENTRY_LEN: usize = NODE_LEN + 4 + 8 + 8;

/// No delta base: this entry is a full text.
pub const NO_BASE: i32 = -1;

#[derive(Clone, Copy, Debug)]
pub struct IndexEntry {
    pub node: Node,
    pub delta_base_location: i32,
    pub pack_offset: u64,
    pub pack_size: u64,
}

/// A parsed, memory-mapped (or otherwise borrowed) index file.
pub struct DataIndex<'a> {
    raw: &'a [u8],
    fanout_size: FanoutSize,
    entry_count: usize,
}

impl<'a> DataIndex<'a> {
    pub fn new(raw: &'a [u8]) -> Result<Self> {
        if raw.len() < 2 {
            bail!("dataidx file too small");
        }
        let version = raw[0];
        if version != 0 && version != INDEX_VERSION {
            bail!("unsupported dataidx version {}", version);
        }
        let header_len = 2;
        // The entry count is derived from the remaining length so a writer
        // never has to store it explicitly.
        let remaining = raw.len() - header_len;
        // Try large fanout first: whichever size leaves a remainder that is
        // an exact multiple of the entry length is the real layout.
        for fanout_size in [FanoutSize::Large, FanoutSize::Small] {
            let fanout_len = fanout_size.byte_len();
            if remaining < fanout_len {
                continue;
            }
            let index_len = remaining - fanout_len;
            if index_len % ENTRY_LEN == 0 {
                let entry_count = index_len / ENTRY_LEN;
                if FanoutSize::for_entry_count(entry_count) == fanout_size || version == 0 {
                    return Ok(DataIndex {
                        raw: &raw[header_len..],
                        fanout_size,
                        entry_count,
                    });
                }
            }
        }
        bail!("dataidx file size does not match any known fanout/entry layout");
    }

    fn index_bytes(&self) -> &[u8] {
        &self.raw[self.fanout_size.byte_len()..]
    }

    fn entry_at(&self, position: usize) -> IndexEntry {
        let bytes = self.index_bytes();
        let offset = position * ENTRY_LEN;
        let entry = &bytes[offset..offset + ENTRY_LEN];
        let node = Node::from_slice(&entry[..NODE_LEN]).expect("fixed-size slice");
        let delta_base_location = BigEndian::read_i32(&entry[NODE_LEN..NODE_LEN + 4]);
        let pack_offset = BigEndian::read_u64(&entry[NODE_LEN + 4..NODE_LEN + 12]);
        let pack_size = BigEndian::read_u64(&entry[NODE_LEN + 12..NODE_LEN + 20]);
        IndexEntry {
            node,
            delta_base_location,
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

    pub fn get_entry(&self, position: usize) -> IndexEntry {
        self.entry_at(position)
    }

    /// Looks up a node via the fanout table then a narrowed bisect.
    pub fn find(&self, node: &Node) -> Option<IndexEntry> {
        let position = self.find_position(node)?;
        Some(self.entry_at(position))
    }

    pub fn find_position(&self, node: &Node) -> Option<usize> {
        let fanout = FanoutTable::new(&self.raw[..self.fanout_size.byte_len()], self.fanout_size);
        let (mut lo, hi) = fanout.get_bounds(node.as_ref());
        let mut hi = hi.unwrap_or(self.entry_count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.entry_at(mid);
            match entry.node.cmp(node) {
                std::cmp::Ordering::Equal => return Some(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }

    /// The entry at `position`'s delta base, following `delta_base_location`.
    pub fn resolve_base(&self, entry: &IndexEntry) -> Option<IndexEntry> {
        if entry.delta_base_location == NO_BASE {
            None
        } else {
            Some(self.entry_at(entry.delta_base_location as usize))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        (0..self.entry_count).map(move |i| self.entry_at(i))
    }
}

/// Serializes a sorted slice of entries, building the fanout table as it goes.
/// `entries` must already be sorted by node and `delta_base_location` values
/// must reference positions within this same slice.
pub fn write_index<T: Write>(writer: &mut T, entries: &[IndexEntry]) -> Result<()> {
    let fanout_size = FanoutSize::for_entry_count(entries.len());
    writer.write_u8(INDEX_VERSION)?;
    writer.write_u8(0)?; // config byte, reserved

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
        writer.write_i32::<BigEndian>(entry.delta_base_location)?;
        writer.write_u64::<BigEndian>(entry.pack_offset)?;
        writer.write_u64::<BigEndian>(entry.pack_size)?;
    }
    Ok(())
}
