/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The fanout table prefixing an on-disk index: a flat array of 4-byte
//! offsets into the index, indexed by a prefix of the node, used to narrow
//! a bisect down to a handful of steps.

use byteorder::BigEndian;
use byteorder::ByteOrder;

/// Below this many entries a small (2^8-slot) fanout pays for itself; above
/// it the larger 2^16-slot table wins because it shrinks the bisect range
/// more per byte spent. `8192 == 2^16 / 8`: the break-even point where the
/// large table's extra bytes cost about as much as the bisect steps it saves.
pub const SMALL_FANOUT_CUTOFF: usize = 8192;

const SMALL_FANOUT_PREFIX_BITS: u32 = 8;
const LARGE_FANOUT_PREFIX_BITS: u32 = 16;
const SMALL_FANOUT_COUNT: usize = 1 << SMALL_FANOUT_PREFIX_BITS;
const LARGE_FANOUT_COUNT: usize = 1 << LARGE_FANOUT_PREFIX_BITS;
pub const FANOUT_ENTRY_SIZE: usize = 4;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FanoutSize {
    Small,
    Large,
}

impl FanoutSize {
    pub fn for_entry_count(entry_count: usize) -> Self {
        if entry_count > SMALL_FANOUT_CUTOFF {
            FanoutSize::Large
        } else {
            FanoutSize::Small
        }
    }

    fn slot_count(self) -> usize {
        match self {
            FanoutSize::Small => SMALL_FANOUT_COUNT,
            FanoutSize::Large => LARGE_FANOUT_COUNT,
        }
    }

    fn prefix_bits(self) -> u32 {
        match self {
            FanoutSize::Small => SMALL_FANOUT_PREFIX_BITS,
            FanoutSize::Large => LARGE_FANOUT_PREFIX_BITS,
        }
    }

    pub fn byte_len(self) -> usize {
        self.slot_count() * FANOUT_ENTRY_SIZE
    }

    /// The table slot a node's prefix falls into.
    fn slot_for(self, node_prefix: &[u8]) -> usize {
        let value = BigEndian::read_u16(&node_prefix[..2]) as usize;
        match self {
            FanoutSize::Small => value >> (16 - self.prefix_bits()),
            FanoutSize::Large => value,
        }
    }
}

/// A parsed fanout table, either owned (during writing) or borrowed from a
/// memory-mapped index file (during reading).
pub struct FanoutTable<'a> {
    size: FanoutSize,
    raw: &'a [u8],
}

impl<'a> FanoutTable<'a> {
    pub fn new(raw: &'a [u8], size: FanoutSize) -> Self {
        debug_assert_eq!(raw.len(), size.byte_len());
        FanoutTable { size, raw }
    }

    /// The `[start, end)` bounds within the index that may contain `node`,
    /// narrowed by its prefix. `end` is `None` when the slot is the table's
    /// last, meaning "search to the end of the index."
    pub fn get_bounds(&self, node: &[u8]) -> (usize, Option<usize>) {
        let slot = self.size.slot_for(node);
        let start = self.read_slot(slot);
        let mut next = slot + 1;
        while next < self.size.slot_count() {
            let candidate = self.read_slot(next);
            if candidate != start {
                return (start as usize, Some(candidate as usize));
            }
            next += 1;
        }
        (start as usize, None)
    }

    fn read_slot(&self, slot: usize) -> u32 {
        let offset = slot * FANOUT_ENTRY_SIZE;
        BigEndian::read_u32(&self.raw[offset..offset + FANOUT_ENTRY_SIZE])
    }
}

/// Builds a fanout table's bytes given the sorted list of node prefixes and
/// the index offset (in entry units) that each one starts at.
pub struct FanoutTableWriter {
    size: FanoutSize,
    slots: Vec<u32>,
}

impl FanoutTableWriter {
    pub fn new(size: FanoutSize) -> Self {
        FanoutTableWriter {
            size,
            slots: vec![0u32; size.slot_count()],
        }
    }

    /// Records that `index_position` is the first index entry whose node
    /// starts with `node_prefix`. Entries must be fed in ascending node
    /// order, one call per distinct node (duplicated slots fill forward).
    pub fn set(&mut self, node_prefix: &[u8], index_position: u32) {
        let slot = self.size.slot_for(node_prefix);
        self.slots[slot] = index_position;
    }

    pub fn finish(mut self) -> Vec<u8> {
        // Slots with no entry inherit the next populated slot's value so a
        // bisect landing there continues seamlessly.
        let mut next_value = self.slots.last().copied().unwrap_or(0);
        for slot in self.slots.iter_mut().rev() {
            if *slot == 0 {
                *slot = next_value;
            } else {
                next_value = *slot;
            }
        }
        let mut buf = vec![0u8; self.size.byte_len()];
        for (i, value) in self.slots.iter().enumerate() {
            BigEndian::write_u32(&mut buf[i * FANOUT_ENTRY_SIZE..(i + 1) * FANOUT_ENTRY_SIZE], *value);
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_cutoff() {
        assert_eq!(FanoutSize::for_entry_count(100), FanoutSize::Small);
        assert_eq!(FanoutSize::for_entry_count(SMALL_FANOUT_CUTOFF), FanoutSize::Small);
        assert_eq!(
            FanoutSize::for_entry_count(SMALL_FANOUT_CUTOFF + 1),
            FanoutSize::Large
        );
    }

    #[test]
    fn test_write_then_bounds() {
        let mut writer = FanoutTableWriter::new(FanoutSize::Small);
        writer.set(&[0x10, 0x00], 0);
        writer.set(&[0x20, 0x00], 5);
        let bytes = writer.finish();
        let table = FanoutTable::new(&bytes, FanoutSize::Small);
        let (start, end) = table.get_bounds(&[0x10, 0x00]);
        assert_eq!(start, 0);
        assert_eq!(end, Some(5));
    }

    #[test]
    fn test_empty_slots_inherit_forward() {
        let mut writer = FanoutTableWriter::new(FanoutSize::Small);
        writer.set(&[0x00, 0x00], 2);
        let bytes = writer.finish();
        let table = FanoutTable::new(&bytes, FanoutSize::Small);
        // A prefix between populated slots should still find a sane bound.
        let (start, _) = table.get_bounds(&[0x01, 0x00]);
        assert_eq!(start, 2);
    }
}
