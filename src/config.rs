/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Tunables for the pack set, loose store and repack engine, with defaults
//! pulled from the values hard-coded in the originating Python stores.

#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Max number of open pack handles a `PackSet` keeps resident.
    pub max_open_packs: usize,
    /// Minimum interval between directory rescans.
    pub refresh_interval_ms: u64,
    /// Resident mmap size, across all open packs, that triggers an unmap pass.
    pub max_mmap_bytes: u64,
    /// Loose-file store: total bytes kept before old entries are GC'd.
    pub loose_store_size_limit: u64,
    /// Pack-count threshold, per generation bucket, that makes that bucket
    /// eligible for an incremental repack.
    pub repack_gen_count_limit: usize,
    /// Max number of packs merged together by one incremental repack pass.
    pub repack_max_pack_count: usize,
    /// Combined input size limit for one incremental repack pass.
    pub repack_size_limit: u64,
    /// A pack bigger than this is never chosen as incremental repack input.
    pub repack_max_pack_size: u64,
    /// Whether a corrupt pack encountered during a store operation is
    /// renamed out of the way (`.corrupt`) rather than left in place.
    pub delete_corrupt_packs: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_open_packs: 100,
            refresh_interval_ms: 100,
            max_mmap_bytes: 100 * 1024 * 1024,
            loose_store_size_limit: 10 * 1024 * 1024 * 1024,
            repack_gen_count_limit: 2,
            repack_max_pack_count: 25,
            repack_size_limit: 100 * 1024 * 1024,
            repack_max_pack_size: 100 * 1024 * 1024,
            delete_corrupt_packs: true,
        }
    }
}

/// The generation buckets incremental repack groups packs into, by size.
pub const GENERATIONS: &[(u64, u64)] = &[
    (0, 1024 * 1024),
    (1024 * 1024, 100 * 1024 * 1024),
    (100 * 1024 * 1024, u64::MAX),
];

pub fn generation_for_size(size: u64) -> usize {
    for (i, (lo, hi)) in GENERATIONS.iter().enumerate() {
        if size >= *lo && size < *hi {
            return i;
        }
    }
    GENERATIONS.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_buckets() {
        assert_eq!(generation_for_size(0), 0);
        assert_eq!(generation_for_size(2 * 1024 * 1024), 1);
        assert_eq!(generation_for_size(200 * 1024 * 1024), 2);
    }
}
