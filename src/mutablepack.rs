/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Shared machinery for the mutable data/history pack writers: both
//! accumulate entries in memory, then flush to a pair of temp files that get
//! atomically renamed to their final, content-hash-derived name.

use std::path::Path;
use std::path::PathBuf;

use anyhow::Result;

use crate::util::atomic_write;
use crate::util::sha1_hex;

/// The pair of final paths a flush produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlushedPack {
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
}

/// Writes a `(data, index)` byte pair to `dir`, named after the SHA1 of
/// `data`, with `pack_ext`/`index_ext` as their respective extensions.
/// Returns `None` if `data` is empty (nothing to flush).
///
/// The index is written (and renamed into place) before the data file, so a
/// `PackSet` refresh — which only scans for `pack_ext` — never observes a
/// pack file whose index hasn't landed yet. A reader can still catch the
/// pack file mid-write, but never a pack with no index at all.
pub fn flush_pack_pair(
    dir: &Path,
    data: &[u8],
    index: &[u8],
    pack_ext: &str,
    index_ext: &str,
) -> Result<Option<FlushedPack>> {
    if data.is_empty() {
        return Ok(None);
    }
    let base_name = sha1_hex(data);
    let pack_path = dir.join(&base_name).with_extension(pack_ext);
    let index_path = dir.join(&base_name).with_extension(index_ext);

    atomic_write(dir, &index_path, index)?;
    atomic_write(dir, &pack_path, data)?;

    Ok(Some(FlushedPack {
        pack_path,
        index_path,
    }))
}
