/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The narrow trait every pack/loose/union store implements. Kept small on
//! purpose: a handful of verbs, no generic streaming interface, so that a
//! `Vec<Box<dyn Store>>` is enough to build the union.

use crate::error::PackError;
use crate::key::Key;
use crate::key::NodeInfo;
use crate::metadata::Metadata;

pub type PackResult<T> = std::result::Result<T, PackError>;

/// A source of full texts and deltas keyed by `(path, node)`.
pub trait Store: Send + Sync {
    /// The full text or delta bytes for `key`, whichever this store holds.
    fn get(&self, key: &Key) -> PackResult<Vec<u8>>;

    fn get_meta(&self, key: &Key) -> PackResult<Metadata>;

    /// Given a candidate set, returns the subset this store does not have.
    fn get_missing(&self, keys: &[Key]) -> PackResult<Vec<Key>>;

    /// The chain of delta entries from the full-text root down to (and
    /// including) `key`, root-first: `[root, ..., key]`. The first
    /// element's delta base is always the null node.
    fn get_delta_chain(&self, key: &Key) -> PackResult<Vec<Key>>;

    /// Hints that this store's on-disk contents may have changed underneath
    /// it (a new pack appeared) and the next access should rescan.
    fn mark_for_refresh(&self) {}
}

/// A source of the history tuple (parents, linknode, copy info) for a key.
pub trait HistoryStore: Send + Sync {
    fn get_node_info(&self, key: &Key) -> PackResult<NodeInfo>;

    fn get_missing(&self, keys: &[Key]) -> PackResult<Vec<Key>>;

    fn mark_for_refresh(&self) {}
}
