/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The network-fetch collaborator a [`crate::unionstore::UnionStore`] falls
//! back to once every local store has missed. Fetching itself is out of
//! scope; this module only defines the seam and an in-memory test double.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::error::PackError;
use crate::key::Key;
use crate::metadata::Metadata;
use crate::store::PackResult;

/// A source of data reachable only over the network. A real implementation
/// lives outside this crate; `UnionStore` only needs to know it can ask one
/// for a batch of keys and get back whichever it could fetch.
pub trait RemoteStore: Send + Sync {
    /// Best-effort fetch: brings as many of `keys` as possible into the
    /// local stores this remote is paired with, then returns the ones it
    /// could not find.
    fn prefetch(&self, keys: &[Key]) -> PackResult<Vec<Key>>;
}

/// An in-memory stand-in used by tests to exercise union-store fallback
/// without a real network dependency.
#[derive(Default)]
pub struct FakeRemoteStore {
    blobs: Mutex<HashMap<Key, (Vec<u8>, Metadata)>>,
}

impl FakeRemoteStore {
    pub fn new() -> Self {
        FakeRemoteStore::default()
    }

    pub fn insert(&self, key: Key, data: Vec<u8>, metadata: Metadata) {
        self.blobs.lock().insert(key, (data, metadata));
    }

    pub fn get(&self, key: &Key) -> PackResult<Vec<u8>> {
        self.blobs
            .lock()
            .get(key)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| PackError::NotFound(key.clone()))
    }
}

impl RemoteStore for FakeRemoteStore {
    fn prefetch(&self, keys: &[Key]) -> PackResult<Vec<Key>> {
        let blobs = self.blobs.lock();
        Ok(keys
            .iter()
            .filter(|k| !blobs.contains_key(*k))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::testutil::key;

    #[test]
    fn test_prefetch_reports_misses() {
        let remote = FakeRemoteStore::new();
        remote.insert(key("a", "1"), b"text".to_vec(), Metadata::default());
        let missing = remote.prefetch(&[key("a", "1"), key("a", "2")]).unwrap();
        assert_eq!(missing, vec![key("a", "2")]);
    }
}
