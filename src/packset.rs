/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Directory-scoped management of a family of immutable packs: keeps an LRU
//! of open handles capped at a configured size, periodically rescans the
//! directory for newly written or removed packs, and renames packs that
//! turn out to be corrupt out of the way rather than failing every lookup
//! against them.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use tracing::warn;

use crate::config::StoreConfig;
use crate::datapack::DataPack;
use crate::historypack::HistoryPack;

/// A family of immutable packs sharing a file extension pair, opened lazily
/// and evicted in least-recently-used order once `max_open_packs` is hit.
pub struct PackSet<P> {
    dir: PathBuf,
    pack_ext: &'static str,
    index_ext: &'static str,
    config: StoreConfig,
    open: Mutex<PackSetState<P>>,
    opener: Box<dyn Fn(&Path) -> Result<P> + Send + Sync>,
}

struct PackSetState<P> {
    // Most-recently-used at the back.
    packs: Vec<(PathBuf, Arc<P>)>,
    known_on_disk: HashSet<PathBuf>,
    last_refresh: Option<Instant>,
    corrupt: Vec<PathBuf>,
}

impl<P> PackSet<P> {
    pub fn new(
        dir: impl Into<PathBuf>,
        pack_ext: &'static str,
        index_ext: &'static str,
        config: StoreConfig,
        opener: impl Fn(&Path) -> Result<P> + Send + Sync + 'static,
    ) -> Self {
        PackSet {
            dir: dir.into(),
            pack_ext,
            index_ext,
            config,
            open: Mutex::new(PackSetState {
                packs: Vec::new(),
                known_on_disk: HashSet::new(),
                last_refresh: None,
                corrupt: Vec::new(),
            }),
            opener: Box::new(opener),
        }
    }

    /// Forces the next access to rescan the directory regardless of the
    /// refresh throttle.
    pub fn mark_for_refresh(&self) {
        self.open.lock().last_refresh = None;
    }

    fn refresh_if_due(&self, state: &mut PackSetState<P>) -> Result<()> {
        let due = match state.last_refresh {
            None => true,
            Some(at) => at.elapsed() >= Duration::from_millis(self.config.refresh_interval_ms),
        };
        if !due {
            return Ok(());
        }
        state.last_refresh = Some(Instant::now());

        let on_disk = crate::util::list_files_with_extension(&self.dir, self.pack_ext)?;
        let on_disk_set: HashSet<PathBuf> = on_disk.iter().cloned().collect();

        state.packs.retain(|(path, _)| on_disk_set.contains(path));

        let new_paths: Vec<PathBuf> = on_disk
            .into_iter()
            .filter(|p| !state.known_on_disk.contains(p))
            .collect();
        state.known_on_disk = on_disk_set;

        for path in new_paths {
            match (self.opener)(&path) {
                Ok(pack) => state.packs.push((path, Arc::new(pack))),
                Err(e) if is_missing_file_error(&e) => {
                    // The data file landed on disk before its index (or vice
                    // versa) because a writer is still mid-flush. Not
                    // corruption: drop it from `known_on_disk` so the next
                    // refresh treats it as new again and retries.
                    state.known_on_disk.remove(&path);
                }
                Err(e) => {
                    warn!(pack = %path.display(), error = %e, "failed to open pack, deferring");
                    state.corrupt.push(path);
                }
            }
        }
        Ok(())
    }

    fn evict_if_needed(&self, state: &mut PackSetState<P>) {
        while state.packs.len() > self.config.max_open_packs {
            state.packs.remove(0);
        }
    }

    /// Runs `f` against every currently open pack, most-recently-used last
    /// touched moved to the back. Stops and returns as soon as `f` returns
    /// `Some`.
    pub fn try_each<T>(&self, mut f: impl FnMut(&P) -> Option<T>) -> Result<Option<T>> {
        let mut state = self.open.lock();
        self.refresh_if_due(&mut state)?;

        let mut hit_index = None;
        let mut result = None;
        for (i, (_, pack)) in state.packs.iter().enumerate() {
            if let Some(value) = f(pack) {
                hit_index = Some(i);
                result = Some(value);
                break;
            }
        }
        if let Some(i) = hit_index {
            let entry = state.packs.remove(i);
            state.packs.push(entry);
        }
        self.evict_if_needed(&mut state);
        Ok(result)
    }

    pub fn all(&self) -> Result<Vec<Arc<P>>> {
        let mut state = self.open.lock();
        self.refresh_if_due(&mut state)?;
        Ok(state.packs.iter().map(|(_, p)| p.clone()).collect())
    }

    /// Pack count eligible for repack consideration, ignoring ones deferred
    /// as corrupt.
    pub fn len(&self) -> usize {
        self.open.lock().packs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Renames packs flagged corrupt during a refresh out of the directory,
    /// if the store is configured to do so. Deferred until the caller is
    /// done iterating so a corrupt pack doesn't disappear mid-scan.
    pub fn quarantine_corrupt(&self) -> Result<Vec<PathBuf>> {
        let mut state = self.open.lock();
        let corrupt = std::mem::take(&mut state.corrupt);
        if self.config.delete_corrupt_packs {
            for path in &corrupt {
                quarantine_pack_pair(path, self.pack_ext, self.index_ext);
            }
        }
        Ok(corrupt)
    }
}

/// Renames a pack/index pair out of the way by appending `.corrupt` to each
/// file's name, so the pair stops showing up in directory scans without
/// disappearing outright. `stem` has no extension; both of its files are
/// renamed independently since a single shared destination name would make
/// the second rename clobber the first.
pub(crate) fn quarantine_pack_pair(stem: &Path, pack_ext: &str, index_ext: &str) {
    for ext in [pack_ext, index_ext] {
        let path = stem.with_extension(ext);
        let mut corrupt_name = path.as_os_str().to_os_string();
        corrupt_name.push(".corrupt");
        let _ = fs::rename(&path, PathBuf::from(corrupt_name));
    }
}

/// Whether `err`'s chain bottoms out in an `io::ErrorKind::NotFound`, i.e.
/// the companion file (index or data) for a pack hasn't been written yet
/// rather than the pack being genuinely corrupt.
fn is_missing_file_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<io::Error>(), Some(e) if e.kind() == io::ErrorKind::NotFound))
}

pub type DataPackSet = PackSet<DataPack>;
pub type HistoryPackSet = PackSet<HistoryPack>;

pub fn open_data_pack_set(dir: impl Into<PathBuf>, config: StoreConfig) -> DataPackSet {
    PackSet::new(dir, "datapack", "dataidx", config, |path| DataPack::new(path))
}

pub fn open_history_pack_set(dir: impl Into<PathBuf>, config: StoreConfig) -> HistoryPackSet {
    PackSet::new(dir, "histpack", "histidx", config, |path| HistoryPack::new(path))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::key::testutil::key;
    use crate::mutabledatapack::MutableDataPack;
    use crate::store::Store;

    #[test]
    fn test_discovers_new_pack_after_refresh() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::default();
        config.refresh_interval_ms = 0;
        let packset = open_data_pack_set(dir.path(), config);
        assert_eq!(packset.len(), 0);

        let mut writer = MutableDataPack::new(dir.path());
        writer.add(key("a", "1"), None, b"hello".to_vec(), crate::metadata::Metadata::default());
        writer.flush().unwrap();

        let found = packset
            .try_each(|pack: &DataPack| pack.get(&key("a", "1")).ok())
            .unwrap();
        assert_eq!(found, Some(b"hello".to_vec()));
        assert_eq!(packset.len(), 1);
    }

    #[test]
    fn test_evicts_oldest_past_capacity() {
        let dir = TempDir::new().unwrap();
        let mut config = StoreConfig::default();
        config.refresh_interval_ms = 0;
        config.max_open_packs = 1;
        let packset = open_data_pack_set(dir.path(), config);

        for i in 0..3 {
            let mut writer = MutableDataPack::new(dir.path());
            writer.add(
                key("a", &i.to_string()),
                None,
                format!("text-{}", i).into_bytes(),
                crate::metadata::Metadata::default(),
            );
            writer.flush().unwrap();
        }
        packset.mark_for_refresh();
        let _ = packset.all().unwrap();
        assert!(packset.len() <= 1);
    }
}
