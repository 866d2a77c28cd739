/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! An immutable datapack: a pair of memory-mapped `.datapack`/`.dataidx`
//! files holding full texts and deltas for various file revisions.
//!
//! ```text
//! .datapack
//!     datapack = <version: 1 byte> [<revision>,...]
//!     revision = <filename len: 2 byte unsigned int>
//!                <filename>
//!                <node: 20 byte>
//!                <deltabase node: 20 byte>
//!                <delta len: 8 byte unsigned int>
//!                <delta>
//!                <metadata-list len: 4 byte unsigned int>
//!                <metadata-list>
//! ```
//!
//! The companion `.dataidx` layout is documented in [`crate::dataindex`].

use std::fmt;
use std::io::Cursor;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::bail;
use anyhow::format_err;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use fs_err::File;
use memmap2::Mmap;
use memmap2::MmapOptions;

use crate::chain;
use crate::dataindex::DataIndex;
use crate::error::PackError;
use crate::key::Key;
use crate::metadata::Metadata;
use crate::node::Node;
use crate::path::RepoPath;
use crate::store::PackResult;
use crate::store::Store;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DataPackVersion {
    Zero,
    One,
}

impl DataPackVersion {
    fn parse(value: u8) -> Result<Self> {
        match value {
            0 => Ok(DataPackVersion::Zero),
            1 => Ok(DataPackVersion::One),
            _ => bail!("invalid datapack version number '{}'", value),
        }
    }
}

impl From<DataPackVersion> for u8 {
    fn from(version: DataPackVersion) -> u8 {
        match version {
            DataPackVersion::Zero => 0,
            DataPackVersion::One => 1,
        }
    }
}

pub struct DataEntry<'a> {
    offset: u64,
    filename: &'a RepoPath,
    node: Node,
    delta_base: Option<Node>,
    delta: &'a [u8],
    metadata: Metadata,
    next_offset: u64,
}

impl<'a> DataEntry<'a> {
    pub fn new(buf: &'a [u8], offset: u64, version: DataPackVersion) -> Result<Self> {
        let mut cur = Cursor::new(buf);
        cur.set_position(offset);

        let filename_len = cur.read_u16::<BigEndian>()? as u64;
        let start = cur.position() as usize;
        let filename_slice = buf
            .get(start..start + filename_len as usize)
            .ok_or_else(|| format_err!("datapack entry filename runs past end of pack"))?;
        let filename = RepoPath::from_utf8(filename_slice)?;
        cur.set_position(cur.position() + filename_len);

        let mut node_buf = [0u8; 20];
        cur.read_exact(&mut node_buf)?;
        let node = Node::from(node_buf);

        cur.read_exact(&mut node_buf)?;
        let delta_base_node = Node::from(node_buf);
        let delta_base = if delta_base_node.is_null() {
            None
        } else {
            Some(delta_base_node)
        };

        let delta_len = cur.read_u64::<BigEndian>()?;
        let start = cur.position() as usize;
        let delta = buf
            .get(start..start + delta_len as usize)
            .ok_or_else(|| format_err!("datapack entry delta runs past end of pack"))?;
        cur.set_position(cur.position() + delta_len);

        let metadata = if version == DataPackVersion::One {
            Metadata::read(&mut cur)?
        } else {
            Metadata::default()
        };

        let next_offset = cur.position();

        Ok(DataEntry {
            offset,
            filename,
            node,
            delta_base,
            delta,
            metadata,
            next_offset,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn filename(&self) -> &RepoPath {
        self.filename
    }

    pub fn node(&self) -> Node {
        self.node
    }

    pub fn delta_base(&self) -> Option<Node> {
        self.delta_base
    }

    pub fn delta(&self) -> &'a [u8] {
        self.delta
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}

impl<'a> fmt::Debug for DataEntry<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DataEntry")
            .field("offset", &self.offset)
            .field("filename", &self.filename)
            .field("node", &self.node)
            .field("delta_base", &self.delta_base)
            .field("delta_len", &self.delta.len())
            .finish()
    }
}

/// An immutable, memory-mapped pair of `.datapack`/`.dataidx` files.
pub struct DataPack {
    mmap: Mmap,
    version: DataPackVersion,
    index_mmap: Mmap,
    base_path: Arc<PathBuf>,
    pack_path: PathBuf,
    index_path: PathBuf,
}

impl DataPack {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        let pack_path = base_path.with_extension("datapack");
        let index_path = base_path.with_extension("dataidx");

        let file = File::open(&pack_path)?;
        let len = file.metadata()?.len();
        if len < 1 {
            bail!("empty datapack '{}' is invalid", pack_path.display());
        }
        let mmap = unsafe { MmapOptions::new().len(len as usize).map(&file)? };
        let version = DataPackVersion::parse(mmap[0])?;

        let index_file = File::open(&index_path)?;
        let index_len = index_file.metadata()?.len();
        let index_mmap = unsafe { MmapOptions::new().len(index_len as usize).map(&index_file)? };
        // Validate eagerly so a corrupt index is caught at open time rather
        // than on first lookup.
        DataIndex::new(&index_mmap)?;

        Ok(DataPack {
            mmap,
            version,
            index_mmap,
            base_path: Arc::new(base_path),
            pack_path,
            index_path,
        })
    }

    fn index(&self) -> DataIndex {
        DataIndex::new(&self.index_mmap).expect("validated in new()")
    }

    pub fn is_empty(&self) -> bool {
        self.index().is_empty()
    }

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn pack_path(&self) -> &Path {
        &self.pack_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn read_entry(&self, offset: u64) -> Result<DataEntry> {
        DataEntry::new(self.mmap.as_ref(), offset, self.version)
    }

    /// All keys stored in this pack, in index order.
    pub fn keys(&self) -> Vec<Key> {
        self.index()
            .iter()
            .filter_map(|entry| self.read_entry(entry.pack_offset).ok())
            .map(|e| Key::new(e.filename().to_owned(), e.node()))
            .collect()
    }

    /// The `(path, node)` chain from `key` down to its full-text root, in
    /// `[key, ..., root]` order, without reading or applying any delta
    /// bytes.
    fn key_chain(&self, key: &Key) -> PackResult<Vec<Key>> {
        let index = self.index();
        if index.find(&key.node).is_none() {
            return Err(PackError::NotFound(key.clone()));
        }
        let node = key.node;
        let mut links = chain::walk_chain(&PackDeltaSource { pack: self, index: &index }, node)
            .map_err(|e| PackError::corrupt(self.pack_path.clone(), e.to_string()))?;
        // `walk_chain` returns leaf-to-root; callers expect root-first, so
        // the first element's delta_base is always null.
        links.reverse();
        links
            .into_iter()
            .map(|link| {
                self.read_entry(
                    index
                        .find(&link.node)
                        .ok_or_else(|| PackError::NotFound(key.clone()))?
                        .pack_offset,
                )
                .map(|e| Key::new(e.filename().to_owned(), e.node()))
                .map_err(|e| PackError::corrupt(self.pack_path.clone(), e.to_string()))
            })
            .collect()
    }
}

struct PackDeltaSource<'a> {
    pack: &'a DataPack,
    index: &'a DataIndex<'a>,
}

impl<'a> chain::DeltaSource for PackDeltaSource<'a> {
    fn lookup(&self, node: &Node) -> Result<Option<chain::ChainLink>> {
        let Some(entry) = self.index.find(node) else {
            return Ok(None);
        };
        let data_entry = self.pack.read_entry(entry.pack_offset)?;
        Ok(Some(chain::ChainLink {
            node: data_entry.node(),
            delta_base: data_entry.delta_base(),
            delta: data_entry.delta().to_vec(),
        }))
    }
}

impl Store for DataPack {
    fn get(&self, key: &Key) -> PackResult<Vec<u8>> {
        let index = self.index();
        if index.find(&key.node).is_none() {
            return Err(PackError::NotFound(key.clone()));
        }
        chain::resolve_fulltext(&PackDeltaSource { pack: self, index: &index }, key.node)
            .map_err(|e| PackError::corrupt(self.pack_path.clone(), e.to_string()))
    }

    fn get_meta(&self, key: &Key) -> PackResult<Metadata> {
        let index = self.index();
        let entry = index
            .find(&key.node)
            .ok_or_else(|| PackError::NotFound(key.clone()))?;
        let data_entry = self
            .read_entry(entry.pack_offset)
            .map_err(|e| PackError::corrupt(self.pack_path.clone(), e.to_string()))?;
        Ok(*data_entry.metadata())
    }

    fn get_missing(&self, keys: &[Key]) -> PackResult<Vec<Key>> {
        let index = self.index();
        Ok(keys
            .iter()
            .filter(|k| index.find(&k.node).is_none())
            .cloned()
            .collect())
    }

    fn get_delta_chain(&self, key: &Key) -> PackResult<Vec<Key>> {
        self.key_chain(key)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::dataindex::write_index;
    use crate::dataindex::IndexEntry as RawIndexEntry;
    use crate::dataindex::NO_BASE;
    use crate::key::testutil::key;
    use crate::key::testutil::node;
    use crate::patch;

    fn write_pack(dir: &TempDir, name: &str) -> PathBuf {
        let base = "a";
        let text1 = b"hello world".to_vec();
        let text2_base = text1.clone();
        let text2 = b"hello world, it is me".to_vec();
        let delta = patch::create(&text2_base, &text2);

        let mut data_buf = vec![u8::from(DataPackVersion::One)];

        let mut entries = Vec::new();
        let offset1 = data_buf.len() as u64;
        write_revision(&mut data_buf, base, &node("1"), &Node::null(), &text1, text1.len());
        entries.push(RawIndexEntry {
            node: node("1"),
            delta_base_location: NO_BASE,
            pack_offset: offset1,
            pack_size: (data_buf.len() as u64) - offset1,
        });

        let offset2 = data_buf.len() as u64;
        write_revision(&mut data_buf, base, &node("2"), &node("1"), &delta, text2.len());
        entries.push(RawIndexEntry {
            node: node("2"),
            delta_base_location: 0,
            pack_offset: offset2,
            pack_size: (data_buf.len() as u64) - offset2,
        });
        entries.sort_by_key(|e| e.node);
        // Fix delta_base_location after sort: find position of node("1").
        let base_pos = entries.iter().position(|e| e.node == node("1")).unwrap();
        for e in entries.iter_mut() {
            if e.node == node("2") {
                e.delta_base_location = base_pos as i32;
            }
        }

        let pack_path = dir.path().join(name);
        std::fs::write(pack_path.with_extension("datapack"), &data_buf).unwrap();
        let mut index_buf = vec![];
        write_index(&mut index_buf, &entries).unwrap();
        std::fs::write(pack_path.with_extension("dataidx"), &index_buf).unwrap();
        pack_path
    }

    fn write_revision(
        buf: &mut Vec<u8>,
        filename: &str,
        node: &Node,
        delta_base: &Node,
        delta: &[u8],
        full_size: usize,
    ) {
        use byteorder::WriteBytesExt;
        buf.write_u16::<BigEndian>(filename.len() as u16).unwrap();
        buf.extend_from_slice(filename.as_bytes());
        buf.extend_from_slice(node.as_ref());
        buf.extend_from_slice(delta_base.as_ref());
        buf.write_u64::<BigEndian>(delta.len() as u64).unwrap();
        buf.extend_from_slice(delta);
        let meta = Metadata {
            size: Some(full_size as u64),
            flags: None,
        };
        meta.write(buf).unwrap();
    }

    #[test]
    fn test_get_full_text_and_delta() {
        let dir = TempDir::new().unwrap();
        let pack_path = write_pack(&dir, "test");
        let pack = DataPack::new(&pack_path).unwrap();

        let k1 = key("a", "1");
        assert_eq!(pack.get(&k1).unwrap(), b"hello world");

        let k2 = key("a", "2");
        assert_eq!(pack.get(&k2).unwrap(), b"hello world, it is me");
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let pack_path = write_pack(&dir, "test");
        let pack = DataPack::new(&pack_path).unwrap();

        let missing = pack.get_missing(&[key("a", "1"), key("a", "9")]).unwrap();
        assert_eq!(missing, vec![key("a", "9")]);
    }

    #[test]
    fn test_get_delta_chain_order() {
        let dir = TempDir::new().unwrap();
        let pack_path = write_pack(&dir, "test");
        let pack = DataPack::new(&pack_path).unwrap();

        let chain = pack.get_delta_chain(&key("a", "2")).unwrap();
        assert_eq!(chain, vec![key("a", "1"), key("a", "2")]);
    }
}
