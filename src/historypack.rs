/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! An immutable historypack: a pair of memory-mapped `.histpack`/`.histidx`
//! files holding the `(p1, p2, linknode, copyfrom)` tuple for file and tree
//! revisions.
//!
//! ```text
//! .histpack
//!     historypack = <version: 1 byte> [<history revision>,...]
//!     history revision = <filename len: 2 byte unsigned int>
//!                        <filename>
//!                        <node: 20 byte>
//!                        <p1: 20 byte>
//!                        <p2: 20 byte>
//!                        <linknode: 20 byte>
//!                        <copyfrom len: 2 byte unsigned int>
//!                        <copyfrom>
//! ```
//!
//! The companion `.histidx` layout is documented in [`crate::historyindex`].

use std::io::Cursor;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::format_err;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use fs_err::File;
use memmap2::Mmap;
use memmap2::MmapOptions;

use crate::error::PackError;
use crate::historyindex::HistoryIndex;
use crate::key::Key;
use crate::key::NodeInfo;
use crate::node::Node;
use crate::path::RepoPath;
use crate::store::HistoryStore;
use crate::store::PackResult;

pub const HISTORYPACK_VERSION: u8 = 0;

pub struct HistoryEntry<'a> {
    offset: u64,
    filename: &'a RepoPath,
    node: Node,
    p1: Node,
    p2: Node,
    linknode: Node,
    copyfrom: Option<&'a RepoPath>,
    next_offset: u64,
}

impl<'a> HistoryEntry<'a> {
    pub fn new(buf: &'a [u8], offset: u64) -> Result<Self> {
        let mut cur = Cursor::new(buf);
        cur.set_position(offset);

        let filename_len = cur.read_u16::<BigEndian>()? as u64;
        let start = cur.position() as usize;
        let filename_slice = buf
            .get(start..start + filename_len as usize)
            .ok_or_else(|| format_err!("historypack entry filename runs past end of pack"))?;
        let filename = RepoPath::from_utf8(filename_slice)?;
        cur.set_position(cur.position() + filename_len);

        let mut node_buf = [0u8; 20];
        cur.read_exact(&mut node_buf)?;
        let node = Node::from(node_buf);
        cur.read_exact(&mut node_buf)?;
        let p1 = Node::from(node_buf);
        cur.read_exact(&mut node_buf)?;
        let p2 = Node::from(node_buf);
        cur.read_exact(&mut node_buf)?;
        let linknode = Node::from(node_buf);

        let copyfrom_len = cur.read_u16::<BigEndian>()? as u64;
        let copyfrom = if copyfrom_len == 0 {
            None
        } else {
            let start = cur.position() as usize;
            let slice = buf
                .get(start..start + copyfrom_len as usize)
                .ok_or_else(|| format_err!("historypack entry copyfrom runs past end of pack"))?;
            Some(RepoPath::from_utf8(slice)?)
        };
        cur.set_position(cur.position() + copyfrom_len);
        let next_offset = cur.position();

        Ok(HistoryEntry {
            offset,
            filename,
            node,
            p1,
            p2,
            linknode,
            copyfrom,
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

    pub fn to_node_info(&self) -> NodeInfo {
        let p1_path = self.copyfrom.map(|p| p.to_owned()).unwrap_or_else(|| self.filename.to_owned());
        NodeInfo {
            parents: [
                Key::new(p1_path, self.p1),
                Key::new(self.filename.to_owned(), self.p2),
            ],
            linknode: self.linknode,
        }
    }
}

pub struct HistoryPack {
    mmap: Mmap,
    index_mmap: Mmap,
    base_path: PathBuf,
    pack_path: PathBuf,
    index_path: PathBuf,
}

impl HistoryPack {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        let pack_path = base_path.with_extension("histpack");
        let index_path = base_path.with_extension("histidx");

        let file = File::open(&pack_path)?;
        let len = file.metadata()?.len();
        if len < 1 {
            bail!("empty historypack '{}' is invalid", pack_path.display());
        }
        let mmap = unsafe { MmapOptions::new().len(len as usize).map(&file)? };
        if mmap[0] != HISTORYPACK_VERSION {
            bail!("unsupported historypack version {}", mmap[0]);
        }

        let index_file = File::open(&index_path)?;
        let index_len = index_file.metadata()?.len();
        let index_mmap = unsafe { MmapOptions::new().len(index_len as usize).map(&index_file)? };
        HistoryIndex::new(&index_mmap)?;

        Ok(HistoryPack {
            mmap,
            index_mmap,
            base_path,
            pack_path,
            index_path,
        })
    }

    fn index(&self) -> HistoryIndex {
        HistoryIndex::new(&self.index_mmap).expect("validated in new()")
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

    pub fn len(&self) -> usize {
        self.index().len()
    }

    pub fn is_empty(&self) -> bool {
        self.index().is_empty()
    }

    pub fn read_entry(&self, offset: u64) -> Result<HistoryEntry> {
        HistoryEntry::new(self.mmap.as_ref(), offset)
    }

    /// All `(path, node)` keys stored in this pack, in on-disk order,
    /// obtained by walking entries from the first one right after the
    /// version byte.
    pub fn keys(&self) -> Vec<Key> {
        let mut keys = Vec::new();
        let mut offset = 1u64;
        while let Ok(entry) = self.read_entry(offset) {
            keys.push(Key::new(entry.filename().to_owned(), entry.node()));
            let next = entry.next_offset();
            if next <= offset {
                break;
            }
            offset = next;
            if offset >= self.mmap.len() as u64 {
                break;
            }
        }
        keys
    }
}

impl HistoryStore for HistoryPack {
    fn get_node_info(&self, key: &Key) -> PackResult<NodeInfo> {
        let index = self.index();
        let candidates = index.find(&key.node);
        for candidate in candidates {
            if let Ok(entry) = self.read_entry(candidate.pack_offset) {
                if entry.filename() == key.path.as_repo_path() {
                    return Ok(entry.to_node_info());
                }
            }
        }
        Err(PackError::NotFound(key.clone()))
    }

    fn get_missing(&self, keys: &[Key]) -> PackResult<Vec<Key>> {
        let index = self.index();
        Ok(keys
            .iter()
            .filter(|k| {
                !index
                    .find(&k.node)
                    .into_iter()
                    .filter_map(|c| self.read_entry(c.pack_offset).ok())
                    .any(|e| e.filename() == k.path.as_repo_path())
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use byteorder::WriteBytesExt;
    use tempfile::TempDir;

    use super::*;
    use crate::historyindex::write_index;
    use crate::historyindex::HistoryIndexEntry;
    use crate::key::testutil::key;
    use crate::key::testutil::node;

    fn write_history_pack(dir: &TempDir) -> PathBuf {
        let mut buf = vec![HISTORYPACK_VERSION];
        let mut entries = Vec::new();

        let offset = buf.len() as u64;
        write_entry(&mut buf, "a", &node("2"), &node("1"), &Node::null(), &node("9"), None);
        entries.push(HistoryIndexEntry {
            node: node("2"),
            pack_offset: offset,
            pack_size: buf.len() as u64 - offset,
        });

        let offset = buf.len() as u64;
        write_entry(&mut buf, "a", &node("1"), &Node::null(), &Node::null(), &node("9"), None);
        entries.push(HistoryIndexEntry {
            node: node("1"),
            pack_offset: offset,
            pack_size: buf.len() as u64 - offset,
        });

        entries.sort_by_key(|e| e.node);
        let pack_path = dir.path().join("test");
        std::fs::write(pack_path.with_extension("histpack"), &buf).unwrap();
        let mut index_buf = vec![];
        write_index(&mut index_buf, &entries).unwrap();
        std::fs::write(pack_path.with_extension("histidx"), &index_buf).unwrap();
        pack_path
    }

    #[allow(clippy::too_many_arguments)]
    fn write_entry(
        buf: &mut Vec<u8>,
        filename: &str,
        node: &Node,
        p1: &Node,
        p2: &Node,
        linknode: &Node,
        copyfrom: Option<&str>,
    ) {
        buf.write_u16::<BigEndian>(filename.len() as u16).unwrap();
        buf.extend_from_slice(filename.as_bytes());
        buf.extend_from_slice(node.as_ref());
        buf.extend_from_slice(p1.as_ref());
        buf.extend_from_slice(p2.as_ref());
        buf.extend_from_slice(linknode.as_ref());
        let copyfrom_bytes = copyfrom.unwrap_or("").as_bytes();
        buf.write_u16::<BigEndian>(copyfrom_bytes.len() as u16).unwrap();
        buf.extend_from_slice(copyfrom_bytes);
    }

    #[test]
    fn test_get_node_info() {
        let dir = TempDir::new().unwrap();
        let pack_path = write_history_pack(&dir);
        let pack = HistoryPack::new(&pack_path).unwrap();

        let info = pack.get_node_info(&key("a", "2")).unwrap();
        assert_eq!(info.parents[0].node, node("1"));
        assert_eq!(info.linknode, node("9"));
    }

    #[test]
    fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let pack_path = write_history_pack(&dir);
        let pack = HistoryPack::new(&pack_path).unwrap();

        let missing = pack.get_missing(&[key("a", "1"), key("a", "9")]).unwrap();
        assert_eq!(missing, vec![key("a", "9")]);
    }
}
