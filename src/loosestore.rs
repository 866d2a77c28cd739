/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! A loose-file store: one revision per file, sharded by the SHA1 of its
//! content under `xx/xxxxxxxxxxxxxxxxxx`, with a sibling `filename` file
//! recording the repo path so a content hash alone is enough to recover the
//! original `Key` for garbage collection and repack.
//!
//! ```text
//! blob = "v1\n" [<"s"size"\n">] [<"f"flags"\n">] "\0" <fulltext>
//! ```

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::bail;
use anyhow::Context;
use anyhow::Result;

use crate::error::PackError;
use crate::key::Key;
use crate::metadata::Metadata;
use crate::node::Node;
use crate::path::RepoPathBuf;
use crate::store::PackResult;
use crate::store::Store;
use crate::util::atomic_write;
use crate::util::sha1_hex;
use crate::util::shard_path;

const HEADER: &[u8] = b"v1\n";

pub struct LooseStore {
    root: PathBuf,
}

impl LooseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LooseStore { root: root.into() }
    }

    fn content_hash(key: &Key) -> String {
        // The blob is addressed by the hash of path+node so that renames or
        // identical content under different paths never collide.
        sha1_hex(&[key.path.as_byte_slice(), key.node.as_ref()].concat())
    }

    fn blob_path(&self, key: &Key) -> PathBuf {
        self.root.join(shard_path(&Self::content_hash(key)))
    }

    fn filename_path(&self, key: &Key) -> PathBuf {
        let mut p = self.blob_path(key).into_os_string();
        p.push(".filename");
        PathBuf::from(p)
    }

    pub fn add(&self, key: &Key, data: &[u8], metadata: &Metadata) -> Result<()> {
        let blob_path = self.blob_path(key);
        let dir = blob_path.parent().expect("shard path has a parent");
        fs::create_dir_all(dir)?;

        let mut buf = Vec::with_capacity(data.len() + 32);
        buf.extend_from_slice(HEADER);
        let metadata = metadata.normalized();
        if let Some(size) = metadata.size {
            buf.extend_from_slice(format!("s{}\n", size).as_bytes());
        }
        if let Some(flags) = metadata.flags {
            buf.extend_from_slice(format!("f{}\n", flags).as_bytes());
        }
        buf.push(0);
        buf.extend_from_slice(data);

        atomic_write(dir, &blob_path, &buf)?;
        atomic_write(dir, &self.filename_path(key), key.path.as_byte_slice())?;
        crate::util::set_readonly(&blob_path)?;
        Ok(())
    }

    fn read_blob(&self, key: &Key) -> Result<(Vec<u8>, Metadata)> {
        let blob_path = self.blob_path(key);
        let raw = fs::read(&blob_path).with_context(|| format!("reading {}", blob_path.display()))?;
        parse_blob(&raw)
    }

    /// Reconstructs the `(path, node)` this blob was written under, given
    /// only its content hash, by reading the sibling filename file.
    pub fn key_for_hash(&self, node: Node, hash_path: &Path) -> Result<Key> {
        let mut filename_path = hash_path.to_path_buf().into_os_string();
        filename_path.push(".filename");
        let path_bytes = fs::read(PathBuf::from(filename_path))?;
        let path = RepoPathBuf::from_string(String::from_utf8(path_bytes)?)?;
        Ok(Key::new(path, node))
    }

    /// Removes blobs not present in `keep` and whose last-access time is
    /// older than `touch_window`, stopping once the store's total size is
    /// back under the configured limit.
    pub fn gc(&self, keep: &[Key], size_limit: u64) -> Result<usize> {
        let mut candidates = Vec::new();
        let mut total_size: u64 = 0;
        visit_blobs(&self.root, &mut |path, metadata| {
            total_size += metadata.len();
            candidates.push((path.to_path_buf(), metadata.accessed().ok(), metadata.len()));
        })?;

        if total_size <= size_limit {
            return Ok(0);
        }

        let keep_hashes: std::collections::HashSet<String> =
            keep.iter().map(Self::content_hash).collect();

        candidates.retain(|(path, _, _)| {
            let hash = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            !keep_hashes.contains(hash)
        });
        candidates.sort_by_key(|(_, atime, _)| *atime);

        let mut removed = 0;
        for (path, _, size) in candidates {
            if total_size <= size_limit {
                break;
            }
            let filename_sibling = {
                let mut p = path.clone().into_os_string();
                p.push(".filename");
                PathBuf::from(p)
            };
            let _ = fs::remove_file(&filename_sibling);
            fs::remove_file(&path)?;
            total_size = total_size.saturating_sub(size);
            removed += 1;
        }
        Ok(removed)
    }
}

fn parse_blob(raw: &[u8]) -> Result<(Vec<u8>, Metadata)> {
    if !raw.starts_with(HEADER) {
        bail!("loose blob missing version header");
    }
    let mut pos = HEADER.len();
    let mut size = None;
    let mut flags = None;
    loop {
        let nul = raw[pos..].iter().position(|b| *b == 0);
        let newline = raw[pos..].iter().position(|b| *b == b'\n');
        match (nul, newline) {
            (Some(n), Some(nl)) if nl < n => {
                let line = &raw[pos..pos + nl];
                match line.first() {
                    Some(b's') => size = std::str::from_utf8(&line[1..])?.parse().ok(),
                    Some(b'f') => flags = std::str::from_utf8(&line[1..])?.parse().ok(),
                    _ => bail!("loose blob has unrecognized header line"),
                }
                pos += nl + 1;
            }
            (Some(n), _) => {
                pos += n + 1;
                break;
            }
            _ => bail!("loose blob missing NUL terminator after header"),
        }
    }
    Ok((raw[pos..].to_vec(), Metadata { size, flags }))
}

fn visit_blobs(root: &Path, f: &mut impl FnMut(&Path, &fs::Metadata)) -> Result<()> {
    if !root.exists() {
        return Ok(());
    }
    for shard in fs::read_dir(root)? {
        let shard = shard?;
        if !shard.file_type()?.is_dir() {
            continue;
        }
        for entry in fs::read_dir(shard.path())? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("filename") {
                continue;
            }
            let metadata = entry.metadata()?;
            if metadata.is_file() {
                f(&path, &metadata);
            }
        }
    }
    Ok(())
}

impl Store for LooseStore {
    fn get(&self, key: &Key) -> PackResult<Vec<u8>> {
        let (data, _) = self
            .read_blob(key)
            .map_err(|_| PackError::NotFound(key.clone()))?;
        Ok(data)
    }

    fn get_meta(&self, key: &Key) -> PackResult<Metadata> {
        let (_, metadata) = self
            .read_blob(key)
            .map_err(|_| PackError::NotFound(key.clone()))?;
        Ok(metadata)
    }

    fn get_missing(&self, keys: &[Key]) -> PackResult<Vec<Key>> {
        Ok(keys
            .iter()
            .filter(|k| !self.blob_path(k).exists())
            .cloned()
            .collect())
    }

    fn get_delta_chain(&self, key: &Key) -> PackResult<Vec<Key>> {
        // Loose files are always stored as full texts.
        if self.blob_path(key).exists() {
            Ok(vec![key.clone()])
        } else {
            Err(PackError::NotFound(key.clone()))
        }
    }
}
