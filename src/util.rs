/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Small filesystem helpers shared by the pack and loose-file writers.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use fs_err::File;
use sha1::Digest;
use sha1::Sha1;
use tempfile::Builder;
use tempfile::NamedTempFile;

/// Writes `contents` to a temp file in `dir` then atomically renames it to
/// `dest`, so a reader never observes a partially written file.
pub fn atomic_write(dir: &Path, dest: &Path, contents: &[u8]) -> Result<()> {
    let mut tmp = Builder::new()
        .prefix(".tmp")
        .tempfile_in(dir)
        .with_context(|| format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(contents)?;
    tmp.flush()?;
    persist(tmp, dest)
}

fn persist(tmp: NamedTempFile, dest: &Path) -> Result<()> {
    tmp.persist(dest)
        .with_context(|| format!("renaming temp file to {}", dest.display()))?;
    Ok(())
}

/// The lowercase hex SHA1 of `data`, used to name a finished pack file after
/// the content it holds.
pub fn sha1_hex(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let digest = hasher.finalize();
    let mut s = String::with_capacity(40);
    for b in digest {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Splits a hex node id into the `xx/xxxxxxxxxxxxxxxxxx` shard path a loose
/// file lives under, relative to the store root.
pub fn shard_path(hex: &str) -> PathBuf {
    let (prefix, rest) = hex.split_at(2);
    PathBuf::from(prefix).join(rest)
}

/// Lists the files directly inside `dir` whose extension is `ext`,
/// ignoring entries that vanish mid-scan (another process may be
/// repacking concurrently).
pub fn list_files_with_extension(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some(ext) {
            out.push(path.with_extension(""));
        }
    }
    out.sort();
    out.dedup();
    Ok(out)
}

#[cfg(unix)]
pub fn set_readonly(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let file = File::open(path)?;
    let mut perms = file.metadata()?.permissions();
    perms.set_mode(0o444);
    file.set_permissions(perms)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn set_readonly(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_sha1_hex_known_value() {
        assert_eq!(
            sha1_hex(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89"
        );
    }

    #[test]
    fn test_shard_path() {
        let p = shard_path("0123456789abcdef0123456789abcdef01234567");
        assert_eq!(p, PathBuf::from("01/23456789abcdef0123456789abcdef01234567"));
    }

    #[test]
    fn test_atomic_write_then_read() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("file.bin");
        atomic_write(dir.path(), &dest, b"payload").unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"payload");
    }

    #[test]
    fn test_list_files_with_extension_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(list_files_with_extension(&missing, "datapack").unwrap().is_empty());
    }
}
