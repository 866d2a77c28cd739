/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The wire encoding used to ship a batch of file revisions (history plus
//! data) between client and server, independent of how either side stores
//! them on disk.
//!
//! ```text
//! wirepack      = [<file-part>,...] <terminator>
//! file-part     = <path len: 2 byte unsigned int>
//!                 <path>
//!                 <history-section>
//!                 <data-section>
//! history-section = <count: 4 byte unsigned int>
//!                    [<history-entry>,...]
//! history-entry = <node: 20 byte>
//!                 <p1: 20 byte>
//!                 <p2: 20 byte>
//!                 <linknode: 20 byte>
//!                 <copyfrom len: 2 byte unsigned int>
//!                 <copyfrom>
//! data-section  = <count: 4 byte unsigned int>
//!                 [<data-entry>,...]
//! data-entry    = <node: 20 byte>
//!                 <delta base: 20 byte>
//!                 <delta len: 8 byte unsigned int>
//!                 <delta>
//! terminator    = 10 NUL bytes
//! ```

use std::io::Cursor;
use std::io::Read;
use std::io::Write;

use anyhow::bail;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;

use crate::key::Key;
use crate::key::NodeInfo;
use crate::node::Node;
use crate::path::RepoPath;
use crate::path::RepoPathBuf;

const TERMINATOR: [u8; 10] = [0u8; 10];

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireHistoryEntry {
    pub node: Node,
    pub p1: Node,
    pub p2: Node,
    pub linknode: Node,
    pub copyfrom: Option<RepoPathBuf>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireDataEntry {
    pub node: Node,
    pub delta_base: Option<Node>,
    pub delta: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WireFilePart {
    pub path: RepoPathBuf,
    pub history: Vec<WireHistoryEntry>,
    pub data: Vec<WireDataEntry>,
}

pub fn write_pack<T: Write>(writer: &mut T, parts: &[WireFilePart]) -> Result<()> {
    for part in parts {
        write_file_part(writer, part)?;
    }
    writer.write_all(&TERMINATOR)?;
    Ok(())
}

fn write_file_part<T: Write>(writer: &mut T, part: &WireFilePart) -> Result<()> {
    let path_bytes = part.path.as_byte_slice();
    writer.write_u16::<BigEndian>(path_bytes.len() as u16)?;
    writer.write_all(path_bytes)?;

    writer.write_u32::<BigEndian>(part.history.len() as u32)?;
    for entry in &part.history {
        writer.write_all(entry.node.as_ref())?;
        writer.write_all(entry.p1.as_ref())?;
        writer.write_all(entry.p2.as_ref())?;
        writer.write_all(entry.linknode.as_ref())?;
        let copyfrom_bytes: &[u8] = entry
            .copyfrom
            .as_ref()
            .map(|p| p.as_byte_slice())
            .unwrap_or(&[]);
        writer.write_u16::<BigEndian>(copyfrom_bytes.len() as u16)?;
        writer.write_all(copyfrom_bytes)?;
    }

    writer.write_u32::<BigEndian>(part.data.len() as u32)?;
    for entry in &part.data {
        writer.write_all(entry.node.as_ref())?;
        writer.write_all(entry.delta_base.unwrap_or_else(Node::null).as_ref())?;
        writer.write_u64::<BigEndian>(entry.delta.len() as u64)?;
        writer.write_all(&entry.delta)?;
    }
    Ok(())
}

/// Parses a full wire pack (everything up to and including the terminator).
pub fn read_pack(buf: &[u8]) -> Result<Vec<WireFilePart>> {
    let mut cur = Cursor::new(buf);
    let mut parts = Vec::new();
    loop {
        let path_len = cur.read_u16::<BigEndian>()?;
        if path_len == 0 {
            // Could be a real empty path or the first two bytes of the
            // all-NUL terminator; disambiguate by checking the rest.
            let mut rest = [0u8; 8];
            cur.read_exact(&mut rest)?;
            if rest == [0u8; 8] {
                break;
            }
            bail!("unexpected zero-length path outside terminator");
        }
        let mut path_buf = vec![0u8; path_len as usize];
        cur.read_exact(&mut path_buf)?;
        let path = RepoPath::from_utf8(&path_buf)?.to_owned();

        let history_count = cur.read_u32::<BigEndian>()?;
        let mut history = Vec::with_capacity(history_count as usize);
        for _ in 0..history_count {
            history.push(read_history_entry(&mut cur)?);
        }

        let data_count = cur.read_u32::<BigEndian>()?;
        let mut data = Vec::with_capacity(data_count as usize);
        for _ in 0..data_count {
            data.push(read_data_entry(&mut cur)?);
        }

        parts.push(WireFilePart { path, history, data });
    }
    Ok(parts)
}

fn read_node(cur: &mut Cursor<&[u8]>) -> Result<Node> {
    let mut buf = [0u8; 20];
    cur.read_exact(&mut buf)?;
    Ok(Node::from(buf))
}

fn read_history_entry(cur: &mut Cursor<&[u8]>) -> Result<WireHistoryEntry> {
    let node = read_node(cur)?;
    let p1 = read_node(cur)?;
    let p2 = read_node(cur)?;
    let linknode = read_node(cur)?;
    let copyfrom_len = cur.read_u16::<BigEndian>()?;
    let copyfrom = if copyfrom_len == 0 {
        None
    } else {
        let mut buf = vec![0u8; copyfrom_len as usize];
        cur.read_exact(&mut buf)?;
        Some(RepoPath::from_utf8(&buf)?.to_owned())
    };
    Ok(WireHistoryEntry {
        node,
        p1,
        p2,
        linknode,
        copyfrom,
    })
}

fn read_data_entry(cur: &mut Cursor<&[u8]>) -> Result<WireDataEntry> {
    let node = read_node(cur)?;
    let delta_base_node = read_node(cur)?;
    let delta_base = if delta_base_node.is_null() {
        None
    } else {
        Some(delta_base_node)
    };
    let delta_len = cur.read_u64::<BigEndian>()?;
    let mut delta = vec![0u8; delta_len as usize];
    cur.read_exact(&mut delta)?;
    Ok(WireDataEntry {
        node,
        delta_base,
        delta,
    })
}

impl WireHistoryEntry {
    pub fn to_node_info(&self, path: &RepoPath) -> NodeInfo {
        let p1_path = self.copyfrom.clone().unwrap_or_else(|| path.to_owned());
        NodeInfo {
            parents: [Key::new(p1_path, self.p1), Key::new(path.to_owned(), self.p2)],
            linknode: self.linknode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::testutil::node;

    #[test]
    fn test_roundtrip_single_file_part() {
        let part = WireFilePart {
            path: RepoPathBuf::from("dir/file.txt"),
            history: vec![WireHistoryEntry {
                node: node("1"),
                p1: node("2"),
                p2: Node::null(),
                linknode: node("9"),
                copyfrom: None,
            }],
            data: vec![WireDataEntry {
                node: node("1"),
                delta_base: None,
                delta: b"fulltext".to_vec(),
            }],
        };
        let mut buf = vec![];
        write_pack(&mut buf, &[part.clone()]).unwrap();
        let parsed = read_pack(&buf).unwrap();
        assert_eq!(parsed, vec![part]);
    }

    #[test]
    fn test_roundtrip_empty_pack_is_just_terminator() {
        let mut buf = vec![];
        write_pack(&mut buf, &[]).unwrap();
        assert_eq!(buf, TERMINATOR);
        assert_eq!(read_pack(&buf).unwrap(), vec![]);
    }

    #[test]
    fn test_roundtrip_copyfrom() {
        let part = WireFilePart {
            path: RepoPathBuf::from("b"),
            history: vec![WireHistoryEntry {
                node: node("1"),
                p1: node("2"),
                p2: Node::null(),
                linknode: node("9"),
                copyfrom: Some(RepoPathBuf::from("a")),
            }],
            data: vec![],
        };
        let mut buf = vec![];
        write_pack(&mut buf, &[part.clone()]).unwrap();
        let parsed = read_pack(&buf).unwrap();
        assert_eq!(parsed[0].history[0].copyfrom, Some(RepoPathBuf::from("a")));
    }

    #[test]
    fn test_multiple_file_parts() {
        let make = |p: &str| WireFilePart {
            path: RepoPathBuf::from(p),
            history: vec![],
            data: vec![WireDataEntry {
                node: node("1"),
                delta_base: None,
                delta: b"x".to_vec(),
            }],
        };
        let parts = vec![make("a"), make("b")];
        let mut buf = vec![];
        write_pack(&mut buf, &parts).unwrap();
        let parsed = read_pack(&buf).unwrap();
        assert_eq!(parsed.len(), 2);
    }
}
