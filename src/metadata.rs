/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The small per-entry metadata dictionary attached to a data entry:
//! `flag` (default 0, omitted when 0) and `size` (the full-text length).

use std::io::Cursor;
use std::io::Write;

use anyhow::format_err;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ReadBytesExt;
use byteorder::WriteBytesExt;
use serde_derive::Deserialize;
use serde_derive::Serialize;

const KEY_FLAG: u8 = b'f';
const KEY_SIZE: u8 = b's';

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub size: Option<u64>,
    pub flags: Option<u64>,
}

impl Metadata {
    /// Normalizes `flags == Some(0)` to `None`, matching the on-disk
    /// omission rule (round-trip law 1 in the spec).
    pub fn normalized(mut self) -> Self {
        if self.flags == Some(0) {
            self.flags = None;
        }
        self
    }

    pub fn write<T: Write>(&self, writer: &mut T) -> Result<()> {
        let mut buf = vec![];
        if let Some(flags) = self.flags {
            if flags != 0 {
                write_entry(KEY_FLAG, flags, &mut buf)?;
            }
        }
        if let Some(size) = self.size {
            write_entry(KEY_SIZE, size, &mut buf)?;
        }
        writer.write_u32::<BigEndian>(buf.len() as u32)?;
        writer.write_all(&buf)?;
        Ok(())
    }

    pub fn read(cur: &mut Cursor<&[u8]>) -> Result<Metadata> {
        let len = cur.read_u32::<BigEndian>()? as u64;
        let end = cur.position() + len;
        let mut size = None;
        let mut flags = None;
        while cur.position() < end {
            let key = cur.read_u8()?;
            let value_len = cur.read_u16::<BigEndian>()? as usize;
            let start = cur.position() as usize;
            let value = cur
                .get_ref()
                .get(start..start + value_len)
                .ok_or_else(|| format_err!("metadata value runs past buffer end"))?;
            let value = bytes_to_u64(value);
            match key {
                KEY_FLAG => flags = Some(value),
                KEY_SIZE => size = Some(value),
                // Unknown keys are reserved for future use; skip without error
                // so readers remain forward compatible.
                _ => {}
            }
            cur.set_position(cur.position() + value_len as u64);
        }
        Ok(Metadata { size, flags })
    }
}

fn write_entry<T: Write>(key: u8, value: u64, writer: &mut T) -> Result<()> {
    writer.write_u8(key)?;
    let len = u64_byte_len(value);
    writer.write_u16::<BigEndian>(len)?;
    let mut buf = [0u8; 8];
    let mut v = value;
    for i in (0..len as usize).rev() {
        buf[i] = v as u8;
        v >>= 8;
    }
    writer.write_all(&buf[..len as usize])?;
    Ok(())
}

fn u64_byte_len(mut value: u64) -> u16 {
    let mut len = 0;
    while value > 0 {
        len += 1;
        value >>= 8;
    }
    len
}

fn bytes_to_u64(buf: &[u8]) -> u64 {
    let mut n: u64 = 0;
    for byte in buf {
        n = (n << 8) | (*byte as u64);
    }
    n
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    #[test]
    fn test_roundtrip_default() {
        let meta = Metadata::default();
        let mut buf = vec![];
        meta.write(&mut buf).unwrap();
        let back = Metadata::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, Metadata::default());
    }

    #[test]
    fn test_flag_zero_normalizes_away() {
        let meta = Metadata {
            size: Some(3),
            flags: Some(0),
        };
        let mut buf = vec![];
        meta.write(&mut buf).unwrap();
        let back = Metadata::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, meta.normalized());
        assert_eq!(back.flags, None);
    }

    #[test]
    fn test_roundtrip_both_set() {
        let meta = Metadata {
            size: Some(1000),
            flags: Some(7),
        };
        let mut buf = vec![];
        meta.write(&mut buf).unwrap();
        let back = Metadata::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, meta);
    }

    quickcheck! {
        fn test_roundtrip_quickcheck(size: Option<u64>, flags: Option<u64>) -> bool {
            let meta = Metadata { size, flags };
            let mut buf = vec![];
            meta.write(&mut buf).unwrap();
            let back = Metadata::read(&mut Cursor::new(&buf)).unwrap();
            back == meta.normalized()
        }
    }
}
