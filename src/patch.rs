/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Binary delta application, in the classic fragment format: a sequence of
//! `(start, end, data)` triples, each one replacing `base[start..end]` with
//! `data`, applied in order against an implicit cursor that tracks how much
//! of `base` has already been copied forward.
//!
//! ```text
//! delta      = [<fragment>,...]
//! fragment   = <start: 4 byte unsigned int>
//!              <end: 4 byte unsigned int>
//!              <data len: 4 byte unsigned int>
//!              <data>
//! ```
//!
//! This is the on-disk shape `delta_bytes` take in a data pack entry whose
//! `delta_base` is not null.

use anyhow::bail;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use byteorder::WriteBytesExt;

/// Reconstructs a full text by applying `delta` on top of `base`.
pub fn apply(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(base.len());
    let mut pos = 0usize;
    let mut cursor = 0usize;
    while pos < delta.len() {
        if delta.len() - pos < 12 {
            bail!("truncated delta fragment header");
        }
        let start = BigEndian::read_u32(&delta[pos..pos + 4]) as usize;
        let end = BigEndian::read_u32(&delta[pos + 4..pos + 8]) as usize;
        let data_len = BigEndian::read_u32(&delta[pos + 8..pos + 12]) as usize;
        pos += 12;
        if start > end || end > base.len() || cursor > start {
            bail!("delta fragment out of order or out of bounds");
        }
        if delta.len() - pos < data_len {
            bail!("truncated delta fragment data");
        }
        out.extend_from_slice(&base[cursor..start]);
        out.extend_from_slice(&delta[pos..pos + data_len]);
        pos += data_len;
        cursor = end;
    }
    out.extend_from_slice(&base[cursor..]);
    Ok(out)
}

/// Builds a delta against `base` that reconstructs `text`. This implementation
/// always emits a single whole-text-replacement fragment rather than
/// searching for a common subsequence: correct, just not minimal. Callers
/// that want space-efficient deltas should prefer storing full texts when
/// the base is dissimilar.
pub fn create(base: &[u8], text: &[u8]) -> Vec<u8> {
    let mut delta = Vec::with_capacity(text.len() + 12);
    delta.write_u32::<BigEndian>(0).unwrap();
    delta.write_u32::<BigEndian>(base.len() as u32).unwrap();
    delta.write_u32::<BigEndian>(text.len() as u32).unwrap();
    delta.extend_from_slice(text);
    delta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_whole_replacement() {
        let base = b"hello world";
        let text = b"goodbye world, it was nice";
        let delta = create(base, text);
        let reconstructed = apply(base, &delta).unwrap();
        assert_eq!(reconstructed, text);
    }

    #[test]
    fn test_apply_empty_delta_is_identity() {
        let base = b"unchanged";
        assert_eq!(apply(base, &[]).unwrap(), base);
    }

    #[test]
    fn test_apply_rejects_out_of_bounds_fragment() {
        let base = b"short";
        let mut bad = vec![];
        bad.write_u32::<BigEndian>(0).unwrap();
        bad.write_u32::<BigEndian>(1000).unwrap();
        bad.write_u32::<BigEndian>(0).unwrap();
        assert!(apply(base, &bad).is_err());
    }

    #[test]
    fn test_multi_fragment_patch() {
        let base = b"aaaabbbbcccc";
        let mut delta = vec![];
        // Replace the "bbbb" region with "XX".
        delta.write_u32::<BigEndian>(4).unwrap();
        delta.write_u32::<BigEndian>(8).unwrap();
        delta.write_u32::<BigEndian>(2).unwrap();
        delta.extend_from_slice(b"XX");
        let out = apply(base, &delta).unwrap();
        assert_eq!(out, b"aaaaXXcccc");
    }
}
