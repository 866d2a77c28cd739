/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The 20-byte content identifier used throughout the store.

use std::fmt;

use rand::Rng;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use sha1::Digest;
use sha1::Sha1;

pub const NODE_LEN: usize = 20;

/// A 20-byte opaque content identifier. The all-zero value is the null node,
/// used as a sentinel for "no revision".
#[derive(Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Node([u8; NODE_LEN]);

impl Node {
    pub const fn null() -> Self {
        Node([0u8; NODE_LEN])
    }

    pub fn is_null(&self) -> bool {
        self.0 == [0u8; NODE_LEN]
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != NODE_LEN {
            return None;
        }
        let mut buf = [0u8; NODE_LEN];
        buf.copy_from_slice(bytes);
        Some(Node(buf))
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != NODE_LEN * 2 {
            return None;
        }
        let mut buf = [0u8; NODE_LEN];
        for i in 0..NODE_LEN {
            buf[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).ok()?;
        }
        Some(Node(buf))
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(NODE_LEN * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    /// Hashes an arbitrary sequence of byte slices into a Node, the way a
    /// revision's node is derived from its full text plus its parents.
    pub fn hash_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha1::new();
        for part in parts {
            hasher.update(part);
        }
        let digest = hasher.finalize();
        Node::from_slice(&digest).expect("sha1 digest is 20 bytes")
    }

    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut buf = [0u8; NODE_LEN];
        rng.fill(&mut buf);
        Node(buf)
    }
}

impl AsRef<[u8]> for Node {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; NODE_LEN]> for Node {
    fn from(bytes: [u8; NODE_LEN]) -> Self {
        Node(bytes)
    }
}

impl From<&[u8; NODE_LEN]> for Node {
    fn from(bytes: &[u8; NODE_LEN]) -> Self {
        Node(*bytes)
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Node({})", self.to_hex())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(any(test, feature = "for-tests"))]
impl quickcheck::Arbitrary for Node {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        let mut buf = [0u8; NODE_LEN];
        for b in buf.iter_mut() {
            *b = u8::arbitrary(g);
        }
        Node(buf)
    }
}
