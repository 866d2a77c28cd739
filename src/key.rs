/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! The `(path, node)` key identifying a single revision, plus the history
//! tuple attached to it.

use serde_derive::Deserialize;
use serde_derive::Serialize;

use crate::node::Node;
use crate::path::RepoPathBuf;

#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Key {
    pub path: RepoPathBuf,
    pub node: Node,
}

impl Key {
    pub fn new(path: RepoPathBuf, node: Node) -> Self {
        Key { path, node }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}@{}", self.path, self.node)
    }
}

/// The history tuple attached to a key: `(p1, p2, linknode, copyfrom)`.
///
/// `copyfrom` is derived, not stored separately: when `parents[0].path`
/// differs from the entry's own path, the entry is a rename/copy and `p1`
/// names a revision of `parents[0].path` rather than of the current path.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct NodeInfo {
    pub parents: [Key; 2],
    pub linknode: Node,
}

impl NodeInfo {
    /// The path this entry's `p1` refers to, if this is a copy/rename of a
    /// key whose own path is `path`.
    pub fn copyfrom(&self, path: &RepoPathBuf) -> Option<RepoPathBuf> {
        let p1 = &self.parents[0];
        if !p1.node.is_null() && &p1.path != path {
            Some(p1.path.clone())
        } else {
            None
        }
    }
}

#[cfg(any(test, feature = "for-tests"))]
impl quickcheck::Arbitrary for Key {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Key {
            path: RepoPathBuf::arbitrary(g),
            node: Node::arbitrary(g),
        }
    }
}

#[cfg(any(test, feature = "for-tests"))]
impl quickcheck::Arbitrary for NodeInfo {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        NodeInfo {
            parents: [Key::arbitrary(g), Key::arbitrary(g)],
            linknode: Node::arbitrary(g),
        }
    }
}

#[cfg(any(test, feature = "for-tests"))]
pub mod testutil {
    use super::*;

    pub fn node(hex_suffix: &str) -> Node {
        let mut s = "0".repeat(40 - hex_suffix.len());
        s.push_str(hex_suffix);
        Node::from_hex(&s).unwrap()
    }

    pub fn key(path: &str, node_suffix: &str) -> Key {
        Key::new(RepoPathBuf::from(path), node(node_suffix))
    }
}
