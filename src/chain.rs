/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Delta-chain resolution shared by the data pack and mutable data pack: a
//! chain is a sequence of `(node, delta_base)` edges ending at a full text
//! (`delta_base == None`), walked leaf-to-root then applied root-to-leaf.

use std::collections::HashSet;

use anyhow::bail;
use anyhow::Result;

use crate::node::Node;
use crate::patch;

pub const MAX_CHAIN_DEPTH: usize = 1000;

pub struct ChainLink {
    pub node: Node,
    pub delta_base: Option<Node>,
    pub delta: Vec<u8>,
}

/// Something that can hand back the single delta link for a node, without
/// knowing how to walk the whole chain.
pub trait DeltaSource {
    fn lookup(&self, node: &Node) -> Result<Option<ChainLink>>;
}

/// Walks from `node` down to its full-text root, following `delta_base`
/// links, then applies the deltas back up to reconstruct `node`'s text.
pub fn resolve_fulltext<S: DeltaSource>(source: &S, node: Node) -> Result<Vec<u8>> {
    let chain = walk_chain(source, node)?;
    let (base, deltas) = chain
        .split_last()
        .ok_or_else(|| anyhow::anyhow!("empty delta chain"))?;
    let mut text = base.delta.clone();
    for link in deltas.iter().rev() {
        text = patch::apply(&text, &link.delta)?;
    }
    Ok(text)
}

/// Returns the chain in leaf-to-root order: `[node, ..., root]`.
pub fn walk_chain<S: DeltaSource>(source: &S, node: Node) -> Result<Vec<ChainLink>> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = node;
    loop {
        if chain.len() > MAX_CHAIN_DEPTH {
            bail!("delta chain exceeds {} entries", MAX_CHAIN_DEPTH);
        }
        if !seen.insert(current) {
            bail!("corrupt: delta cycle detected at node {:?}", current);
        }
        let link = source
            .lookup(&current)?
            .ok_or_else(|| anyhow::anyhow!("delta chain broken: no entry for node"))?;
        let next = link.delta_base;
        chain.push(link);
        match next {
            Some(base) => current = base,
            None => break,
        }
    }
    Ok(chain)
}
