/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! A content-addressed storage core for a distributed version control
//! client's local cache of file and tree revisions.
//!
//! Every revision is keyed by a repo path plus a 20-byte node id
//! ([`key::Key`]) and stored either as a full text or as a delta against
//! another revision of the same path. Revisions arrive in two independent
//! dimensions: data (the content itself, [`datapack`]/[`mutabledatapack`])
//! and history (the `(p1, p2, linknode, copyfrom)` tuple,
//! [`historypack`]/[`mutablehistorypack`]), each with its own immutable
//! on-disk pack format plus a mutable writer that accumulates revisions in
//! memory before flushing a new pack.
//!
//! [`packset`] manages the family of immutable packs in a directory,
//! [`loosestore`] is the simple one-file-per-revision fallback newly
//! written revisions land in before they're packed, [`unionstore`]
//! composes any number of stores (and an optional remote fallback) behind
//! a single lookup, [`repack`] merges many small packs into fewer larger
//! ones, and [`wirepack`] is the wire encoding used to ship a batch of
//! revisions between client and server.

pub mod chain;
pub mod config;
pub mod dataindex;
pub mod datapack;
pub mod error;
pub mod fanouttable;
pub mod historyindex;
pub mod historypack;
pub mod key;
pub mod loosestore;
pub mod metadata;
pub mod mutabledatapack;
pub mod mutablehistorypack;
pub mod mutablepack;
pub mod node;
pub mod packset;
pub mod patch;
pub mod path;
pub mod remote;
pub mod repack;
pub mod store;
pub mod unionstore;
pub mod util;
pub mod wirepack;

pub use config::StoreConfig;
pub use error::PackError;
pub use error::Result;
pub use error::StoreError;
pub use key::Key;
pub use key::NodeInfo;
pub use metadata::Metadata;
pub use node::Node;
pub use path::RepoPath;
pub use path::RepoPathBuf;
pub use store::HistoryStore;
pub use store::PackResult;
pub use store::Store;
