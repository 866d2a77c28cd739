/*
 * Copyright (c) Meta Platforms, Inc. and affiliates.
 *
 * This software may be used and distributed according to the terms of the
 * GNU General Public License version 2.
 */

//! Error types shared across the store hierarchy.
//!
//! `PackError` covers a single pack file or loose-file read/write.
//! `StoreError` wraps it for the higher-level `Store` trait, adding the
//! "neither found here nor reachable through a fallback" case that only
//! makes sense once stores are composed.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::key::Key;

#[derive(Debug, Error)]
pub enum PackError {
    #[error("key not found: {0}")]
    NotFound(Key),

    #[error("corrupt pack {path}: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl PackError {
    pub fn corrupt(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        PackError::Corrupt {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Whether this failure means the pack itself is unusable and should be
    /// quarantined, as opposed to a simple miss.
    pub fn is_corruption(&self) -> bool {
        matches!(self, PackError::Corrupt { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("key not found in any store: {0}")]
    NotFound(Key),

    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
