// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for subvolume search and resolution

use std::io;
use std::path::PathBuf;

use uuid::Uuid;

use crate::key::Key;

/// Result type alias for search and resolution operations
pub type Result<T> = std::result::Result<T, Error>;

/// What a failed lookup was looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Id(u64),
    Uuid(Uuid),
    ReceivedUuid(Uuid),
    Path(PathBuf),
}

impl std::fmt::Display for Lookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lookup::Id(id) => write!(f, "subvolume id {}", id),
            Lookup::Uuid(uuid) => write!(f, "subvolume uuid {}", uuid),
            Lookup::ReceivedUuid(uuid) => write!(f, "received uuid {}", uuid),
            Lookup::Path(path) => write!(f, "path {}", path.display()),
        }
    }
}

/// Unrecoverable conditions: the scan cannot start or continue
#[derive(thiserror::Error, Debug)]
pub enum FatalError {
    #[error("invalid starting key {0}")]
    InvalidStartKey(Key),
    #[error("filesystem handle is closed")]
    Closed,
    #[error("search buffer too small, first item needs {needed} bytes")]
    BufferTooSmall { needed: u64 },
    #[error("io error: {0}")]
    Os(#[from] io::Error),
}

/// Errors surfaced by the engine to its callers
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(Lookup),

    #[error("corrupt record at key {key}: {reason}")]
    Corrupt { key: Key, reason: String },

    #[error(transparent)]
    Fatal(#[from] FatalError),
}

impl Error {
    pub(crate) fn corrupt(key: Key, reason: impl Into<String>) -> Self {
        Error::Corrupt {
            key,
            reason: reason.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}
