// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Collaborator interfaces consumed by the engine.
//!
//! Tree scans and UUID lookups are separate traits: the first is
//! a resumable range walk, the second a single keyed lookup with its own
//! failure modes. Path ownership is a third, unrelated query.

use std::io;
use std::path::Path;

use uuid::Uuid;

use crate::decode::UuidKind;
use crate::error::Result;
use crate::key::{Key, SearchKey, SearchRange};

/// Size of one search result header as laid out by the kernel
pub const SEARCH_HEADER_LEN: usize = 32;

/// One bounded search request, mirroring the kernel search key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchQuery {
    pub tree_id: u64,
    pub min_objectid: u64,
    pub max_objectid: u64,
    pub min_offset: u64,
    pub max_offset: u64,
    pub min_transid: u64,
    pub max_transid: u64,
    pub min_type: u32,
    pub max_type: u32,
    /// Upper bound on items returned; the kernel stops earlier when the buffer fills
    pub nr_items: u32,
}

impl SearchQuery {
    pub fn new(range: &SearchRange, start: &SearchKey) -> Self {
        Self {
            tree_id: range.tree_id,
            min_objectid: start.key.objectid,
            max_objectid: range.max.objectid,
            min_offset: start.key.offset,
            max_offset: range.max.offset,
            min_transid: start.min_transid,
            max_transid: range.max_transid,
            min_type: u32::from(start.key.item_type),
            max_type: u32::from(range.max.item_type),
            nr_items: u32::MAX,
        }
    }

    pub fn min_key(&self) -> Key {
        Key::new(self.min_objectid, self.min_type as u8, self.min_offset)
    }

    pub fn max_key(&self) -> Key {
        Key::new(self.max_objectid, self.max_type as u8, self.max_offset)
    }
}

/// Raw reply of one search call: `nr_items` headers, each followed by its payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchReply {
    pub nr_items: u32,
    pub buf: Vec<u8>,
}

/// Per-item header preceding each payload in a search reply.
///
/// The header is a kernel struct copied as-is, so it is native endian,
/// unlike the on-disk payload that follows it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchHeader {
    pub transid: u64,
    pub objectid: u64,
    pub offset: u64,
    pub item_type: u32,
    pub len: u32,
}

impl SearchHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let bytes = bytes.get(..SEARCH_HEADER_LEN)?;
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_ne_bytes(word)
        };
        let u32_at = |at: usize| {
            let mut word = [0u8; 4];
            word.copy_from_slice(&bytes[at..at + 4]);
            u32::from_ne_bytes(word)
        };
        Some(Self {
            transid: u64_at(0),
            objectid: u64_at(8),
            offset: u64_at(16),
            item_type: u32_at(24),
            len: u32_at(28),
        })
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.transid.to_ne_bytes());
        out.extend_from_slice(&self.objectid.to_ne_bytes());
        out.extend_from_slice(&self.offset.to_ne_bytes());
        out.extend_from_slice(&self.item_type.to_ne_bytes());
        out.extend_from_slice(&self.len.to_ne_bytes());
    }

    /// `None` when the kernel type does not fit the on-disk `u8` type.
    pub fn key(&self) -> Option<Key> {
        let item_type = u8::try_from(self.item_type).ok()?;
        Some(Key::new(self.objectid, item_type, self.offset))
    }
}

/// Failures of a single transport call
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    /// A signal arrived mid-call; the same request may be reissued
    #[error("search interrupted")]
    Interrupted,
    #[error("no such filesystem object")]
    NoSuchObject,
    #[error("filesystem handle is closed")]
    Closed,
    #[error("search buffer too small, first item needs {needed} bytes")]
    BufferTooSmall { needed: u64 },
    #[error("io error: {0}")]
    Os(#[from] io::Error),
}

/// Generic bounded range query over one metadata tree.
#[cfg_attr(test, mockall::automock)]
pub trait SearchTransport {
    /// Return as many items of `query` as fit in `buffer_size` bytes, in tree
    /// order. Zero items means the range is exhausted.
    fn search(
        &self,
        query: &SearchQuery,
        buffer_size: usize,
    ) -> std::result::Result<SearchReply, TransportError>;
}

impl<T: SearchTransport + ?Sized> SearchTransport for &T {
    fn search(
        &self,
        query: &SearchQuery,
        buffer_size: usize,
    ) -> std::result::Result<SearchReply, TransportError> {
        (**self).search(query, buffer_size)
    }
}

/// Direct keyed lookup of a subvolume id by UUID.
#[cfg_attr(test, mockall::automock)]
pub trait UuidLookup {
    fn lookup(&self, uuid: &Uuid, kind: UuidKind) -> Result<Option<u64>>;
}

/// Resolves which subvolume owns a filesystem path.
#[cfg_attr(test, mockall::automock)]
pub trait PathOwner {
    fn owning_subvolume(&self, path: &Path) -> Result<u64>;
}
