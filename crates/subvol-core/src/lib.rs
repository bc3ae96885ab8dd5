// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Subvolume discovery over the btrfs generic tree search interface.
//!
//! The crate is pure logic: it drives collaborators implementing
//! [`SearchTransport`], [`UuidLookup`] and [`PathOwner`], decodes the raw
//! items they return, and resolves subvolume ids, UUIDs and paths into
//! [`SubvolumeInfo`] values. The Linux ioctl collaborators live in the
//! `subvol-ioctl` crate.

pub mod cursor;
pub mod decode;
pub mod error;
pub mod hierarchy;
pub mod key;
pub mod resolve;
pub mod subvolumes;
pub mod transport;
pub mod uuid_tree;

pub use cursor::{RawItem, SearchOptions, TreeCursor};
pub use decode::{
    decode, BackrefRecord, Record, RootExtension, RootFlags, RootRecord, UuidKind, UuidRecord,
};
pub use error::{Error, FatalError, Lookup, Result};
pub use hierarchy::{build, Hierarchy, HierarchyBuilder, PartialSubvolume, Scope};
pub use key::{is_subvolume_id, Key, SearchKey, SearchRange};
pub use resolve::{PathResolution, Resolver, SubvolumeInfo, SubvolumePath, UnresolvableReason};
pub use subvolumes::Subvolumes;
pub use transport::{
    PathOwner, SearchHeader, SearchQuery, SearchReply, SearchTransport, TransportError,
    UuidLookup,
};
pub use uuid_tree::UuidTreeLookup;
