// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Turning a [`Hierarchy`] into user-facing subvolume descriptions.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use tracing::debug;
use uuid::Uuid;

use crate::decode::RootFlags;
use crate::error::{Error, Lookup, Result};
use crate::hierarchy::{Hierarchy, PartialSubvolume};
use crate::key::objectid;

/// Slash-joined path of a subvolume relative to the top level.
///
/// Segments are raw directory entry names, so the path is kept as bytes and
/// only rendered lossily for display.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubvolumePath(Vec<u8>);

impl SubvolumePath {
    /// The path of the top-level subvolume
    pub fn top_level() -> Self {
        Self::default()
    }

    pub fn from_segments<'a, I>(segments: I) -> Self
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut bytes = Vec::new();
        for (index, segment) in segments.into_iter().enumerate() {
            if index > 0 {
                bytes.push(b'/');
            }
            bytes.extend_from_slice(segment);
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_top_level(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(unix)]
    pub fn to_path_buf(&self) -> std::path::PathBuf {
        use std::os::unix::ffi::OsStrExt;
        std::path::PathBuf::from(std::ffi::OsStr::from_bytes(&self.0))
    }
}

impl fmt::Display for SubvolumePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

impl Serialize for SubvolumePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Why a path walk gave up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnresolvableReason {
    /// The walk reached an id that is not in the hierarchy
    MissingParent(u64),
    /// The walk reached a subvolume other than the top level with no backref
    NoBackref(u64),
    /// The hop bound ran out before the top level was reached
    Cycle,
}

impl fmt::Display for UnresolvableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvableReason::MissingParent(id) => write!(f, "subvolume {} is not known", id),
            UnresolvableReason::NoBackref(id) => write!(f, "subvolume {} has no backref", id),
            UnresolvableReason::Cycle => f.write_str("parent chain does not reach the top level"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathResolution {
    Resolved(SubvolumePath),
    Unresolvable { id: u64, reason: UnresolvableReason },
}

impl PathResolution {
    pub fn path(self) -> Option<SubvolumePath> {
        match self {
            PathResolution::Resolved(path) => Some(path),
            PathResolution::Unresolvable { .. } => None,
        }
    }
}

/// Everything reported about one subvolume
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubvolumeInfo {
    pub id: u64,
    pub parent_id: Option<u64>,
    pub dir_id: Option<u64>,
    #[serde(serialize_with = "lossy_bytes")]
    pub name: Vec<u8>,
    /// `None` when the parent chain cannot be followed to the top level
    pub path: Option<SubvolumePath>,
    pub generation: u64,
    pub flags: RootFlags,
    pub bytes_used: u64,
    pub uuid: Option<Uuid>,
    pub parent_uuid: Option<Uuid>,
    pub received_uuid: Option<Uuid>,
    pub ctransid: u64,
    pub otransid: u64,
    pub stransid: u64,
    pub rtransid: u64,
    pub ctime: Option<DateTime<Utc>>,
    pub otime: Option<DateTime<Utc>>,
    pub stime: Option<DateTime<Utc>>,
    pub rtime: Option<DateTime<Utc>>,
}

impl SubvolumeInfo {
    pub fn is_read_only(&self) -> bool {
        self.flags.is_read_only()
    }

    pub fn is_top_level(&self) -> bool {
        self.id == objectid::FS_TREE
    }

    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(&self.name).into_owned()
    }
}

fn lossy_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Read-only view answering questions about one built hierarchy.
pub struct Resolver<'a> {
    hierarchy: &'a Hierarchy,
}

impl<'a> Resolver<'a> {
    pub fn new(hierarchy: &'a Hierarchy) -> Self {
        Self { hierarchy }
    }

    /// Full description of `id`, or `NotFound` when no root descriptor was seen.
    pub fn by_id(&self, id: u64) -> Result<SubvolumeInfo> {
        match self.info(id) {
            Some(info) => Ok(info),
            None => {
                debug!(operation = "resolve_by_id", id, "Subvolume not found");
                Err(Error::NotFound(Lookup::Id(id)))
            }
        }
    }

    pub fn info(&self, id: u64) -> Option<SubvolumeInfo> {
        let node = self.hierarchy.get(id)?;
        let root = node.root.as_ref()?;
        let backref = node.primary_backref();
        let extension = root.extension.as_ref();
        Some(SubvolumeInfo {
            id,
            parent_id: backref.map(|b| b.parent_id),
            dir_id: backref.map(|b| b.dirid),
            name: backref.map(|b| b.name.clone()).unwrap_or_default(),
            path: self.resolve_path(id).path(),
            generation: root.generation,
            flags: root.flags,
            bytes_used: root.bytes_used,
            uuid: extension.map(|e| e.uuid),
            parent_uuid: extension.and_then(|e| e.parent_uuid),
            received_uuid: extension.and_then(|e| e.received_uuid),
            ctransid: extension.map_or(0, |e| e.ctransid),
            otransid: extension.map_or(0, |e| e.otransid),
            stransid: extension.map_or(0, |e| e.stransid),
            rtransid: extension.map_or(0, |e| e.rtransid),
            ctime: extension.and_then(|e| e.ctime),
            otime: extension.and_then(|e| e.otime),
            stime: extension.and_then(|e| e.stime),
            rtime: extension.and_then(|e| e.rtime),
        })
    }

    /// Walk primary backrefs from `id` to the top level, collecting names.
    ///
    /// At most `len + 1` hops are taken, so corrupt parent links end in
    /// [`UnresolvableReason::Cycle`] instead of looping.
    pub fn resolve_path(&self, id: u64) -> PathResolution {
        let max_hops = self.hierarchy.len() + 1;
        let mut segments: Vec<&[u8]> = Vec::new();
        let mut current = id;
        for _ in 0..max_hops {
            if current == objectid::FS_TREE {
                segments.reverse();
                return PathResolution::Resolved(SubvolumePath::from_segments(segments));
            }
            let Some(backref) = self
                .hierarchy
                .get(current)
                .map(PartialSubvolume::primary_backref)
            else {
                return self.unresolvable(id, UnresolvableReason::MissingParent(current));
            };
            let Some(backref) = backref else {
                return self.unresolvable(id, UnresolvableReason::NoBackref(current));
            };
            segments.push(&backref.name);
            current = backref.parent_id;
        }
        self.unresolvable(id, UnresolvableReason::Cycle)
    }

    fn unresolvable(&self, id: u64, reason: UnresolvableReason) -> PathResolution {
        debug!(operation = "resolve_path", id, reason = %reason, "Path unresolvable");
        PathResolution::Unresolvable { id, reason }
    }
}
