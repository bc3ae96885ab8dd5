// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Entry point tying the collaborators to hierarchy building and resolution.

use std::path::Path;

use tracing::debug;
use uuid::Uuid;

use crate::cursor::SearchOptions;
use crate::decode::UuidKind;
use crate::error::{Error, Lookup, Result};
use crate::hierarchy::{Hierarchy, Scope};
use crate::resolve::{Resolver, SubvolumeInfo};
use crate::transport::{PathOwner, SearchTransport, UuidLookup};

/// Subvolume queries over one filesystem.
///
/// Every call scans afresh; nothing is cached between calls.
pub struct Subvolumes<S, U, P> {
    search: S,
    uuids: U,
    paths: P,
    options: SearchOptions,
}

impl<S, U, P> Subvolumes<S, U, P>
where
    S: SearchTransport,
    U: UuidLookup,
    P: PathOwner,
{
    pub fn new(search: S, uuids: U, paths: P) -> Self {
        Self {
            search,
            uuids,
            paths,
            options: SearchOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> SearchOptions {
        self.options
    }

    /// Build the hierarchy covering `scope`.
    pub fn hierarchy(&self, scope: Scope) -> Result<Hierarchy> {
        match scope {
            Scope::Single(id) => Hierarchy::build_chain(&self.search, id, self.options),
            Scope::All | Scope::Subtree(_) => Hierarchy::scan(&self.search, scope, self.options),
        }
    }

    /// Every subvolume accepted by `predicate`, ascending by id.
    pub fn list<F>(&self, predicate: F) -> Result<Vec<SubvolumeInfo>>
    where
        F: FnMut(&SubvolumeInfo) -> bool,
    {
        self.list_scope(Scope::All, predicate)
    }

    pub fn list_scope<F>(&self, scope: Scope, mut predicate: F) -> Result<Vec<SubvolumeInfo>>
    where
        F: FnMut(&SubvolumeInfo) -> bool,
    {
        let hierarchy = self.hierarchy(scope)?;
        let resolver = Resolver::new(&hierarchy);
        let listed: Vec<SubvolumeInfo> = hierarchy
            .members(scope)
            .into_iter()
            .filter_map(|id| resolver.info(id))
            .filter(|info| predicate(info))
            .collect();
        debug!(
            operation = "list_subvolumes",
            scope = ?scope,
            known = hierarchy.len(),
            listed = listed.len(),
            "Listed subvolumes"
        );
        Ok(listed)
    }

    pub fn by_id(&self, id: u64) -> Result<SubvolumeInfo> {
        let hierarchy = Hierarchy::build_chain(&self.search, id, self.options)?;
        Resolver::new(&hierarchy).by_id(id)
    }

    pub fn by_uuid(&self, uuid: &Uuid) -> Result<SubvolumeInfo> {
        self.by_uuid_kind(uuid, UuidKind::Subvolume, Lookup::Uuid(*uuid))
    }

    pub fn by_received_uuid(&self, uuid: &Uuid) -> Result<SubvolumeInfo> {
        self.by_uuid_kind(uuid, UuidKind::ReceivedSubvolume, Lookup::ReceivedUuid(*uuid))
    }

    /// The subvolume owning `path`.
    pub fn by_path(&self, path: &Path) -> Result<SubvolumeInfo> {
        let id = self.paths.owning_subvolume(path)?;
        debug!(operation = "resolve_by_path", path = %path.display(), id, "Path owner found");
        self.by_id(id)
    }

    fn by_uuid_kind(&self, uuid: &Uuid, kind: UuidKind, lookup: Lookup) -> Result<SubvolumeInfo> {
        match self.uuids.lookup(uuid, kind)? {
            Some(id) => self.by_id(id),
            None => {
                debug!(operation = "resolve_by_uuid", uuid = %uuid, kind = ?kind, "UUID not registered");
                Err(Error::NotFound(lookup))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockPathOwner, MockSearchTransport, MockUuidLookup, SearchReply};

    #[test]
    fn unknown_uuid_issues_no_tree_scan() {
        let mut search = MockSearchTransport::new();
        search.expect_search().times(0);
        let mut uuids = MockUuidLookup::new();
        uuids
            .expect_lookup()
            .withf(|_, kind| *kind == UuidKind::Subvolume)
            .times(1)
            .returning(|_, _| Ok(None));
        let paths = MockPathOwner::new();

        let subvolumes = Subvolumes::new(search, uuids, paths);
        let uuid = Uuid::from_u128(42);
        let err = subvolumes.by_uuid(&uuid).unwrap_err();
        assert!(matches!(err, Error::NotFound(Lookup::Uuid(found)) if found == uuid));
    }

    #[test]
    fn unknown_received_uuid_reports_received_namespace() {
        let mut search = MockSearchTransport::new();
        search.expect_search().times(0);
        let mut uuids = MockUuidLookup::new();
        uuids
            .expect_lookup()
            .withf(|_, kind| *kind == UuidKind::ReceivedSubvolume)
            .returning(|_, _| Ok(None));

        let subvolumes = Subvolumes::new(search, uuids, MockPathOwner::new());
        let err = subvolumes.by_received_uuid(&Uuid::nil()).unwrap_err();
        assert!(matches!(err, Error::NotFound(Lookup::ReceivedUuid(_))));
    }

    #[test]
    fn path_owner_without_root_item_is_not_found() {
        let mut search = MockSearchTransport::new();
        search
            .expect_search()
            .withf(|query, _| query.min_objectid == 300 && query.max_objectid == 300)
            .times(1)
            .returning(|_, _| Ok(SearchReply::default()));
        let mut paths = MockPathOwner::new();
        paths
            .expect_owning_subvolume()
            .times(1)
            .returning(|_| Ok(300));

        let subvolumes = Subvolumes::new(search, MockUuidLookup::new(), paths);
        let err = subvolumes.by_path(Path::new("/mnt/data")).unwrap_err();
        assert!(matches!(err, Error::NotFound(Lookup::Id(300))));
    }

    #[test]
    fn options_are_kept() {
        let subvolumes = Subvolumes::new(
            MockSearchTransport::new(),
            MockUuidLookup::new(),
            MockPathOwner::new(),
        )
        .with_options(SearchOptions::with_buffer_size(4096));
        assert_eq!(subvolumes.options().buffer_size, 4096);
    }
}
