// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Folding decoded records into a per-subvolume map.
//!
//! The map is built fresh for every call and handed to the caller. It is a
//! `BTreeMap` so iteration is ascending by id and independent of how many
//! search calls were needed to fill it.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tracing::{debug, trace};

use crate::cursor::{RawItem, SearchOptions, TreeCursor};
use crate::decode::{decode, BackrefRecord, Record, RootRecord};
use crate::error::Result;
use crate::key::{is_subvolume_id, objectid, SearchRange};
use crate::transport::SearchTransport;

/// Which part of the subvolume forest a build covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    All,
    /// The given subvolume, everything below it, and its ancestors (needed for paths)
    Subtree(u64),
    Single(u64),
}

impl Scope {
    /// Root-tree range that has to be scanned to satisfy this scope
    pub fn search_range(&self) -> SearchRange {
        match self {
            Scope::All | Scope::Subtree(_) => SearchRange::all_subvolumes(),
            Scope::Single(id) => SearchRange::single_subvolume(*id),
        }
    }
}

/// Everything known about one subvolume id
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PartialSubvolume {
    /// Latest root descriptor seen for the id
    pub root: Option<RootRecord>,
    /// Every backref seen, in tree order
    pub backrefs: Vec<BackrefRecord>,
}

impl PartialSubvolume {
    /// The backref used for parent linkage: the one with the lowest
    /// `(parent_id, dirid, sequence)`, name as a last resort.
    pub fn primary_backref(&self) -> Option<&BackrefRecord> {
        self.backrefs
            .iter()
            .min_by(|a, b| a.order_key().cmp(&b.order_key()).then_with(|| a.name.cmp(&b.name)))
    }

    pub fn parent_id(&self) -> Option<u64> {
        self.primary_backref().map(|backref| backref.parent_id)
    }
}

/// Map of subvolume id to what the scan found for it
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hierarchy {
    nodes: BTreeMap<u64, PartialSubvolume>,
}

impl Hierarchy {
    /// Scan the root tree for `scope` and fold the result.
    pub fn scan<T: SearchTransport>(
        transport: T,
        scope: Scope,
        options: SearchOptions,
    ) -> Result<Hierarchy> {
        let cursor = TreeCursor::new(transport, scope.search_range(), options);
        build(cursor, scope)
    }

    /// Scan `id` and then each ancestor in turn, one single-id scan per hop,
    /// stopping at the top level, at a missing node, or at an id already seen.
    pub fn build_chain<T: SearchTransport>(
        transport: &T,
        id: u64,
        options: SearchOptions,
    ) -> Result<Hierarchy> {
        let mut chain = Hierarchy::default();
        let mut next = Some(id);
        while let Some(current) = next {
            if chain.nodes.contains_key(&current) {
                debug!(operation = "build_chain", id, revisited = current, "Parent chain loops back");
                break;
            }
            let part = Hierarchy::scan(transport, Scope::Single(current), options)?;
            next = match part.get(current) {
                Some(node) if current != objectid::FS_TREE => node.parent_id(),
                _ => None,
            };
            chain.merge(part);
        }
        Ok(chain)
    }

    pub fn from_records<I: IntoIterator<Item = Record>>(records: I) -> Hierarchy {
        let mut builder = HierarchyBuilder::new();
        for record in records {
            builder.push_record(record);
        }
        builder.finish(Scope::All)
    }

    pub fn get(&self, id: u64) -> Option<&PartialSubvolume> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, &PartialSubvolume)> + '_ {
        self.nodes.iter().map(|(id, node)| (*id, node))
    }

    /// Ids whose primary backref points at `id`, ascending
    pub fn children(&self, id: u64) -> Vec<u64> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent_id() == Some(id))
            .map(|(child, _)| *child)
            .collect()
    }

    /// Subvolumes with a root descriptor that `scope` selects, ascending.
    /// Ancestors retained for path resolution are not members of a subtree.
    pub fn members(&self, scope: Scope) -> Vec<u64> {
        let selected: Box<dyn Fn(u64) -> bool + '_> = match scope {
            Scope::All => Box::new(|_| true),
            Scope::Single(id) => Box::new(move |candidate| candidate == id),
            Scope::Subtree(id) => {
                let below = self.descendants(id);
                Box::new(move |candidate| candidate == id || below.contains(&candidate))
            }
        };
        self.nodes
            .iter()
            .filter(|(id, node)| node.root.is_some() && selected(**id))
            .map(|(id, _)| *id)
            .collect()
    }

    fn descendants(&self, id: u64) -> BTreeSet<u64> {
        let mut found = BTreeSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(current) = queue.pop_front() {
            for child in self.children(current) {
                if child != id && found.insert(child) {
                    queue.push_back(child);
                }
            }
        }
        found
    }

    fn ancestors(&self, id: u64) -> BTreeSet<u64> {
        let mut found = BTreeSet::new();
        let mut current = self.get(id).and_then(PartialSubvolume::parent_id);
        while let Some(parent) = current {
            if parent == id || !found.insert(parent) {
                break;
            }
            current = self.get(parent).and_then(PartialSubvolume::parent_id);
        }
        found
    }

    fn merge(&mut self, other: Hierarchy) {
        for (id, node) in other.nodes {
            let entry = self.nodes.entry(id).or_default();
            if node.root.is_some() {
                entry.root = node.root;
            }
            entry.backrefs.extend(node.backrefs);
        }
    }

    fn retain_scope(&mut self, scope: Scope) {
        let keep: BTreeSet<u64> = match scope {
            Scope::All => return,
            Scope::Single(id) => BTreeSet::from([id]),
            Scope::Subtree(id) => {
                let mut keep = self.descendants(id);
                keep.extend(self.ancestors(id));
                keep.insert(id);
                keep
            }
        };
        self.nodes.retain(|id, _| keep.contains(id));
    }
}

/// Accumulates records into a [`Hierarchy`].
#[derive(Debug, Default)]
pub struct HierarchyBuilder {
    nodes: BTreeMap<u64, PartialSubvolume>,
    ignored: u64,
}

impl HierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode and fold one raw item. Corrupt items abort the build.
    pub fn push_item(&mut self, item: &RawItem) -> Result<()> {
        let record = decode(item)?;
        self.push_record(record);
        Ok(())
    }

    pub fn push_record(&mut self, record: Record) {
        match record {
            Record::Root(root) if is_subvolume_id(root.id) => {
                let id = root.id;
                self.nodes.entry(id).or_default().root = Some(root);
            }
            Record::Backref(backref) if is_subvolume_id(backref.child_id) => {
                self.nodes
                    .entry(backref.child_id)
                    .or_default()
                    .backrefs
                    .push(backref);
            }
            other => {
                trace!(operation = "build_hierarchy", record = ?other, "Ignoring record");
                self.ignored += 1;
            }
        }
    }

    pub fn finish(self, scope: Scope) -> Hierarchy {
        let mut hierarchy = Hierarchy { nodes: self.nodes };
        hierarchy.retain_scope(scope);
        debug!(
            operation = "build_hierarchy",
            scope = ?scope,
            subvolumes = hierarchy.len(),
            ignored = self.ignored,
            "Hierarchy built"
        );
        hierarchy
    }
}

/// Fold a sequence of raw items into a hierarchy for `scope`.
///
/// The first error aborts the build; no partial map is returned.
pub fn build<I>(items: I, scope: Scope) -> Result<Hierarchy>
where
    I: IntoIterator<Item = Result<RawItem>>,
{
    let mut builder = HierarchyBuilder::new();
    for item in items {
        builder.push_item(&item?)?;
    }
    Ok(builder.finish(scope))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::RootFlags;

    fn root(id: u64) -> Record {
        Record::Root(RootRecord {
            id,
            generation: 1,
            root_dirid: objectid::FIRST_FREE,
            bytenr: 0,
            byte_limit: 0,
            bytes_used: 0,
            last_snapshot: 0,
            flags: RootFlags::default(),
            refs: 1,
            level: 0,
            extension: None,
        })
    }

    fn backref(child: u64, parent: u64, dirid: u64, sequence: u64, name: &str) -> Record {
        Record::Backref(BackrefRecord {
            child_id: child,
            parent_id: parent,
            dirid,
            sequence,
            name: name.as_bytes().to_vec(),
        })
    }

    fn forest() -> Hierarchy {
        Hierarchy::from_records([
            root(5),
            root(256),
            backref(256, 5, 256, 2, "data"),
            root(257),
            backref(257, 256, 256, 3, "home"),
            root(258),
            backref(258, 257, 256, 4, "alice"),
            root(259),
            backref(259, 5, 256, 5, "snaps"),
        ])
    }

    #[test]
    fn internal_trees_are_skipped() {
        let hierarchy = Hierarchy::from_records([root(objectid::UUID_TREE), root(5), root(256)]);
        assert_eq!(hierarchy.members(Scope::All), vec![5, 256]);
    }

    #[test]
    fn all_backrefs_are_retained_and_lowest_wins() {
        let hierarchy = Hierarchy::from_records([
            root(300),
            backref(300, 5, 10, 1, "first"),
            backref(300, 5, 9, 2, "second"),
        ]);
        let node = hierarchy.get(300).unwrap();
        assert_eq!(node.backrefs.len(), 2);
        assert_eq!(node.primary_backref().unwrap().name, b"second");
        assert_eq!(node.parent_id(), Some(5));
    }

    #[test]
    fn latest_root_record_wins() {
        let mut newer = root(256);
        if let Record::Root(ref mut r) = newer {
            r.generation = 9;
        }
        let hierarchy = Hierarchy::from_records([root(256), newer]);
        assert_eq!(hierarchy.get(256).unwrap().root.as_ref().unwrap().generation, 9);
    }

    #[test]
    fn subtree_keeps_ancestors_but_lists_only_descendants() {
        let mut builder = HierarchyBuilder::new();
        for record in [
            root(5),
            root(256),
            backref(256, 5, 256, 2, "data"),
            root(257),
            backref(257, 256, 256, 3, "home"),
            root(258),
            backref(258, 257, 256, 4, "alice"),
            root(259),
            backref(259, 5, 256, 5, "snaps"),
        ] {
            builder.push_record(record);
        }
        let hierarchy = builder.finish(Scope::Subtree(257));
        assert!(hierarchy.contains(5));
        assert!(hierarchy.contains(256));
        assert!(!hierarchy.contains(259));
        assert_eq!(hierarchy.members(Scope::Subtree(257)), vec![257, 258]);
    }

    #[test]
    fn children_and_members() {
        let hierarchy = forest();
        assert_eq!(hierarchy.children(5), vec![256, 259]);
        assert_eq!(hierarchy.members(Scope::Single(258)), vec![258]);
        assert_eq!(hierarchy.members(Scope::Subtree(256)), vec![256, 257, 258]);
    }

    #[test]
    fn cyclic_links_do_not_hang_scope_walks() {
        let hierarchy = Hierarchy::from_records([
            root(300),
            backref(300, 301, 256, 1, "a"),
            root(301),
            backref(301, 300, 256, 1, "b"),
        ]);
        assert_eq!(hierarchy.members(Scope::Subtree(300)), vec![300, 301]);
        assert_eq!(hierarchy.ancestors(300), BTreeSet::from([301]));
    }
}
