// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory stand-in for the kernel tree search.
//!
//! Items are kept per tree in key order. A search walks the compound key
//! range exactly like the kernel does, so items of other types between
//! `min` and `max` are returned too, and stops when the next item would not
//! fit in the caller's buffer.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};

use subvol_core::decode::uuid_tree_key;
use subvol_core::key::{item_type, objectid};
use subvol_core::transport::SEARCH_HEADER_LEN;
use subvol_core::{
    Key, RootRecord, SearchHeader, SearchQuery, SearchReply, SearchTransport, TransportError,
    UuidKind,
};
use uuid::Uuid;

use crate::payload::{encode_backref, encode_root_item, encode_uuid_item, root_record};

/// A failure the fake returns instead of searching
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptedFailure {
    Interrupted,
    NoSuchObject,
    Closed,
}

impl ScriptedFailure {
    fn into_error(self) -> TransportError {
        match self {
            ScriptedFailure::Interrupted => TransportError::Interrupted,
            ScriptedFailure::NoSuchObject => TransportError::NoSuchObject,
            ScriptedFailure::Closed => TransportError::Closed,
        }
    }
}

#[derive(Clone, Debug)]
struct StoredItem {
    transid: u64,
    payload: Vec<u8>,
}

/// Ordered metadata trees answering [`SearchTransport`] queries.
#[derive(Debug, Default)]
pub struct FakeTree {
    trees: BTreeMap<u64, BTreeMap<Key, StoredItem>>,
    /// Failures consumed one per call, keyed by the call number they fire on
    script: RefCell<VecDeque<(u64, ScriptedFailure)>>,
    calls: Cell<u64>,
    queries: RefCell<Vec<SearchQuery>>,
}

impl FakeTree {
    /// Empty root and UUID trees
    pub fn new() -> Self {
        let mut tree = Self::default();
        tree.trees.insert(objectid::ROOT_TREE, BTreeMap::new());
        tree.trees.insert(objectid::UUID_TREE, BTreeMap::new());
        tree
    }

    /// A filesystem holding only the top-level subvolume
    pub fn with_top_level() -> Self {
        let mut tree = Self::new();
        tree.add_root(root_record(objectid::FS_TREE, 1));
        tree
    }

    pub fn insert(&mut self, tree_id: u64, key: Key, transid: u64, payload: Vec<u8>) -> &mut Self {
        self.trees
            .entry(tree_id)
            .or_default()
            .insert(key, StoredItem { transid, payload });
        self
    }

    pub fn add_root(&mut self, record: RootRecord) -> &mut Self {
        let key = Key::new(record.id, item_type::ROOT_ITEM, 0);
        let payload = encode_root_item(&record);
        self.insert(objectid::ROOT_TREE, key, record.generation, payload)
    }

    pub fn add_backref(
        &mut self,
        child: u64,
        parent: u64,
        dirid: u64,
        sequence: u64,
        name: &[u8],
    ) -> &mut Self {
        let key = Key::new(child, item_type::ROOT_BACKREF, parent);
        self.insert(objectid::ROOT_TREE, key, 1, encode_backref(dirid, sequence, name))
    }

    /// Root item plus a single backref under `parent`
    pub fn add_subvolume(&mut self, id: u64, parent: u64, name: &str) -> &mut Self {
        self.add_root(root_record(id, id));
        self.add_backref(id, parent, objectid::FIRST_FREE, id, name.as_bytes())
    }

    pub fn add_uuid(&mut self, uuid: &Uuid, kind: UuidKind, ids: &[u64]) -> &mut Self {
        let key = uuid_tree_key(uuid, kind);
        self.insert(objectid::UUID_TREE, key, 1, encode_uuid_item(ids))
    }

    pub fn remove_tree(&mut self, tree_id: u64) -> &mut Self {
        self.trees.remove(&tree_id);
        self
    }

    /// Fail call number `call` (zero based, counting failed calls) with `failure`.
    pub fn fail_call(&self, call: u64, failure: ScriptedFailure) {
        let mut script = self.script.borrow_mut();
        script.push_back((call, failure));
        script.make_contiguous().sort_by_key(|(at, _)| *at);
    }

    /// Number of search calls made, failed ones included
    pub fn calls(&self) -> u64 {
        self.calls.get()
    }

    pub fn queries(&self) -> Vec<SearchQuery> {
        self.queries.borrow().clone()
    }

    pub fn item_count(&self, tree_id: u64) -> usize {
        self.trees.get(&tree_id).map_or(0, BTreeMap::len)
    }

    fn scripted(&self, call: u64) -> Option<ScriptedFailure> {
        let mut script = self.script.borrow_mut();
        match script.front() {
            Some((at, failure)) if *at == call => {
                let failure = *failure;
                script.pop_front();
                Some(failure)
            }
            _ => None,
        }
    }
}

impl SearchTransport for FakeTree {
    fn search(&self, query: &SearchQuery, buffer_size: usize) -> Result<SearchReply, TransportError> {
        let call = self.calls.get();
        self.calls.set(call + 1);
        self.queries.borrow_mut().push(*query);

        if let Some(failure) = self.scripted(call) {
            return Err(failure.into_error());
        }
        let tree = self
            .trees
            .get(&query.tree_id)
            .ok_or(TransportError::NoSuchObject)?;

        let (min, max) = (query.min_key(), query.max_key());
        let mut reply = SearchReply::default();
        if min > max {
            return Ok(reply);
        }
        for (key, item) in tree.range(min..=max) {
            if reply.nr_items >= query.nr_items {
                break;
            }
            if item.transid < query.min_transid || item.transid > query.max_transid {
                continue;
            }
            let needed = SEARCH_HEADER_LEN + item.payload.len();
            if reply.buf.len() + needed > buffer_size {
                if reply.nr_items == 0 {
                    return Err(TransportError::BufferTooSmall {
                        needed: needed as u64,
                    });
                }
                break;
            }
            SearchHeader {
                transid: item.transid,
                objectid: key.objectid,
                offset: key.offset,
                item_type: u32::from(key.item_type),
                len: item.payload.len() as u32,
            }
            .encode_into(&mut reply.buf);
            reply.buf.extend_from_slice(&item.payload);
            reply.nr_items += 1;
        }
        Ok(reply)
    }
}
