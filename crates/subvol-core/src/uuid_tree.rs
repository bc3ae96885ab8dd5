// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! UUID lookups answered by a single exact-key search of the UUID tree.

use tracing::debug;
use uuid::Uuid;

use crate::cursor::{SearchOptions, TreeCursor};
use crate::decode::{decode, uuid_tree_key, Record, UuidKind};
use crate::error::Result;
use crate::key::SearchRange;
use crate::transport::{SearchTransport, UuidLookup};

/// [`UuidLookup`] backed by any search transport
pub struct UuidTreeLookup<T> {
    transport: T,
}

impl<T: SearchTransport> UuidTreeLookup<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: SearchTransport> UuidLookup for UuidTreeLookup<T> {
    fn lookup(&self, uuid: &Uuid, kind: UuidKind) -> Result<Option<u64>> {
        let key = uuid_tree_key(uuid, kind);
        let cursor = TreeCursor::new(
            &self.transport,
            SearchRange::uuid_item(key),
            SearchOptions::default(),
        );
        for item in cursor {
            if let Record::Uuid(record) = decode(&item?)? {
                let id = record.ids.first().copied();
                debug!(operation = "uuid_lookup", uuid = %uuid, kind = ?kind, id = ?id, "UUID item found");
                return Ok(id);
            }
        }
        debug!(operation = "uuid_lookup", uuid = %uuid, kind = ?kind, "No UUID item");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockSearchTransport, SearchHeader, SearchReply};

    fn reply_for(uuid: &Uuid, kind: UuidKind, ids: &[u64]) -> SearchReply {
        let key = uuid_tree_key(uuid, kind);
        let payload: Vec<u8> = ids.iter().flat_map(|id| id.to_le_bytes()).collect();
        let mut buf = Vec::new();
        SearchHeader {
            transid: 1,
            objectid: key.objectid,
            offset: key.offset,
            item_type: u32::from(key.item_type),
            len: payload.len() as u32,
        }
        .encode_into(&mut buf);
        buf.extend_from_slice(&payload);
        SearchReply { nr_items: 1, buf }
    }

    #[test]
    fn first_registered_id_is_returned() {
        let uuid = Uuid::from_u128(0x1234_5678_9abc_def0_0fed_cba9_8765_4321);
        let reply = reply_for(&uuid, UuidKind::ReceivedSubvolume, &[300, 301]);
        let mut transport = MockSearchTransport::new();
        transport
            .expect_search()
            .withf(move |query, _| {
                query.tree_id == 9 && query.min_key() == query.max_key() && query.min_type == 252
            })
            .times(1)
            .return_once(move |_, _| Ok(reply));

        let lookup = UuidTreeLookup::new(transport);
        assert_eq!(
            lookup.lookup(&uuid, UuidKind::ReceivedSubvolume).unwrap(),
            Some(300)
        );
    }

    #[test]
    fn empty_reply_means_unknown_uuid() {
        let mut transport = MockSearchTransport::new();
        transport
            .expect_search()
            .times(1)
            .returning(|_, _| Ok(SearchReply::default()));

        let lookup = UuidTreeLookup::new(transport);
        assert_eq!(lookup.lookup(&Uuid::nil(), UuidKind::Subvolume).unwrap(), None);
    }
}
