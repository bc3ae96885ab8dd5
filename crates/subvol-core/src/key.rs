// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tree keys, search ranges and the well-known btrfs object ids and item types.

use serde::{Deserialize, Serialize};

/// Object ids of trees and reserved objects in the root tree
pub mod objectid {
    pub const ROOT_TREE: u64 = 1;
    pub const EXTENT_TREE: u64 = 2;
    pub const CHUNK_TREE: u64 = 3;
    pub const DEV_TREE: u64 = 4;
    /// The top-level subvolume
    pub const FS_TREE: u64 = 5;
    pub const ROOT_TREE_DIR: u64 = 6;
    pub const CSUM_TREE: u64 = 7;
    pub const QUOTA_TREE: u64 = 8;
    pub const UUID_TREE: u64 = 9;
    pub const FREE_SPACE_TREE: u64 = 10;
    pub const BLOCK_GROUP_TREE: u64 = 11;
    /// First id handed out to user-created subvolumes (and first inode of a subvolume)
    pub const FIRST_FREE: u64 = 256;
    pub const LAST_FREE: u64 = -256i64 as u64;
}

/// Item type tags
pub mod item_type {
    pub const INODE_ITEM: u8 = 1;
    pub const INODE_REF: u8 = 12;
    pub const DIR_ITEM: u8 = 84;
    pub const DIR_INDEX: u8 = 96;
    pub const ROOT_ITEM: u8 = 132;
    pub const ROOT_BACKREF: u8 = 144;
    pub const ROOT_REF: u8 = 156;
    pub const UUID_SUBVOL: u8 = 251;
    pub const UUID_RECEIVED_SUBVOL: u8 = 252;
}

/// Returns true when `id` names a subvolume rather than an internal tree.
pub fn is_subvolume_id(id: u64) -> bool {
    id == objectid::FS_TREE || (objectid::FIRST_FREE..=objectid::LAST_FREE).contains(&id)
}

/// A B-tree key. Ordering is `(objectid, item_type, offset)`, which is the
/// order the tree returns items in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub objectid: u64,
    pub item_type: u8,
    pub offset: u64,
}

impl Key {
    pub const MIN: Key = Key {
        objectid: 0,
        item_type: 0,
        offset: 0,
    };

    pub const MAX: Key = Key {
        objectid: u64::MAX,
        item_type: u8::MAX,
        offset: u64::MAX,
    };

    pub const fn new(objectid: u64, item_type: u8, offset: u64) -> Self {
        Self {
            objectid,
            item_type,
            offset,
        }
    }

    /// The smallest key strictly greater than `self`.
    ///
    /// The search ioctl is inclusive of its start key, so a resumed scan must
    /// start here. Returns `None` for [`Key::MAX`].
    pub fn successor(&self) -> Option<Key> {
        if self.offset < u64::MAX {
            Some(Key::new(self.objectid, self.item_type, self.offset + 1))
        } else if self.item_type < u8::MAX {
            Some(Key::new(self.objectid, self.item_type + 1, 0))
        } else if self.objectid < u64::MAX {
            Some(Key::new(self.objectid + 1, 0, 0))
        } else {
            None
        }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({} {} {})", self.objectid, self.item_type, self.offset)
    }
}

/// Start point of a scan: a key plus a transaction id lower bound.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchKey {
    pub key: Key,
    pub min_transid: u64,
}

impl SearchKey {
    pub fn new(key: Key, min_transid: u64) -> Self {
        Self { key, min_transid }
    }
}

/// Inclusive range of keys in one tree.
///
/// `min.item_type..=max.item_type` doubles as the item type filter: the
/// kernel compares keys compoundly, so items of other types can fall inside
/// the range and the cursor drops them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRange {
    pub tree_id: u64,
    pub min: Key,
    pub max: Key,
    pub min_transid: u64,
    pub max_transid: u64,
}

impl SearchRange {
    pub fn new(tree_id: u64, min: Key, max: Key) -> Self {
        Self {
            tree_id,
            min,
            max,
            min_transid: 0,
            max_transid: u64::MAX,
        }
    }

    /// Root and backref items of every subvolume in the root tree.
    pub fn all_subvolumes() -> Self {
        Self::new(
            objectid::ROOT_TREE,
            Key::new(objectid::FS_TREE, item_type::ROOT_ITEM, 0),
            Key::new(objectid::LAST_FREE, item_type::ROOT_BACKREF, u64::MAX),
        )
    }

    /// Root and backref items of a single subvolume.
    pub fn single_subvolume(id: u64) -> Self {
        Self::new(
            objectid::ROOT_TREE,
            Key::new(id, item_type::ROOT_ITEM, 0),
            Key::new(id, item_type::ROOT_BACKREF, u64::MAX),
        )
    }

    /// Exactly one key in the UUID tree.
    pub fn uuid_item(key: Key) -> Self {
        Self::new(objectid::UUID_TREE, key, key)
    }

    pub fn with_min_transid(mut self, min_transid: u64) -> Self {
        self.min_transid = min_transid;
        self
    }

    pub fn start(&self) -> SearchKey {
        SearchKey::new(self.min, self.min_transid)
    }

    pub fn contains(&self, key: &Key) -> bool {
        *key >= self.min && *key <= self.max
    }

    pub fn accepts_type(&self, item_type: u8) -> bool {
        (self.min.item_type..=self.max.item_type).contains(&item_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_bumps_offset() {
        assert_eq!(Key::new(5, 132, 7).successor(), Some(Key::new(5, 132, 8)));
    }

    #[test]
    fn successor_carries_into_type_then_objectid() {
        assert_eq!(
            Key::new(5, 132, u64::MAX).successor(),
            Some(Key::new(5, 133, 0))
        );
        assert_eq!(
            Key::new(5, u8::MAX, u64::MAX).successor(),
            Some(Key::new(6, 0, 0))
        );
        assert_eq!(Key::MAX.successor(), None);
    }

    #[test]
    fn successor_is_strictly_greater() {
        for key in [
            Key::MIN,
            Key::new(256, 144, 5),
            Key::new(1, u8::MAX, u64::MAX - 1),
        ] {
            let next = key.successor().unwrap();
            assert!(next > key);
        }
    }

    #[test]
    fn subvolume_ids_exclude_internal_trees() {
        assert!(is_subvolume_id(objectid::FS_TREE));
        assert!(is_subvolume_id(256));
        assert!(is_subvolume_id(objectid::LAST_FREE));
        assert!(!is_subvolume_id(objectid::UUID_TREE));
        assert!(!is_subvolume_id(objectid::CSUM_TREE));
        assert!(!is_subvolume_id(u64::MAX));
    }

    #[test]
    fn range_type_filter() {
        let range = SearchRange::all_subvolumes();
        assert!(range.accepts_type(item_type::ROOT_ITEM));
        assert!(range.accepts_type(item_type::ROOT_BACKREF));
        assert!(!range.accepts_type(item_type::ROOT_REF));
        assert!(range.contains(&Key::new(300, item_type::ROOT_REF, 0)));
    }
}
