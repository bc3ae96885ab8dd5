// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Decoding of raw search items into typed records.
//!
//! Payloads are on-disk structures (little endian, packed). Every field read is
//! bounds-checked against the payload; a payload shorter than its type's
//! minimum is reported as [`Error::Corrupt`] with the item key. Bytes past the
//! known layout are ignored so newer, longer items still decode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::key::{item_type, Key};

/// Legacy root item: everything up to and including `level`
pub const ROOT_ITEM_LEGACY_LEN: usize = 239;
/// Root item including the uuid/transid/time extension
pub const ROOT_ITEM_LEN: usize = 439;
/// Fixed part of a root backref, before the name
pub const ROOT_REF_LEN: usize = 18;
/// One subvolume id in a UUID tree item
pub const UUID_ITEM_ENTRY_LEN: usize = 8;

// Root item field offsets. The item starts with a 160-byte inode item.
const OFF_GENERATION: usize = 160;
const OFF_ROOT_DIRID: usize = 168;
const OFF_BYTENR: usize = 176;
const OFF_BYTE_LIMIT: usize = 184;
const OFF_BYTES_USED: usize = 192;
const OFF_LAST_SNAPSHOT: usize = 200;
const OFF_FLAGS: usize = 208;
const OFF_REFS: usize = 216;
const OFF_LEVEL: usize = 238;
const OFF_GENERATION_V2: usize = 239;
const OFF_UUID: usize = 247;
const OFF_PARENT_UUID: usize = 263;
const OFF_RECEIVED_UUID: usize = 279;
const OFF_CTRANSID: usize = 295;
const OFF_OTRANSID: usize = 303;
const OFF_STRANSID: usize = 311;
const OFF_RTRANSID: usize = 319;
const OFF_CTIME: usize = 327;
const OFF_OTIME: usize = 339;
const OFF_STIME: usize = 351;
const OFF_RTIME: usize = 363;

/// Root item flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RootFlags(pub u64);

impl RootFlags {
    pub const RDONLY: u64 = 1 << 0;
    pub const DEAD: u64 = 1 << 48;

    pub fn is_read_only(&self) -> bool {
        self.0 & Self::RDONLY != 0
    }

    /// Deleted but not yet cleaned up
    pub fn is_dead(&self) -> bool {
        self.0 & Self::DEAD != 0
    }
}

/// Which UUID namespace an item of the UUID tree belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UuidKind {
    Subvolume,
    ReceivedSubvolume,
}

impl UuidKind {
    pub fn item_type(self) -> u8 {
        match self {
            UuidKind::Subvolume => item_type::UUID_SUBVOL,
            UuidKind::ReceivedSubvolume => item_type::UUID_RECEIVED_SUBVOL,
        }
    }

    pub fn from_item_type(item_type: u8) -> Option<Self> {
        match item_type {
            item_type::UUID_SUBVOL => Some(UuidKind::Subvolume),
            item_type::UUID_RECEIVED_SUBVOL => Some(UuidKind::ReceivedSubvolume),
            _ => None,
        }
    }
}

/// Key under which the UUID tree stores `uuid`: the two little-endian halves
/// become objectid and offset.
pub fn uuid_tree_key(uuid: &Uuid, kind: UuidKind) -> Key {
    let bytes = uuid.as_bytes();
    let mut lo = [0u8; 8];
    let mut hi = [0u8; 8];
    lo.copy_from_slice(&bytes[..8]);
    hi.copy_from_slice(&bytes[8..]);
    Key::new(u64::from_le_bytes(lo), kind.item_type(), u64::from_le_bytes(hi))
}

/// Inverse of [`uuid_tree_key`].
pub fn uuid_from_tree_key(key: &Key) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&key.objectid.to_le_bytes());
    bytes[8..].copy_from_slice(&key.offset.to_le_bytes());
    Uuid::from_bytes(bytes)
}

/// Identity, provenance and timestamps carried by extended root items
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootExtension {
    pub uuid: Uuid,
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

/// Decoded root descriptor of one subvolume
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootRecord {
    pub id: u64,
    pub generation: u64,
    pub root_dirid: u64,
    pub bytenr: u64,
    pub byte_limit: u64,
    pub bytes_used: u64,
    /// Generation of the most recent snapshot taken of this root
    pub last_snapshot: u64,
    pub flags: RootFlags,
    pub refs: u32,
    pub level: u8,
    /// Absent for legacy items or when `generation_v2` is stale
    pub extension: Option<RootExtension>,
}

/// Decoded link from a subvolume to the directory containing it
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackrefRecord {
    pub child_id: u64,
    pub parent_id: u64,
    /// Inode of the containing directory inside the parent subvolume
    pub dirid: u64,
    pub sequence: u64,
    /// Raw entry name; not necessarily valid UTF-8
    pub name: Vec<u8>,
}

impl BackrefRecord {
    /// Sort key of the backref tie-break policy
    pub fn order_key(&self) -> (u64, u64, u64) {
        (self.parent_id, self.dirid, self.sequence)
    }
}

/// Decoded UUID tree item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UuidRecord {
    pub uuid: Uuid,
    pub kind: UuidKind,
    /// Subvolume ids registered under this UUID, in item order
    pub ids: Vec<u64>,
}

/// Result of decoding one raw item
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Root(RootRecord),
    Backref(BackrefRecord),
    Uuid(UuidRecord),
    /// An item type this decoder does not know; skipped by consumers
    Unrecognized { key: Key },
}

/// Decode one raw item according to its type tag.
pub fn decode(item: &crate::RawItem) -> Result<Record> {
    decode_payload(&item.key, &item.payload)
}

pub fn decode_payload(key: &Key, payload: &[u8]) -> Result<Record> {
    match key.item_type {
        item_type::ROOT_ITEM => decode_root(key, payload).map(Record::Root),
        item_type::ROOT_BACKREF => decode_backref(key, payload).map(Record::Backref),
        item_type::UUID_SUBVOL | item_type::UUID_RECEIVED_SUBVOL => {
            decode_uuid(key, payload).map(Record::Uuid)
        }
        _ => Ok(Record::Unrecognized { key: *key }),
    }
}

/// Bounds-checked little-endian reads tied to the key of the item being decoded
struct Fields<'a> {
    key: &'a Key,
    data: &'a [u8],
}

impl<'a> Fields<'a> {
    fn new(key: &'a Key, data: &'a [u8]) -> Self {
        Self { key, data }
    }

    fn bytes<const N: usize>(&self, at: usize) -> Result<[u8; N]> {
        let slice = at
            .checked_add(N)
            .and_then(|end| self.data.get(at..end))
            .ok_or_else(|| {
                Error::corrupt(
                    *self.key,
                    format!(
                        "field at offset {} needs {} bytes, payload is {}",
                        at,
                        N,
                        self.data.len()
                    ),
                )
            })?;
        let mut out = [0u8; N];
        out.copy_from_slice(slice);
        Ok(out)
    }

    fn u8(&self, at: usize) -> Result<u8> {
        Ok(self.bytes::<1>(at)?[0])
    }

    fn u16(&self, at: usize) -> Result<u16> {
        Ok(u16::from_le_bytes(self.bytes(at)?))
    }

    fn u32(&self, at: usize) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(at)?))
    }

    fn u64(&self, at: usize) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(at)?))
    }

    fn uuid(&self, at: usize) -> Result<Option<Uuid>> {
        let uuid = Uuid::from_bytes(self.bytes(at)?);
        Ok((!uuid.is_nil()).then_some(uuid))
    }

    /// On-disk timespec: le64 seconds, le32 nanoseconds. Zero means unset.
    fn time(&self, at: usize) -> Result<Option<DateTime<Utc>>> {
        let sec = self.u64(at)?;
        let nsec = self.u32(at + 8)?;
        if sec == 0 && nsec == 0 {
            return Ok(None);
        }
        Ok(i64::try_from(sec).ok().and_then(|sec| DateTime::from_timestamp(sec, nsec)))
    }
}

fn require_len(key: &Key, payload: &[u8], min: usize, what: &str) -> Result<()> {
    if payload.len() < min {
        return Err(Error::corrupt(
            *key,
            format!(
                "{} payload is {} bytes, minimum is {}",
                what,
                payload.len(),
                min
            ),
        ));
    }
    Ok(())
}

fn decode_root(key: &Key, payload: &[u8]) -> Result<RootRecord> {
    require_len(key, payload, ROOT_ITEM_LEGACY_LEN, "root item")?;
    let f = Fields::new(key, payload);

    let generation = f.u64(OFF_GENERATION)?;
    let extension = if payload.len() >= ROOT_ITEM_LEN && f.u64(OFF_GENERATION_V2)? == generation {
        Some(RootExtension {
            uuid: Uuid::from_bytes(f.bytes(OFF_UUID)?),
            parent_uuid: f.uuid(OFF_PARENT_UUID)?,
            received_uuid: f.uuid(OFF_RECEIVED_UUID)?,
            ctransid: f.u64(OFF_CTRANSID)?,
            otransid: f.u64(OFF_OTRANSID)?,
            stransid: f.u64(OFF_STRANSID)?,
            rtransid: f.u64(OFF_RTRANSID)?,
            ctime: f.time(OFF_CTIME)?,
            otime: f.time(OFF_OTIME)?,
            stime: f.time(OFF_STIME)?,
            rtime: f.time(OFF_RTIME)?,
        })
    } else {
        None
    };

    Ok(RootRecord {
        id: key.objectid,
        generation,
        root_dirid: f.u64(OFF_ROOT_DIRID)?,
        bytenr: f.u64(OFF_BYTENR)?,
        byte_limit: f.u64(OFF_BYTE_LIMIT)?,
        bytes_used: f.u64(OFF_BYTES_USED)?,
        last_snapshot: f.u64(OFF_LAST_SNAPSHOT)?,
        flags: RootFlags(f.u64(OFF_FLAGS)?),
        refs: f.u32(OFF_REFS)?,
        level: f.u8(OFF_LEVEL)?,
        extension,
    })
}

fn decode_backref(key: &Key, payload: &[u8]) -> Result<BackrefRecord> {
    require_len(key, payload, ROOT_REF_LEN, "root backref")?;
    let f = Fields::new(key, payload);

    let name_len = usize::from(f.u16(16)?);
    let name = payload
        .get(ROOT_REF_LEN..ROOT_REF_LEN + name_len)
        .ok_or_else(|| {
            Error::corrupt(
                *key,
                format!(
                    "root backref name of {} bytes overruns {}-byte payload",
                    name_len,
                    payload.len()
                ),
            )
        })?
        .to_vec();

    Ok(BackrefRecord {
        child_id: key.objectid,
        parent_id: key.offset,
        dirid: f.u64(0)?,
        sequence: f.u64(8)?,
        name,
    })
}

fn decode_uuid(key: &Key, payload: &[u8]) -> Result<UuidRecord> {
    require_len(key, payload, UUID_ITEM_ENTRY_LEN, "uuid item")?;
    if payload.len() % UUID_ITEM_ENTRY_LEN != 0 {
        return Err(Error::corrupt(
            *key,
            format!(
                "uuid item payload of {} bytes is not a whole number of ids",
                payload.len()
            ),
        ));
    }
    let f = Fields::new(key, payload);
    let ids = (0..payload.len() / UUID_ITEM_ENTRY_LEN)
        .map(|i| f.u64(i * UUID_ITEM_ENTRY_LEN))
        .collect::<Result<Vec<_>>>()?;

    let kind = UuidKind::from_item_type(key.item_type)
        .ok_or_else(|| Error::corrupt(*key, "not a uuid item type"))?;

    Ok(UuidRecord {
        uuid: uuid_from_tree_key(key),
        kind,
        ids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_payload(len: usize, generation: u64, generation_v2: u64) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        buf[OFF_GENERATION..OFF_GENERATION + 8].copy_from_slice(&generation.to_le_bytes());
        buf[OFF_ROOT_DIRID..OFF_ROOT_DIRID + 8].copy_from_slice(&256u64.to_le_bytes());
        buf[OFF_BYTES_USED..OFF_BYTES_USED + 8].copy_from_slice(&16384u64.to_le_bytes());
        buf[OFF_FLAGS..OFF_FLAGS + 8].copy_from_slice(&RootFlags::RDONLY.to_le_bytes());
        buf[OFF_REFS..OFF_REFS + 4].copy_from_slice(&1u32.to_le_bytes());
        if len >= ROOT_ITEM_LEN {
            buf[OFF_GENERATION_V2..OFF_GENERATION_V2 + 8]
                .copy_from_slice(&generation_v2.to_le_bytes());
            buf[OFF_UUID..OFF_UUID + 16].copy_from_slice(&[0xab; 16]);
            buf[OFF_OTRANSID..OFF_OTRANSID + 8].copy_from_slice(&11u64.to_le_bytes());
            buf[OFF_OTIME..OFF_OTIME + 8].copy_from_slice(&1_700_000_000u64.to_le_bytes());
        }
        buf
    }

    #[test]
    fn decodes_legacy_root_item_without_extension() {
        let key = Key::new(256, item_type::ROOT_ITEM, 0);
        let payload = root_payload(ROOT_ITEM_LEGACY_LEN, 42, 0);
        let Record::Root(root) = decode_payload(&key, &payload).unwrap() else {
            panic!("expected root record");
        };
        assert_eq!(root.id, 256);
        assert_eq!(root.generation, 42);
        assert_eq!(root.root_dirid, 256);
        assert_eq!(root.bytes_used, 16384);
        assert!(root.flags.is_read_only());
        assert_eq!(root.refs, 1);
        assert!(root.extension.is_none());
    }

    #[test]
    fn decodes_extended_root_item() {
        let key = Key::new(257, item_type::ROOT_ITEM, 0);
        let payload = root_payload(ROOT_ITEM_LEN, 9, 9);
        let Record::Root(root) = decode_payload(&key, &payload).unwrap() else {
            panic!("expected root record");
        };
        let ext = root.extension.expect("extension present");
        assert_eq!(ext.uuid, Uuid::from_bytes([0xab; 16]));
        assert_eq!(ext.parent_uuid, None);
        assert_eq!(ext.otransid, 11);
        assert_eq!(ext.otime.unwrap().timestamp(), 1_700_000_000);
        assert_eq!(ext.ctime, None);
    }

    #[test]
    fn stale_generation_v2_drops_extension() {
        let key = Key::new(257, item_type::ROOT_ITEM, 0);
        let payload = root_payload(ROOT_ITEM_LEN, 9, 8);
        let Record::Root(root) = decode_payload(&key, &payload).unwrap() else {
            panic!("expected root record");
        };
        assert!(root.extension.is_none());
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let key = Key::new(257, item_type::ROOT_ITEM, 0);
        let payload = root_payload(ROOT_ITEM_LEN + 64, 3, 3);
        assert!(matches!(
            decode_payload(&key, &payload).unwrap(),
            Record::Root(RootRecord {
                extension: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn short_payloads_are_corrupt() {
        let root_key = Key::new(256, item_type::ROOT_ITEM, 0);
        let err = decode_payload(&root_key, &vec![0u8; ROOT_ITEM_LEGACY_LEN - 1]).unwrap_err();
        assert!(matches!(err, Error::Corrupt { key, .. } if key == root_key));

        let backref_key = Key::new(256, item_type::ROOT_BACKREF, 5);
        let err = decode_payload(&backref_key, &[0u8; ROOT_REF_LEN - 1]).unwrap_err();
        assert!(matches!(err, Error::Corrupt { key, .. } if key == backref_key));

        let uuid_key = Key::new(1, item_type::UUID_SUBVOL, 2);
        let err = decode_payload(&uuid_key, &[0u8; UUID_ITEM_ENTRY_LEN - 1]).unwrap_err();
        assert!(matches!(err, Error::Corrupt { key, .. } if key == uuid_key));
    }

    #[test]
    fn backref_with_overlong_name_is_corrupt() {
        let key = Key::new(256, item_type::ROOT_BACKREF, 5);
        let mut payload = vec![0u8; ROOT_REF_LEN];
        payload[16..18].copy_from_slice(&10u16.to_le_bytes());
        payload.extend_from_slice(b"short");
        assert!(matches!(
            decode_payload(&key, &payload),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn backref_name_keeps_raw_bytes() {
        let key = Key::new(300, item_type::ROOT_BACKREF, 256);
        let name = [b'a', 0xff, 0xfe, b'z'];
        let mut payload = Vec::new();
        payload.extend_from_slice(&260u64.to_le_bytes());
        payload.extend_from_slice(&3u64.to_le_bytes());
        payload.extend_from_slice(&(name.len() as u16).to_le_bytes());
        payload.extend_from_slice(&name);
        let Record::Backref(backref) = decode_payload(&key, &payload).unwrap() else {
            panic!("expected backref record");
        };
        assert_eq!(backref.child_id, 300);
        assert_eq!(backref.parent_id, 256);
        assert_eq!(backref.dirid, 260);
        assert_eq!(backref.sequence, 3);
        assert_eq!(backref.name, name);
    }

    #[test]
    fn uuid_item_round_trips_key_and_ids() {
        let uuid = Uuid::from_bytes([1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16]);
        let key = uuid_tree_key(&uuid, UuidKind::ReceivedSubvolume);
        assert_eq!(key.item_type, item_type::UUID_RECEIVED_SUBVOL);
        let mut payload = 258u64.to_le_bytes().to_vec();
        payload.extend_from_slice(&259u64.to_le_bytes());
        let Record::Uuid(record) = decode_payload(&key, &payload).unwrap() else {
            panic!("expected uuid record");
        };
        assert_eq!(record.uuid, uuid);
        assert_eq!(record.kind, UuidKind::ReceivedSubvolume);
        assert_eq!(record.ids, vec![258, 259]);
    }

    #[test]
    fn uuid_item_with_ragged_length_is_corrupt() {
        let key = Key::new(1, item_type::UUID_SUBVOL, 2);
        assert!(matches!(
            decode_payload(&key, &[0u8; 12]),
            Err(Error::Corrupt { .. })
        ));
    }

    #[test]
    fn unknown_types_are_unrecognized() {
        let key = Key::new(256, item_type::ROOT_REF, 257);
        assert_eq!(
            decode_payload(&key, &[]).unwrap(),
            Record::Unrecognized { key }
        );
    }
}
