// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Encoders producing on-disk item payloads, written independently of the
//! decoder so tests exercise the real byte layout.

use chrono::{DateTime, Utc};
use subvol_core::key::objectid;
use subvol_core::{RootExtension, RootFlags, RootRecord};
use uuid::Uuid;

/// Size of a root item carrying the uuid/transid/time extension
pub const ROOT_ITEM_SIZE: usize = 439;
/// Size of a root item written before the extension existed
pub const LEGACY_ROOT_ITEM_SIZE: usize = 239;

/// A plain read-write root descriptor with a given generation.
pub fn root_record(id: u64, generation: u64) -> RootRecord {
    RootRecord {
        id,
        generation,
        root_dirid: objectid::FIRST_FREE,
        bytenr: 30_408_704 + id * 16_384,
        byte_limit: 0,
        bytes_used: 16_384,
        last_snapshot: 0,
        flags: RootFlags::default(),
        refs: 1,
        level: 0,
        extension: None,
    }
}

/// An extension with the given uuid and everything else unset.
pub fn extension(uuid: Uuid) -> RootExtension {
    RootExtension {
        uuid,
        parent_uuid: None,
        received_uuid: None,
        ctransid: 0,
        otransid: 0,
        stransid: 0,
        rtransid: 0,
        ctime: None,
        otime: None,
        stime: None,
        rtime: None,
    }
}

/// Encode a root item. Records with an extension get the full layout and a
/// matching `generation_v2`; records without one get the legacy layout.
pub fn encode_root_item(record: &RootRecord) -> Vec<u8> {
    let size = if record.extension.is_some() {
        ROOT_ITEM_SIZE
    } else {
        LEGACY_ROOT_ITEM_SIZE
    };
    let mut out = vec![0u8; size];
    put(&mut out, 160, &record.generation.to_le_bytes());
    put(&mut out, 168, &record.root_dirid.to_le_bytes());
    put(&mut out, 176, &record.bytenr.to_le_bytes());
    put(&mut out, 184, &record.byte_limit.to_le_bytes());
    put(&mut out, 192, &record.bytes_used.to_le_bytes());
    put(&mut out, 200, &record.last_snapshot.to_le_bytes());
    put(&mut out, 208, &record.flags.0.to_le_bytes());
    put(&mut out, 216, &record.refs.to_le_bytes());
    out[238] = record.level;

    if let Some(ext) = &record.extension {
        put(&mut out, 239, &record.generation.to_le_bytes());
        put(&mut out, 247, ext.uuid.as_bytes());
        put(&mut out, 263, ext.parent_uuid.unwrap_or_else(Uuid::nil).as_bytes());
        put(&mut out, 279, ext.received_uuid.unwrap_or_else(Uuid::nil).as_bytes());
        put(&mut out, 295, &ext.ctransid.to_le_bytes());
        put(&mut out, 303, &ext.otransid.to_le_bytes());
        put(&mut out, 311, &ext.stransid.to_le_bytes());
        put(&mut out, 319, &ext.rtransid.to_le_bytes());
        for (at, time) in [(327, ext.ctime), (339, ext.otime), (351, ext.stime), (363, ext.rtime)] {
            put_time(&mut out, at, time);
        }
    }
    out
}

/// Encode a root backref: dirid, sequence, name length, name.
pub fn encode_backref(dirid: u64, sequence: u64, name: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(18 + name.len());
    out.extend_from_slice(&dirid.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name);
    out
}

/// Encode a UUID tree item listing `ids`.
pub fn encode_uuid_item(ids: &[u64]) -> Vec<u8> {
    ids.iter().flat_map(|id| id.to_le_bytes()).collect()
}

fn put(out: &mut [u8], at: usize, bytes: &[u8]) {
    out[at..at + bytes.len()].copy_from_slice(bytes);
}

fn put_time(out: &mut [u8], at: usize, time: Option<DateTime<Utc>>) {
    let (sec, nsec) = time.map_or((0u64, 0u32), |t| {
        (t.timestamp() as u64, t.timestamp_subsec_nanos())
    });
    put(out, at, &sec.to_le_bytes());
    put(out, at + 8, &nsec.to_le_bytes());
}
