// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Kernel argument layouts and ioctl wrappers from `linux/btrfs.h`.

use std::mem::size_of;

pub const BTRFS_IOCTL_MAGIC: u8 = 0x94;

/// Payload area of the fixed-size v1 search
pub const SEARCH_ARGS_BUFSIZE: usize = 4096 - size_of::<SearchKeyArgs>();
pub const INO_LOOKUP_PATH_MAX: usize = 4080;
pub const DEVICE_PATH_NAME_MAX: usize = 1024;

/// `struct btrfs_ioctl_search_key`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SearchKeyArgs {
    pub tree_id: u64,
    pub min_objectid: u64,
    pub max_objectid: u64,
    pub min_offset: u64,
    pub max_offset: u64,
    pub min_transid: u64,
    pub max_transid: u64,
    pub min_type: u32,
    pub max_type: u32,
    /// In: maximum items to return. Out: items returned.
    pub nr_items: u32,
    pub unused: u32,
    pub unused1: u64,
    pub unused2: u64,
    pub unused3: u64,
    pub unused4: u64,
}

/// `struct btrfs_ioctl_search_args`
#[repr(C)]
pub struct SearchArgs {
    pub key: SearchKeyArgs,
    pub buf: [u8; SEARCH_ARGS_BUFSIZE],
}

impl SearchArgs {
    pub fn new(key: SearchKeyArgs) -> Box<Self> {
        Box::new(Self {
            key,
            buf: [0; SEARCH_ARGS_BUFSIZE],
        })
    }
}

/// `struct btrfs_ioctl_search_args_v2`, followed in memory by `buf_size` bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SearchArgsV2 {
    pub key: SearchKeyArgs,
    /// In: buffer size. Out on `EOVERFLOW`: size needed for the first item.
    pub buf_size: u64,
}

/// `struct btrfs_ioctl_ino_lookup_args`
#[repr(C)]
pub struct InoLookupArgs {
    pub treeid: u64,
    pub objectid: u64,
    pub name: [u8; INO_LOOKUP_PATH_MAX],
}

impl InoLookupArgs {
    pub fn new(treeid: u64, objectid: u64) -> Box<Self> {
        Box::new(Self {
            treeid,
            objectid,
            name: [0; INO_LOOKUP_PATH_MAX],
        })
    }
}

/// `struct btrfs_ioctl_fs_info_args`
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FsInfoArgs {
    pub max_id: u64,
    pub num_devices: u64,
    pub fsid: [u8; 16],
    pub nodesize: u32,
    pub sectorsize: u32,
    pub clone_alignment: u32,
    pub csum_type: u16,
    pub csum_size: u16,
    pub flags: u64,
    pub generation: u64,
    pub metadata_uuid: [u8; 16],
    pub reserved: [u8; 944],
}

impl Default for FsInfoArgs {
    fn default() -> Self {
        Self {
            max_id: 0,
            num_devices: 0,
            fsid: [0; 16],
            nodesize: 0,
            sectorsize: 0,
            clone_alignment: 0,
            csum_type: 0,
            csum_size: 0,
            flags: 0,
            generation: 0,
            metadata_uuid: [0; 16],
            reserved: [0; 944],
        }
    }
}

/// `struct btrfs_ioctl_dev_info_args`
#[repr(C)]
pub struct DevInfoArgs {
    /// In: device to query. Zero selects by `uuid` instead.
    pub devid: u64,
    pub uuid: [u8; 16],
    pub bytes_used: u64,
    pub total_bytes: u64,
    pub fsid: [u8; 16],
    pub unused: [u64; 377],
    pub path: [u8; DEVICE_PATH_NAME_MAX],
}

impl DevInfoArgs {
    pub fn new(devid: u64) -> Box<Self> {
        Box::new(Self {
            devid,
            uuid: [0; 16],
            bytes_used: 0,
            total_bytes: 0,
            fsid: [0; 16],
            unused: [0; 377],
            path: [0; DEVICE_PATH_NAME_MAX],
        })
    }
}

/// `struct btrfs_ioctl_feature_flags`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FeatureFlagsArgs {
    pub compat_flags: u64,
    pub compat_ro_flags: u64,
    pub incompat_flags: u64,
}

/// `struct btrfs_ioctl_space_args`, followed in memory by `space_slots`
/// [`SpaceInfoArgs`] entries
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct SpaceArgs {
    /// In: entries the caller has room for. Zero asks for the count only.
    pub space_slots: u64,
    /// Out: entries the filesystem has
    pub total_spaces: u64,
}

/// `struct btrfs_ioctl_space_info`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SpaceInfoArgs {
    pub flags: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

nix::ioctl_readwrite!(tree_search, BTRFS_IOCTL_MAGIC, 17, SearchArgs);
nix::ioctl_readwrite!(tree_search_v2, BTRFS_IOCTL_MAGIC, 17, SearchArgsV2);
nix::ioctl_readwrite!(ino_lookup, BTRFS_IOCTL_MAGIC, 18, InoLookupArgs);
nix::ioctl_readwrite!(space_info, BTRFS_IOCTL_MAGIC, 20, SpaceArgs);
nix::ioctl_read!(subvol_getflags, BTRFS_IOCTL_MAGIC, 25, u64);
nix::ioctl_readwrite!(dev_info, BTRFS_IOCTL_MAGIC, 30, DevInfoArgs);
nix::ioctl_read!(fs_info, BTRFS_IOCTL_MAGIC, 31, FsInfoArgs);
nix::ioctl_read!(get_features, BTRFS_IOCTL_MAGIC, 57, FeatureFlagsArgs);
// Supported, safe to set, safe to clear
nix::ioctl_read!(get_supported_features, BTRFS_IOCTL_MAGIC, 57, [FeatureFlagsArgs; 3]);
