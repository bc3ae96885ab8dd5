// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Filesystem, device, feature and space facts decoded from the
//! information ioctls.

use serde::Serialize;
use uuid::Uuid;

use crate::sys::{DevInfoArgs, FeatureFlagsArgs, FsInfoArgs, SpaceInfoArgs};

/// Filesystem-wide facts from `BTRFS_IOC_FS_INFO`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct FsInfo {
    /// Highest device id in use
    pub max_id: u64,
    pub num_devices: u64,
    pub fsid: Uuid,
    pub node_size: u32,
    pub sector_size: u32,
    pub clone_alignment: u32,
}

impl From<&FsInfoArgs> for FsInfo {
    fn from(args: &FsInfoArgs) -> Self {
        Self {
            max_id: args.max_id,
            num_devices: args.num_devices,
            fsid: Uuid::from_bytes(args.fsid),
            node_size: args.nodesize,
            sector_size: args.sectorsize,
            clone_alignment: args.clone_alignment,
        }
    }
}

/// Flags reported by `BTRFS_IOC_SUBVOL_GETFLAGS`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SubvolumeFlags(pub u64);

impl SubvolumeFlags {
    pub const RDONLY: u64 = 1 << 1;

    pub fn is_read_only(&self) -> bool {
        self.0 & Self::RDONLY != 0
    }
}

/// One member device, from `BTRFS_IOC_DEV_INFO`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub devid: u64,
    pub uuid: Uuid,
    pub bytes_used: u64,
    pub total_bytes: u64,
    /// Block device path; empty for a missing device
    pub path: String,
}

impl From<&DevInfoArgs> for DeviceInfo {
    fn from(args: &DevInfoArgs) -> Self {
        let len = args
            .path
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(args.path.len());
        Self {
            devid: args.devid,
            uuid: Uuid::from_bytes(args.uuid),
            bytes_used: args.bytes_used,
            total_bytes: args.total_bytes,
            path: String::from_utf8_lossy(&args.path[..len]).into_owned(),
        }
    }
}

const COMPAT_RO_NAMES: &[(u64, &str)] = &[
    (1 << 0, "free_space_tree"),
    (1 << 1, "free_space_tree_valid"),
    (1 << 2, "verity"),
    (1 << 3, "block_group_tree"),
];

const INCOMPAT_NAMES: &[(u64, &str)] = &[
    (1 << 0, "mixed_backref"),
    (1 << 1, "default_subvol"),
    (1 << 2, "mixed_groups"),
    (1 << 3, "compress_lzo"),
    (1 << 4, "compress_zstd"),
    (1 << 5, "big_metadata"),
    (1 << 6, "extended_iref"),
    (1 << 7, "raid56"),
    (1 << 8, "skinny_metadata"),
    (1 << 9, "no_holes"),
    (1 << 10, "metadata_uuid"),
    (1 << 11, "raid1c34"),
    (1 << 12, "zoned"),
    (1 << 13, "extent_tree_v2"),
    (1 << 14, "raid_stripe_tree"),
    (1 << 16, "simple_quota"),
];

/// On-disk feature bits, from `BTRFS_IOC_GET_FEATURES`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    pub compat: u64,
    pub compat_ro: u64,
    pub incompat: u64,
}

impl FeatureFlags {
    /// Names of the known features that are set, read-only compatible
    /// ones first. Unknown bits are left out.
    pub fn names(&self) -> Vec<&'static str> {
        let set = |flags: u64, table: &'static [(u64, &'static str)]| {
            table
                .iter()
                .filter(move |(bit, _)| flags & bit != 0)
                .map(|&(_, name)| name)
        };
        set(self.compat_ro, COMPAT_RO_NAMES)
            .chain(set(self.incompat, INCOMPAT_NAMES))
            .collect()
    }
}

impl From<&FeatureFlagsArgs> for FeatureFlags {
    fn from(args: &FeatureFlagsArgs) -> Self {
        Self {
            compat: args.compat_flags,
            compat_ro: args.compat_ro_flags,
            incompat: args.incompat_flags,
        }
    }
}

/// What the running kernel supports, from `BTRFS_IOC_GET_SUPPORTED_FEATURES`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SupportedFeatures {
    pub supported: FeatureFlags,
    /// Features that can be turned on while mounted
    pub safe_to_set: FeatureFlags,
    /// Features that can be turned off while mounted
    pub safe_to_clear: FeatureFlags,
}

impl From<&[FeatureFlagsArgs; 3]> for SupportedFeatures {
    fn from(args: &[FeatureFlagsArgs; 3]) -> Self {
        Self {
            supported: FeatureFlags::from(&args[0]),
            safe_to_set: FeatureFlags::from(&args[1]),
            safe_to_clear: FeatureFlags::from(&args[2]),
        }
    }
}

/// Allocation of one block group kind and profile, from `BTRFS_IOC_SPACE_INFO`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct SpaceInfo {
    pub flags: u64,
    pub total_bytes: u64,
    pub used_bytes: u64,
}

impl SpaceInfo {
    pub const DATA: u64 = 1 << 0;
    pub const SYSTEM: u64 = 1 << 1;
    pub const METADATA: u64 = 1 << 2;
    pub const GLOBAL_RSV: u64 = 1 << 49;

    const PROFILES: &'static [(u64, &'static str)] = &[
        (1 << 3, "RAID0"),
        (1 << 4, "RAID1"),
        (1 << 5, "DUP"),
        (1 << 6, "RAID10"),
        (1 << 7, "RAID5"),
        (1 << 8, "RAID6"),
        (1 << 9, "RAID1C3"),
        (1 << 10, "RAID1C4"),
    ];

    /// Block group kind, as `btrfs filesystem df` prints it
    pub fn kind(&self) -> &'static str {
        if self.flags & Self::GLOBAL_RSV != 0 {
            return "GlobalReserve";
        }
        match self.flags & (Self::DATA | Self::SYSTEM | Self::METADATA) {
            Self::DATA => "Data",
            Self::SYSTEM => "System",
            Self::METADATA => "Metadata",
            f if f == Self::DATA | Self::METADATA => "Data+Metadata",
            _ => "unknown",
        }
    }

    /// Replication profile; `single` when no profile bit is set
    pub fn profile(&self) -> &'static str {
        Self::PROFILES
            .iter()
            .find(|(bit, _)| self.flags & bit != 0)
            .map_or("single", |&(_, name)| name)
    }
}

impl From<&SpaceInfoArgs> for SpaceInfo {
    fn from(args: &SpaceInfoArgs) -> Self {
        Self {
            flags: args.flags,
            total_bytes: args.total_bytes,
            used_bytes: args.used_bytes,
        }
    }
}
