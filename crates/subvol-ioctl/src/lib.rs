// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Linux btrfs collaborators for `subvol-core`: the tree search transport,
//! path ownership via `INO_LOOKUP`, and the opened [`Filesystem`] that binds
//! them together and answers device, feature and space queries.

pub mod error;
pub mod filesystem;
pub mod info;
pub mod search;
pub mod sys;

pub use error::{IoctlError, Result};
pub use filesystem::{is_subvolume, FileQueries, Filesystem, InoLookup, IoctlSubvolumes, Ioctls};
pub use info::{DeviceInfo, FeatureFlags, FsInfo, SpaceInfo, SubvolumeFlags, SupportedFeatures};
pub use search::IoctlSearch;
