// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! An opened btrfs mount and the collaborators bound to it.

use std::fs::{File, OpenOptions};
use std::io;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sys::statfs::{fstatfs, statfs, BTRFS_SUPER_MAGIC};
use subvol_core::key::objectid::FIRST_FREE;
use subvol_core::{
    Error, FatalError, Lookup, PathOwner, SearchOptions, Subvolumes, UuidTreeLookup,
};
use tracing::debug;
use uuid::Uuid;

use crate::error::{IoctlError, Result};
use crate::info::{DeviceInfo, FeatureFlags, FsInfo, SpaceInfo, SubvolumeFlags, SupportedFeatures};
use crate::search::IoctlSearch;
use crate::sys::{self, DevInfoArgs, FeatureFlagsArgs, FsInfoArgs, InoLookupArgs, SpaceArgs, SpaceInfoArgs};

/// Subvolume queries issued through the ioctls of one [`Filesystem`]
pub type IoctlSubvolumes<'a> =
    Subvolumes<&'a IoctlSearch, UuidTreeLookup<&'a IoctlSearch>, InoLookup>;

/// A directory on a mounted btrfs filesystem, held open for ioctls.
pub struct Filesystem {
    path: PathBuf,
    fsid: Uuid,
    search: IoctlSearch,
    options: SearchOptions,
}

impl Filesystem {
    /// Open `path`, which must be a directory on btrfs.
    ///
    /// With `read_only` the directory is opened with `O_NOATIME` when the
    /// caller is allowed to, so scans leave access times untouched.
    pub fn open(path: impl AsRef<Path>, read_only: bool) -> Result<Self> {
        let path = path.as_ref();
        let stat = statfs(path).map_err(|errno| io_error("statfs", path, errno))?;
        if stat.filesystem_type() != BTRFS_SUPER_MAGIC {
            return Err(IoctlError::NotBtrfs(path.to_path_buf()));
        }

        let opened = if read_only {
            OpenOptions::new()
                .read(true)
                .custom_flags(libc::O_NOATIME)
                .open(path)
                .or_else(|_| File::open(path))
        } else {
            File::open(path)
        };
        let file = opened.map_err(|source| IoctlError::Io {
            operation: "open",
            path: path.to_path_buf(),
            source,
        })?;

        let metadata = file.metadata().map_err(|source| IoctlError::Io {
            operation: "stat",
            path: path.to_path_buf(),
            source,
        })?;
        if !metadata.is_dir() {
            return Err(IoctlError::NotADirectory(path.to_path_buf()));
        }

        let fsid = fs_info_of(&file)
            .map_err(|errno| io_error("fs_info", path, errno))?
            .fsid;

        debug!(operation = "open_filesystem", path = %path.display(), %fsid, read_only, "Opened btrfs directory");
        Ok(Self {
            path: path.to_path_buf(),
            fsid,
            search: IoctlSearch::new(file),
            options: SearchOptions::default(),
        })
    }

    pub fn with_options(mut self, options: SearchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Filesystem UUID, read when the directory was opened
    pub fn fsid(&self) -> Uuid {
        self.fsid
    }

    pub fn search(&self) -> &IoctlSearch {
        &self.search
    }

    /// Id of the subvolume the opened directory belongs to
    pub fn subvolume_id(&self) -> Result<u64> {
        owning_subvolume_of(self.search.fd()).map_err(|errno| io_error("ino_lookup", &self.path, errno))
    }

    pub fn info(&self) -> Result<FsInfo> {
        fs_info_of(self.search.fd()).map_err(|errno| io_error("fs_info", &self.path, errno))
    }

    /// Flags of the subvolume the opened directory belongs to
    pub fn subvolume_flags(&self) -> Result<SubvolumeFlags> {
        let mut flags = 0u64;
        // SAFETY: the kernel writes one u64.
        unsafe { sys::subvol_getflags(self.raw_fd(), &mut flags) }
            .map_err(|errno| io_error("subvol_getflags", &self.path, errno))?;
        Ok(SubvolumeFlags(flags))
    }

    /// The member device with id `devid`. Fails with `ENODEV` for ids no
    /// device holds.
    pub fn device_info(&self, devid: u64) -> Result<DeviceInfo> {
        self.dev_info(devid)
            .map_err(|errno| io_error("dev_info", &self.path, errno))
    }

    /// All member devices, in id order. Ids left free by removed devices
    /// are skipped.
    pub fn devices(&self) -> Result<Vec<DeviceInfo>> {
        let max_id = self.info()?.max_id;
        let mut devices = Vec::new();
        for devid in 1..=max_id {
            match self.dev_info(devid) {
                Ok(device) => devices.push(device),
                Err(Errno::ENODEV) => continue,
                Err(errno) => return Err(io_error("dev_info", &self.path, errno)),
            }
        }
        debug!(operation = "devices", path = %self.path.display(), max_id, count = devices.len(), "Listed devices");
        Ok(devices)
    }

    /// Feature bits the filesystem was created or converted with
    pub fn features(&self) -> Result<FeatureFlags> {
        let mut args = FeatureFlagsArgs::default();
        // SAFETY: `args` is a fully initialized feature flag struct.
        unsafe { sys::get_features(self.raw_fd(), &mut args) }
            .map_err(|errno| io_error("get_features", &self.path, errno))?;
        Ok(FeatureFlags::from(&args))
    }

    /// Feature bits the running kernel supports
    pub fn supported_features(&self) -> Result<SupportedFeatures> {
        let mut args = [FeatureFlagsArgs::default(); 3];
        // SAFETY: the kernel fills exactly three feature flag structs.
        unsafe { sys::get_supported_features(self.raw_fd(), &mut args) }
            .map_err(|errno| io_error("get_supported_features", &self.path, errno))?;
        Ok(SupportedFeatures::from(&args))
    }

    /// Allocated and used bytes per block group kind and profile
    pub fn space_info(&self) -> Result<Vec<SpaceInfo>> {
        let fd = self.raw_fd();
        let mut count = SpaceArgs::default();
        // SAFETY: zero slots asks the kernel for the entry count only.
        unsafe { sys::space_info(fd, &mut count) }
            .map_err(|errno| io_error("space_info", &self.path, errno))?;
        let slots = count.total_spaces as usize;
        if slots == 0 {
            return Ok(Vec::new());
        }

        // Header then `slots` entries, kept in u64 storage for alignment.
        let header_words = size_of::<SpaceArgs>() / 8;
        let entry_words = size_of::<SpaceInfoArgs>() / 8;
        let mut storage = vec![0u64; header_words + slots * entry_words];
        storage[0] = slots as u64;
        // SAFETY: `storage` starts with a `SpaceArgs` header followed by
        // room for `space_slots` entries, and is u64 aligned.
        unsafe { sys::space_info(fd, storage.as_mut_ptr().cast::<SpaceArgs>()) }
            .map_err(|errno| io_error("space_info", &self.path, errno))?;

        // Allocations can shrink between the two calls.
        let filled = (storage[1] as usize).min(slots);
        let spaces = storage[header_words..]
            .chunks_exact(entry_words)
            .take(filled)
            .map(|words| {
                SpaceInfo::from(&SpaceInfoArgs {
                    flags: words[0],
                    total_bytes: words[1],
                    used_bytes: words[2],
                })
            })
            .collect();
        Ok(spaces)
    }

    /// Subvolume queries over this filesystem, using its search options.
    pub fn subvolumes(&self) -> IoctlSubvolumes<'_> {
        Subvolumes::new(
            &self.search,
            UuidTreeLookup::new(&self.search),
            InoLookup::new(&self.path, self.fsid),
        )
        .with_options(self.options)
    }

    fn dev_info(&self, devid: u64) -> nix::Result<DeviceInfo> {
        let mut args = DevInfoArgs::new(devid);
        // SAFETY: `args` is a boxed, fully initialized device info struct.
        unsafe { sys::dev_info(self.raw_fd(), &mut *args) }?;
        Ok(DeviceInfo::from(&*args))
    }

    fn raw_fd(&self) -> i32 {
        self.search.fd().as_fd().as_raw_fd()
    }
}

/// Kernel queries [`InoLookup`] makes on an opened path.
#[cfg_attr(test, mockall::automock)]
pub trait FileQueries {
    /// UUID of the btrfs filesystem holding `file`; `None` when it is on
    /// another filesystem type.
    fn fsid(&self, file: &File) -> io::Result<Option<Uuid>>;

    /// Id of the subvolume holding `file`
    fn owning_subvolume(&self, file: &File) -> io::Result<u64>;
}

/// [`FileQueries`] answered by `fstatfs`, `FS_INFO` and `INO_LOOKUP`
#[derive(Clone, Copy, Debug, Default)]
pub struct Ioctls;

impl FileQueries for Ioctls {
    fn fsid(&self, file: &File) -> io::Result<Option<Uuid>> {
        let stat = fstatfs(file)?;
        if stat.filesystem_type() != BTRFS_SUPER_MAGIC {
            return Ok(None);
        }
        Ok(Some(fs_info_of(file)?.fsid))
    }

    fn owning_subvolume(&self, file: &File) -> io::Result<u64> {
        Ok(owning_subvolume_of(file)?)
    }
}

/// [`PathOwner`] asking the kernel which subvolume a path belongs to.
///
/// Bound to one mounted filesystem: relative paths are taken from the mount
/// directory, and paths on any other filesystem are not found.
#[derive(Clone, Debug)]
pub struct InoLookup<Q = Ioctls> {
    mount: PathBuf,
    fsid: Uuid,
    queries: Q,
}

impl InoLookup {
    pub fn new(mount: impl Into<PathBuf>, fsid: Uuid) -> Self {
        Self::with_queries(mount, fsid, Ioctls)
    }
}

impl<Q> InoLookup<Q> {
    pub fn with_queries(mount: impl Into<PathBuf>, fsid: Uuid, queries: Q) -> Self {
        Self {
            mount: mount.into(),
            fsid,
            queries,
        }
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.mount.join(path)
        }
    }
}

impl<Q: FileQueries> PathOwner for InoLookup<Q> {
    fn owning_subvolume(&self, path: &Path) -> subvol_core::Result<u64> {
        let path = self.absolute(path);
        let not_found = || Error::NotFound(Lookup::Path(path.clone()));
        let file = File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => not_found(),
            _ => FatalError::Os(err).into(),
        })?;

        let fsid = self.queries.fsid(&file).map_err(FatalError::Os)?;
        if fsid != Some(self.fsid) {
            debug!(
                operation = "ino_lookup",
                path = %path.display(),
                mount_fsid = %self.fsid,
                path_fsid = ?fsid,
                "Path is not on the mounted filesystem"
            );
            return Err(not_found());
        }

        self.queries.owning_subvolume(&file).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => not_found(),
            _ => FatalError::Os(err).into(),
        })
    }
}

/// Whether `path` is the root directory of a btrfs subvolume.
pub fn is_subvolume(path: impl AsRef<Path>) -> io::Result<bool> {
    let path = path.as_ref();
    let stat = statfs(path).map_err(io::Error::from)?;
    if stat.filesystem_type() != BTRFS_SUPER_MAGIC {
        return Ok(false);
    }
    Ok(std::fs::metadata(path)?.ino() == FIRST_FREE)
}

fn fs_info_of<Fd: AsFd>(fd: Fd) -> nix::Result<FsInfo> {
    let mut args = FsInfoArgs::default();
    // SAFETY: `args` is a fully initialized, correctly sized argument struct.
    unsafe { sys::fs_info(fd.as_fd().as_raw_fd(), &mut args) }?;
    Ok(FsInfo::from(&args))
}

fn owning_subvolume_of<Fd: AsFd>(fd: Fd) -> nix::Result<u64> {
    let mut args = InoLookupArgs::new(0, FIRST_FREE);
    // SAFETY: `args` is a boxed, fully initialized lookup struct.
    unsafe { sys::ino_lookup(fd.as_fd().as_raw_fd(), &mut *args) }?;
    Ok(args.treeid)
}

fn io_error(operation: &'static str, path: &Path, errno: Errno) -> IoctlError {
    IoctlError::Io {
        operation,
        path: path.to_path_buf(),
        source: errno.into(),
    }
}
