// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use subvol_core::TransportError;

#[derive(thiserror::Error, Debug)]
pub enum IoctlError {
    #[error("{0} is not on a btrfs filesystem")]
    NotBtrfs(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("{operation} on {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Core(#[from] subvol_core::Error),
}

pub type Result<T> = std::result::Result<T, IoctlError>;

/// Classify the errno of a failed search call.
pub(crate) fn transport_error(errno: Errno) -> TransportError {
    match errno {
        Errno::EINTR => TransportError::Interrupted,
        Errno::ENOENT => TransportError::NoSuchObject,
        Errno::EBADF => TransportError::Closed,
        other => TransportError::Os(io::Error::from(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_classification() {
        assert!(matches!(transport_error(Errno::EINTR), TransportError::Interrupted));
        assert!(matches!(transport_error(Errno::ENOENT), TransportError::NoSuchObject));
        assert!(matches!(transport_error(Errno::EBADF), TransportError::Closed));
        match transport_error(Errno::EPERM) {
            TransportError::Os(err) => assert_eq!(err.raw_os_error(), Some(libc::EPERM)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
