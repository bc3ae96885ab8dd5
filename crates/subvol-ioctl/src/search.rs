// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Tree search transport over `BTRFS_IOC_TREE_SEARCH_V2`, with the fixed-size
//! v1 call as fallback on kernels that lack v2.

use std::fs::File;
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use nix::errno::Errno;
use subvol_core::transport::SEARCH_HEADER_LEN;
use subvol_core::{SearchHeader, SearchQuery, SearchReply, SearchTransport, TransportError};
use tracing::{debug, trace};

use crate::error::transport_error;
use crate::sys::{self, SearchArgs, SearchArgsV2, SearchKeyArgs};

/// [`SearchTransport`] issuing search ioctls on an open directory.
pub struct IoctlSearch<Fd = File> {
    fd: Fd,
    use_v2: AtomicBool,
}

impl<Fd: AsFd> IoctlSearch<Fd> {
    pub fn new(fd: Fd) -> Self {
        Self {
            fd,
            use_v2: AtomicBool::new(true),
        }
    }

    /// Whether the variable-size v2 call is still in use
    pub fn uses_v2(&self) -> bool {
        self.use_v2.load(Ordering::Relaxed)
    }

    pub fn fd(&self) -> &Fd {
        &self.fd
    }

    /// `Ok(None)` when the kernel does not know the v2 call.
    fn search_v2(
        &self,
        query: &SearchQuery,
        buffer_size: usize,
    ) -> Result<Option<SearchReply>, TransportError> {
        let header_len = size_of::<SearchArgsV2>();
        // u64 words keep the argument header aligned
        let mut storage = vec![0u64; (header_len + buffer_size).div_ceil(8)];
        let args = storage.as_mut_ptr().cast::<SearchArgsV2>();

        // SAFETY: `storage` is 8-byte aligned and holds the header plus
        // `buffer_size` bytes, which is what the kernel is told it may fill.
        let (res, out) = unsafe {
            args.write(SearchArgsV2 {
                key: key_args(query),
                buf_size: buffer_size as u64,
            });
            let res = sys::tree_search_v2(self.fd.as_fd().as_raw_fd(), args);
            (res, args.read())
        };

        match res {
            Ok(_) => {}
            Err(Errno::ENOTTY) => return Ok(None),
            Err(Errno::EOVERFLOW) => {
                return Err(TransportError::BufferTooSmall {
                    needed: out.buf_size,
                })
            }
            Err(errno) => return Err(transport_error(errno)),
        }

        let bytes: Vec<u8> = storage.iter().flat_map(|word| word.to_ne_bytes()).collect();
        let payload = &bytes[header_len..header_len + buffer_size];
        Ok(Some(reply_from(payload, out.key.nr_items)))
    }

    /// v1 always uses the fixed in-struct buffer, whatever the requested size.
    fn search_v1(&self, query: &SearchQuery) -> Result<SearchReply, TransportError> {
        let mut args = SearchArgs::new(key_args(query));
        // SAFETY: `args` is a boxed, fully initialized v1 argument struct.
        unsafe { sys::tree_search(self.fd.as_fd().as_raw_fd(), &mut *args) }
            .map_err(transport_error)?;
        Ok(reply_from(&args.buf, args.key.nr_items))
    }
}

impl<Fd: AsFd> SearchTransport for IoctlSearch<Fd> {
    fn search(
        &self,
        query: &SearchQuery,
        buffer_size: usize,
    ) -> Result<SearchReply, TransportError> {
        if self.uses_v2() {
            if let Some(reply) = self.search_v2(query, buffer_size)? {
                trace!(operation = "tree_search", version = 2, tree_id = query.tree_id, items = reply.nr_items, "Search call");
                return Ok(reply);
            }
            debug!(operation = "tree_search", "TREE_SEARCH_V2 unsupported, using v1");
            self.use_v2.store(false, Ordering::Relaxed);
        }
        let reply = self.search_v1(query)?;
        trace!(operation = "tree_search", version = 1, tree_id = query.tree_id, items = reply.nr_items, "Search call");
        Ok(reply)
    }
}

pub(crate) fn key_args(query: &SearchQuery) -> SearchKeyArgs {
    SearchKeyArgs {
        tree_id: query.tree_id,
        min_objectid: query.min_objectid,
        max_objectid: query.max_objectid,
        min_offset: query.min_offset,
        max_offset: query.max_offset,
        min_transid: query.min_transid,
        max_transid: query.max_transid,
        min_type: query.min_type,
        max_type: query.max_type,
        nr_items: query.nr_items,
        ..SearchKeyArgs::default()
    }
}

/// Copy out the prefix of `buf` covered by `nr_items` header+payload pairs.
///
/// A header that runs past the buffer keeps the rest of it, so the cursor
/// sees and reports the truncation.
fn reply_from(buf: &[u8], nr_items: u32) -> SearchReply {
    let mut used = 0usize;
    for _ in 0..nr_items {
        let Some(header) = buf.get(used..).and_then(SearchHeader::parse) else {
            used = buf.len();
            break;
        };
        let end = used + SEARCH_HEADER_LEN + header.len as usize;
        if end > buf.len() {
            used = buf.len();
            break;
        }
        used = end;
    }
    SearchReply {
        nr_items,
        buf: buf[..used].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use subvol_core::{Key, SearchKey, SearchRange};

    fn item(objectid: u64, payload: &[u8], out: &mut Vec<u8>) {
        SearchHeader {
            transid: 1,
            objectid,
            offset: 0,
            item_type: 132,
            len: payload.len() as u32,
        }
        .encode_into(out);
        out.extend_from_slice(payload);
    }

    #[test]
    fn test_key_args_copy_every_bound() {
        let range = SearchRange::all_subvolumes();
        let query = SearchQuery::new(&range, &SearchKey::new(Key::new(300, 132, 7), 11));
        let args = key_args(&query);
        assert_eq!(args.tree_id, 1);
        assert_eq!(args.min_objectid, 300);
        assert_eq!(args.min_type, 132);
        assert_eq!(args.min_offset, 7);
        assert_eq!(args.min_transid, 11);
        assert_eq!(args.max_objectid, range.max.objectid);
        assert_eq!(args.max_type, u32::from(range.max.item_type));
        assert_eq!(args.nr_items, u32::MAX);
        assert_eq!(args.unused, 0);
    }

    #[test]
    fn test_reply_trims_unused_buffer() {
        let mut buf = Vec::new();
        item(256, &[1, 2, 3], &mut buf);
        item(257, &[4], &mut buf);
        let used = buf.len();
        buf.resize(4096, 0);

        let reply = reply_from(&buf, 2);
        assert_eq!(reply.nr_items, 2);
        assert_eq!(reply.buf.len(), used);
        assert!(reply_from(&buf, 0).buf.is_empty());
    }

    #[test]
    fn test_reply_keeps_overrunning_item() {
        let mut buf = Vec::new();
        item(256, &[9; 16], &mut buf);
        buf.truncate(SEARCH_HEADER_LEN + 4);
        let reply = reply_from(&buf, 1);
        assert_eq!(reply.buf, buf);
    }

    #[test]
    fn test_search_on_non_btrfs_file_fails() {
        let file = tempfile::tempfile().unwrap();
        let search = IoctlSearch::new(file);
        let query = SearchQuery::new(&SearchRange::all_subvolumes(), &SearchRange::all_subvolumes().start());
        assert!(search.search(&query, 4096).is_err());
    }
}
