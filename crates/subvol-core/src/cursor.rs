// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Cursor over the generic tree search interface.
//!
//! Each call to the transport returns as many items as fit in the buffer. The
//! cursor splits the reply into [`RawItem`]s and restarts the next call just
//! past the last key returned, because the search is inclusive of its start
//! key. Interrupted calls are reissued with the unchanged key.

use tracing::{debug, trace};

use crate::error::{Error, FatalError, Result};
use crate::key::{Key, SearchKey, SearchRange};
use crate::transport::{
    SearchHeader, SearchQuery, SearchReply, SearchTransport, TransportError, SEARCH_HEADER_LEN,
};

/// Smallest buffer that can carry one header and a non-empty payload
pub const MIN_SEARCH_BUFFER: usize = SEARCH_HEADER_LEN + 1;
pub const MAX_SEARCH_BUFFER: usize = 16 * 1024 * 1024;
pub const DEFAULT_SEARCH_BUFFER: usize = 64 * 1024;

/// Tuning for one scan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    /// Bytes the transport may return per call
    pub buffer_size: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_SEARCH_BUFFER,
        }
    }
}

impl SearchOptions {
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.clamp(MIN_SEARCH_BUFFER, MAX_SEARCH_BUFFER),
        }
    }
}

/// One item returned by a scan. Transient: decoded and dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawItem {
    pub key: Key,
    pub transid: u64,
    pub payload: Vec<u8>,
}

/// Continuable scan of one key range.
pub struct TreeCursor<T> {
    transport: T,
    range: SearchRange,
    next: Option<SearchKey>,
    buffer_size: usize,
    calls: u64,
    items: u64,
    pending: std::vec::IntoIter<RawItem>,
}

impl<T: SearchTransport> TreeCursor<T> {
    pub fn new(transport: T, range: SearchRange, options: SearchOptions) -> Self {
        let start = range.start();
        Self::resume(transport, range, start, options)
    }

    /// Continue a scan from a key previously obtained through [`TreeCursor::next_key`].
    pub fn resume(
        transport: T,
        range: SearchRange,
        next: SearchKey,
        options: SearchOptions,
    ) -> Self {
        let next = range.contains(&next.key).then_some(next);
        Self {
            transport,
            range,
            next,
            buffer_size: options.buffer_size,
            calls: 0,
            items: 0,
            pending: Vec::new().into_iter(),
        }
    }

    /// Where the next call will start, or `None` once the range is exhausted.
    pub fn next_key(&self) -> Option<SearchKey> {
        self.next
    }

    pub fn is_done(&self) -> bool {
        self.next.is_none() && self.pending.len() == 0
    }

    pub fn range(&self) -> &SearchRange {
        &self.range
    }

    /// Number of successful transport calls made so far
    pub fn calls(&self) -> u64 {
        self.calls
    }

    /// Issue one transport call and return the items it produced.
    ///
    /// `Ok(None)` means the scan is finished. A batch may be empty when every
    /// item in the reply fell outside the type filter; the scan continues.
    pub fn next_batch(&mut self) -> Result<Option<Vec<RawItem>>> {
        let Some(start) = self.next else {
            return Ok(None);
        };
        let query = SearchQuery::new(&self.range, &start);

        let reply = match self.call(&query, &start) {
            Ok(Some(reply)) => reply,
            Ok(None) => {
                self.next = None;
                return Ok(None);
            }
            Err(err) => {
                self.next = None;
                return Err(err);
            }
        };
        self.calls += 1;

        if reply.nr_items == 0 {
            debug!(
                operation = "tree_search",
                tree_id = self.range.tree_id,
                calls = self.calls,
                items = self.items,
                "Scan finished"
            );
            self.next = None;
            return Ok(None);
        }

        let (items, last) = match split_reply(&reply, &start.key, &self.range) {
            Ok(split) => split,
            Err(err) => {
                self.next = None;
                return Err(err);
            }
        };
        trace!(
            operation = "tree_search",
            tree_id = self.range.tree_id,
            start = %start.key,
            last = %last,
            returned = reply.nr_items,
            kept = items.len(),
            "Search call returned"
        );
        self.items += items.len() as u64;
        self.next = last
            .successor()
            .filter(|key| self.range.contains(key))
            .map(|key| SearchKey::new(key, start.min_transid));
        Ok(Some(items))
    }

    /// Drain the whole range eagerly.
    pub fn collect_all(mut self) -> Result<Vec<RawItem>> {
        let mut out: Vec<RawItem> = self.pending.by_ref().collect();
        while let Some(batch) = self.next_batch()? {
            out.extend(batch);
        }
        Ok(out)
    }

    fn call(&self, query: &SearchQuery, start: &SearchKey) -> Result<Option<SearchReply>> {
        loop {
            match self.transport.search(query, self.buffer_size) {
                Ok(reply) => return Ok(Some(reply)),
                Err(TransportError::Interrupted) => {
                    trace!(operation = "tree_search", start = %start.key, "Search interrupted, retrying");
                }
                Err(TransportError::NoSuchObject) if self.calls == 0 => {
                    return Err(FatalError::InvalidStartKey(start.key).into());
                }
                Err(TransportError::NoSuchObject) => {
                    debug!(
                        operation = "tree_search",
                        tree_id = self.range.tree_id,
                        start = %start.key,
                        "Range disappeared mid-scan, ending scan"
                    );
                    return Ok(None);
                }
                Err(TransportError::Closed) => return Err(FatalError::Closed.into()),
                Err(TransportError::BufferTooSmall { needed }) => {
                    return Err(FatalError::BufferTooSmall { needed }.into());
                }
                Err(TransportError::Os(err)) => return Err(FatalError::Os(err).into()),
            }
        }
    }
}

impl<T: SearchTransport> Iterator for TreeCursor<T> {
    type Item = Result<RawItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.next() {
                return Some(Ok(item));
            }
            match self.next_batch() {
                Ok(Some(batch)) => self.pending = batch.into_iter(),
                Ok(None) => return None,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Split one reply into items, returning them together with the last key seen
/// (including items dropped by the type filter).
fn split_reply(reply: &SearchReply, start: &Key, range: &SearchRange) -> Result<(Vec<RawItem>, Key)> {
    let buf = reply.buf.as_slice();
    let mut items = Vec::with_capacity((reply.nr_items as usize).min(buf.len() / SEARCH_HEADER_LEN));
    let mut pos = 0usize;
    let mut last: Option<Key> = None;

    for _ in 0..reply.nr_items {
        let at = last.unwrap_or(*start);
        let header = buf
            .get(pos..)
            .and_then(SearchHeader::parse)
            .ok_or_else(|| Error::corrupt(at, "search reply truncated inside an item header"))?;
        let key = header.key().ok_or_else(|| {
            Error::corrupt(
                at,
                format!("search reply item type {} out of range", header.item_type),
            )
        })?;
        if key < at || last == Some(key) {
            return Err(Error::corrupt(
                key,
                format!("search reply out of order after {}", at),
            ));
        }

        let data_start = pos + SEARCH_HEADER_LEN;
        let data_end = data_start
            .checked_add(header.len as usize)
            .filter(|end| *end <= buf.len())
            .ok_or_else(|| {
                Error::corrupt(
                    key,
                    format!(
                        "item payload of {} bytes overruns {}-byte reply",
                        header.len,
                        buf.len()
                    ),
                )
            })?;

        if range.accepts_type(key.item_type) {
            items.push(RawItem {
                key,
                transid: header.transid,
                payload: buf[data_start..data_end].to_vec(),
            });
        }
        last = Some(key);
        pos = data_end;
    }

    Ok((items, last.unwrap_or(*start)))
}
