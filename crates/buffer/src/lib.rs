//! Bounded LRU page cache sitting between the tree engine and a page file.
//!
//! The cache hands ownership back and forth instead of sharing references:
//! [`PageCache::take`] removes a resident image and gives it to the caller,
//! [`PageCache::stash`] returns it. A page being operated on is therefore
//! never resident, which doubles as a pinning primitive and makes aliasing
//! of page images impossible.
//!
//! # Example
//!
//! ```no_run
//! use buffer::{PageCache, PageImage};
//! # use common::{IndexResult, PageAddr};
//! # use serde::{Deserialize, Serialize};
//! # #[derive(Serialize, Deserialize)]
//! # struct Leaf { addr: PageAddr, dirty: bool }
//! # impl PageImage for Leaf {
//! #     fn addr(&self) -> PageAddr { self.addr }
//! #     fn is_dirty(&self) -> bool { self.dirty }
//! #     fn clear_dirty(&mut self) { self.dirty = false; }
//! # }
//! # fn demo(store: &mut storage::PageFile) -> IndexResult<()> {
//! let mut cache: PageCache<Leaf> = PageCache::new(3000);
//! let addr = PageAddr(16);
//! let mut page = match cache.take(addr) {
//!     Some(page) => page,
//!     None => store.read_page(addr)?,
//! };
//! page.dirty = true; // mutate while exclusively owned
//! cache.stash(store, page)?;
//! # Ok(())
//! # }
//! ```

#[cfg(test)]
mod tests;

use std::num::NonZeroUsize;

use common::{IndexResult, PageAddr};
use lru::LruCache;
use serde::Serialize;
use storage::PageFile;

/// An in-memory page image the cache can hold and write back.
pub trait PageImage: Serialize {
    /// Address of the page inside its backing file.
    fn addr(&self) -> PageAddr;
    /// Whether the image differs from its bytes on disk.
    fn is_dirty(&self) -> bool;
    fn clear_dirty(&mut self);
}

/// Bounded LRU cache of page images keyed by address.
#[derive(Debug)]
pub struct PageCache<P> {
    cache: LruCache<PageAddr, P>,
}

impl<P: PageImage> PageCache<P> {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
        }
    }

    /// Remove and return the resident image for `addr`, if any. The caller
    /// owns the page until it is stashed again.
    pub fn take(&mut self, addr: PageAddr) -> Option<P> {
        self.cache.pop(&addr)
    }

    /// Insert `page` at the head of the LRU. When the cache is at capacity
    /// the least recently used page is evicted first, and written through to
    /// `store` if dirty.
    pub fn stash(&mut self, store: &mut PageFile, page: P) -> IndexResult<()> {
        if self.cache.len() == self.cache.cap().get()
            && let Some((addr, mut evicted)) = self.cache.pop_lru()
            && evicted.is_dirty()
        {
            evicted.clear_dirty();
            store.write_page(addr, &evicted)?;
        }
        self.cache.push(page.addr(), page);
        Ok(())
    }

    /// Evict every resident page, writing dirty ones through to `store`.
    pub fn flush(&mut self, store: &mut PageFile) -> IndexResult<()> {
        while let Some((addr, mut page)) = self.cache.pop_lru() {
            if page.is_dirty() {
                page.clear_dirty();
                store.write_page(addr, &page)?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
