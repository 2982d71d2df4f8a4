//! Page definitions for the on-disk tree.

use buffer::PageImage;
use common::PageAddr;
use serde::{Deserialize, Serialize};

/// A key-value pair stored in a leaf.
///
/// Entries order lexicographically by `(key, value)`, so equal keys with
/// distinct values coexist in the tree and come back in ascending value
/// order. Entries are copied by value on every move between pages.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Entry<K, V> {
    pub key: K,
    pub value: V,
}

impl<K, V> Entry<K, V> {
    pub fn new(key: K, value: V) -> Self {
        Self { key, value }
    }
}

/// What an inner page's children are.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildKind {
    /// Children are inner pages.
    Inner,
    /// Children are leaf pages.
    Leaf,
}

/// A non-leaf page.
///
/// `children[i]` roots the subtree holding every entry below `seps[i]` and,
/// for `i > 0`, at or above `seps[i-1]`. A separator is the smallest entry
/// of its right subtree when written; erasing that entry later leaves the
/// separator as a strict lower bound, which still routes correctly.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InnerPage<K, V> {
    pub addr: PageAddr,
    pub kind: ChildKind,
    pub children: Vec<PageAddr>,
    pub seps: Vec<Entry<K, V>>,
    #[serde(skip)]
    pub dirty: bool,
}

impl<K, V> InnerPage<K, V> {
    pub fn new(addr: PageAddr, kind: ChildKind) -> Self {
        Self {
            addr,
            kind,
            children: Vec::new(),
            seps: Vec::new(),
            dirty: false,
        }
    }

    /// Child slot whose subtree covers `entry`: an entry equal to a
    /// separator belongs to the subtree on the separator's right.
    pub fn entry_slot(&self, entry: &Entry<K, V>) -> usize
    where
        K: Ord,
        V: Ord,
    {
        self.seps.partition_point(|sep| sep <= entry)
    }

    /// Child slot for a probe that orders before every entry carrying `key`.
    pub fn key_slot(&self, key: &K) -> usize
    where
        K: Ord,
    {
        self.seps.partition_point(|sep| sep.key < *key)
    }
}

/// A terminal page: entries in ascending `(key, value)` order plus the
/// address of the lexicographically next leaf.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeafPage<K, V> {
    pub addr: PageAddr,
    pub entries: Vec<Entry<K, V>>,
    pub next: Option<PageAddr>,
    #[serde(skip)]
    pub dirty: bool,
}

impl<K, V> LeafPage<K, V> {
    pub fn new(addr: PageAddr) -> Self {
        Self {
            addr,
            entries: Vec::new(),
            next: None,
            dirty: false,
        }
    }

    /// Index of the first entry whose key is not below `key`.
    pub fn first_slot_for(&self, key: &K) -> usize
    where
        K: Ord,
    {
        self.entries.partition_point(|entry| entry.key < *key)
    }
}

impl<K: Serialize, V: Serialize> PageImage for InnerPage<K, V> {
    fn addr(&self) -> PageAddr {
        self.addr
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl<K: Serialize, V: Serialize> PageImage for LeafPage<K, V> {
    fn addr(&self) -> PageAddr {
        self.addr
    }

    fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}
