//! Disk-resident B+ tree multimap.
//!
//! Entries are `(key, value)` pairs ordered lexicographically, so duplicate
//! keys with distinct values coexist; `find` returns every value stored
//! under a key in ascending order. The tree persists across restarts in two
//! page files (one for inner pages, one for leaves), each fronted by a
//! bounded LRU cache and a free-page recycler.
//!
//! Single-threaded by construction: operations run on the calling thread to
//! completion, and the engine owns at most one image of any page at a time
//! (pages are taken out of the cache while operated on and stashed back
//! after).
//!
//! # Example
//!
//! ```no_run
//! use btree::BPlusTree;
//! use common::{IndexResult, TreeConfig};
//! use std::path::Path;
//!
//! fn run() -> IndexResult<()> {
//!     let mut index: BPlusTree<String, i32> = BPlusTree::open(
//!         Path::new("tree.idx"),
//!         Path::new("data.idx"),
//!         TreeConfig::default(),
//!     )?;
//!     index.insert("march".into(), 1912)?;
//!     index.insert("march".into(), 1997)?;
//!     assert_eq!(index.find(&"march".into())?, vec![1912, 1997]);
//!     index.erase(&"march".into(), &1912)?;
//!     index.close()
//! }
//! ```

mod node;

pub use node::{ChildKind, Entry, InnerPage, LeafPage};

use std::path::Path;

use buffer::PageCache;
use common::{IndexError, IndexResult, PageAddr, TreeConfig};
use serde::{de::DeserializeOwned, Serialize};
use storage::PageFile;

/// The two page files and their caches. Every page the engine touches goes
/// through here, so each load is paired with a stash and no page image is
/// ever held twice.
struct Store<K, V> {
    tree: PageFile,
    data: PageFile,
    inner_cache: PageCache<InnerPage<K, V>>,
    leaf_cache: PageCache<LeafPage<K, V>>,
    branch_max: usize,
    leaf_max: usize,
}

impl<K, V> Store<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Ord + Clone + Serialize + DeserializeOwned,
{
    fn load_inner(&mut self, addr: PageAddr) -> IndexResult<InnerPage<K, V>> {
        match self.inner_cache.take(addr) {
            Some(page) => Ok(page),
            None => self.tree.read_page(addr),
        }
    }

    fn stash_inner(&mut self, page: InnerPage<K, V>) -> IndexResult<()> {
        self.inner_cache.stash(&mut self.tree, page)
    }

    fn load_leaf(&mut self, addr: PageAddr) -> IndexResult<LeafPage<K, V>> {
        match self.leaf_cache.take(addr) {
            Some(page) => Ok(page),
            None => self.data.read_page(addr),
        }
    }

    fn stash_leaf(&mut self, page: LeafPage<K, V>) -> IndexResult<()> {
        self.leaf_cache.stash(&mut self.data, page)
    }

    /// Recursive insert below `parent`. Splices the entry into the correct
    /// leaf, splitting children as they fill; any split adds one child and
    /// one separator to `parent`. Returns true when `parent` itself has
    /// reached the branch limit and the caller must split it.
    fn insert_into(&mut self, parent: &mut InnerPage<K, V>, entry: Entry<K, V>) -> IndexResult<bool> {
        let slot = parent.entry_slot(&entry);
        if parent.kind == ChildKind::Leaf {
            let mut leaf = self.load_leaf(parent.children[slot])?;
            let at = leaf.entries.partition_point(|e| e < &entry);
            leaf.entries.insert(at, entry);
            leaf.dirty = true;
            if leaf.entries.len() < self.leaf_max {
                self.stash_leaf(leaf)?;
                return Ok(false);
            }
            // split: the new right leaf takes the upper half and inherits
            // the forward pointer
            let right_entries = leaf.entries.split_off(self.leaf_max / 2);
            let sep = right_entries
                .first()
                .cloned()
                .ok_or_else(|| IndexError::Storage("leaf split produced an empty half".into()))?;
            let right_addr = self.data.allocate();
            let right = LeafPage {
                addr: right_addr,
                entries: right_entries,
                next: leaf.next,
                dirty: true,
            };
            leaf.next = Some(right_addr);
            self.stash_leaf(leaf)?;
            self.stash_leaf(right)?;
            parent.children.insert(slot + 1, right_addr);
            parent.seps.insert(slot, sep);
            parent.dirty = true;
            return Ok(parent.children.len() == self.branch_max);
        }

        let mut child = self.load_inner(parent.children[slot])?;
        if self.insert_into(&mut child, entry)? {
            let (promoted, right_addr) = self.split_inner(&mut child)?;
            self.stash_inner(child)?;
            parent.children.insert(slot + 1, right_addr);
            parent.seps.insert(slot, promoted);
            parent.dirty = true;
            return Ok(parent.children.len() == self.branch_max);
        }
        self.stash_inner(child)?;
        Ok(false)
    }

    /// Split an inner page holding the branch limit of children into equal
    /// halves. The middle separator moves up: it is returned for the caller
    /// to splice into the parent, together with the new right page address.
    fn split_inner(&mut self, page: &mut InnerPage<K, V>) -> IndexResult<(Entry<K, V>, PageAddr)> {
        let half = page.children.len() / 2;
        let right_children = page.children.split_off(half);
        let right_seps = page.seps.split_off(half);
        let promoted = page
            .seps
            .pop()
            .ok_or_else(|| IndexError::Storage("inner split produced an empty half".into()))?;
        let right_addr = self.tree.allocate();
        let right = InnerPage {
            addr: right_addr,
            kind: page.kind,
            children: right_children,
            seps: right_seps,
            dirty: true,
        };
        page.dirty = true;
        self.stash_inner(right)?;
        Ok((promoted, right_addr))
    }

    /// Recursive erase below `parent`. Returns true when `parent` has
    /// dropped below the branch floor and the caller must rebalance it.
    fn erase_from(&mut self, parent: &mut InnerPage<K, V>, entry: &Entry<K, V>) -> IndexResult<bool> {
        let slot = parent.entry_slot(entry);
        if parent.kind == ChildKind::Leaf {
            return self.erase_at_leaf(parent, slot, entry);
        }
        let mut child = self.load_inner(parent.children[slot])?;
        if self.erase_from(&mut child, entry)? {
            return self.rebalance_inner(parent, slot, child);
        }
        self.stash_inner(child)?;
        Ok(false)
    }

    /// Remove `entry` from the leaf under `parent.children[slot]`, then
    /// restore the occupancy floor: borrow from the right sibling, borrow
    /// from the left, merge with the right, merge with the left, in that
    /// order. A missing entry is a silent no-op.
    fn erase_at_leaf(
        &mut self,
        parent: &mut InnerPage<K, V>,
        slot: usize,
        entry: &Entry<K, V>,
    ) -> IndexResult<bool> {
        let mut leaf = self.load_leaf(parent.children[slot])?;
        let at = match leaf.entries.binary_search(entry) {
            Ok(at) => at,
            Err(_) => {
                self.stash_leaf(leaf)?;
                return Ok(false);
            }
        };
        leaf.entries.remove(at);
        leaf.dirty = true;

        let floor = self.leaf_max / 2;
        if leaf.entries.len() >= floor {
            self.stash_leaf(leaf)?;
            return Ok(false);
        }

        let mut right = match parent.children.get(slot + 1) {
            Some(&addr) => Some(self.load_leaf(addr)?),
            None => None,
        };
        if let Some(r) = right.as_mut() {
            if r.entries.len() > floor {
                // move the sibling's smallest entry over and refresh the
                // separator between the two
                leaf.entries.push(r.entries.remove(0));
                r.dirty = true;
                parent.seps[slot] = r.entries[0].clone();
                parent.dirty = true;
                self.stash_leaf(leaf)?;
                if let Some(r) = right.take() {
                    self.stash_leaf(r)?;
                }
                return Ok(false);
            }
        }

        let mut left = if slot > 0 {
            Some(self.load_leaf(parent.children[slot - 1])?)
        } else {
            None
        };
        if let Some(l) = left.as_mut() {
            if l.entries.len() > floor {
                let moved = l
                    .entries
                    .pop()
                    .ok_or_else(|| IndexError::Storage("sibling above floor is empty".into()))?;
                l.dirty = true;
                leaf.entries.insert(0, moved);
                parent.seps[slot - 1] = leaf.entries[0].clone();
                parent.dirty = true;
                if let Some(r) = right.take() {
                    self.stash_leaf(r)?;
                }
                self.stash_leaf(leaf)?;
                if let Some(l) = left.take() {
                    self.stash_leaf(l)?;
                }
                return Ok(false);
            }
        }

        if let Some(mut r) = right.take() {
            if let Some(l) = left.take() {
                self.stash_leaf(l)?;
            }
            // merge the right sibling into this leaf and adopt its forward
            // pointer; the sibling's address goes to the recycler
            leaf.entries.append(&mut r.entries);
            leaf.next = r.next;
            self.data.free(r.addr);
            parent.children.remove(slot + 1);
            parent.seps.remove(slot);
            parent.dirty = true;
            self.stash_leaf(leaf)?;
            return Ok(parent.children.len() < self.branch_max / 2);
        }

        if let Some(mut l) = left.take() {
            l.entries.append(&mut leaf.entries);
            l.next = leaf.next;
            l.dirty = true;
            self.data.free(leaf.addr);
            parent.children.remove(slot);
            parent.seps.remove(slot - 1);
            parent.dirty = true;
            self.stash_leaf(l)?;
            return Ok(parent.children.len() < self.branch_max / 2);
        }

        // only child of the root: nothing to rebalance against
        self.stash_leaf(leaf)?;
        Ok(false)
    }

    /// Restore the branch floor for `child`, an underfull inner page at
    /// `parent.children[slot]`. Borrows rotate a separator through the
    /// parent so separators keep naming the smallest entry of their right
    /// subtree; merges pull the parent separator down between the halves.
    fn rebalance_inner(
        &mut self,
        parent: &mut InnerPage<K, V>,
        slot: usize,
        mut child: InnerPage<K, V>,
    ) -> IndexResult<bool> {
        let floor = self.branch_max / 2;

        let mut right = match parent.children.get(slot + 1) {
            Some(&addr) => Some(self.load_inner(addr)?),
            None => None,
        };
        if let Some(r) = right.as_mut() {
            if r.children.len() > floor {
                child.children.push(r.children.remove(0));
                child.seps.push(parent.seps[slot].clone());
                parent.seps[slot] = r.seps.remove(0);
                child.dirty = true;
                r.dirty = true;
                parent.dirty = true;
                self.stash_inner(child)?;
                if let Some(r) = right.take() {
                    self.stash_inner(r)?;
                }
                return Ok(false);
            }
        }

        let mut left = if slot > 0 {
            Some(self.load_inner(parent.children[slot - 1])?)
        } else {
            None
        };
        if let Some(l) = left.as_mut() {
            if l.children.len() > floor {
                let moved_child = l
                    .children
                    .pop()
                    .ok_or_else(|| IndexError::Storage("sibling above floor is empty".into()))?;
                let moved_sep = l
                    .seps
                    .pop()
                    .ok_or_else(|| IndexError::Storage("sibling above floor has no separator".into()))?;
                child.children.insert(0, moved_child);
                child.seps.insert(0, parent.seps[slot - 1].clone());
                parent.seps[slot - 1] = moved_sep;
                child.dirty = true;
                l.dirty = true;
                parent.dirty = true;
                if let Some(r) = right.take() {
                    self.stash_inner(r)?;
                }
                self.stash_inner(child)?;
                if let Some(l) = left.take() {
                    self.stash_inner(l)?;
                }
                return Ok(false);
            }
        }

        if let Some(mut r) = right.take() {
            if let Some(l) = left.take() {
                self.stash_inner(l)?;
            }
            child.seps.push(parent.seps[slot].clone());
            child.seps.append(&mut r.seps);
            child.children.append(&mut r.children);
            child.dirty = true;
            self.tree.free(r.addr);
            parent.children.remove(slot + 1);
            parent.seps.remove(slot);
            parent.dirty = true;
            self.stash_inner(child)?;
            return Ok(parent.children.len() < floor);
        }

        if let Some(mut l) = left.take() {
            l.seps.push(parent.seps[slot - 1].clone());
            l.seps.append(&mut child.seps);
            l.children.append(&mut child.children);
            l.dirty = true;
            self.tree.free(child.addr);
            parent.children.remove(slot);
            parent.seps.remove(slot - 1);
            parent.dirty = true;
            self.stash_inner(l)?;
            return Ok(parent.children.len() < floor);
        }

        self.stash_inner(child)?;
        Ok(false)
    }
}

/// A persistent ordered multimap backed by two page files.
///
/// The root page is pinned: held in memory for the whole session, never
/// cached, and written out on [`close`](Self::close). The first fatal I/O
/// error poisons the instance and every later call fails with
/// [`IndexError::Poisoned`].
pub struct BPlusTree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Ord + Clone + Serialize + DeserializeOwned,
{
    store: Store<K, V>,
    root: InnerPage<K, V>,
    config: TreeConfig,
    poisoned: Option<String>,
    closed: bool,
}

impl<K, V> BPlusTree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Ord + Clone + Serialize + DeserializeOwned,
{
    /// Open the index over `tree_path` (inner pages) and `data_path`
    /// (leaves), creating both files when absent. Recycler stacks live next
    /// to each file with a `.free` suffix.
    pub fn open(tree_path: &Path, data_path: &Path, config: TreeConfig) -> IndexResult<Self> {
        config.validate()?;
        let (mut tree, tree_fresh) =
            PageFile::open(tree_path, config.page_size, config.recycle_slots)?;
        let (data, data_fresh) =
            PageFile::open(data_path, config.page_size, config.recycle_slots)?;
        if tree_fresh != data_fresh {
            return Err(IndexError::Storage(
                "index files out of step: one exists without the other".into(),
            ));
        }

        let root = if tree_fresh {
            let addr = tree.allocate();
            let root = InnerPage::new(addr, ChildKind::Leaf);
            tree.write_page(addr, &root)?;
            tree.set_root(addr);
            tree.flush_header()?;
            root
        } else {
            tree.read_page(tree.root())?
        };

        let store = Store {
            tree,
            data,
            inner_cache: PageCache::new(config.cache_pages),
            leaf_cache: PageCache::new(config.cache_pages),
            branch_max: config.branch_factor,
            leaf_max: config.leaf_capacity,
        };

        Ok(Self {
            store,
            root,
            config,
            poisoned: None,
            closed: false,
        })
    }

    /// The configuration this instance was opened with.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Every value stored under `key`, in ascending order.
    pub fn find(&mut self, key: &K) -> IndexResult<Vec<V>> {
        self.guard()?;
        match self.find_values(key) {
            Ok(values) => Ok(values),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Add `(key, value)`. The pair must not already be present.
    pub fn insert(&mut self, key: K, value: V) -> IndexResult<()> {
        self.guard()?;
        match self.insert_entry(Entry::new(key, value)) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Remove `(key, value)` if present; other entries under the same key
    /// stay. Absent pairs are a silent no-op.
    pub fn erase(&mut self, key: &K, value: &V) -> IndexResult<()> {
        self.guard()?;
        let entry = Entry::new(key.clone(), value.clone());
        match self.erase_entry(&entry) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Flush the pinned root, both caches, both headers, and both recycler
    /// stacks, then consume the instance.
    ///
    /// Writes pass through the OS page cache without fsync; a crash before
    /// `close` can lose the most recent root and header mutations.
    pub fn close(mut self) -> IndexResult<()> {
        self.shutdown()
    }

    fn find_values(&mut self, key: &K) -> IndexResult<Vec<V>> {
        let mut out = Vec::new();
        if self.root.children.is_empty() {
            return Ok(out);
        }

        let mut kind = self.root.kind;
        let mut addr = self.root.children[self.root.key_slot(key)];
        while kind == ChildKind::Inner {
            let page = self.store.load_inner(addr)?;
            let next = page.children[page.key_slot(key)];
            kind = page.kind;
            self.store.stash_inner(page)?;
            addr = next;
        }

        let mut leaf = self.store.load_leaf(addr)?;
        let mut at = leaf.first_slot_for(key);
        loop {
            while at < leaf.entries.len() {
                if leaf.entries[at].key != *key {
                    self.store.stash_leaf(leaf)?;
                    return Ok(out);
                }
                out.push(leaf.entries[at].value.clone());
                at += 1;
            }
            let next = leaf.next;
            self.store.stash_leaf(leaf)?;
            match next {
                Some(n) => {
                    leaf = self.store.load_leaf(n)?;
                    at = 0;
                }
                None => return Ok(out),
            }
        }
    }

    fn insert_entry(&mut self, entry: Entry<K, V>) -> IndexResult<()> {
        if self.root.children.is_empty() {
            // first insert: install a single leaf under the root, with no
            // separator yet
            let addr = self.store.data.allocate();
            let mut leaf = LeafPage::new(addr);
            leaf.entries.push(entry);
            leaf.dirty = true;
            self.store.stash_leaf(leaf)?;
            self.root.children.push(addr);
            self.root.dirty = true;
            return Ok(());
        }
        if self.store.insert_into(&mut self.root, entry)? {
            self.split_root()?;
        }
        Ok(())
    }

    /// Grow the tree by one level. Both halves of the old root move to
    /// freshly allocated pages and the pinned root is rewritten in place as
    /// their parent, at a fresh address of its own; the old root address is
    /// recycled and the header follows the new one.
    fn split_root(&mut self) -> IndexResult<()> {
        let half = self.root.children.len() / 2;
        let right_children = self.root.children.split_off(half);
        let right_seps = self.root.seps.split_off(half);
        let promoted = self
            .root
            .seps
            .pop()
            .ok_or_else(|| IndexError::Storage("root split produced an empty half".into()))?;

        let left_addr = self.store.tree.allocate();
        let right_addr = self.store.tree.allocate();
        let left = InnerPage {
            addr: left_addr,
            kind: self.root.kind,
            children: std::mem::take(&mut self.root.children),
            seps: std::mem::take(&mut self.root.seps),
            dirty: true,
        };
        let right = InnerPage {
            addr: right_addr,
            kind: left.kind,
            children: right_children,
            seps: right_seps,
            dirty: true,
        };
        self.store.stash_inner(left)?;
        self.store.stash_inner(right)?;

        let old_addr = self.root.addr;
        self.root.addr = self.store.tree.allocate();
        self.store.tree.free(old_addr);
        self.root.kind = ChildKind::Inner;
        self.root.children = vec![left_addr, right_addr];
        self.root.seps = vec![promoted];
        self.root.dirty = true;
        self.store.tree.set_root(self.root.addr);
        Ok(())
    }

    fn erase_entry(&mut self, entry: &Entry<K, V>) -> IndexResult<()> {
        if self.root.children.is_empty() {
            return Ok(());
        }
        self.store.erase_from(&mut self.root, entry)?;
        // the root has no occupancy floor; it only shrinks when a branch
        // root is left with a single child, by adopting that child
        if self.root.kind == ChildKind::Inner && self.root.children.len() == 1 {
            let child_addr = self.root.children[0];
            let child = self.store.load_inner(child_addr)?;
            self.root.kind = child.kind;
            self.root.children = child.children;
            self.root.seps = child.seps;
            self.root.dirty = true;
            self.store.tree.free(child_addr);
        }
        Ok(())
    }

    fn guard(&self) -> IndexResult<()> {
        match &self.poisoned {
            Some(msg) => Err(IndexError::Poisoned(msg.clone())),
            None => Ok(()),
        }
    }

    fn poison(&mut self, err: IndexError) -> IndexError {
        if self.poisoned.is_none() {
            self.poisoned = Some(err.to_string());
        }
        err
    }

    fn shutdown(&mut self) -> IndexResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.store.tree.write_page(self.root.addr, &self.root)?;
        self.store.inner_cache.flush(&mut self.store.tree)?;
        self.store.leaf_cache.flush(&mut self.store.data)?;
        self.store.tree.set_root(self.root.addr);
        self.store.tree.close()?;
        self.store.data.close()?;
        Ok(())
    }
}

impl<K, V> Drop for BPlusTree<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Ord + Clone + Serialize + DeserializeOwned,
{
    fn drop(&mut self) {
        // best effort: close() is the fallible path
        let _ = self.shutdown();
    }
}
