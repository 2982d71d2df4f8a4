use super::*;
use serde::Deserialize;
use storage::HEADER_LEN;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, serde::Serialize, Deserialize)]
struct TestPage {
    addr: PageAddr,
    payload: u32,
    #[serde(skip)]
    dirty: bool,
}

impl PageImage for TestPage {
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

fn open_store(dir: &tempfile::TempDir) -> PageFile {
    let (store, _) = PageFile::open(&dir.path().join("pages.idx"), 128, 8).unwrap();
    store
}

#[test]
fn take_removes_the_page_from_the_cache() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    let mut cache: PageCache<TestPage> = PageCache::new(4);

    let addr = store.allocate();
    let page = TestPage { addr, payload: 5, dirty: false };
    cache.stash(&mut store, page).unwrap();

    let taken = cache.take(addr).unwrap();
    assert_eq!(taken.payload, 5);
    assert!(cache.take(addr).is_none(), "take hands over ownership");
}

#[test]
fn eviction_writes_dirty_pages_through() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    let mut cache: PageCache<TestPage> = PageCache::new(1);

    let a = store.allocate();
    let b = store.allocate();
    cache.stash(&mut store, TestPage { addr: a, payload: 11, dirty: true }).unwrap();
    // stashing b evicts a, which must land on disk
    cache.stash(&mut store, TestPage { addr: b, payload: 22, dirty: false }).unwrap();

    let on_disk: TestPage = store.read_page(a).unwrap();
    assert_eq!(on_disk.payload, 11);
    assert!(!on_disk.dirty, "dirty flag is transient");
}

#[test]
fn clean_evictions_do_not_touch_disk() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    let mut cache: PageCache<TestPage> = PageCache::new(1);

    let a = store.allocate();
    let b = store.allocate();
    store.write_page(a, &TestPage { addr: a, payload: 1, dirty: false }).unwrap();

    // resident image differs from disk but is clean, so eviction drops it
    cache.stash(&mut store, TestPage { addr: a, payload: 99, dirty: false }).unwrap();
    cache.stash(&mut store, TestPage { addr: b, payload: 2, dirty: false }).unwrap();

    let on_disk: TestPage = store.read_page(a).unwrap();
    assert_eq!(on_disk.payload, 1);
}

#[test]
fn flush_drains_everything() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    let mut cache: PageCache<TestPage> = PageCache::new(4);

    let mut addrs = Vec::new();
    for i in 0..3u32 {
        let addr = store.allocate();
        addrs.push(addr);
        cache.stash(&mut store, TestPage { addr, payload: i, dirty: true }).unwrap();
    }

    cache.flush(&mut store).unwrap();
    assert!(cache.is_empty());
    for (i, addr) in addrs.iter().enumerate() {
        let page: TestPage = store.read_page(*addr).unwrap();
        assert_eq!(page.payload, i as u32);
    }
}

#[test]
fn addresses_start_after_the_header() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    assert_eq!(store.allocate(), PageAddr(HEADER_LEN));
}

#[test]
#[should_panic(expected = "cache capacity must be > 0")]
fn zero_capacity_panics() {
    let _cache: PageCache<TestPage> = PageCache::new(0);
}
