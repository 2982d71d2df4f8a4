use super::*;
use tempfile::tempdir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ScratchPage {
    addr: PageAddr,
    payload: Vec<u32>,
}

#[test]
fn fresh_file_gets_header_and_sequential_pages() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.idx");

    let (mut store, fresh) = PageFile::open(&path, 256, 8).unwrap();
    assert!(fresh);
    assert_eq!(store.root(), PageAddr(HEADER_LEN));

    let a = store.allocate();
    let b = store.allocate();
    assert_eq!(a, PageAddr(HEADER_LEN));
    assert_eq!(b, PageAddr(HEADER_LEN + 256));
    assert_eq!(store.end(), HEADER_LEN + 512);
}

#[test]
fn page_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.idx");
    let (mut store, _) = PageFile::open(&path, 256, 8).unwrap();

    let addr = store.allocate();
    let page = ScratchPage { addr, payload: vec![7, 8, 9] };
    store.write_page(addr, &page).unwrap();

    let read: ScratchPage = store.read_page(addr).unwrap();
    assert_eq!(read, page);
}

#[test]
fn oversized_page_image_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.idx");
    let (mut store, _) = PageFile::open(&path, 64, 8).unwrap();

    let addr = store.allocate();
    let page = ScratchPage { addr, payload: vec![0; 64] };
    let err = store.write_page(addr, &page).unwrap_err();
    assert!(matches!(err, IndexError::Storage(_)));
}

#[test]
fn header_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.idx");

    {
        let (mut store, _) = PageFile::open(&path, 256, 8).unwrap();
        store.allocate();
        store.allocate();
        store.set_root(PageAddr(HEADER_LEN + 256));
        store.close().unwrap();
    }

    let (store, fresh) = PageFile::open(&path, 256, 8).unwrap();
    assert!(!fresh);
    assert_eq!(store.root(), PageAddr(HEADER_LEN + 256));
    assert_eq!(store.end(), HEADER_LEN + 512);
}

#[test]
fn freed_addresses_are_reused_lifo() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.idx");
    let (mut store, _) = PageFile::open(&path, 256, 8).unwrap();

    let a = store.allocate();
    let b = store.allocate();
    let end = store.end();

    store.free(a);
    store.free(b);
    assert_eq!(store.allocate(), b);
    assert_eq!(store.allocate(), a);
    // recycled allocations do not extend the file
    assert_eq!(store.end(), end);
}

#[test]
fn free_stack_persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pages.idx");

    {
        let (mut store, _) = PageFile::open(&path, 256, 8).unwrap();
        let a = store.allocate();
        store.allocate();
        store.free(a);
        store.close().unwrap();
    }

    let (mut store, _) = PageFile::open(&path, 256, 8).unwrap();
    assert_eq!(store.allocate(), PageAddr(HEADER_LEN));
}

#[test]
fn full_stack_drops_pushes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stack.free");
    let mut stack = FreeStack::open(&path, 2).unwrap();

    stack.push(PageAddr(16));
    stack.push(PageAddr(32));
    stack.push(PageAddr(48)); // dropped, stack is full
    assert_eq!(stack.len(), 2);
    assert_eq!(stack.pop(), Some(PageAddr(32)));
    assert_eq!(stack.pop(), Some(PageAddr(16)));
    assert_eq!(stack.pop(), None);
}
