use super::*;
use storage::DiskManager;
use tempfile::tempdir;

fn heap_with_pool(path: &std::path::Path, pool_size: usize) -> (Arc<BufferPoolManager>, TableHeap) {
    let disk = DiskManager::open(path).unwrap();
    let pool = Arc::new(BufferPoolManager::new(disk, pool_size));
    let heap = TableHeap::create(Arc::clone(&pool)).unwrap();
    (pool, heap)
}

#[test]
fn two_large_records_cross_a_page() {
    // Scenario 1: pool size 2, two 3000-byte records land on pages 0 and 1.
    let dir = tempdir().unwrap();
    let (_pool, heap) = heap_with_pool(&dir.path().join("t.db"), 2);

    let rid_a = heap.insert(&vec![b'a'; 3000]).unwrap();
    let rid_b = heap.insert(&vec![b'b'; 3000]).unwrap();

    assert_eq!(rid_a.page_id, PageId(0));
    assert_eq!(rid_b.page_id, PageId(1));

    let mut iter = heap.iterator();
    assert!(iter.has_next());
    assert_eq!(iter.next().unwrap().data, vec![b'a'; 3000]);
    assert!(iter.has_next());
    assert_eq!(iter.next().unwrap().data, vec![b'b'; 3000]);
    assert!(!iter.has_next());
}

#[test]
fn tombstone_persists_across_reopen() {
    // Scenario 2.
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let (pool, first_page_id, rid_a, rid_b, rid_c) = {
        let (pool, heap) = heap_with_pool(&path, 8);
        let rid_a = heap.insert(&[b'a'; 100]).unwrap();
        let rid_b = heap.insert(&[b'b'; 100]).unwrap();
        let rid_c = heap.insert(&[b'c'; 100]).unwrap();
        assert!(heap.mark_deleted(rid_b));

        let mut iter = heap.iterator();
        assert_eq!(iter.next().unwrap().data, vec![b'a'; 100]);
        assert_eq!(iter.next().unwrap().data, vec![b'c'; 100]);
        assert!(!iter.has_next());

        (pool, heap.first_page_id(), rid_a, rid_b, rid_c)
    };
    pool.close().unwrap();

    let reopened = TableHeap::open(pool, first_page_id).unwrap();
    assert!(reopened.get(rid_a).is_some());
    assert!(reopened.get(rid_b).is_none());
    assert!(reopened.get(rid_c).is_some());
}

#[test]
fn in_place_update_persists_across_reopen() {
    // Scenario 3.
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let (pool, first_page_id, rid) = {
        let (pool, heap) = heap_with_pool(&path, 8);
        let rid = heap.insert(&[b'x'; 200]).unwrap();
        assert!(heap.update(rid, &[b'z'; 50]));
        (pool, heap.first_page_id(), rid)
    };
    pool.close().unwrap();

    let reopened = TableHeap::open(pool, first_page_id).unwrap();
    assert_eq!(reopened.get(rid).unwrap().data, vec![b'z'; 50]);
}

#[test]
fn slot_ids_are_not_reused_after_delete_within_a_page() {
    // Scenario 4.
    let dir = tempdir().unwrap();
    let (_pool, heap) = heap_with_pool(&dir.path().join("t.db"), 4);

    let rid_a = heap.insert(b"aaa").unwrap();
    assert!(heap.mark_deleted(rid_a));
    let rid_b = heap.insert(b"bbb").unwrap();

    assert_eq!(rid_b.page_id, rid_a.page_id);
    assert_eq!(rid_b.slot_id, rid_a.slot_id + 1);
}

#[test]
fn update_larger_than_original_fails_without_mutation() {
    // Scenario 7.
    let dir = tempdir().unwrap();
    let (_pool, heap) = heap_with_pool(&dir.path().join("t.db"), 4);

    let rid = heap.insert(b"abc").unwrap();
    assert!(!heap.update(rid, b"abcd"));
    assert_eq!(heap.get(rid).unwrap().data, b"abc");
}

#[test]
fn oversized_insert_is_rejected() {
    // Scenario 8.
    let dir = tempdir().unwrap();
    let (_pool, heap) = heap_with_pool(&dir.path().join("t.db"), 4);

    let err = heap.insert(&vec![0u8; storage::PAGE_SIZE]).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
}

#[test]
fn get_on_missing_rid_returns_none() {
    let dir = tempdir().unwrap();
    let (_pool, heap) = heap_with_pool(&dir.path().join("t.db"), 4);
    heap.insert(b"hello").unwrap();

    assert!(heap.get(RecordId::new(PageId(0), 99)).is_none());
}

#[test]
fn iterator_next_past_exhaustion_raises_no_such_element() {
    let dir = tempdir().unwrap();
    let (_pool, heap) = heap_with_pool(&dir.path().join("t.db"), 4);
    heap.insert(b"only").unwrap();

    let mut iter = heap.iterator();
    assert!(iter.next().is_ok());
    let err = iter.next().unwrap_err();
    assert!(matches!(err, DbError::NoSuchElement));
}

#[test]
fn reopen_on_a_fresh_single_page_heap_finds_last_page_id() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("t.db");
    let (pool, first_page_id) = {
        let (pool, heap) = heap_with_pool(&path, 4);
        heap.insert(b"row").unwrap();
        (pool, heap.first_page_id())
    };
    pool.close().unwrap();

    let reopened = TableHeap::open(Arc::clone(&pool), first_page_id).unwrap();
    // A second insert must land on the same page: there was never an overflow.
    let rid = reopened.insert(b"another").unwrap();
    assert_eq!(rid.page_id, first_page_id);
}
