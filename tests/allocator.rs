use std::{collections::BTreeMap, ptr::NonNull};

use pagealloc::{
    AllocError, BlockInfo, BoundedPages, HEADER_SIZE, MemAlloc, OsPages, PAGE_CAPACITY, PAGE_SIZE, PageProvider,
    WORD_SIZE,
};
use pretty_assertions::assert_eq;
use proptest::{prelude::*, sample::Index};

type Allocator = MemAlloc<BoundedPages<OsPages>>;

fn allocator() -> Allocator {
    MemAlloc::with_page_limit(256)
}

fn sizes<P: PageProvider>(allocator: &MemAlloc<P>) -> Vec<(usize, bool)> {
    allocator.blocks().map(|block| (block.size, block.allocated)).collect()
}

/// Checks the structure every operation must preserve: links agree in both
/// directions, each page is tiled by its blocks exactly, and no two free blocks
/// of the same page sit next to each other.
fn assert_consistent<P: PageProvider>(allocator: &MemAlloc<P>) {
    let blocks: Vec<BlockInfo> = allocator.blocks().collect();

    for pair in blocks.windows(2) {
        assert_eq!(Some(pair[1].id), pair[0].next);
        assert_eq!(Some(pair[0].id), pair[1].previous);
    }
    if let (Some(first), Some(last)) = (blocks.first(), blocks.last()) {
        assert_eq!(None, first.previous);
        assert_eq!(None, last.next);
    }

    let mut pages: BTreeMap<_, Vec<&BlockInfo>> = BTreeMap::new();
    for block in &blocks {
        assert_eq!(0, block.size % WORD_SIZE);
        assert_eq!(0, block.payload % WORD_SIZE);
        pages.entry(block.id.page()).or_default().push(block);
    }

    assert_eq!(allocator.page_count(), pages.len());

    for page in pages.values() {
        assert_eq!(0, page[0].id.offset());

        let mut offset = 0;
        for block in page {
            assert_eq!(offset, block.id.offset());
            offset += HEADER_SIZE + block.size;
        }
        assert_eq!(PAGE_SIZE, offset);

        for pair in page.windows(2) {
            assert!(pair[0].allocated || pair[1].allocated, "adjacent free blocks left unmerged");
        }
    }
}

#[test]
fn concrete_scenario_reclaims_page() {
    let mut allocator = allocator();

    let first = allocator.allocate(100).unwrap();
    let second = allocator.allocate(50).unwrap();
    assert_eq!(1, allocator.page_count());

    unsafe { allocator.release(first) };

    let freed = allocator.blocks().next().unwrap();
    assert!(!freed.allocated);
    assert!(freed.size >= 100);
    assert_eq!(first.as_ptr().addr(), freed.payload);
    assert_eq!(3, allocator.block_count());

    unsafe { allocator.release(second) };

    assert_eq!(0, allocator.page_count());
    assert_eq!(0, allocator.block_count());
    assert_eq!(1, allocator.provider().acquired());
    assert_eq!(1, allocator.provider().released());
}

#[test]
fn coalescing_absorbs_both_sides() {
    let mut allocator = allocator();

    let a = allocator.allocate(40).unwrap();
    let b = allocator.allocate(200).unwrap();
    let c = allocator.allocate(72).unwrap();
    let _keep = allocator.allocate(16).unwrap();

    unsafe {
        allocator.release(a);
        allocator.release(c);
    }
    assert_eq!(vec![(40, false), (200, true), (72, false), (16, true)], sizes(&allocator)[..4].to_vec());

    unsafe { allocator.release(b) };

    assert_eq!((40 + 200 + 72 + 2 * HEADER_SIZE, false), sizes(&allocator)[0]);
    assert_consistent(&allocator);
}

#[test]
fn page_growth_adds_capacity() {
    let mut allocator = allocator();

    for _ in 0..5 {
        allocator.allocate(1000).unwrap();
    }

    assert!(allocator.page_count() > 1);
    let total: usize = allocator.blocks().map(|block| HEADER_SIZE + block.size).sum();
    assert!(total > PAGE_SIZE);
    assert_eq!(allocator.page_count(), allocator.provider().live());
    assert_consistent(&allocator);
}

#[test]
fn new_pages_are_appended_at_tail() {
    let mut allocator = allocator();

    allocator.allocate(PAGE_CAPACITY).unwrap();
    allocator.allocate(PAGE_CAPACITY).unwrap();

    let blocks: Vec<_> = allocator.blocks().collect();
    assert_eq!(2, blocks.len());
    assert!(!blocks[0].id.same_page(blocks[1].id));
    assert_eq!(Some(blocks[0].id), blocks[1].previous);
}

#[test]
fn oversized_request_does_not_touch_list() {
    let mut allocator = allocator();
    allocator.allocate(128).unwrap();
    let before: Vec<_> = allocator.blocks().collect();

    let err = allocator.allocate(PAGE_CAPACITY + 1).unwrap_err();

    assert_eq!(
        AllocError::RequestTooLarge {
            requested: PAGE_CAPACITY + 1,
            capacity: PAGE_CAPACITY
        },
        err
    );
    assert_eq!("requested 4073 bytes, but a page holds at most 4072 bytes", err.to_string());
    assert_eq!(before, allocator.blocks().collect::<Vec<_>>());
}

#[test]
fn out_of_memory_leaves_nothing_linked() {
    let mut allocator = MemAlloc::with_page_limit(2);

    let a = allocator.allocate(PAGE_CAPACITY).unwrap();
    allocator.allocate(3000).unwrap();
    let before: Vec<_> = allocator.blocks().collect();

    assert_eq!(Err(AllocError::OutOfMemory), allocator.allocate(2000));
    assert_eq!(before, allocator.blocks().collect::<Vec<_>>());

    // Small requests still fit the tail of the second page.
    allocator.allocate(512).unwrap();

    // Releasing a page makes room again.
    unsafe { allocator.release(a) };
    allocator.allocate(2000).unwrap();
    assert_consistent(&allocator);
}

#[test]
fn list_is_reset_after_last_page() {
    let mut allocator = allocator();

    for _ in 0..3 {
        let addr = allocator.allocate(256).unwrap();
        unsafe { allocator.release(addr) };

        assert_eq!(0, allocator.page_count());
        assert_eq!("(Empty list.)", allocator.to_string());
    }

    assert_eq!(3, allocator.provider().acquired());
}

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize),
    Release(Index),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..=PAGE_CAPACITY).prop_map(Op::Allocate),
        1 => (0..=256usize).prop_map(Op::Allocate),
        2 => any::<Index>().prop_map(Op::Release),
    ]
}

/// A live allocation and the byte pattern written into it.
struct Live {
    addr: NonNull<u8>,
    len: usize,
    fill: u8,
}

impl Live {
    fn write(&self) {
        unsafe { self.addr.as_ptr().write_bytes(self.fill, self.len) };
    }

    fn intact(&self) -> bool {
        let bytes = unsafe { std::slice::from_raw_parts(self.addr.as_ptr(), self.len) };
        bytes.iter().all(|&b| b == self.fill)
    }
}

/// Runs `ops`, returning the allocator and whatever is still allocated.
fn run(ops: &[Op]) -> (Allocator, Vec<Live>) {
    let mut allocator = allocator();
    let mut live: Vec<Live> = Vec::new();

    for (i, op) in ops.iter().enumerate() {
        match op {
            Op::Allocate(size) => {
                let addr = allocator.allocate(*size).unwrap();
                let entry = Live {
                    addr,
                    len: *size,
                    fill: i as u8,
                };
                entry.write();
                live.push(entry);
            }
            Op::Release(index) if !live.is_empty() => {
                let entry = live.swap_remove(index.index(live.len()));
                assert!(entry.intact());
                unsafe { allocator.release(entry.addr) };
            }
            Op::Release(_) => {}
        }
    }

    (allocator, live)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn payloads_never_overlap(requests in prop::collection::vec(0..=PAGE_CAPACITY, 1..24)) {
        let mut allocator = allocator();

        let mut ranges: Vec<(usize, usize)> = requests
            .iter()
            .map(|&size| {
                let start = allocator.allocate(size).unwrap().as_ptr().addr();
                (start, start + size)
            })
            .collect();
        ranges.sort();

        for pair in ranges.windows(2) {
            prop_assert!(pair[0].1 + HEADER_SIZE <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
        assert_consistent(&allocator);
    }

    #[test]
    fn allocate_then_release_round_trips(ops in prop::collection::vec(op(), 0..40), size in 0..=PAGE_CAPACITY) {
        let (mut allocator, _live) = run(&ops);

        let before: Vec<_> = allocator.blocks().collect();
        let free = allocator.free_capacity();
        let pages = allocator.page_count();

        let addr = allocator.allocate(size).unwrap();
        unsafe { allocator.release(addr) };

        prop_assert_eq!(free, allocator.free_capacity());
        prop_assert_eq!(pages, allocator.page_count());
        prop_assert_eq!(before, allocator.blocks().collect::<Vec<_>>());
    }

    #[test]
    fn interleaved_operations_keep_data_and_structure(ops in prop::collection::vec(op(), 0..80)) {
        let (allocator, live) = run(&ops);

        for entry in &live {
            prop_assert!(entry.intact());
        }
        assert_consistent(&allocator);

        let allocated: usize = live.iter().map(|entry| entry.len.max(1).next_multiple_of(WORD_SIZE)).sum();
        prop_assert!(allocator.allocated_bytes() >= allocated);
    }

    #[test]
    fn releasing_everything_unmaps_every_page(ops in prop::collection::vec(op(), 0..60)) {
        let (mut allocator, live) = run(&ops);

        for entry in live {
            unsafe { allocator.release(entry.addr) };
        }

        prop_assert_eq!(0, allocator.page_count());
        prop_assert_eq!(0, allocator.provider().live());
        prop_assert_eq!(allocator.provider().acquired(), allocator.provider().released());
    }
}
