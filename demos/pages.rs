//! Walks through page growth, block reuse, coalescing and page reclamation.
//! Run with `RUST_LOG=trace` to see every split and merge.

use pagealloc::{AllocError, MemAlloc, PAGE_CAPACITY};

fn main() -> Result<(), AllocError> {
    env_logger::init();

    let mut allocator = MemAlloc::with_page_limit(4);

    let block1 = allocator.allocate(100)?;
    let block2 = allocator.allocate(50)?;
    println!("{block1:?} {block2:?}");

    println!("Deallocating block1");
    unsafe { allocator.release(block1) };

    let block3 = allocator.allocate(64)?;
    println!("Should be first addr {block3:?}");

    let whole = allocator.allocate(PAGE_CAPACITY)?;
    println!("Pages in use: {}", allocator.page_count());

    match allocator.allocate(PAGE_CAPACITY + 1) {
        Err(err) => println!("Rejected: {err}"),
        Ok(addr) => println!("Unexpectedly got {addr:?}"),
    }

    unsafe {
        allocator.release(whole);
        allocator.release(block3);
        allocator.release(block2);
    }

    println!(
        "Pages in use: {}, pages mapped overall: {}",
        allocator.page_count(),
        allocator.provider().acquired()
    );
    println!("{allocator}");

    Ok(())
}
