use std::ptr::NonNull;

use pagealloc::MemAlloc;

fn log_alloc(addr: NonNull<u8>, size: usize) {
    println!("Requested {size} bytes of memory");
    println!("Received this address: {addr:?}");
}

fn main() {
    env_logger::init();

    let mut allocator = MemAlloc::new();

    let sizes = [8, 8, 16];
    let mut addresses = Vec::new();

    for size in sizes {
        match allocator.allocate(size) {
            Ok(addr) => {
                log_alloc(addr, size);
                addresses.push(addr);
            }
            Err(err) => eprintln!("allocation of {size} bytes failed: {err}"),
        }
    }

    println!("{allocator}");
    for block in allocator.blocks() {
        println!("{block}");
    }

    for addr in addresses {
        unsafe { allocator.release(addr) };
    }

    println!("{allocator}");
}
