//! Page-backed free-list allocator.
//!
//! Memory comes straight from the operating system one page at a time and is
//! handed out in word aligned blocks carved from those pages:
//!
//! ```text
//! +--------------------------------+
//! | Header   | Actual memory block |
//! +--------------------------------+
//! ```
//!
//! Every allocated block has an associated header with metadata that precedes
//! the actual memory block. The returned pointer is at the start of the memory
//! block, the header is recovered from it on release.
//!
//! Blocks of every page live in a single doubly linked list. Allocation walks it
//! looking for the first free block big enough ([`MemAlloc::allocate`]), mapping
//! a new page when none fits and splitting the block it picked. Release merges a
//! block with its free neighbours in the same page and unmaps the page once it
//! is a single free block again ([`MemAlloc::release`]).
//!
//! Limits: a single request can't be larger than [`PAGE_CAPACITY`], payloads
//! are only aligned to [`WORD_SIZE`] and nothing here is thread safe.

mod block;
mod error;
mod freelist;
pub mod kernel;
mod list;
mod memalloc;
mod region;
mod utils;

pub use block::{BlockId, BlockInfo, HEADER_SIZE, PageId, SizeField};
pub use error::{AllocError, AllocResult};
pub use kernel::{BoundedPages, OsPages, PageProvider};
pub use memalloc::MemAlloc;

/// Size of the pages requested from the [`PageProvider`].
pub const PAGE_SIZE: usize = 4096;

/// Every payload size is a multiple of this.
pub const WORD_SIZE: usize = 8;

/// Largest payload a single block can hold: a whole page minus its header.
pub const PAGE_CAPACITY: usize = PAGE_SIZE - HEADER_SIZE;
