use std::{fmt, ptr::NonNull};

use log::{error, trace};

use crate::{
    block::{BlockId, BlockInfo},
    freelist::FreeList,
    kernel::{BoundedPages, OsPages, PageProvider},
    region::Regions,
    utils::align,
    AllocError, AllocResult, PAGE_CAPACITY, WORD_SIZE,
};

/// Page-backed free-list allocator.
///
/// Memory is taken from a [`PageProvider`] one [`crate::PAGE_SIZE`] page at a
/// time. Each page starts out as a single free block; allocations split blocks,
/// releases merge them back together, and a page whose blocks all merged into
/// one again is handed back to the provider.
///
/// Every instance owns its own list and pages, nothing is global. The allocator
/// is not thread safe: callers that share one must serialize access themselves.
///
/// ```no_run
/// use pagealloc::MemAlloc;
///
/// let mut allocator = MemAlloc::new();
/// let addr = allocator.allocate(100).unwrap();
///
/// unsafe {
///     addr.as_ptr().write_bytes(0xAB, 100);
///     allocator.release(addr);
/// }
/// ```
pub struct MemAlloc<P: PageProvider = OsPages> {
    provider: P,
    /// Every page we hold, and the way to reach the headers inside them.
    regions: Regions,
    /// Every block of every page, in page then address order.
    free_list: FreeList,
}

impl MemAlloc<OsPages> {
    /// Creates an allocator that maps pages straight from the OS.
    /// No page is mapped until the first allocation.
    pub fn new() -> Self {
        Self::with_provider(OsPages::new())
    }
}

impl Default for MemAlloc<OsPages> {
    fn default() -> Self {
        Self::new()
    }
}

impl MemAlloc<BoundedPages<OsPages>> {
    /// Creates an allocator that never keeps more than `max_pages` pages mapped.
    pub fn with_page_limit(max_pages: usize) -> Self {
        Self::with_provider(BoundedPages::new(OsPages::new(), max_pages))
    }
}

impl<P: PageProvider> MemAlloc<P> {
    pub fn with_provider(provider: P) -> Self {
        Self {
            provider,
            regions: Regions::new(),
            free_list: FreeList::new(),
        }
    }

    /// Returns a pointer to `requested_bytes` bytes of word aligned memory.
    ///
    /// Requests are rounded up to a multiple of [`WORD_SIZE`], with zero bytes
    /// counting as one word. Anything larger than [`PAGE_CAPACITY`] is rejected
    /// with [`AllocError::RequestTooLarge`] before touching any state.
    pub fn allocate(&mut self, requested_bytes: usize) -> AllocResult<NonNull<u8>> {
        if requested_bytes > PAGE_CAPACITY {
            return Err(AllocError::RequestTooLarge {
                requested: requested_bytes,
                capacity: PAGE_CAPACITY,
            });
        }

        let size = align(requested_bytes.max(1), WORD_SIZE);

        // An empty list is just a list without a fit, so this also covers the
        // very first allocation.
        let block = match self.free_list.find_free_block(&self.regions, size) {
            Some(block) => block,
            None => self.allocate_new_region()?,
        };

        self.free_list.split_block(&mut self.regions, block, size);
        self.regions.header_mut(block).mark_allocated();

        let payload = self.regions.payload(block);
        trace!("allocated {size} bytes at {payload:p} for a {requested_bytes} byte request");

        Ok(payload)
    }

    /// Maps a new page and links its only block at the tail of the list.
    ///
    /// The page is only registered once the provider handed it over, so a
    /// failure leaves nothing behind.
    fn allocate_new_region(&mut self) -> AllocResult<BlockId> {
        let base = self.provider.acquire_page()?;
        let page = self.regions.insert(base);

        Ok(self.free_list.append_region(&mut self.regions, page))
    }

    /// Gives the memory at `payload` back to the allocator.
    ///
    /// The block is merged with its free neighbours in the same page, next one
    /// first, so a free - released - free run ends up as a single block. If that
    /// leaves a block spanning its whole page, the page is returned to the
    /// provider.
    ///
    /// A pointer into a page this allocator doesn't hold is logged and ignored.
    ///
    /// # Safety
    ///
    /// `payload` must have been returned by [`MemAlloc::allocate`] on this
    /// allocator and not released since. It must not be used afterwards.
    pub unsafe fn release(&mut self, payload: NonNull<u8>) {
        let Some(block) = self.regions.header_of(payload) else {
            error!("release of {payload:p}, which was not allocated here");
            return;
        };

        self.regions.header_mut(block).mark_free();

        self.regions.merge_with_next(block, &mut self.free_list);
        let block = self.regions.merge_with_prev(block, &mut self.free_list);

        trace!("released {payload:p}");

        if self.regions.header(block).decoded_size() == PAGE_CAPACITY {
            self.release_region(block);
        }
    }

    /// Unlinks the block covering a whole page and unmaps that page.
    fn release_region(&mut self, block: BlockId) {
        self.free_list.blocks.remove(&mut self.regions, block);

        if let Some(base) = self.regions.remove(block.page()) {
            // Safety: the base came from our provider and the page is no longer
            // reachable from the list.
            unsafe { self.provider.release_page(base) };
        }
    }

    /// Snapshot of every block in list order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.free_list
            .blocks
            .iter(&self.regions)
            .map(|block| self.regions.info(block))
    }

    /// Number of blocks in the list, free or allocated.
    pub fn block_count(&self) -> usize {
        self.free_list.blocks.len()
    }

    /// Number of pages currently mapped.
    pub fn page_count(&self) -> usize {
        self.regions.len()
    }

    /// Sum of the payload sizes of every free block.
    pub fn free_capacity(&self) -> usize {
        self.blocks().filter(|block| !block.allocated).map(|block| block.size).sum()
    }

    /// Sum of the payload sizes of every allocated block.
    pub fn allocated_bytes(&self) -> usize {
        self.blocks().filter(|block| block.allocated).map(|block| block.size).sum()
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }
}

impl<P: PageProvider> Drop for MemAlloc<P> {
    fn drop(&mut self) {
        let bases: Vec<_> = self.regions.bases().collect();

        for base in bases {
            // Safety: every base in the arena came from our provider, and the
            // allocator is going away along with every pointer it handed out.
            unsafe { self.provider.release_page(base) };
        }
    }
}

impl<P: PageProvider> fmt::Display for MemAlloc<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.free_list.is_empty() {
            return write!(f, "(Empty list.)");
        }

        for block in self.blocks() {
            write!(f, "{:#x} -> ", block.address)?;
        }

        Ok(())
    }
}

impl<P: PageProvider + fmt::Debug> fmt::Debug for MemAlloc<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemAlloc")
            .field("provider", &self.provider)
            .field("pages", &self.page_count())
            .field("blocks", &self.blocks().collect::<Vec<_>>())
            .finish()
    }
}
