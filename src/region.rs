use std::{collections::BTreeMap, ptr::NonNull};

use log::trace;

use crate::{
    block::{BlockId, BlockInfo, HEADER_SIZE, Header, PageId},
    freelist::FreeList,
    utils::page_base,
    PAGE_SIZE, WORD_SIZE,
};

/// One page mapped by the [`crate::kernel::PageProvider`].
///
/// A region is exactly [`PAGE_SIZE`] bytes and always starts with a block
/// header. Blocks are laid out back to back until the end of the page:
///
/// ```text
/// +--------------------------------------------------------+
/// | Header | Payload | Header | Payload | Header | Payload |
/// +--------------------------------------------------------+
/// ^ base                                        base + PAGE_SIZE ^
/// ```
///
/// The region doesn't own the blocks in any Rust sense, it only owns the
/// mapping they live in.
#[derive(Debug)]
struct Region {
    base: NonNull<u8>,
}

/// Arena of every page the allocator currently holds.
///
/// Pages are addressed by [`PageId`] (a slot in `slots`) and blocks by
/// [`BlockId`]. Every header access resolves the handle here first, so a stale
/// or corrupted handle panics instead of reading some random address.
#[derive(Debug, Default)]
pub(crate) struct Regions {
    slots: Vec<Option<Region>>,
    /// Slots freed by released pages, reused before growing `slots`.
    vacant: Vec<usize>,
    /// Page base address to slot, used to go from a payload pointer back to its block.
    by_base: BTreeMap<usize, PageId>,
}

impl Regions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pages currently held.
    #[inline]
    pub fn len(&self) -> usize {
        self.by_base.len()
    }

    /// Registers a freshly mapped page.
    pub fn insert(&mut self, base: NonNull<u8>) -> PageId {
        debug_assert_eq!(0, base.as_ptr().addr() % PAGE_SIZE, "page at {base:p} is not aligned");

        let region = Some(Region { base });
        let page = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = region;
                PageId::from_slot(slot)
            }
            None => {
                self.slots.push(region);
                PageId::from_slot(self.slots.len() - 1)
            }
        };

        self.by_base.insert(base.as_ptr().addr(), page);

        page
    }

    /// Forgets about `page`, returning its base so it can be unmapped.
    pub fn remove(&mut self, page: PageId) -> Option<NonNull<u8>> {
        let region = self.slots.get_mut(page.slot())?.take()?;

        self.vacant.push(page.slot());
        self.by_base.remove(&region.base.as_ptr().addr());

        Some(region.base)
    }

    /// Bases of every page held, in address order.
    pub fn bases(&self) -> impl Iterator<Item = NonNull<u8>> + '_ {
        self.by_base.values().filter_map(|page| self.base(*page))
    }

    #[inline]
    fn base(&self, page: PageId) -> Option<NonNull<u8>> {
        self.slots.get(page.slot())?.as_ref().map(|region| region.base)
    }

    /// Recovers the block whose payload starts at `payload`.
    ///
    /// The header sits right before the payload and both always live in the
    /// same page, so masking the header address gives us the page base. Returns
    /// `None` if that page is not one of ours.
    pub fn header_of(&self, payload: NonNull<u8>) -> Option<BlockId> {
        let header = payload.as_ptr().addr().checked_sub(HEADER_SIZE)?;
        let base = page_base(header);
        let page = *self.by_base.get(&base)?;

        Some(BlockId::new(page, header - base))
    }

    fn header_ptr(&self, block: BlockId) -> NonNull<Header> {
        let offset = block.offset();
        assert!(
            offset % WORD_SIZE == 0 && offset + HEADER_SIZE <= PAGE_SIZE,
            "{block:?} does not fit in a page"
        );

        let Some(base) = self.base(block.page()) else {
            panic!("{block:?} refers to a page that is not mapped");
        };

        // Safety: the offset was checked to keep the whole header inside the page.
        unsafe { base.add(offset).cast() }
    }

    pub fn header(&self, block: BlockId) -> &Header {
        // Safety: the page is mapped for as long as it is in the arena and the
        // allocator is the only one writing headers.
        unsafe { self.header_ptr(block).as_ref() }
    }

    pub fn header_mut(&mut self, block: BlockId) -> &mut Header {
        unsafe { self.header_ptr(block).as_mut() }
    }

    /// Writes a brand new header for `block`, overwriting whatever was there.
    pub fn write_header(&mut self, block: BlockId, header: Header) {
        unsafe { self.header_ptr(block).write(header) }
    }

    /// Address right after the header of `block`.
    pub fn payload(&self, block: BlockId) -> NonNull<u8> {
        unsafe { self.header_ptr(block).cast::<u8>().add(HEADER_SIZE) }
    }

    pub fn info(&self, block: BlockId) -> BlockInfo {
        let header = self.header(block);
        let address = self.header_ptr(block).as_ptr().addr();

        BlockInfo {
            id: block,
            address,
            payload: address + HEADER_SIZE,
            size: header.decoded_size(),
            allocated: header.is_allocated(),
            next: header.next,
            previous: header.prev,
        }
    }

    /// Tries to merge the given block `node` with the next one on the
    /// list. This can be performed if that next block is free and in the same page.
    pub(crate) fn merge_with_next(&mut self, node: BlockId, free_list: &mut FreeList) {
        let Some(next) = self.header(node).next else {
            return;
        };

        if !node.same_page(next) || self.header(next).is_allocated() {
            return;
        }

        let absorbed = HEADER_SIZE + self.header(next).decoded_size();
        debug_assert_eq!(node.offset() + HEADER_SIZE + self.header(node).decoded_size(), next.offset());

        // We remove the block from the list since it is going to be merged
        free_list.blocks.remove(self, next);

        let header = self.header_mut(node);
        header.set_size(header.decoded_size() + absorbed);

        trace!("merged {next:?} into {node:?}");
    }

    /// Tries to merge the given block `node` with the previous one on the list.
    /// This can be performed if that previous block is free and in the same page.
    ///
    /// Returns the block that now holds `node`'s bytes: the previous one if the
    /// merge happened, `node` otherwise.
    pub(crate) fn merge_with_prev(&mut self, node: BlockId, free_list: &mut FreeList) -> BlockId {
        let Some(prev) = self.header(node).prev else {
            return node;
        };

        if !node.same_page(prev) || self.header(prev).is_allocated() {
            return node;
        }

        let absorbed = HEADER_SIZE + self.header(node).decoded_size();
        free_list.blocks.remove(self, node);

        let header = self.header_mut(prev);
        header.set_size(header.decoded_size() + absorbed);

        trace!("merged {node:?} into {prev:?}");

        // The current block is now its previous one
        prev
    }
}
