use log::trace;

use crate::{
    block::{BlockId, HEADER_SIZE, Header, PageId},
    list::BlockList,
    region::Regions,
    PAGE_CAPACITY,
};

/// The list every block of the allocator belongs to, free or not.
///
/// Pages are appended at the tail as they are mapped and blocks of a page are
/// kept in address order, so all the blocks of one page sit next to each other
/// in the list:
///
/// ```text
///                    page 1                                  page 2
/// +----------------------------------------------+  +---------------------------+
/// | +-------+    +-------+    +-------+          |  | +-------+    +-------+    |
/// | | Alloc | <> | Free  | <> | Alloc | <>  ...  |<>| | Free  | <> | Alloc |    |
/// | +-------+    +-------+    +-------+          |  | +-------+    +-------+    |
/// +----------------------------------------------+  +---------------------------+
/// ```
///
/// Free blocks are told apart from allocated ones by the bit folded into their
/// size, see [`crate::block::SizeField`].
#[derive(Debug, Default)]
pub(crate) struct FreeList {
    pub blocks: BlockList,
}

impl FreeList {
    /// Creates a new empty list
    pub const fn new() -> Self {
        Self { blocks: BlockList::new() }
    }

    /// It tells whether the list holds no page at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns the first free block that can hold `size` bytes.
    ///
    /// This is first-fit: the scan goes forward from the head and stops at the
    /// first block that is big enough, no matter how much bigger it is.
    pub fn find_free_block(&self, regions: &Regions, size: usize) -> Option<BlockId> {
        self.blocks.iter(regions).find(|&block| {
            let header = regions.header(block);
            header.is_free() && header.decoded_size() >= size
        })
    }

    /// Appends the single free block covering a freshly mapped `page`.
    pub fn append_region(&mut self, regions: &mut Regions, page: PageId) -> BlockId {
        let block = BlockId::first(page);

        regions.write_header(block, Header::free(PAGE_CAPACITY));
        self.blocks.push_back(regions, block);

        block
    }

    /// Shrinks `block` down to `size` bytes if the rest is big enough to hold
    /// another block, which is then linked right after it.
    ///
    /// A leftover that can't fit a header plus at least one word of payload
    /// stays inside `block`.
    pub fn split_block(&mut self, regions: &mut Regions, block: BlockId, size: usize) {
        let available = regions.header(block).decoded_size();

        if available <= size + HEADER_SIZE {
            return;
        }

        let remainder = BlockId::new(block.page(), block.offset() + HEADER_SIZE + size);
        regions.write_header(remainder, Header::free(available - size - HEADER_SIZE));
        self.blocks.insert_after(regions, block, remainder);

        regions.header_mut(block).set_size(size);

        trace!("split {block:?} into {size} + {} bytes", available - size - HEADER_SIZE);
    }
}
