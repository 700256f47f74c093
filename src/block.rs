use std::{fmt, mem, num::NonZeroU32};

/// Header size of a block. Every page starts with one of these and every split
/// writes another one right after the payload it carves off.
pub const HEADER_SIZE: usize = mem::size_of::<Header>();

/// Bit of the packed size field that tells whether the block is allocated.
const ALLOCATED_BIT: usize = 1;

/// Size and allocation state of a block.
///
/// Payload sizes are always a multiple of [`crate::WORD_SIZE`], so the lowest
/// bit of the size is never needed to store the size itself. The header keeps
/// both values in a single word by folding the flag into that bit:
///
/// ```text
///  63                                   1   0
/// +---------------------------------------+---+
/// |             payload size              | A |
/// +---------------------------------------+---+
/// ```
///
/// The packed word is only ever touched through [`SizeField::encode`] and
/// [`SizeField::decode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeField {
    /// Payload capacity in bytes.
    pub size: usize,
    /// Whether the block is handed out to a caller.
    pub allocated: bool,
}

impl SizeField {
    #[inline]
    pub const fn free(size: usize) -> Self {
        Self { size, allocated: false }
    }

    #[inline]
    pub const fn allocated(size: usize) -> Self {
        Self { size, allocated: true }
    }

    /// Packs the size and the flag into the word stored in a [`Header`].
    #[inline]
    pub fn encode(self) -> usize {
        debug_assert!(self.size & ALLOCATED_BIT == 0, "odd payload size {}", self.size);

        self.size | self.allocated as usize
    }

    /// Unpacks a word previously produced by [`SizeField::encode`].
    #[inline]
    pub const fn decode(raw: usize) -> Self {
        Self {
            size: raw & !ALLOCATED_BIT,
            allocated: raw & ALLOCATED_BIT == ALLOCATED_BIT,
        }
    }
}

/// Slot of a mapped page inside the allocator's page arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageId(NonZeroU32);

impl PageId {
    #[inline]
    pub(crate) fn from_slot(slot: usize) -> Self {
        Self(NonZeroU32::MIN.saturating_add(slot as u32))
    }

    #[inline]
    pub(crate) fn slot(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Handle to a block: the page it lives in and the offset of its header
/// within that page.
///
/// Links between blocks are stored as these handles instead of raw addresses,
/// so following a link always goes through the page arena and is bounds checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId {
    page: PageId,
    offset: u32,
}

impl BlockId {
    #[inline]
    pub(crate) fn new(page: PageId, offset: usize) -> Self {
        debug_assert!(offset < crate::PAGE_SIZE);

        Self { page, offset: offset as u32 }
    }

    /// The block that starts every page.
    #[inline]
    pub(crate) fn first(page: PageId) -> Self {
        Self::new(page, 0)
    }

    #[inline]
    pub fn page(self) -> PageId {
        self.page
    }

    /// Offset of the header from the start of its page.
    #[inline]
    pub fn offset(self) -> usize {
        self.offset as usize
    }

    /// Whether both blocks live in the same page. Only then can they be
    /// physically adjacent, list order alone doesn't tell.
    #[inline]
    pub fn same_page(self, other: BlockId) -> bool {
        self.page == other.page
    }
}

/// Link to another block of the list.
pub(crate) type Link = Option<BlockId>;

/// This is the structure of a block header. Content is placed right after it.
///
/// ```text
/// +---------------------+ <------+
/// |   size | allocated  |        |
/// +---------------------+        |
/// |        next         |        | -> Header
/// +---------------------+        |
/// |      previous       |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Payload, `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// The header is aligned to the word size so the payload following it is too.
#[repr(C, align(8))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Header {
    /// Packed [`SizeField`].
    size: usize,
    /// Next block in the list.
    pub next: Link,
    /// Previous block in the list.
    pub prev: Link,
}

impl Header {
    /// A free, unlinked header with `size` bytes of payload.
    pub fn free(size: usize) -> Self {
        Self {
            size: SizeField::free(size).encode(),
            next: None,
            prev: None,
        }
    }

    #[inline]
    pub fn field(&self) -> SizeField {
        SizeField::decode(self.size)
    }

    #[inline]
    pub fn is_allocated(&self) -> bool {
        self.field().allocated
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        !self.is_allocated()
    }

    /// Payload size with the allocation bit removed.
    #[inline]
    pub fn decoded_size(&self) -> usize {
        self.field().size
    }

    /// Changes the payload size, keeping the allocation state.
    #[inline]
    pub fn set_size(&mut self, size: usize) {
        self.size = SizeField { size, ..self.field() }.encode();
    }

    pub fn mark_allocated(&mut self) {
        debug_assert!(self.is_free(), "block is already allocated");
        self.size = SizeField::allocated(self.decoded_size()).encode();
    }

    pub fn mark_free(&mut self) {
        debug_assert!(self.is_allocated(), "block is already free");
        self.size = SizeField::free(self.decoded_size()).encode();
    }
}

/// Read-only snapshot of one block, as seen by [`crate::MemAlloc::blocks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    /// Address of the header.
    pub address: usize,
    /// Address handed out to callers.
    pub payload: usize,
    /// Decoded payload size.
    pub size: usize,
    pub allocated: bool,
    pub next: Option<BlockId>,
    pub previous: Option<BlockId>,
}

impl BlockInfo {
    /// End of the payload, exclusive.
    #[inline]
    pub fn end(&self) -> usize {
        self.payload + self.size
    }
}

impl fmt::Display for BlockInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\tAddr: {:#x}", self.address)?;
        writeln!(f, "\tSize: {}", self.size)?;
        writeln!(f, "\tState: {}", if self.allocated { "allocated" } else { "free" })?;
        writeln!(f, "\tNext: {:?}", self.next)?;
        write!(f, "\tPrev: {:?}", self.previous)
    }
}
