use crate::{
    block::{BlockId, Link},
    region::Regions,
};

/// Doubly linked list of blocks.
///
/// The links live inside the block headers themselves, so the list only keeps
/// its ends. It never allocates: every operation goes through [`Regions`] to
/// reach the headers it has to relink.
///
/// ```text
///          head                                        tail
///           |                                            |
///      +----v----+  next  +---------+  next  +-----------v+
/// None | Block A | -----> | Block B | -----> |  Block C   | None
///      |         | <----- |         | <----- |            |
///      +---------+  prev  +---------+  prev  +------------+
/// ```
#[derive(Debug, Default)]
pub(crate) struct BlockList {
    head: Link,
    tail: Link,
    len: usize,
}

pub(crate) struct Iter<'a> {
    regions: &'a Regions,
    current: Link,
    remaining: usize,
}

impl BlockList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link {
        self.head
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Links `block` at the end of the list. Its header must already be written.
    pub fn push_back(&mut self, regions: &mut Regions, block: BlockId) {
        let header = regions.header_mut(block);
        header.prev = self.tail;
        header.next = None;

        match self.tail {
            Some(tail) => regions.header_mut(tail).next = Some(block),
            None => self.head = Some(block),
        }

        self.tail = Some(block);
        self.len += 1;
    }

    /// Links `block` right after `anchor`, which must already be in the list.
    pub fn insert_after(&mut self, regions: &mut Regions, anchor: BlockId, block: BlockId) {
        let next = regions.header(anchor).next;

        let header = regions.header_mut(block);
        header.prev = Some(anchor);
        header.next = next;

        regions.header_mut(anchor).next = Some(block);

        match next {
            Some(next) => regions.header_mut(next).prev = Some(block),
            None => self.tail = Some(block),
        }

        self.len += 1;
    }

    /// Unlinks `block`, joining its neighbours together.
    pub fn remove(&mut self, regions: &mut Regions, block: BlockId) {
        let header = *regions.header(block);

        match header.prev {
            Some(prev) => regions.header_mut(prev).next = header.next,
            None => self.head = header.next,
        }

        match header.next {
            Some(next) => regions.header_mut(next).prev = header.prev,
            None => self.tail = header.prev,
        }

        let header = regions.header_mut(block);
        header.next = None;
        header.prev = None;

        self.len -= 1;
    }

    pub fn iter<'a>(&self, regions: &'a Regions) -> Iter<'a> {
        Iter {
            regions,
            current: self.first(),
            remaining: self.len,
        }
    }
}

impl Iterator for Iter<'_> {
    type Item = BlockId;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current?;

        self.current = self.regions.header(block).next;
        self.remaining -= 1;

        Some(block)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}
