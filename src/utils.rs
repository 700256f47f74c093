//! This file contains all the helper functions for the allocator.
//! This are functions that don't particularly belong to any concrete module of the program.

use crate::PAGE_SIZE;

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// Requests are rounded up to a multiple of [`crate::WORD_SIZE`] with this, so every
/// payload we hand out (and every header that follows one) stays word aligned.
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Start of the [`PAGE_SIZE`] aligned page that contains `addr`.
#[inline]
pub fn page_base(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}
