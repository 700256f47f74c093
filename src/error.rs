use thiserror::Error;

/// Result of an allocator operation.
pub type AllocResult<T> = Result<T, AllocError>;

/// Recoverable failures of [`crate::MemAlloc::allocate`].
///
/// Releasing memory has no error path. Handing back an address that was never
/// allocated is a contract violation, not something we report.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("requested {requested} bytes, but a page holds at most {capacity} bytes")]
    RequestTooLarge { requested: usize, capacity: usize },

    #[error("out of memory: no page could be mapped")]
    OutOfMemory,
}
