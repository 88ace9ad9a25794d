//! Page bookkeeping.
//!
//! Free lists, pages, per-class pools and the resource index. None of these
//! types lock; the allocator owns them behind its single mutex.

pub(crate) mod block;
pub(crate) mod index;
pub(crate) mod page;
pub(crate) mod pool;
