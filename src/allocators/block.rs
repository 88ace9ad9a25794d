//! Byte ranges inside a page.

use crate::util::layout::{align_up, is_aligned};

/// A contiguous byte range `[offset, offset + size)` within a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block {
    /// Start of the range, in bytes from the start of the heap
    pub offset: u32,
    /// Length of the range in bytes
    pub size: u32,
}

impl Block {
    /// Create a new block.
    pub const fn new(offset: u32, size: u32) -> Self {
        Self { offset, size }
    }

    /// One past the last byte of the block.
    #[inline]
    pub const fn end(&self) -> u32 {
        self.offset + self.size
    }

    /// Whether two blocks share at least one byte.
    #[inline]
    pub const fn overlaps(&self, other: &Block) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Whether both offset and size are multiples of `alignment`.
    #[inline]
    pub const fn is_aligned(&self, alignment: u32) -> bool {
        is_aligned(self.offset, alignment) && is_aligned(self.size, alignment)
    }
}

/// Carve an allocation out of the front of `free`.
///
/// `requested` is rounded up to `alignment`, and the rounded size must fit in
/// `free`. Returns the allocated block and, if anything is left, the remaining
/// suffix of `free`.
pub fn split_block(free: Block, requested: u32, alignment: u32) -> (Block, Option<Block>) {
    debug_assert!(free.size != 0);
    debug_assert!(free.is_aligned(alignment));

    let aligned = align_up(requested, alignment);
    debug_assert!(requested <= aligned);
    debug_assert!(aligned <= free.size, "aligned request does not fit in free block");

    let alloc = Block::new(free.offset, aligned);
    let remainder = if aligned < free.size {
        Some(Block::new(free.offset + aligned, free.size - aligned))
    } else {
        None
    };

    (alloc, remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALIGN: u32 = 65536;

    #[test]
    fn test_split_rounds_up() {
        let free = Block::new(0, 4 * ALIGN);
        let (alloc, rest) = split_block(free, 1000, ALIGN);

        assert_eq!(alloc, Block::new(0, ALIGN));
        assert_eq!(rest, Some(Block::new(ALIGN, 3 * ALIGN)));
    }

    #[test]
    fn test_split_exact_fit_has_no_remainder() {
        let free = Block::new(2 * ALIGN, 2 * ALIGN);
        let (alloc, rest) = split_block(free, 2 * ALIGN, ALIGN);

        assert_eq!(alloc, free);
        assert!(rest.is_none());
    }

    #[test]
    fn test_split_rounding_to_full_block() {
        let free = Block::new(ALIGN, ALIGN);
        let (alloc, rest) = split_block(free, ALIGN - 1, ALIGN);

        assert_eq!(alloc, free);
        assert!(rest.is_none());
    }

    #[test]
    fn test_overlap() {
        let a = Block::new(0, 100);
        assert!(a.overlaps(&Block::new(50, 100)));
        assert!(!a.overlaps(&Block::new(100, 100)));
        assert_eq!(a.end(), 100);
    }
}
