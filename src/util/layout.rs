//! Alignment utilities for 32-bit heap offsets.

/// Align a size up to the given power-of-two alignment.
///
/// Returns `None` if the aligned size does not fit in a `u32`.
#[inline]
pub const fn checked_align_up(size: u32, align: u32) -> Option<u32> {
    debug_assert!(align.is_power_of_two());
    match size.checked_add(align - 1) {
        Some(padded) => Some(padded & !(align - 1)),
        None => None,
    }
}

/// Align a size up to the given power-of-two alignment.
///
/// The caller guarantees the result fits in a `u32`.
#[inline]
pub const fn align_up(size: u32, align: u32) -> u32 {
    (size + align - 1) & !(align - 1)
}

/// Whether `value` is a multiple of the power-of-two `align`.
#[inline]
pub const fn is_aligned(value: u32, align: u32) -> bool {
    value & (align - 1) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), 0);
        assert_eq!(align_up(1, 8), 8);
        assert_eq!(align_up(8, 8), 8);
        assert_eq!(align_up(9, 8), 16);
        assert_eq!(align_up(1, 65536), 65536);
    }

    #[test]
    fn test_checked_align_up_overflow() {
        assert_eq!(checked_align_up(u32::MAX, 65536), None);
        assert_eq!(checked_align_up(u32::MAX - 65535, 65536), Some(u32::MAX - 65535));
        assert_eq!(checked_align_up(100, 64), Some(128));
    }

    #[test]
    fn test_is_aligned() {
        assert!(is_aligned(131072, 65536));
        assert!(!is_aligned(1000, 65536));
    }
}
