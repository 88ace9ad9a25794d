//! Allocator error types.

use std::fmt;

use crate::gpu::traits::{GpuAllocError, MemoryClass, ResourceId};

/// Errors returned by the allocator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Zero-sized request, or a size that overflows when aligned
    InvalidSize,
    /// Buffers requested from the texture class
    UnsupportedClass(MemoryClass),
    /// Texture description rejected before reaching the device
    InvalidTextureDesc(&'static str),
    /// Device asked for an alignment the pages cannot provide
    AlignmentFailed,
    /// The pool already holds the maximum number of pages
    PoolExhausted {
        class: MemoryClass,
        max_pages: usize,
    },
    /// No free block in the page can hold the request
    NoSuitableBlock,
    /// Heap or resource creation failed on the device
    Device(GpuAllocError),
    /// Handle not produced by this allocator, or already freed
    InvalidHandle(ResourceId),
    /// Teardown with allocation and deallocation counts that differ
    Unbalanced {
        class: MemoryClass,
        allocations: u64,
        deallocations: u64,
    },
    /// Internal bookkeeping is inconsistent
    Internal(&'static str),
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::InvalidSize => write!(f, "Invalid allocation size"),
            AllocError::UnsupportedClass(class) => {
                write!(f, "Buffers cannot be allocated from the {} class", class)
            }
            AllocError::InvalidTextureDesc(why) => write!(f, "Invalid texture description: {}", why),
            AllocError::AlignmentFailed => write!(f, "Alignment requirements not met"),
            AllocError::PoolExhausted { class, max_pages } => {
                write!(f, "The {} pool is full ({} pages)", class, max_pages)
            }
            AllocError::NoSuitableBlock => write!(f, "No free block large enough"),
            AllocError::Device(err) => write!(f, "Device error: {}", err),
            AllocError::InvalidHandle(id) => {
                write!(f, "Resource {} was not allocated here or is already freed", id)
            }
            AllocError::Unbalanced {
                class,
                allocations,
                deallocations,
            } => write!(
                f,
                "Unbalanced {} pool: {} allocations, {} deallocations",
                class, allocations, deallocations
            ),
            AllocError::Internal(msg) => write!(f, "Internal allocator error: {}", msg),
        }
    }
}

impl std::error::Error for AllocError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AllocError::Device(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GpuAllocError> for AllocError {
    fn from(err: GpuAllocError) -> Self {
        AllocError::Device(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_errors_convert() {
        let err: AllocError = GpuAllocError::OutOfMemory.into();
        assert_eq!(err, AllocError::Device(GpuAllocError::OutOfMemory));
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Device error: GPU out of memory");
    }
}
