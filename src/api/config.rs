//! Allocator configuration.

use std::fmt;

use crate::gpu::traits::MemoryClass;
use crate::util::layout::is_aligned;
use crate::util::size::{kb, mb};

/// Placement alignment for buffers.
pub const BUFFER_ALIGNMENT: u32 = kb(64);
/// Placement alignment for textures.
pub const TEXTURE_ALIGNMENT: u32 = kb(64);
/// Default size of a device page.
pub const PAGE_SIZE_DEVICE: u32 = mb(64);
/// Default size of an upload page.
pub const PAGE_SIZE_UPLOAD: u32 = mb(32);
/// Default size of a texture page.
pub const PAGE_SIZE_TEXTURE: u32 = mb(64);
/// Default maximum number of pages per memory class.
pub const MAX_NUM_PAGES: usize = 256;
/// Maximum number of mip levels in a 2D texture.
pub const MAX_NUM_MIPMAPS: u32 = 12;

/// What happens to a page once its last allocation is freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageReclaimPolicy {
    /// Release the heap immediately.
    Eager,
    /// Keep up to `max_empty` empty pages per pool for reuse; release the rest.
    RetainEmpty { max_empty: usize },
}

impl Default for PageReclaimPolicy {
    fn default() -> Self {
        Self::Eager
    }
}

/// Configuration for the dynamic GPU allocator.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Default page size for each memory class, indexed by [`MemoryClass::index`]
    pub page_sizes: [u32; 3],

    /// Placement alignment for buffers (default: 64 KiB)
    pub buffer_alignment: u32,

    /// Placement alignment for textures (default: 64 KiB)
    pub texture_alignment: u32,

    /// Maximum number of pages per memory class
    pub max_pages_per_class: usize,

    /// Policy for pages that become empty
    pub reclaim_policy: PageReclaimPolicy,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            page_sizes: [PAGE_SIZE_DEVICE, PAGE_SIZE_UPLOAD, PAGE_SIZE_TEXTURE],
            buffer_alignment: BUFFER_ALIGNMENT,
            texture_alignment: TEXTURE_ALIGNMENT,
            max_pages_per_class: MAX_NUM_PAGES,
            reclaim_policy: PageReclaimPolicy::Eager,
        }
    }
}

impl AllocatorConfig {
    /// Small pages for tests or constrained devices: 1 MiB everywhere, 16 pages per class.
    pub fn small_pages() -> Self {
        Self {
            page_sizes: [mb(1), mb(1), mb(1)],
            max_pages_per_class: 16,
            ..Self::default()
        }
    }

    /// Builder pattern: set the default page size of one class.
    pub fn with_page_size(mut self, class: MemoryClass, size: u32) -> Self {
        self.page_sizes[class.index()] = size;
        self
    }

    /// Builder pattern: set both buffer and texture alignment.
    pub fn with_alignment(mut self, alignment: u32) -> Self {
        self.buffer_alignment = alignment;
        self.texture_alignment = alignment;
        self
    }

    /// Builder pattern: set the page limit per class.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages_per_class = max_pages;
        self
    }

    /// Builder pattern: set the empty page policy.
    pub fn with_reclaim_policy(mut self, policy: PageReclaimPolicy) -> Self {
        self.reclaim_policy = policy;
        self
    }

    /// Default page size for `class`.
    pub fn page_size(&self, class: MemoryClass) -> u32 {
        self.page_sizes[class.index()]
    }

    /// Placement alignment for `class`.
    pub fn alignment(&self, class: MemoryClass) -> u32 {
        match class {
            MemoryClass::Device | MemoryClass::Upload => self.buffer_alignment,
            MemoryClass::Texture => self.texture_alignment,
        }
    }

    /// Check that the settings are internally consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for alignment in [self.buffer_alignment, self.texture_alignment] {
            if !alignment.is_power_of_two() {
                return Err(ConfigError::AlignmentNotPowerOfTwo(alignment));
            }
        }
        for class in MemoryClass::ALL {
            let size = self.page_size(class);
            if size == 0 || !is_aligned(size, self.alignment(class)) {
                return Err(ConfigError::UnalignedPageSize { class, size });
            }
        }
        if self.max_pages_per_class == 0 {
            return Err(ConfigError::NoPages);
        }
        Ok(())
    }
}

/// Inconsistent allocator configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Alignments must be powers of two
    AlignmentNotPowerOfTwo(u32),
    /// Page sizes must be non-zero multiples of their class alignment
    UnalignedPageSize { class: MemoryClass, size: u32 },
    /// At least one page per class must be allowed
    NoPages,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::AlignmentNotPowerOfTwo(a) => write!(f, "Alignment {} is not a power of two", a),
            ConfigError::UnalignedPageSize { class, size } => {
                write!(f, "{} page size {} is not a multiple of its alignment", class, size)
            }
            ConfigError::NoPages => write!(f, "max_pages_per_class must be at least 1"),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        let config = AllocatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_size(MemoryClass::Device), 64 * 1024 * 1024);
        assert_eq!(config.page_size(MemoryClass::Upload), 32 * 1024 * 1024);
        assert_eq!(config.alignment(MemoryClass::Texture), 65536);
        assert!(AllocatorConfig::small_pages().validate().is_ok());
    }

    #[test]
    fn test_rejects_unaligned_page() {
        let config = AllocatorConfig::default().with_page_size(MemoryClass::Upload, 100_000);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnalignedPageSize {
                class: MemoryClass::Upload,
                size: 100_000
            })
        );
    }

    #[test]
    fn test_rejects_bad_alignment_and_limit() {
        let config = AllocatorConfig::default().with_alignment(3000);
        assert_eq!(config.validate(), Err(ConfigError::AlignmentNotPowerOfTwo(3000)));

        let config = AllocatorConfig::default().with_max_pages(0);
        assert_eq!(config.validate(), Err(ConfigError::NoPages));
    }
}
