use snafu::ensure;

use crate::{
    block::{BLOCK_HEADER_SIZE, MAX_REQUEST, MIN_REQUEST, REQUEST_ALIGN},
    error::{ConfigError, PageTooSmallSnafu, ThresholdOutOfRangeSnafu, UnalignedPageSizeSnafu},
    utils::align,
};

/// Size of the page requested from the [`crate::PageSource`] on a miss.
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Requests above this many bytes are served by the large list of
/// [`crate::SegregatedLists`].
pub const DEFAULT_LARGE_THRESHOLD: usize = 1000;

/// How a block being returned to a free list is merged with its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coalescing {
    /// Only merge with the block that starts right after this one.
    #[default]
    Forward,
    /// Also merge with a free block that ends right where this one starts.
    Bidirectional,
}

/// Tunables of a [`crate::Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Bytes requested from the page source every time the free lists miss.
    ///
    /// Only this many bytes of every page are carved into blocks.
    /// [`crate::SystemPages`] rounds each request up to the OS page size,
    /// so on a system with 16 KiB pages the default wastes three quarters
    /// of every mapping. Use [`crate::system_page_size`] there:
    ///
    /// ```rust
    /// use fitalloc::{HeapConfig, system_page_size};
    ///
    /// let config = HeapConfig::new().with_page_size(system_page_size());
    /// assert!(config.validate().is_ok());
    /// ```
    pub page_size: usize,
    /// Boundary between the small and large lists of the segregated policy.
    pub large_threshold: usize,
    /// Merge policy used on every insertion into a free list.
    pub coalescing: Coalescing,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            coalescing: Coalescing::Forward,
        }
    }

    #[must_use]
    pub const fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    #[must_use]
    pub const fn with_large_threshold(mut self, large_threshold: usize) -> Self {
        self.large_threshold = large_threshold;
        self
    }

    #[must_use]
    pub const fn with_coalescing(mut self, coalescing: Coalescing) -> Self {
        self.coalescing = coalescing;
        self
    }

    /// Checks that a fresh page can always satisfy the largest request and
    /// that both lists of the segregated policy are reachable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let page_size = self.page_size;

        ensure!(
            align(page_size, REQUEST_ALIGN) == page_size,
            UnalignedPageSizeSnafu {
                page_size,
                alignment: REQUEST_ALIGN,
            }
        );

        let required = MAX_REQUEST + BLOCK_HEADER_SIZE;
        ensure!(page_size >= required, PageTooSmallSnafu { page_size, required });

        let threshold = self.large_threshold;
        ensure!(
            (MIN_REQUEST..MAX_REQUEST).contains(&threshold),
            ThresholdOutOfRangeSnafu {
                threshold,
                min: MIN_REQUEST,
                max: MAX_REQUEST,
            }
        );

        Ok(())
    }
}
