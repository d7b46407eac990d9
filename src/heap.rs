use std::{process, ptr::NonNull};

use log::{debug, error, info, trace};
use snafu::ensure;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block, MAX_REQUEST, MIN_REQUEST, REQUEST_ALIGN, SizeClass},
    coalesce::coalesce,
    config::HeapConfig,
    error::{
        BrokenLinkSnafu, ConfigError, CorruptSentinelSnafu, HeadHasPrevSnafu, IntegrityError,
        LengthMismatchSnafu, MisfiledBlockSnafu, OverlapSnafu,
    },
    freelist::{FreeListPolicy, SegregatedLists, SingleList},
    list::Node,
    pages::PageSource,
};

/// Snapshot of the free lists of a [`Heap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Pages obtained from the page source since the heap was created.
    pub pages_acquired: usize,
    /// Number of free blocks over every list.
    pub free_blocks: usize,
    /// Payload bytes held by free blocks, headers excluded.
    pub free_bytes: usize,
    /// Payload size of the largest free block.
    pub largest_free: usize,
}

/// A best-fit allocator over pages obtained from a [`PageSource`].
///
/// Every block, free or allocated, is preceded by a header that records its
/// payload size. Free blocks are linked into the free lists of `P` through
/// that same header, so the heap needs no memory besides the pages
/// themselves. The sentinel of every list is stored inline, which also
/// means a `Heap` can be moved freely and never touches the global
/// allocator.
///
/// ```text
///                          page
/// +--------+---------+--------+---------+--------+------------+
/// | header | payload | header | payload | header |    free    |
/// +--------+---------+--------+---------+--------+------------+
///          ^                  ^              ^
///          allocate()         allocate()     linked into a free list
/// ```
///
/// Pages are never returned to the source. The heap is single-threaded: it
/// is neither `Send` nor `Sync`, and wrapping it in a lock is the only way
/// to share it.
pub struct Heap<P, S> {
    config: HeapConfig,
    lists: P,
    pages: S,
    pages_acquired: usize,
}

impl<S: PageSource> Heap<SingleList, S> {
    /// A heap with every free block in a single list and the default
    /// [`HeapConfig`].
    pub fn single_list(pages: S) -> Self {
        Self::from_parts(pages, HeapConfig::default())
    }
}

impl<S: PageSource> Heap<SegregatedLists, S> {
    /// A heap with separate small and large free lists and the default
    /// [`HeapConfig`].
    pub fn segregated(pages: S) -> Self {
        Self::from_parts(pages, HeapConfig::default())
    }
}

impl<P: FreeListPolicy, S: PageSource> Heap<P, S> {
    pub fn with_config(pages: S, config: HeapConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self::from_parts(pages, config))
    }

    fn from_parts(pages: S, config: HeapConfig) -> Self {
        Self {
            lists: P::new(&config),
            config,
            pages,
            pages_acquired: 0,
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    /// Starts a fresh run: every free list is emptied down to its sentinel.
    ///
    /// Pages acquired by earlier runs are not released and not reused.
    pub fn initialize(&mut self) {
        self.lists.reset();

        debug!(
            "heap initialized, {} pages acquired so far",
            self.pages_acquired
        );
    }

    /// Ends a run and reports the state of the free lists.
    pub fn finalize(&mut self) -> HeapStats {
        let stats = self.stats();

        info!(
            "heap finalized: {} pages, {} free blocks holding {} bytes, largest {}",
            stats.pages_acquired, stats.free_blocks, stats.free_bytes, stats.largest_free
        );

        stats
    }

    /// Returns a block of at least `size` bytes.
    ///
    /// The free list serving `size` is searched for the smallest block that
    /// fits. On a miss a new page is acquired, filed under that list and the
    /// search is repeated, which then cannot fail. If the chosen block is
    /// larger than needed and the excess can hold a header of its own, the
    /// excess is split off and returned to the free lists.
    ///
    /// # Safety
    ///
    /// `size` must lie in `8..=4000` and be a multiple of 8. This is only
    /// checked in debug builds; anything else corrupts the heap.
    ///
    /// The process is aborted if the page source runs dry.
    pub unsafe fn allocate(&mut self, size: usize) -> NonNull<u8> {
        debug_assert!(
            (MIN_REQUEST..=MAX_REQUEST).contains(&size) && size % REQUEST_ALIGN == 0,
            "invalid request of {size} bytes"
        );

        let class = self.lists.route(size);

        let node = match self.lists.list(class).best_fit(size) {
            Some(node) => node,
            None => {
                self.grow(class);

                self.lists
                    .list(class)
                    .best_fit(size)
                    .unwrap_or_else(|| fatal(format_args!("fresh page cannot hold {size} bytes")))
            }
        };

        unsafe {
            self.lists.list_mut(class).remove(node);
            self.split(node, size);

            trace!(
                "allocate({size}) -> {:p} ({} bytes)",
                Block::payload(node),
                node.as_ref().data.size
            );
        }

        Block::payload(node)
    }

    /// Returns a block to the free lists, merging it with free neighbours
    /// according to [`HeapConfig::coalescing`].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Heap::allocate`] on this heap and
    /// not freed since. Double frees are not detected.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let mut node = Block::from_payload(ptr);

            // Whatever the caller left behind, an allocated block is unlinked.
            node.as_mut().next = None;
            node.as_mut().prev = None;

            trace!("free({ptr:p}) ({} bytes)", node.as_ref().data.size);

            coalesce(&mut self.lists, node, self.config.coalescing);
        }
    }

    /// Payload bytes available at `ptr`. This is at least the size that was
    /// requested and more when splitting the block was not worth it.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).as_ref().data.size }
    }

    /// Requests a new page and files it as one free block under `class`.
    fn grow(&mut self, class: SizeClass) {
        let page_size = self.config.page_size;

        let Some(page) = self.pages.acquire_pages(page_size) else {
            fatal(format_args!("page source could not supply {page_size} bytes"));
        };

        self.pages_acquired += 1;

        debug!(
            "acquired page #{} at {page:p} for the {class:?} list",
            self.pages_acquired
        );

        unsafe {
            let node = Block::write(page, page_size - BLOCK_HEADER_SIZE, class);
            coalesce(&mut self.lists, node, self.config.coalescing);
        }
    }

    /// Shrinks the detached `node` to `size` bytes if the rest can become a
    /// block of its own, and returns that rest to the free lists.
    ///
    /// ```text
    /// before  | header |               payload                 |
    /// after   | header | size bytes | header |  remaining - H   |
    /// ```
    unsafe fn split(&mut self, mut node: NonNull<Node<Block>>, size: usize) {
        unsafe {
            let block = &mut node.as_mut().data;
            let remaining = block.size - size;

            // A rest that cannot hold more than a header stays with the
            // allocation.
            if remaining <= BLOCK_HEADER_SIZE {
                return;
            }

            let class = block.class;
            block.size = size;
            block.class = self.lists.retag(class, size);

            let rest_size = remaining - BLOCK_HEADER_SIZE;
            let rest = Block::write(
                Block::payload(node).add(size),
                rest_size,
                self.lists.retag(class, rest_size),
            );

            trace!("split {rest_size} bytes off {node:p} at {rest:p}");

            coalesce(&mut self.lists, rest, self.config.coalescing);
        }
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            pages_acquired: self.pages_acquired,
            ..HeapStats::default()
        };

        for &class in self.lists.classes() {
            let list = self.lists.list(class);

            stats.free_blocks += list.len();
            stats.free_bytes += list.free_bytes();
            stats.largest_free = stats.largest_free.max(list.largest());
        }

        stats
    }

    /// Walks every free list and verifies its structure: links are
    /// symmetric, the head has no predecessor, the sentinel is empty and
    /// detached from behind, every member is tagged for the list it is in, the recorded length is
    /// right and no two free blocks overlap.
    pub fn check(&self) -> Result<(), IntegrityError> {
        let mut extents = Vec::new();

        for &class in self.lists.classes() {
            let list = self.lists.list(class);
            let sentinel = list.sentinel();

            ensure!(
                sentinel.prev.is_none() && sentinel.data.size == 0,
                CorruptSentinelSnafu { class }
            );

            if let Some(head) = list.head() {
                ensure!(
                    unsafe { head.as_ref().prev.is_none() },
                    HeadHasPrevSnafu {
                        class,
                        addr: head.as_ptr() as usize,
                    }
                );
            }

            let mut found = 0;
            let mut current = list.head();

            while let Some(link) = current {
                let node = unsafe { link.as_ref() };
                let addr = link.as_ptr() as usize;

                // Also stops a corrupted list that loops back on itself.
                ensure!(
                    found < list.len(),
                    LengthMismatchSnafu {
                        class,
                        expected: list.len(),
                        found: found + 1,
                    }
                );

                // The policy decides which list a tag maps to.
                ensure!(
                    std::ptr::eq(self.lists.list(node.data.class), list),
                    MisfiledBlockSnafu {
                        class,
                        tag: node.data.class,
                        addr,
                    }
                );

                if let Some(next) = node.next {
                    ensure!(
                        unsafe { next.as_ref().prev } == Some(link),
                        BrokenLinkSnafu { class, addr }
                    );
                }

                extents.push((addr, addr + BLOCK_HEADER_SIZE + node.data.size));
                found += 1;
                current = node.next;
            }

            ensure!(
                found == list.len(),
                LengthMismatchSnafu {
                    class,
                    expected: list.len(),
                    found,
                }
            );
        }

        extents.sort_unstable();

        for pair in extents.windows(2) {
            ensure!(
                pair[0].1 <= pair[1].0,
                OverlapSnafu {
                    first: pair[0].0,
                    second: pair[1].0,
                }
            );
        }

        Ok(())
    }
}

/// Unrecoverable heap failure.
#[cold]
fn fatal(reason: std::fmt::Arguments<'_>) -> ! {
    error!("heap failure: {reason}");
    process::abort()
}
