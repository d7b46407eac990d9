//! A best-fit allocator that manages raw pages on its own.
//!
//! [`Heap`] serves `allocate(size)` and `free(ptr)` out of pages obtained
//! from a [`PageSource`], without ever going through the global allocator.
//! All of its metadata lives in the managed memory itself: every block is
//! preceded by a header, and free blocks are chained into doubly-linked
//! free lists through that header.
//!
//! ```text
//!                             Free List
//!
//!                  +--------------------------------------+
//!                  |                                      |
//! +----------------|-------------+      +-----------------|------------+
//! | Block | Block  | Free        | ...  | Free  | Block   |  Free       |
//! +------------------------------+      +------------------------------+
//!               Page                                 Page
//! ```
//!
//! Two free list policies are available:
//!
//! - [`SingleList`]: every free block in one list.
//! - [`SegregatedLists`]: a small and a large list split at
//!   [`HeapConfig::large_threshold`]. Each request only ever searches the
//!   list of its own class.
//!
//! # Usage
//!
//! ```rust
//! use fitalloc::{Heap, SystemPages};
//!
//! let mut heap = Heap::segregated(SystemPages::new());
//! heap.initialize();
//!
//! unsafe {
//!     let ptr = heap.allocate(64).cast::<u64>();
//!     ptr.write(42);
//!     assert_eq!(ptr.read(), 42);
//!     heap.free(ptr.cast());
//! }
//!
//! let stats = heap.finalize();
//! assert_eq!(stats.pages_acquired, 1);
//! ```
//!
//! # Caller contract
//!
//! Requests must lie in `8..=4000` bytes and be multiples of 8, and only
//! live allocations may be freed. None of this is checked outside of debug
//! assertions, which is why [`Heap::allocate`] and [`Heap::free`] are
//! `unsafe`. Running out of pages aborts the process.
//!
//! # Known limitations
//!
//! - With the default [`Coalescing::Forward`], a freed block only merges
//!   with the block right after it. [`Coalescing::Bidirectional`] also
//!   merges with the block right before it.
//! - Finding a merge candidate scans the free list, so `free` is linear in
//!   the number of free blocks of the same class.
//! - Pages are never returned to the page source.
//! - A [`Heap`] must not be shared between threads without a lock around
//!   both `allocate` and `free`.

mod block;
mod coalesce;
mod config;
mod error;
mod freelist;
mod heap;
mod list;
mod pages;
mod utils;

pub use block::{BLOCK_HEADER_SIZE, MAX_REQUEST, MIN_REQUEST, REQUEST_ALIGN, SizeClass};
pub use config::{Coalescing, DEFAULT_LARGE_THRESHOLD, DEFAULT_PAGE_SIZE, HeapConfig};
pub use error::{ConfigError, IntegrityError};
pub use freelist::{FreeListPolicy, SegregatedLists, SingleList};
pub use heap::{Heap, HeapStats};
pub use pages::{ArenaPages, PageSource, SystemPages, system_page_size};
pub use utils::align;
