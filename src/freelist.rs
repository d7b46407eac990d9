use crate::{
    block::{Block, SizeClass},
    config::HeapConfig,
    list::{Link, List, Node},
};

/// Linked list of free [`Block`]s.
///
/// The list doesn't store anything on its own: every member is the header
/// of a free block, so linking a block costs nothing but the two pointers
/// that already live in its header.
///
/// ```text
///                     Free List
///
///        +---------------------------+
///        |                           |
/// +------|-----+-------+    +--------|---+-------+
/// | Free |     | Block | -> | Free   |   | Block |
/// +------------+-------+    +------------+-------+
///        Page                      Page
/// ```
///
/// Members are unordered by address: a freed block is simply pushed in
/// front of the list.
pub type FreeList = List<Block>;

impl FreeList {
    /// Returns the smallest block that can hold `size` bytes.
    ///
    /// This is a best-fit search over the whole list. When several blocks
    /// share the best size the first one in list order wins, so the result
    /// depends on insertion order but not on addresses.
    pub fn best_fit(&self, size: usize) -> Link<Node<Block>> {
        let mut best: Link<Node<Block>> = None;
        let mut best_size = usize::MAX;

        for node in self {
            let candidate = unsafe { node.as_ref().data.size };

            if candidate >= size && candidate < best_size {
                best = Some(node);
                best_size = candidate;
            }
        }

        best
    }

    /// Returns the free block whose header starts at `addr`, if any.
    pub fn find_starting_at(&self, addr: *const u8) -> Link<Node<Block>> {
        self.iter().find(|&node| Block::start(node) == addr)
    }

    /// Returns the free block whose payload ends right at `addr`, if any.
    pub fn find_ending_at(&self, addr: *const u8) -> Link<Node<Block>> {
        self.iter().find(|&node| Block::end(node) == addr)
    }

    /// Total payload bytes held by the list.
    pub fn free_bytes(&self) -> usize {
        self.iter().map(|node| unsafe { node.as_ref().data.size }).sum()
    }

    /// Payload size of the largest member.
    pub fn largest(&self) -> usize {
        self.iter()
            .map(|node| unsafe { node.as_ref().data.size })
            .max()
            .unwrap_or(0)
    }
}

/// Organisation of the free lists of a [`crate::Heap`].
///
/// A policy decides which list serves a request and which list a block is
/// filed under after its size changes. Insertion, removal and searching are
/// the same for every policy and live on [`FreeList`].
pub trait FreeListPolicy {
    /// Builds the lists, each anchored by its own sentinel.
    fn new(config: &HeapConfig) -> Self
    where
        Self: Sized;

    /// Drops every member, leaving only the sentinels.
    fn reset(&mut self);

    /// Class of the list a request of `size` bytes is served from.
    fn route(&self, size: usize) -> SizeClass;

    /// Class of a block of class `class` whose payload just became `size`
    /// bytes because it was split or merged.
    fn retag(&self, class: SizeClass, size: usize) -> SizeClass;

    #[doc(hidden)]
    fn list(&self, class: SizeClass) -> &FreeList;

    #[doc(hidden)]
    fn list_mut(&mut self, class: SizeClass) -> &mut FreeList;

    /// Every class this policy keeps a list for.
    fn classes(&self) -> &'static [SizeClass];
}

/// All free blocks in one list, regardless of size.
pub struct SingleList {
    list: FreeList,
}

impl FreeListPolicy for SingleList {
    fn new(_config: &HeapConfig) -> Self {
        Self {
            list: FreeList::new(Block::SENTINEL_SMALL),
        }
    }

    fn reset(&mut self) {
        self.list.reset();
    }

    #[inline]
    fn route(&self, _size: usize) -> SizeClass {
        SizeClass::Small
    }

    #[inline]
    fn retag(&self, _class: SizeClass, _size: usize) -> SizeClass {
        SizeClass::Small
    }

    fn list(&self, _class: SizeClass) -> &FreeList {
        &self.list
    }

    fn list_mut(&mut self, _class: SizeClass) -> &mut FreeList {
        &mut self.list
    }

    fn classes(&self) -> &'static [SizeClass] {
        &[SizeClass::Small]
    }
}

/// Two independent lists split at a size threshold.
///
/// Requests above the threshold only ever look at the large list and
/// requests at or below it only ever look at the small list, which keeps
/// every search shorter and stops small requests from chipping away at
/// large blocks.
///
/// A fresh page joins the list of the request that asked for it. After
/// that, a large block that shrinks to the threshold or below moves to the
/// small list, where it can still be used. Small blocks never move to the
/// large list: a page carved for small requests keeps serving small
/// requests until it is used up.
pub struct SegregatedLists {
    small: FreeList,
    large: FreeList,
    threshold: usize,
}

impl FreeListPolicy for SegregatedLists {
    fn new(config: &HeapConfig) -> Self {
        Self {
            small: FreeList::new(Block::SENTINEL_SMALL),
            large: FreeList::new(Block::SENTINEL_LARGE),
            threshold: config.large_threshold,
        }
    }

    fn reset(&mut self) {
        self.small.reset();
        self.large.reset();
    }

    #[inline]
    fn route(&self, size: usize) -> SizeClass {
        SizeClass::of(size, self.threshold)
    }

    #[inline]
    fn retag(&self, class: SizeClass, size: usize) -> SizeClass {
        match class {
            SizeClass::Large => SizeClass::of(size, self.threshold),
            SizeClass::Small => SizeClass::Small,
        }
    }

    fn list(&self, class: SizeClass) -> &FreeList {
        match class {
            SizeClass::Small => &self.small,
            SizeClass::Large => &self.large,
        }
    }

    fn list_mut(&mut self, class: SizeClass) -> &mut FreeList {
        match class {
            SizeClass::Small => &mut self.small,
            SizeClass::Large => &mut self.large,
        }
    }

    fn classes(&self) -> &'static [SizeClass] {
        &[SizeClass::Small, SizeClass::Large]
    }
}

impl Block {
    /// Anchor data of the sentinels. A zero size keeps them out of every
    /// best-fit search.
    pub(crate) const SENTINEL_SMALL: Self = Self {
        size: 0,
        class: SizeClass::Small,
    };
    pub(crate) const SENTINEL_LARGE: Self = Self {
        size: 0,
        class: SizeClass::Large,
    };
}

/// Pushes every block of `sizes` onto `list`, carving them back to back out
/// of `buf`. Returns the nodes in carving order.
#[cfg(test)]
pub(crate) fn carve_into(
    list: &mut FreeList,
    buf: &mut [u64],
    sizes: &[usize],
) -> Vec<std::ptr::NonNull<Node<Block>>> {
    use std::ptr::NonNull;

    use crate::block::BLOCK_HEADER_SIZE;

    let mut offset = 0;
    let base = buf.as_mut_ptr().cast::<u8>();

    sizes
        .iter()
        .map(|&size| unsafe {
            let addr = NonNull::new_unchecked(base.add(offset));
            offset += BLOCK_HEADER_SIZE + size;
            assert!(offset <= buf.len() * 8);

            let node = Block::write(addr, size, SizeClass::Small);
            list.push_front(node);
            node
        })
        .collect()
}
