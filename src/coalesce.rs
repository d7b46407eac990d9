use std::ptr::NonNull;

use log::trace;

use crate::{
    block::{BLOCK_HEADER_SIZE, Block},
    config::Coalescing,
    freelist::FreeListPolicy,
    list::Node,
};

/// Returns a detached block to its free list, merging it with free
/// neighbours first.
///
/// A header only records its own size, so the block right after `node` is
/// easy to locate but the one before it is not. Merging therefore always
/// looks forward; looking backward is opt-in through
/// [`Coalescing::Bidirectional`]. Either way a neighbour is only merged if
/// it is a member of the list `node` is going to be filed under, which is
/// found with a linear scan of that list.
///
/// **SAFETY**: `node` must be a valid, detached block header.
pub(crate) unsafe fn coalesce<P: FreeListPolicy>(
    lists: &mut P,
    node: NonNull<Node<Block>>,
    mode: Coalescing,
) {
    unsafe {
        debug_assert!(node.as_ref().is_detached(), "coalescing a linked block");

        merge_with_next(lists, node);

        let node = match mode {
            Coalescing::Forward => node,
            Coalescing::Bidirectional => merge_with_prev(lists, node),
        };

        let class = node.as_ref().data.class;
        lists.list_mut(class).push_front(node);
    }
}

/// Tries to absorb the block that starts right after `node`. This can be
/// performed if that block is free and in the same list.
unsafe fn merge_with_next<P: FreeListPolicy>(lists: &mut P, mut node: NonNull<Node<Block>>) {
    unsafe {
        let class = node.as_ref().data.class;

        let Some(next_node) = lists.list(class).find_starting_at(Block::end(node)) else {
            return;
        };

        // Unlink the neighbour first, its header is about to become payload.
        lists.list_mut(class).remove(next_node);

        let block = &mut node.as_mut().data;
        block.size += BLOCK_HEADER_SIZE + next_node.as_ref().data.size;
        block.class = lists.retag(class, block.size);

        trace!(
            "merged {:p} into {:p}, now {} bytes",
            next_node, node, block.size
        );
    }
}

/// Tries to let the free block that ends right where `node` starts absorb
/// `node`. Returns whichever block now heads the merged range.
unsafe fn merge_with_prev<P: FreeListPolicy>(
    lists: &mut P,
    node: NonNull<Node<Block>>,
) -> NonNull<Node<Block>> {
    unsafe {
        let class = node.as_ref().data.class;

        let Some(mut prev_node) = lists.list(class).find_ending_at(Block::start(node)) else {
            return node;
        };

        // The previous block leaves the list while it grows, its size decides
        // where it goes back.
        lists.list_mut(class).remove(prev_node);

        let block = &mut prev_node.as_mut().data;
        block.size += BLOCK_HEADER_SIZE + node.as_ref().data.size;
        block.class = lists.retag(class, block.size);

        trace!(
            "merged {:p} into {:p}, now {} bytes",
            node, prev_node, block.size
        );

        prev_node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        block::SizeClass,
        config::HeapConfig,
        freelist::{SegregatedLists, SingleList},
    };

    use test_log::test;

    /// Writes detached headers back to back into `buf`.
    fn carve(buf: &mut [u64], sizes: &[usize], class: SizeClass) -> Vec<NonNull<Node<Block>>> {
        let base = buf.as_mut_ptr().cast::<u8>();
        let mut offset = 0;

        sizes
            .iter()
            .map(|&size| unsafe {
                let node = Block::write(NonNull::new_unchecked(base.add(offset)), size, class);
                offset += BLOCK_HEADER_SIZE + size;
                node
            })
            .collect()
    }

    fn size_of(node: NonNull<Node<Block>>) -> usize {
        unsafe { node.as_ref().data.size }
    }

    #[test]
    fn isolated_block_is_just_inserted() {
        let mut lists = SingleList::new(&HeapConfig::default());
        let mut buf = vec![0u64; 64];
        let nodes = carve(&mut buf, &[64], SizeClass::Small);

        unsafe { coalesce(&mut lists, nodes[0], Coalescing::Forward) };

        let list = lists.list(SizeClass::Small);
        assert_eq!(list.len(), 1);
        assert_eq!(list.head(), Some(nodes[0]));
        assert_eq!(size_of(nodes[0]), 64);
    }

    #[test]
    fn absorbs_free_successor() {
        let mut lists = SingleList::new(&HeapConfig::default());
        let mut buf = vec![0u64; 64];
        let nodes = carve(&mut buf, &[64, 48], SizeClass::Small);

        unsafe {
            coalesce(&mut lists, nodes[1], Coalescing::Forward);
            coalesce(&mut lists, nodes[0], Coalescing::Forward);
        }

        let list = lists.list(SizeClass::Small);
        assert_eq!(list.len(), 1);
        assert_eq!(list.head(), Some(nodes[0]));
        assert_eq!(size_of(nodes[0]), 64 + BLOCK_HEADER_SIZE + 48);
    }

    #[test]
    fn forward_mode_never_looks_back() {
        let mut lists = SingleList::new(&HeapConfig::default());
        let mut buf = vec![0u64; 64];
        let nodes = carve(&mut buf, &[64, 48], SizeClass::Small);

        unsafe {
            coalesce(&mut lists, nodes[0], Coalescing::Forward);
            coalesce(&mut lists, nodes[1], Coalescing::Forward);
        }

        assert_eq!(lists.list(SizeClass::Small).len(), 2);
        assert_eq!(size_of(nodes[0]), 64);
        assert_eq!(size_of(nodes[1]), 48);
    }

    #[test]
    fn bidirectional_mode_merges_into_predecessor() {
        let mut lists = SingleList::new(&HeapConfig::default());
        let mut buf = vec![0u64; 64];
        let nodes = carve(&mut buf, &[64, 48, 16], SizeClass::Small);

        unsafe {
            coalesce(&mut lists, nodes[0], Coalescing::Bidirectional);
            coalesce(&mut lists, nodes[2], Coalescing::Bidirectional);
            // Both neighbours are free: the middle block bridges them.
            coalesce(&mut lists, nodes[1], Coalescing::Bidirectional);
        }

        let list = lists.list(SizeClass::Small);
        assert_eq!(list.len(), 1);
        assert_eq!(list.head(), Some(nodes[0]));
        assert_eq!(size_of(nodes[0]), 64 + 48 + 16 + 2 * BLOCK_HEADER_SIZE);
    }

    #[test]
    fn neighbours_in_other_list_are_left_alone() {
        let mut lists = SegregatedLists::new(&HeapConfig::default());
        let mut buf = vec![0u64; 512];
        let small = carve(&mut buf, &[64], SizeClass::Small)[0];

        unsafe {
            let large = Block::write(
                NonNull::new_unchecked(Block::end(small).cast_mut()),
                2048,
                SizeClass::Large,
            );

            coalesce(&mut lists, large, Coalescing::Forward);
            coalesce(&mut lists, small, Coalescing::Forward);

            assert_eq!(lists.list(SizeClass::Small).head(), Some(small));
            assert_eq!(lists.list(SizeClass::Large).head(), Some(large));
        }

        assert_eq!(size_of(small), 64);
    }

    #[test]
    fn merged_block_is_retagged() {
        let mut lists = SegregatedLists::new(&HeapConfig::default());
        let mut buf = vec![0u64; 512];
        let nodes = carve(&mut buf, &[600, 200], SizeClass::Large);

        unsafe {
            coalesce(&mut lists, nodes[1], Coalescing::Forward);
            coalesce(&mut lists, nodes[0], Coalescing::Forward);
        }

        // 600 + 200 plus a header is under the threshold, so the merged
        // block leaves the large list.
        assert!(lists.list(SizeClass::Large).is_empty());

        let small = lists.list(SizeClass::Small);
        assert_eq!(small.len(), 1);
        assert_eq!(small.head(), Some(nodes[0]));
        assert_eq!(size_of(nodes[0]), 600 + BLOCK_HEADER_SIZE + 200);
        assert_eq!(unsafe { nodes[0].as_ref().data.class }, SizeClass::Small);
    }
}
