use std::{mem, ptr::NonNull};

use crate::list::Node;

/// Header size of a block. We need to add the overhead introduced by our
/// [`Node`] structure since we always use our `Block` as a node of a free list.
pub const BLOCK_HEADER_SIZE: usize = mem::size_of::<Node<Block>>();

/// Smallest request callers may make.
pub const MIN_REQUEST: usize = 8;

/// Largest request callers may make.
pub const MAX_REQUEST: usize = 4000;

/// Every request is a multiple of this, which keeps every header aligned.
pub const REQUEST_ALIGN: usize = 8;

/// Which free list a block is filed under.
///
/// Only [`crate::SegregatedLists`] tells the two apart;
/// [`crate::SingleList`] files every block under [`SizeClass::Small`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SizeClass {
    Small,
    Large,
}

impl SizeClass {
    /// Class of a payload of `size` bytes: anything above `threshold` is large.
    #[inline]
    pub const fn of(size: usize, threshold: usize) -> Self {
        if size > threshold {
            Self::Large
        } else {
            Self::Small
        }
    }
}

/// This is the metadata of a block. Content is placed right after the
/// header, and the header is always wrapped inside a [`Node`] so the
/// same bytes double as free list linkage:
///
/// ```text
/// +---------------------+ <------+
/// |        next         |        |
/// +---------------------+        |
/// |        prev         |        |
/// +---------------------+        | -> Header (BLOCK_HEADER_SIZE)
/// |        size         |        |
/// +---------------------+        |
/// |     class (1b)      |        |
/// +---------------------+ <------+
/// |       Content       |        |
/// |         ...         |        | -> Payload, `size` bytes
/// |         ...         |        |
/// +---------------------+ <------+
/// ```
///
/// `next` and `prev` are only meaningful while the block is free. An
/// allocated block has both links cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Block {
    /// Usable payload size in bytes, header excluded.
    pub size: usize,
    /// Free list the block belongs to.
    pub class: SizeClass,
}

impl Block {
    /// Writes a detached header at `addr` and returns it.
    ///
    /// **SAFETY**: `addr` must be 8-aligned and followed by at least
    /// `BLOCK_HEADER_SIZE + size` writable bytes that no other block owns.
    pub unsafe fn write(addr: NonNull<u8>, size: usize, class: SizeClass) -> NonNull<Node<Self>> {
        let node = addr.cast::<Node<Self>>();

        unsafe {
            node.as_ptr().write(Node::new(Self { size, class }));
        }

        node
    }

    /// Address handed to callers for this block.
    #[inline]
    pub fn payload(node: NonNull<Node<Self>>) -> NonNull<u8> {
        unsafe { node.cast::<u8>().add(BLOCK_HEADER_SIZE) }
    }

    /// Recovers the header that precedes a payload returned by
    /// [`Block::payload`].
    ///
    /// **SAFETY**: `ptr` must have been produced by [`Block::payload`].
    #[inline]
    pub unsafe fn from_payload(ptr: NonNull<u8>) -> NonNull<Node<Self>> {
        unsafe { ptr.sub(BLOCK_HEADER_SIZE).cast() }
    }

    /// Address right after the payload, where the next block in memory
    /// would start. It may lie outside managed memory, so it is only ever
    /// compared against, never read through.
    #[inline]
    pub fn end(node: NonNull<Node<Self>>) -> *const u8 {
        let size = unsafe { node.as_ref().data.size };

        node.as_ptr()
            .cast::<u8>()
            .cast_const()
            .wrapping_add(BLOCK_HEADER_SIZE + size)
    }

    /// Address of the header itself, for comparisons against [`Block::end`].
    #[inline]
    pub fn start(node: NonNull<Node<Self>>) -> *const u8 {
        node.as_ptr().cast::<u8>().cast_const()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn header_keeps_payload_aligned() {
        assert_eq!(BLOCK_HEADER_SIZE % REQUEST_ALIGN, 0);
        assert!(mem::align_of::<Node<Block>>() <= REQUEST_ALIGN);
    }

    #[test]
    fn size_class_threshold_is_exclusive() {
        assert_eq!(SizeClass::of(1000, 1000), SizeClass::Small);
        assert_eq!(SizeClass::of(1008, 1000), SizeClass::Large);
        assert_eq!(SizeClass::of(8, 1000), SizeClass::Small);
    }

    #[test]
    fn payload_round_trips_to_header() {
        let mut buf = vec![0u64; 16];
        let addr = NonNull::new(buf.as_mut_ptr().cast::<u8>()).unwrap();

        unsafe {
            let node = Block::write(addr, 64, SizeClass::Small);
            let payload = Block::payload(node);

            assert_eq!(payload.as_ptr() as usize - addr.as_ptr() as usize, BLOCK_HEADER_SIZE);
            assert_eq!(Block::from_payload(payload), node);
            assert_eq!(node.as_ref().data.size, 64);
            assert!(node.as_ref().is_detached());
            assert_eq!(Block::end(node) as usize, addr.as_ptr() as usize + BLOCK_HEADER_SIZE + 64);
        }
    }
}
