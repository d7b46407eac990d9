//! Helper functions that don't belong to any concrete part of the allocator.

/// Rounds `to_be_aligned` up to the next multiple of `alignment`, which must
/// be a power of two.
///
/// Page requests are rounded up to the OS page size with this, arena bases
/// are rounded up to the header alignment and [`crate::HeapConfig`] uses it
/// to check that a page size keeps every header 8-byte aligned.
#[inline]
pub const fn align(to_be_aligned: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}
