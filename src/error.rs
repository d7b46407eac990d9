use snafu::Snafu;

use crate::block::SizeClass;

/// Rejected [`crate::HeapConfig`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigError {
    #[snafu(display("page size {page_size} is not a multiple of {alignment}"))]
    UnalignedPageSize { page_size: usize, alignment: usize },

    #[snafu(display(
        "page size {page_size} is too small, the largest request needs {required} bytes"
    ))]
    PageTooSmall { page_size: usize, required: usize },

    #[snafu(display("large threshold {threshold} must lie in [{min}, {max})"))]
    ThresholdOutOfRange {
        threshold: usize,
        min: usize,
        max: usize,
    },
}

/// Free list corruption found by [`crate::Heap::check`].
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IntegrityError {
    #[snafu(display("head of the {class:?} list at {addr:#x} has a prev link"))]
    HeadHasPrev { class: SizeClass, addr: usize },

    #[snafu(display("block at {addr:#x} in the {class:?} list is not linked back by its successor"))]
    BrokenLink { class: SizeClass, addr: usize },

    #[snafu(display("the sentinel of the {class:?} list has a prev link or a size"))]
    CorruptSentinel { class: SizeClass },

    #[snafu(display("block at {addr:#x} is tagged {tag:?} but linked into the {class:?} list"))]
    MisfiledBlock {
        class: SizeClass,
        tag: SizeClass,
        addr: usize,
    },

    #[snafu(display("the {class:?} list counts {expected} blocks but links {found}"))]
    LengthMismatch {
        class: SizeClass,
        expected: usize,
        found: usize,
    },

    #[snafu(display("free blocks at {first:#x} and {second:#x} overlap"))]
    Overlap { first: usize, second: usize },
}
