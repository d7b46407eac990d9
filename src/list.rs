use std::{marker::PhantomData, ptr::NonNull};

/// Non-null pointer to `T`.
pub type Link<T> = Option<NonNull<T>>;

/// A list node. Apart from a list's own sentinel, nodes are written
/// straight into managed memory, so a node is at the same time the header of
/// the block that follows it.
#[repr(C)]
pub struct Node<T> {
    /// Pointer to the next node of the list
    pub next: Link<Self>,
    /// Pointer to the previous node of the list
    pub prev: Link<Self>,
    /// Element of the node
    pub data: T,
}

/// Intrusive doubly-linked list anchored by a sentinel.
///
/// The sentinel is the permanent head of the list and is stored inline, so
/// the list needs no memory of its own. Nodes are pushed right behind it:
///
/// ```text
/// +----------+     +------+     +------+     +------+
/// | Sentinel | --> | Node | <-> | Node | <-> | Node | -> null
/// +----------+     +------+     +------+     +------+
///      ^              |
///      |             prev = null
///   inline
/// ```
///
/// The list may move together with whatever owns it, so no node ever
/// stores the sentinel's address: the first node's `prev` is null and the
/// sentinel is only reachable from the list itself. The sentinel's own
/// `prev` is always null and it is never unlinked.
pub struct List<T> {
    sentinel: Node<T>,
    len: usize,
}

pub struct Iter<'a, T> {
    current: Link<Node<T>>,
    marker: PhantomData<&'a Node<T>>,
}

impl<T> Node<T> {
    pub const fn new(data: T) -> Self {
        Self {
            next: None,
            prev: None,
            data,
        }
    }

    /// Whether the node is currently detached from every list.
    #[inline]
    pub fn is_detached(&self) -> bool {
        self.next.is_none() && self.prev.is_none()
    }
}

impl<T> List<T> {
    /// Creates an empty list whose sentinel carries `anchor`.
    pub const fn new(anchor: T) -> Self {
        Self {
            sentinel: Node::new(anchor),
            len: 0,
        }
    }

    /// Forgets every linked node. The nodes themselves are left untouched,
    /// they simply stop being reachable from this list.
    pub fn reset(&mut self) {
        self.sentinel.next = None;
        self.sentinel.prev = None;
        self.len = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First node behind the sentinel.
    #[inline]
    pub fn head(&self) -> Link<Node<T>> {
        self.sentinel.next
    }

    #[inline]
    pub fn sentinel(&self) -> &Node<T> {
        &self.sentinel
    }

    /// Links `node` right behind the sentinel.
    ///
    /// **SAFETY**: `node` must point to a valid, detached node that stays
    /// valid for as long as it is linked.
    pub unsafe fn push_front(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            debug_assert!(node.as_ref().is_detached(), "node is already linked");

            node.as_mut().next = self.sentinel.next;
            node.as_mut().prev = None;

            if let Some(mut head) = self.sentinel.next {
                head.as_mut().prev = Some(node);
            }
        }

        self.sentinel.next = Some(node);
        self.len += 1;
    }

    /// Unlinks `node` and clears both of its links.
    ///
    /// **SAFETY**: `node` must be a member of this list.
    pub unsafe fn remove(&mut self, mut node: NonNull<Node<T>>) {
        unsafe {
            let next = node.as_ref().next;
            let prev = node.as_ref().prev;

            match prev {
                Some(mut prev) => prev.as_mut().next = next,
                None => self.sentinel.next = next,
            }

            if let Some(mut next) = next {
                next.as_mut().prev = prev;
            }

            node.as_mut().next = None;
            node.as_mut().prev = None;
        }

        self.len -= 1;
    }

    /// Iterates over every node behind the sentinel, head first.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            current: self.sentinel.next,
            marker: PhantomData,
        }
    }
}

impl<T> Iterator for Iter<'_, T> {
    type Item = NonNull<Node<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;

        unsafe {
            self.current = node.as_ref().next;
        }

        Some(node)
    }
}

impl<'a, T> IntoIterator for &'a List<T> {
    type Item = NonNull<Node<T>>;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
