//! Intrusive collections
//!
//! # Architecture
//!
//! ```text
//! owner.head ──→ slot 5 ──→ slot 2 ──→ slot 9 ──→ null
//!                 (next)     (next)     (next)
//! ```
//!
//! A collection is a singly linked list threaded through a `next` handle
//! field stored inside the member records themselves; the owner holds only
//! the head handle. One record may sit in several collections at once
//! (e.g. a pin is listed by both its instance and its net), so the link
//! field a collection uses is selected by a zero-sized [`LinkSet`] marker
//! type rather than by the record type alone.
//!
//! Membership is exclusive per link set: a record is on at most one list
//! threading any given field.

use super::handle::Oid;
use super::table::{SlabTable, TableRecord};
use crate::error::{Error, Result};
use std::marker::PhantomData;

/// Static traits of one collection kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListTraits {
    /// The list supports in-place reversal.
    pub reversible: bool,
    /// Reversing the physical list also reverses the logical order
    /// (false for unordered bags where order is incidental).
    pub order_reversed: bool,
    /// Handles are allocated strictly increasing and gap-free, so `len`
    /// is O(1) from the head handle instead of a walk.
    pub sequential: bool,
}

impl ListTraits {
    /// The common case: reversible ordered list, non-sequential handles.
    pub const DEFAULT: Self = Self {
        reversible: true,
        order_reversed: true,
        sequential: false,
    };
}

/// Selects which `next` field of `T` a collection threads through.
pub trait LinkSet<T> {
    const TRAITS: ListTraits;

    fn next(record: &T) -> Oid<T>;
    fn set_next(record: &mut T, next: Oid<T>);
}

/// Owner-side state of an intrusive collection: just the head handle.
pub struct ListHead<T, L: LinkSet<T>> {
    head: Oid<T>,
    _marker: PhantomData<fn() -> L>,
}

impl<T: TableRecord, L: LinkSet<T>> ListHead<T, L> {
    /// An empty collection.
    pub const EMPTY: Self = Self {
        head: Oid::NULL,
        _marker: PhantomData,
    };

    /// First member handle, or null when empty.
    pub fn head(&self) -> Oid<T> {
        self.head
    }

    /// Rebuild a head from a persisted handle.
    pub fn from_head(head: Oid<T>) -> Self {
        Self {
            head,
            _marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_null()
    }

    /// Link a record at the front of the list.
    pub fn push_front(&mut self, table: &mut SlabTable<T>, id: Oid<T>) -> Result<()> {
        let head = self.head;
        L::set_next(table.get_mut(id)?, head);
        self.head = id;
        Ok(())
    }

    /// Unlink a record from the list. Returns false when the record was
    /// not a member.
    pub fn unlink(&mut self, table: &mut SlabTable<T>, id: Oid<T>) -> Result<bool> {
        let mut prev = Oid::NULL;
        let mut cur = self.head;
        while !cur.is_null() {
            let next = L::next(table.get(cur)?);
            if cur == id {
                if prev.is_null() {
                    self.head = next;
                } else {
                    L::set_next(table.get_mut(prev)?, next);
                }
                L::set_next(table.get_mut(id)?, Oid::NULL);
                return Ok(true);
            }
            prev = cur;
            cur = next;
        }
        Ok(false)
    }

    /// Walk the list counting members. O(1) only for sequential link sets.
    pub fn len(&self, table: &SlabTable<T>) -> usize {
        if L::TRAITS.sequential {
            // Gap-free ascending allocation: head is the highest handle.
            return self.head.raw() as usize;
        }
        self.iter(table).count()
    }

    /// True when `id` is on this list.
    pub fn contains(&self, table: &SlabTable<T>, id: Oid<T>) -> bool {
        self.iter(table).any(|member| member == id)
    }

    /// Iterate member handles in list order.
    pub fn iter<'a>(&self, table: &'a SlabTable<T>) -> ListIter<'a, T, L> {
        ListIter {
            table,
            cur: self.head,
            _marker: PhantomData,
        }
    }

    /// Physically reverse the linked list in place.
    ///
    /// This is how "most recently added" and "insertion order" views share
    /// one representation. Reversing twice restores the original order
    /// bit-for-bit.
    pub fn reverse(&mut self, table: &mut SlabTable<T>) -> Result<()> {
        if !L::TRAITS.reversible {
            return Err(Error::InvalidArgument(format!(
                "{} collection is not reversible",
                T::KIND
            )));
        }
        let mut prev = Oid::NULL;
        let mut cur = self.head;
        while !cur.is_null() {
            let record = table.get_mut(cur)?;
            let next = L::next(record);
            L::set_next(record, prev);
            prev = cur;
            cur = next;
        }
        self.head = prev;
        Ok(())
    }
}

impl<T, L: LinkSet<T>> Clone for ListHead<T, L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, L: LinkSet<T>> Copy for ListHead<T, L> {}

impl<T, L: LinkSet<T>> Default for ListHead<T, L> {
    fn default() -> Self {
        Self {
            head: Oid::NULL,
            _marker: PhantomData,
        }
    }
}

impl<T, L: LinkSet<T>> PartialEq for ListHead<T, L> {
    fn eq(&self, other: &Self) -> bool {
        self.head == other.head
    }
}

impl<T, L: LinkSet<T>> Eq for ListHead<T, L> {}

impl<T, L: LinkSet<T>> std::fmt::Debug for ListHead<T, L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ListHead({})", self.head.raw())
    }
}

/// Forward iterator over member handles.
pub struct ListIter<'a, T: TableRecord, L: LinkSet<T>> {
    table: &'a SlabTable<T>,
    cur: Oid<T>,
    _marker: PhantomData<fn() -> L>,
}

impl<'a, T: TableRecord, L: LinkSet<T>> Iterator for ListIter<'a, T, L> {
    type Item = Oid<T>;

    fn next(&mut self) -> Option<Oid<T>> {
        if self.cur.is_null() {
            return None;
        }
        let id = self.cur;
        // A broken link means corrupted storage; stop rather than loop.
        self.cur = match self.table.get(id) {
            Ok(record) => L::next(record),
            Err(_) => Oid::NULL,
        };
        Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Node {
        label: u32,
        next: Oid<Node>,
    }

    impl TableRecord for Node {
        const KIND: &'static str = "node";
    }

    struct ChainLink;

    impl LinkSet<Node> for ChainLink {
        const TRAITS: ListTraits = ListTraits::DEFAULT;

        fn next(record: &Node) -> Oid<Node> {
            record.next
        }

        fn set_next(record: &mut Node, next: Oid<Node>) {
            record.next = next;
        }
    }

    fn build(table: &mut SlabTable<Node>, n: u32) -> (ListHead<Node, ChainLink>, Vec<Oid<Node>>) {
        let mut head = ListHead::default();
        let mut ids = Vec::new();
        for label in 0..n {
            let id = table.create();
            table.get_mut(id).unwrap().label = label;
            head.push_front(table, id).unwrap();
            ids.push(id);
        }
        (head, ids)
    }

    #[test]
    fn test_push_iter_order() {
        let mut table = SlabTable::new();
        let (head, ids) = build(&mut table, 3);
        // push_front: iteration is reverse insertion order.
        let walked: Vec<_> = head.iter(&table).collect();
        assert_eq!(walked, vec![ids[2], ids[1], ids[0]]);
        assert_eq!(head.len(&table), 3);
    }

    #[test]
    fn test_unlink_middle() -> Result<()> {
        let mut table = SlabTable::new();
        let (mut head, ids) = build(&mut table, 3);
        assert!(head.unlink(&mut table, ids[1])?);
        let walked: Vec<_> = head.iter(&table).collect();
        assert_eq!(walked, vec![ids[2], ids[0]]);
        // Second unlink of the same record is a no-op.
        assert!(!head.unlink(&mut table, ids[1])?);
        Ok(())
    }

    #[test]
    fn test_unlink_head() -> Result<()> {
        let mut table = SlabTable::new();
        let (mut head, ids) = build(&mut table, 2);
        assert!(head.unlink(&mut table, ids[1])?);
        assert_eq!(head.head(), ids[0]);
        Ok(())
    }

    #[test]
    fn test_reverse_twice_is_identity() -> Result<()> {
        let mut table = SlabTable::new();
        let (mut head, _) = build(&mut table, 5);
        let original: Vec<_> = head.iter(&table).collect();

        head.reverse(&mut table)?;
        let reversed: Vec<_> = head.iter(&table).collect();
        let mut expected = original.clone();
        expected.reverse();
        assert_eq!(reversed, expected);

        head.reverse(&mut table)?;
        let restored: Vec<_> = head.iter(&table).collect();
        assert_eq!(restored, original);
        Ok(())
    }

    #[test]
    fn test_reverse_empty() -> Result<()> {
        let mut table = SlabTable::<Node>::new();
        let mut head: ListHead<Node, ChainLink> = ListHead::default();
        head.reverse(&mut table)?;
        assert!(head.is_empty());
        Ok(())
    }

    /// Same `next` field as [`ChainLink`], different collection traits.
    struct SeqLink;

    impl LinkSet<Node> for SeqLink {
        const TRAITS: ListTraits = ListTraits {
            reversible: false,
            order_reversed: false,
            sequential: true,
        };

        fn next(record: &Node) -> Oid<Node> {
            record.next
        }

        fn set_next(record: &mut Node, next: Oid<Node>) {
            record.next = next;
        }
    }

    #[test]
    fn test_sequential_len_without_walk() {
        let mut table = SlabTable::new();
        let mut head: ListHead<Node, SeqLink> = ListHead::default();
        for _ in 0..4 {
            let id = table.create();
            head.push_front(&mut table, id).unwrap();
        }
        // Gap-free ascending handles: the head handle is the count.
        assert_eq!(head.len(&table), 4);
        assert_eq!(head.iter(&table).count(), 4);
    }

    #[test]
    fn test_non_reversible_list_rejects_reverse() {
        let mut table = SlabTable::new();
        let mut head: ListHead<Node, SeqLink> = ListHead::default();
        let id = table.create();
        head.push_front(&mut table, id).unwrap();
        assert!(matches!(
            head.reverse(&mut table),
            Err(Error::InvalidArgument(_))
        ));
        assert_eq!(head.head(), id);
    }

    #[test]
    fn test_order_reversed_trait_matches_iteration() -> Result<()> {
        assert!(<ChainLink as LinkSet<Node>>::TRAITS.order_reversed);
        let mut table = SlabTable::new();
        let (mut head, ids) = build(&mut table, 3);
        head.reverse(&mut table)?;
        // One reversal of a push_front list yields insertion order.
        let walked: Vec<_> = head.iter(&table).collect();
        assert_eq!(walked, ids);
        Ok(())
    }

    #[test]
    fn test_contains() {
        let mut table = SlabTable::new();
        let (head, ids) = build(&mut table, 2);
        let stranger = table.create();
        assert!(head.contains(&table, ids[0]));
        assert!(!head.contains(&table, stranger));
    }
}
