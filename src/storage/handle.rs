//! Typed object handles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// A stable, typed handle to one record in one [`SlabTable`](super::SlabTable).
///
/// The raw value is a 1-based slot number; `0` is reserved as null. A
/// handle never dangles silently: resolving a destroyed handle fails with
/// `Error::InvalidHandle` at the table.
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct Oid<T> {
    raw: u32,
    #[serde(skip)]
    _marker: PhantomData<fn() -> T>,
}

impl<T> Oid<T> {
    /// The null handle. Never resolves to a record.
    pub const NULL: Self = Self {
        raw: 0,
        _marker: PhantomData,
    };

    /// Create a handle from a raw slot number.
    pub fn from_raw(raw: u32) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Raw slot number (0 for null).
    pub fn raw(self) -> u32 {
        self.raw
    }

    /// True for the reserved null handle.
    pub fn is_null(self) -> bool {
        self.raw == 0
    }
}

// Manual impls: derived ones would bound T, and Oid<T> is plain data
// regardless of the record type.

impl<T> Clone for Oid<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Oid<T> {}

impl<T> Default for Oid<T> {
    fn default() -> Self {
        Self::NULL
    }
}

impl<T> PartialEq for Oid<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for Oid<T> {}

impl<T> PartialOrd for Oid<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Oid<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for Oid<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T> fmt::Debug for Oid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Oid({})", self.raw)
    }
}

impl<T> fmt::Display for Oid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "null")
        } else {
            write!(f, "{}", self.raw)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget;

    #[test]
    fn test_null_handle() {
        let h: Oid<Widget> = Oid::NULL;
        assert!(h.is_null());
        assert_eq!(h.raw(), 0);
        assert_eq!(h, Oid::default());
    }

    #[test]
    fn test_handle_ordering() {
        let a: Oid<Widget> = Oid::from_raw(1);
        let b: Oid<Widget> = Oid::from_raw(2);
        assert!(a < b);
        assert_ne!(a, b);
        assert_eq!(a, Oid::from_raw(1));
    }

    #[test]
    fn test_handle_display() {
        let a: Oid<Widget> = Oid::from_raw(7);
        assert_eq!(a.to_string(), "7");
        assert_eq!(Oid::<Widget>::NULL.to_string(), "null");
    }
}
