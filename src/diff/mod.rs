//! Field-level structural diff engine
//!
//! Walks the same field lists the stream codec serializes, comparing two
//! records side by side and emitting one delta per differing field, per
//! side. Used for equality checks, change journaling, and detecting
//! no-op mutations.
//!
//! Per-field policy:
//! - **no-compare** fields are simply not visited (e.g. rebuilt name
//!   indexes);
//! - **shallow** fields compare by value, handles by raw handle equality;
//! - **deep** fields recurse into the referenced record of an owned
//!   sub-table;
//! - owned collections are compared as sets keyed by a stable per-record
//!   name, not by storage order, which is allowed to differ between two
//!   otherwise equal databases.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Which of the two compared objects a delta belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum DiffSide {
    A,
    B,
}

impl DiffSide {
    pub fn as_char(self) -> char {
        match self {
            DiffSide::A => 'A',
            DiffSide::B => 'B',
        }
    }
}

/// One field-level difference.
///
/// `Ord` gives the canonical report order: path, then side, then value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct FieldDelta {
    pub path: String,
    pub side: DiffSide,
    pub value: String,
}

impl std::fmt::Display for FieldDelta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.side.as_char(), self.path, self.value)
    }
}

/// Two-sided comparison state.
pub struct DiffContext {
    deep: bool,
    path: Vec<String>,
    deltas: Vec<FieldDelta>,
}

impl DiffContext {
    /// `deep` controls whether owned sub-objects are recursed into or
    /// compared by one level of handle equality.
    pub fn new(deep: bool) -> Self {
        Self {
            deep,
            path: Vec::new(),
            deltas: Vec::new(),
        }
    }

    /// True when owned sub-objects should be recursed into.
    pub fn deep(&self) -> bool {
        self.deep
    }

    /// Shallow policy: compare one field by value and record both sides
    /// when they differ.
    pub fn field<V: PartialEq + Debug>(&mut self, name: &str, a: &V, b: &V) {
        if a != b {
            self.emit(name, DiffSide::A, format!("{:?}", a));
            self.emit(name, DiffSide::B, format!("{:?}", b));
        }
    }

    /// Owned-sub-object policy: recurse under `name` when deep, otherwise
    /// summarize any mismatch as a single one-level delta pair.
    pub fn object<T: Diffable>(&mut self, name: &str, a: &T, b: &T) {
        if self.deep() {
            self.path.push(name.to_string());
            a.differences(b, self);
            self.path.pop();
        } else if !equal(a, b) {
            self.emit(name, DiffSide::A, "differs".to_string());
            self.emit(name, DiffSide::B, "differs".to_string());
        }
    }

    /// Deep policy over optional sub-objects; presence mismatch is itself
    /// a delta.
    pub fn opt_object<T: Diffable>(&mut self, name: &str, a: Option<&T>, b: Option<&T>) {
        match (a, b) {
            (Some(a), Some(b)) => self.object(name, a, b),
            (Some(_), None) => self.emit(name, DiffSide::A, "present".to_string()),
            (None, Some(_)) => self.emit(name, DiffSide::B, "present".to_string()),
            (None, None) => {}
        }
    }

    /// Compare two owned collections as sets keyed by a stable per-record
    /// key. Storage order does not matter; unmatched keys are reported as
    /// one-sided deltas, matched keys are recursed.
    pub fn keyed_set<'x, T, I, J, F>(&mut self, name: &str, a: I, b: J, key: F)
    where
        T: Diffable + 'x,
        I: IntoIterator<Item = &'x T>,
        J: IntoIterator<Item = &'x T>,
        F: Fn(&T) -> &str,
    {
        let a_map: BTreeMap<&str, &T> = a.into_iter().map(|r| (key(r), r)).collect();
        let b_map: BTreeMap<&str, &T> = b.into_iter().map(|r| (key(r), r)).collect();

        for (k, a_rec) in &a_map {
            match b_map.get(k) {
                Some(b_rec) => self.member(name, k, *a_rec, *b_rec),
                None => self.emit(&format!("{}[{}]", name, k), DiffSide::A, "present".to_string()),
            }
        }
        for k in b_map.keys() {
            if !a_map.contains_key(k) {
                self.emit(&format!("{}[{}]", name, k), DiffSide::B, "present".to_string());
            }
        }
    }

    /// [`keyed_set`](Self::keyed_set) with computed (owned) keys, for
    /// collections whose stable key is assembled from several fields
    /// (e.g. a hierarchical path).
    pub fn keyed_set_by<'x, T, I, J, F>(&mut self, name: &str, a: I, b: J, key: F)
    where
        T: Diffable + 'x,
        I: IntoIterator<Item = &'x T>,
        J: IntoIterator<Item = &'x T>,
        F: Fn(&T) -> String,
    {
        let a_map: BTreeMap<String, &T> = a.into_iter().map(|r| (key(r), r)).collect();
        let b_map: BTreeMap<String, &T> = b.into_iter().map(|r| (key(r), r)).collect();

        for (k, a_rec) in &a_map {
            match b_map.get(k) {
                Some(b_rec) => self.member(name, k, *a_rec, *b_rec),
                None => self.emit(&format!("{}[{}]", name, k), DiffSide::A, "present".to_string()),
            }
        }
        for k in b_map.keys() {
            if !a_map.contains_key(k) {
                self.emit(&format!("{}[{}]", name, k), DiffSide::B, "present".to_string());
            }
        }
    }

    /// One matched collection member: recurse when deep, otherwise
    /// summarize a mismatch as a single `name[key]` delta pair.
    fn member<T: Diffable>(&mut self, name: &str, key: &str, a: &T, b: &T) {
        if self.deep() {
            self.path.push(format!("{}[{}]", name, key));
            a.differences(b, self);
            self.path.pop();
        } else if !equal(a, b) {
            self.emit(&format!("{}[{}]", name, key), DiffSide::A, "differs".to_string());
            self.emit(&format!("{}[{}]", name, key), DiffSide::B, "differs".to_string());
        }
    }

    /// True when no difference has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.deltas.is_empty()
    }

    /// Consume the context, returning deltas in canonical order.
    pub fn into_deltas(mut self) -> Vec<FieldDelta> {
        self.deltas.sort();
        self.deltas
    }

    fn emit(&mut self, name: &str, side: DiffSide, value: String) {
        let mut path = self.path.join(".");
        if !path.is_empty() {
            path.push('.');
        }
        path.push_str(name);
        self.deltas.push(FieldDelta { path, side, value });
    }
}

/// Implemented by every record kind; walks the same fields the codec
/// streams, applying the per-field comparison policy.
pub trait Diffable {
    fn differences(&self, other: &Self, cx: &mut DiffContext);
}

/// Deep field-level comparison in canonical order.
pub fn differences<T: Diffable>(a: &T, b: &T) -> Vec<FieldDelta> {
    let mut cx = DiffContext::new(true);
    a.differences(b, &mut cx);
    cx.into_deltas()
}

/// Symmetric equality short-circuit.
pub fn equal<T: Diffable>(a: &T, b: &T) -> bool {
    let mut cx = DiffContext::new(false);
    a.differences(b, &mut cx);
    cx.is_empty()
}
