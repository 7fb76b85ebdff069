//! Handle-based object storage
//!
//! # Architecture
//!
//! ```text
//! SlabTable<Instance>          SlabTable<Net>
//!   ├─→ slot 1 (live)           ├─→ slot 1 (live)
//!   ├─→ slot 2 (free) ──┐       └─→ slot 2 (live)
//!   ├─→ slot 3 (live)   │
//!   └─→ slot 4 (free) ←─┘  free list threaded through slots
//!
//! Oid<Instance>(3) ──→ slot 3
//! Oid<Instance>(0)  =  null, never a valid slot
//! ```
//!
//! Every object is addressed by a typed handle (`Oid<T>`), never by a
//! memory address. Handles are stable for the object's lifetime, survive
//! serialization, and are what the diff engine compares. Cross-object
//! links (including the intrusive lists in [`list`]) are handles too, so
//! the whole model relocates without a fix-up pass.

pub mod handle;
pub mod list;
pub mod table;

pub use handle::Oid;
pub use list::{LinkSet, ListHead, ListIter, ListTraits};
pub use table::{SlabTable, TableRecord};
