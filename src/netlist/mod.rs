//! Netlist object model
//!
//! # Architecture
//!
//! ```text
//! Database
//!   ├─→ flat view:  Instance ──ITerm──→ Net ←──BTerm
//!   └─→ hier view:  Module ─┬─→ Instance (leaf)
//!                           ├─→ ModInst ──ModITerm──→ ModNet (parent scope)
//!                           ├─→ ModNet  ←──ModBTerm  (own scope)
//!                           └─→ ModBTerm
//! ```
//!
//! Two linked representations of one netlist: the flat instance/net/pin
//! graph used for physical analysis, and the hierarchical
//! module/instance/port graph mirroring source structure. A module
//! instance's ports (moditerms) correspond one-to-one, by name, to the
//! boundary ports (modbterms) of the module it is bound to; a moditerm
//! connects in the *parent* module's net scope while a modbterm connects
//! inside its *own* module. Keeping both views consistent through a
//! master swap is the job of [`swap`] and [`check`].

pub mod check;
pub mod database;
pub mod flat;
pub mod hier;
pub mod swap;
pub mod types;

pub use database::Database;
pub use flat::{BTerm, ITerm, Instance, Net};
pub use hier::{ModBTerm, ModITerm, ModInst, ModNet, Module};
pub use types::{InstFlags, IoType, NetFlags};
