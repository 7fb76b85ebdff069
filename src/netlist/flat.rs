//! Flat netlist records: instances, nets, and their terminals
//!
//! A net owns zero or more iterms/bterms through intrusive lists threaded
//! through the terminal records; an iterm belongs to exactly one instance
//! and connects to at most one flat net. Every cross-object reference is
//! a handle, so records serialize as-is.
//!
//! Link fields (`*_next`) and list heads carry storage order, which two
//! equal databases are allowed to disagree on; the diff implementations
//! treat them as no-compare and leave collection comparison to the
//! keyed-set walk in [`Database::differences`](super::database::Database).

use super::hier::{ModNet, Module};
use super::types::{InstFlags, IoType, NetFlags};
use crate::codec::{StreamReader, StreamWriter, Streamable};
use crate::diff::{DiffContext, Diffable};
use crate::error::Result;
use crate::storage::{LinkSet, ListHead, ListTraits, Oid, TableRecord};

/// A leaf cell instance.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Instance {
    pub name: String,
    /// Owning module.
    pub module: Oid<Module>,
    pub flags: InstFlags,
    /// Link in the owning module's instance list.
    pub module_next: Oid<Instance>,
    /// Pins of this instance.
    pub iterms: ListHead<ITerm, InstItermLink>,
}

impl TableRecord for Instance {
    const KIND: &'static str = "instance";
}

impl Streamable for Instance {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.module);
        w.put_flags(self.flags.bits());
        w.put_oid(self.module_next);
        w.put_oid(self.iterms.head());
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            module: r.get_oid()?,
            flags: InstFlags::from_bits_truncate(r.get_flags()?),
            module_next: r.get_oid()?,
            iterms: ListHead::from_head(r.get_oid()?),
        })
    }
}

impl Diffable for Instance {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("module", &self.module, &other.module);
        cx.field("flags", &self.flags, &other.flags);
    }
}

/// An instance terminal: one pin of a leaf instance.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ITerm {
    /// Port name on the leaf instance.
    pub name: String,
    pub inst: Oid<Instance>,
    pub io: IoType,
    /// Connected flat net, or null.
    pub net: Oid<Net>,
    /// Hierarchical connection into the module-net graph, or null.
    pub mod_net: Oid<ModNet>,
    /// Link in the instance's pin list.
    pub inst_next: Oid<ITerm>,
    /// Link in the flat net's pin list.
    pub net_next: Oid<ITerm>,
    /// Link in the module-net's leaf-pin list.
    pub mod_net_next: Oid<ITerm>,
}

impl TableRecord for ITerm {
    const KIND: &'static str = "iterm";
}

impl Streamable for ITerm {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.inst);
        self.io.encode(w);
        w.put_oid(self.net);
        w.put_oid(self.mod_net);
        w.put_oid(self.inst_next);
        w.put_oid(self.net_next);
        w.put_oid(self.mod_net_next);
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            inst: r.get_oid()?,
            io: IoType::decode(r)?,
            net: r.get_oid()?,
            mod_net: r.get_oid()?,
            inst_next: r.get_oid()?,
            net_next: r.get_oid()?,
            mod_net_next: r.get_oid()?,
        })
    }
}

impl Diffable for ITerm {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("inst", &self.inst, &other.inst);
        cx.field("io", &self.io, &other.io);
        cx.field("net", &self.net, &other.net);
        cx.field("mod_net", &self.mod_net, &other.mod_net);
    }
}

/// A flat net.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Net {
    pub name: String,
    pub flags: NetFlags,
    /// Routed shape count. Before schema v2 this was persisted as
    /// separate wire and via counters; v2 compacts them into one field.
    pub shape_count: u32,
    pub iterms: ListHead<ITerm, NetItermLink>,
    pub bterms: ListHead<BTerm, NetBtermLink>,
}

impl TableRecord for Net {
    const KIND: &'static str = "net";
}

impl Streamable for Net {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_flags(self.flags.bits());
        if w.version() >= 2 {
            w.put_u32(self.shape_count);
        } else {
            // v1 layout: wire count then via count.
            w.put_u32(self.shape_count);
            w.put_u32(0);
        }
        w.put_oid(self.iterms.head());
        w.put_oid(self.bterms.head());
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        let name = r.get_str()?;
        let flags = NetFlags::from_bits_truncate(r.get_flags()?);
        let shape_count = if r.version() >= 2 {
            r.get_u32()?
        } else {
            // Legacy fallback: fold the split counters into the
            // compacted field.
            let wires = r.get_u32()?;
            let vias = r.get_u32()?;
            wires + vias
        };
        Ok(Self {
            name,
            flags,
            shape_count,
            iterms: ListHead::from_head(r.get_oid()?),
            bterms: ListHead::from_head(r.get_oid()?),
        })
    }
}

impl Diffable for Net {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("flags", &self.flags, &other.flags);
        cx.field("shape_count", &self.shape_count, &other.shape_count);
    }
}

/// A block terminal: a top-level port of the flat netlist.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BTerm {
    pub name: String,
    pub io: IoType,
    /// Connected flat net, or null.
    pub net: Oid<Net>,
    /// Link in the net's bterm list.
    pub net_next: Oid<BTerm>,
}

impl TableRecord for BTerm {
    const KIND: &'static str = "bterm";
}

impl Streamable for BTerm {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        self.io.encode(w);
        w.put_oid(self.net);
        w.put_oid(self.net_next);
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            io: IoType::decode(r)?,
            net: r.get_oid()?,
            net_next: r.get_oid()?,
        })
    }
}

impl Diffable for BTerm {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("io", &self.io, &other.io);
        cx.field("net", &self.net, &other.net);
    }
}

/// Instance → pin list, threaded through `ITerm::inst_next`.
pub struct InstItermLink;

impl LinkSet<ITerm> for InstItermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ITerm) -> Oid<ITerm> {
        record.inst_next
    }

    fn set_next(record: &mut ITerm, next: Oid<ITerm>) {
        record.inst_next = next;
    }
}

/// Flat net → pin list, threaded through `ITerm::net_next`.
pub struct NetItermLink;

impl LinkSet<ITerm> for NetItermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ITerm) -> Oid<ITerm> {
        record.net_next
    }

    fn set_next(record: &mut ITerm, next: Oid<ITerm>) {
        record.net_next = next;
    }
}

/// Module-net → leaf-pin list, threaded through `ITerm::mod_net_next`.
pub struct ModNetItermLink;

impl LinkSet<ITerm> for ModNetItermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ITerm) -> Oid<ITerm> {
        record.mod_net_next
    }

    fn set_next(record: &mut ITerm, next: Oid<ITerm>) {
        record.mod_net_next = next;
    }
}

/// Flat net → block-terminal list, threaded through `BTerm::net_next`.
pub struct NetBtermLink;

impl LinkSet<BTerm> for NetBtermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &BTerm) -> Oid<BTerm> {
        record.net_next
    }

    fn set_next(record: &mut BTerm, next: Oid<BTerm>) {
        record.net_next = next;
    }
}
