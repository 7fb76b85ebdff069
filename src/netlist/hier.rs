//! Hierarchical netlist records: modules, module instances, module nets,
//! and their terminals
//!
//! A module owns its leaf instances, its sub-module instances, its module
//! nets, and its boundary ports. A module instance's moditerms correspond
//! one-to-one, by name, to the modbterms of the module it is bound to. A
//! moditerm optionally connects to a module net in the *parent* module; a
//! modbterm optionally connects to a module net inside its *own* module —
//! the producer/consumer seam between hierarchy levels.
//!
//! Each module also carries hash mirrors of its authoritative collections
//! for O(1) name lookup. The mirrors are not persisted (they are rebuilt
//! after load) and carry no-compare diff policy; the sanity checker's
//! hash-mirror pass verifies they stay in step.

use super::flat::{ITerm, Instance, ModNetItermLink};
use crate::codec::{StreamReader, StreamWriter, Streamable};
use crate::diff::{DiffContext, Diffable};
use crate::error::Result;
use crate::netlist::types::IoType;
use crate::storage::{LinkSet, ListHead, ListTraits, Oid, TableRecord};
use std::collections::HashMap;

/// A module: one level of the design hierarchy.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Module {
    pub name: String,
    /// The module instance this module is bound to, or null for an
    /// uninstantiated module (e.g. the top of the hierarchy). Modules are
    /// uniquely instantiated.
    pub mod_inst: Oid<ModInst>,
    pub insts: ListHead<Instance, ModuleInstLink>,
    pub modinsts: ListHead<ModInst, ModuleModInstLink>,
    pub modnets: ListHead<ModNet, ModuleModNetLink>,
    pub modbterms: ListHead<ModBTerm, ModuleModBTermLink>,
    /// Name → handle mirrors of the lists above. Rebuilt, never persisted.
    pub inst_index: HashMap<String, Oid<Instance>>,
    pub modinst_index: HashMap<String, Oid<ModInst>>,
    pub modnet_index: HashMap<String, Oid<ModNet>>,
    pub modbterm_index: HashMap<String, Oid<ModBTerm>>,
}

impl TableRecord for Module {
    const KIND: &'static str = "module";
}

impl Streamable for Module {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.mod_inst);
        w.put_oid(self.insts.head());
        w.put_oid(self.modinsts.head());
        w.put_oid(self.modnets.head());
        w.put_oid(self.modbterms.head());
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            mod_inst: r.get_oid()?,
            insts: ListHead::from_head(r.get_oid()?),
            modinsts: ListHead::from_head(r.get_oid()?),
            modnets: ListHead::from_head(r.get_oid()?),
            modbterms: ListHead::from_head(r.get_oid()?),
            inst_index: HashMap::new(),
            modinst_index: HashMap::new(),
            modnet_index: HashMap::new(),
            modbterm_index: HashMap::new(),
        })
    }
}

impl Diffable for Module {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("mod_inst", &self.mod_inst, &other.mod_inst);
    }
}

/// An instance of a module inside a parent module.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModInst {
    pub name: String,
    /// Module this instance lives in.
    pub parent: Oid<Module>,
    /// Module this instance is bound to.
    pub master: Oid<Module>,
    /// Link in the parent module's modinst list.
    pub parent_next: Oid<ModInst>,
    pub moditerms: ListHead<ModITerm, ModInstModItermLink>,
}

impl TableRecord for ModInst {
    const KIND: &'static str = "modinst";
}

impl Streamable for ModInst {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.parent);
        w.put_oid(self.master);
        w.put_oid(self.parent_next);
        w.put_oid(self.moditerms.head());
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            parent: r.get_oid()?,
            master: r.get_oid()?,
            parent_next: r.get_oid()?,
            moditerms: ListHead::from_head(r.get_oid()?),
        })
    }
}

impl Diffable for ModInst {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("parent", &self.parent, &other.parent);
        cx.field("master", &self.master, &other.master);
    }
}

/// A module net: hierarchical connectivity inside one module.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModNet {
    pub name: String,
    pub parent: Oid<Module>,
    /// Link in the parent module's modnet list.
    pub parent_next: Oid<ModNet>,
    /// Child module-instance ports connected in this scope.
    pub moditerms: ListHead<ModITerm, ModNetModItermLink>,
    /// Own boundary ports connected from inside.
    pub modbterms: ListHead<ModBTerm, ModNetModBTermLink>,
    /// Leaf pins connected hierarchically.
    pub iterms: ListHead<ITerm, ModNetItermLink>,
}

impl TableRecord for ModNet {
    const KIND: &'static str = "modnet";
}

impl Streamable for ModNet {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.parent);
        w.put_oid(self.parent_next);
        w.put_oid(self.moditerms.head());
        w.put_oid(self.modbterms.head());
        w.put_oid(self.iterms.head());
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            parent: r.get_oid()?,
            parent_next: r.get_oid()?,
            moditerms: ListHead::from_head(r.get_oid()?),
            modbterms: ListHead::from_head(r.get_oid()?),
            iterms: ListHead::from_head(r.get_oid()?),
        })
    }
}

impl Diffable for ModNet {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("parent", &self.parent, &other.parent);
    }
}

/// A port on a module instance, seen from the parent scope.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModITerm {
    pub name: String,
    pub parent: Oid<ModInst>,
    /// The boundary port of the bound module this port maps to, matched
    /// by name. Null when the bound module has no such port.
    pub child_modbterm: Oid<ModBTerm>,
    /// Connected module net in the parent module, or null.
    pub mod_net: Oid<ModNet>,
    /// Link in the modinst's port list.
    pub parent_next: Oid<ModITerm>,
    /// Link in the module-net's moditerm list.
    pub mod_net_next: Oid<ModITerm>,
}

impl TableRecord for ModITerm {
    const KIND: &'static str = "moditerm";
}

impl Streamable for ModITerm {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.parent);
        w.put_oid(self.child_modbterm);
        w.put_oid(self.mod_net);
        w.put_oid(self.parent_next);
        w.put_oid(self.mod_net_next);
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        Ok(Self {
            name: r.get_str()?,
            parent: r.get_oid()?,
            child_modbterm: r.get_oid()?,
            mod_net: r.get_oid()?,
            parent_next: r.get_oid()?,
            mod_net_next: r.get_oid()?,
        })
    }
}

impl Diffable for ModITerm {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("parent", &self.parent, &other.parent);
        cx.field("child_modbterm", &self.child_modbterm, &other.child_modbterm);
        cx.field("mod_net", &self.mod_net, &other.mod_net);
    }
}

/// A boundary port of a module, seen from inside.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ModBTerm {
    pub name: String,
    pub parent: Oid<Module>,
    pub io: IoType,
    /// Member of a bus port group. Introduced in schema v2; reads of
    /// older streams default it off.
    pub bus: bool,
    /// Connected module net inside the own module, or null.
    pub mod_net: Oid<ModNet>,
    /// The moditerm currently bound to this port, or null when the
    /// module is not instantiated.
    pub moditerm: Oid<ModITerm>,
    /// Link in the parent module's modbterm list.
    pub parent_next: Oid<ModBTerm>,
    /// Link in the module-net's modbterm list.
    pub mod_net_next: Oid<ModBTerm>,
}

impl TableRecord for ModBTerm {
    const KIND: &'static str = "modbterm";
}

impl Streamable for ModBTerm {
    fn encode(&self, w: &mut StreamWriter) {
        w.put_str(&self.name);
        w.put_oid(self.parent);
        self.io.encode(w);
        if w.version() >= 2 {
            w.put_bool(self.bus);
        }
        w.put_oid(self.mod_net);
        w.put_oid(self.moditerm);
        w.put_oid(self.parent_next);
        w.put_oid(self.mod_net_next);
    }

    fn decode(r: &mut StreamReader) -> Result<Self> {
        let name = r.get_str()?;
        let parent = r.get_oid()?;
        let io = IoType::decode(r)?;
        let bus = if r.version() >= 2 {
            r.get_bool()?
        } else {
            false
        };
        Ok(Self {
            name,
            parent,
            io,
            bus,
            mod_net: r.get_oid()?,
            moditerm: r.get_oid()?,
            parent_next: r.get_oid()?,
            mod_net_next: r.get_oid()?,
        })
    }
}

impl Diffable for ModBTerm {
    fn differences(&self, other: &Self, cx: &mut DiffContext) {
        cx.field("name", &self.name, &other.name);
        cx.field("parent", &self.parent, &other.parent);
        cx.field("io", &self.io, &other.io);
        cx.field("bus", &self.bus, &other.bus);
        cx.field("mod_net", &self.mod_net, &other.mod_net);
        cx.field("moditerm", &self.moditerm, &other.moditerm);
    }
}

/// Module → leaf instance list, threaded through `Instance::module_next`.
pub struct ModuleInstLink;

impl LinkSet<Instance> for ModuleInstLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &Instance) -> Oid<Instance> {
        record.module_next
    }

    fn set_next(record: &mut Instance, next: Oid<Instance>) {
        record.module_next = next;
    }
}

/// Module → modinst list, threaded through `ModInst::parent_next`.
pub struct ModuleModInstLink;

impl LinkSet<ModInst> for ModuleModInstLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ModInst) -> Oid<ModInst> {
        record.parent_next
    }

    fn set_next(record: &mut ModInst, next: Oid<ModInst>) {
        record.parent_next = next;
    }
}

/// Module → modnet list, threaded through `ModNet::parent_next`.
pub struct ModuleModNetLink;

impl LinkSet<ModNet> for ModuleModNetLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ModNet) -> Oid<ModNet> {
        record.parent_next
    }

    fn set_next(record: &mut ModNet, next: Oid<ModNet>) {
        record.parent_next = next;
    }
}

/// Module → boundary port list, threaded through `ModBTerm::parent_next`.
pub struct ModuleModBTermLink;

impl LinkSet<ModBTerm> for ModuleModBTermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ModBTerm) -> Oid<ModBTerm> {
        record.parent_next
    }

    fn set_next(record: &mut ModBTerm, next: Oid<ModBTerm>) {
        record.parent_next = next;
    }
}

/// ModInst → port list, threaded through `ModITerm::parent_next`.
pub struct ModInstModItermLink;

impl LinkSet<ModITerm> for ModInstModItermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ModITerm) -> Oid<ModITerm> {
        record.parent_next
    }

    fn set_next(record: &mut ModITerm, next: Oid<ModITerm>) {
        record.parent_next = next;
    }
}

/// ModNet → moditerm list, threaded through `ModITerm::mod_net_next`.
pub struct ModNetModItermLink;

impl LinkSet<ModITerm> for ModNetModItermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ModITerm) -> Oid<ModITerm> {
        record.mod_net_next
    }

    fn set_next(record: &mut ModITerm, next: Oid<ModITerm>) {
        record.mod_net_next = next;
    }
}

/// ModNet → modbterm list, threaded through `ModBTerm::mod_net_next`.
pub struct ModNetModBTermLink;

impl LinkSet<ModBTerm> for ModNetModBTermLink {
    const TRAITS: ListTraits = ListTraits::DEFAULT;

    fn next(record: &ModBTerm) -> Oid<ModBTerm> {
        record.mod_net_next
    }

    fn set_next(record: &mut ModBTerm, next: Oid<ModBTerm>) {
        record.mod_net_next = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{StreamReader, StreamWriter, SCHEMA_VERSION};

    #[test]
    fn test_module_round_trip_rebuilds_blank_indexes() -> Result<()> {
        let mut module = Module {
            name: "alu".to_string(),
            mod_inst: Oid::from_raw(4),
            ..Default::default()
        };
        module
            .inst_index
            .insert("u1".to_string(), Oid::from_raw(1));

        let mut w = StreamWriter::current();
        module.encode(&mut w);
        let mut r = StreamReader::new(w.into_bytes(), SCHEMA_VERSION);
        let loaded = Module::decode(&mut r)?;

        assert_eq!(loaded.name, "alu");
        assert_eq!(loaded.mod_inst, Oid::from_raw(4));
        // Indexes are rebuilt by the database after load, not streamed.
        assert!(loaded.inst_index.is_empty());
        Ok(())
    }

    #[test]
    fn test_modbterm_v1_defaults_bus_off() -> Result<()> {
        let port = ModBTerm {
            name: "q".to_string(),
            parent: Oid::from_raw(1),
            io: IoType::Output,
            bus: false,
            ..Default::default()
        };
        let mut w = StreamWriter::new(1);
        port.encode(&mut w);
        let mut r = StreamReader::new(w.into_bytes(), 1);
        let loaded = ModBTerm::decode(&mut r)?;
        assert_eq!(loaded, port);
        assert!(!loaded.bus);
        Ok(())
    }

    #[test]
    fn test_modbterm_v2_keeps_bus_flag() -> Result<()> {
        let port = ModBTerm {
            name: "data".to_string(),
            io: IoType::Input,
            bus: true,
            ..Default::default()
        };
        let mut w = StreamWriter::current();
        port.encode(&mut w);
        let mut r = StreamReader::new(w.into_bytes(), SCHEMA_VERSION);
        assert_eq!(ModBTerm::decode(&mut r)?, port);
        Ok(())
    }
}
