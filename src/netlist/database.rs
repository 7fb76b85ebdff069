//! The database: one open design, its tables, indexes, bus, and journal
//!
//! All tables, name indexes, the notification registry, and the change
//! journal are explicit state owned by one [`Database`] value with clear
//! init/teardown; nothing is process-global. Every structural mutation
//! goes through the methods here, which fire pre/post notifications and
//! journal records around the actual field writes. Mutations are direct
//! field writes, never staged transactions; once a destroy returns, the
//! handle is permanently invalid.

use super::flat::{BTerm, ITerm, Instance, Net};
use super::hier::{ModBTerm, ModITerm, ModInst, ModNet, Module};
use super::types::{InstFlags, IoType};
use crate::codec::{self, FileHeader, StreamReader, StreamWriter, SCHEMA_VERSION};
use crate::diff::{DiffContext, FieldDelta};
use crate::error::{Error, Result};
use crate::journal::{ChangeJournal, JournalAction};
use crate::notify::{MutationEvent, MutationOp, NetlistObserver, NotificationBus, ObjectKind};
use crate::storage::{Oid, SlabTable};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// One open design database.
pub struct Database {
    pub(crate) modules: SlabTable<Module>,
    pub(crate) instances: SlabTable<Instance>,
    pub(crate) nets: SlabTable<Net>,
    pub(crate) iterms: SlabTable<ITerm>,
    pub(crate) bterms: SlabTable<BTerm>,
    pub(crate) modinsts: SlabTable<ModInst>,
    pub(crate) modnets: SlabTable<ModNet>,
    pub(crate) moditerms: SlabTable<ModITerm>,
    pub(crate) modbterms: SlabTable<ModBTerm>,

    /// Database-scope name indexes, mirrors of the table contents.
    module_index: HashMap<String, Oid<Module>>,
    net_index: HashMap<String, Oid<Net>>,
    bterm_index: HashMap<String, Oid<BTerm>>,

    bus: NotificationBus,
    pub(crate) journal: ChangeJournal,
}

impl Database {
    /// An empty database.
    pub fn new() -> Self {
        Self {
            modules: SlabTable::new(),
            instances: SlabTable::new(),
            nets: SlabTable::new(),
            iterms: SlabTable::new(),
            bterms: SlabTable::new(),
            modinsts: SlabTable::new(),
            modnets: SlabTable::new(),
            moditerms: SlabTable::new(),
            modbterms: SlabTable::new(),
            module_index: HashMap::new(),
            net_index: HashMap::new(),
            bterm_index: HashMap::new(),
            bus: NotificationBus::new(),
            journal: ChangeJournal::new(),
        }
    }

    // ---- observers and change sets ----

    /// Register a mutation observer; dispatch order is registration order.
    pub fn register_observer(&mut self, observer: Box<dyn NetlistObserver>) {
        self.bus.register(observer);
    }

    /// Open an explicit change-set scope; mutations are journaled until
    /// [`end_eco`](Self::end_eco).
    pub fn begin_eco(&mut self) -> Result<()> {
        self.journal.begin()
    }

    /// Close the change-set scope, returning the recorded batch.
    pub fn end_eco(&mut self) -> Result<Vec<JournalAction>> {
        self.journal.end()
    }

    pub fn journal(&self) -> &ChangeJournal {
        &self.journal
    }

    // ---- read access ----

    pub fn module(&self, id: Oid<Module>) -> Result<&Module> {
        self.modules.get(id)
    }

    pub fn instance(&self, id: Oid<Instance>) -> Result<&Instance> {
        self.instances.get(id)
    }

    pub fn net(&self, id: Oid<Net>) -> Result<&Net> {
        self.nets.get(id)
    }

    pub fn iterm(&self, id: Oid<ITerm>) -> Result<&ITerm> {
        self.iterms.get(id)
    }

    pub fn bterm(&self, id: Oid<BTerm>) -> Result<&BTerm> {
        self.bterms.get(id)
    }

    pub fn mod_inst(&self, id: Oid<ModInst>) -> Result<&ModInst> {
        self.modinsts.get(id)
    }

    pub fn mod_net(&self, id: Oid<ModNet>) -> Result<&ModNet> {
        self.modnets.get(id)
    }

    pub fn mod_iterm(&self, id: Oid<ModITerm>) -> Result<&ModITerm> {
        self.moditerms.get(id)
    }

    pub fn mod_bterm(&self, id: Oid<ModBTerm>) -> Result<&ModBTerm> {
        self.modbterms.get(id)
    }

    pub fn instances(&self) -> &SlabTable<Instance> {
        &self.instances
    }

    pub fn nets(&self) -> &SlabTable<Net> {
        &self.nets
    }

    pub fn iterms(&self) -> &SlabTable<ITerm> {
        &self.iterms
    }

    pub fn modules(&self) -> &SlabTable<Module> {
        &self.modules
    }

    pub fn mod_insts(&self) -> &SlabTable<ModInst> {
        &self.modinsts
    }

    pub fn mod_nets(&self) -> &SlabTable<ModNet> {
        &self.modnets
    }

    pub fn mod_iterms(&self) -> &SlabTable<ModITerm> {
        &self.moditerms
    }

    pub fn mod_bterms(&self) -> &SlabTable<ModBTerm> {
        &self.modbterms
    }

    pub fn find_module(&self, name: &str) -> Option<Oid<Module>> {
        self.module_index.get(name).copied()
    }

    pub fn find_net(&self, name: &str) -> Option<Oid<Net>> {
        self.net_index.get(name).copied()
    }

    pub fn find_bterm(&self, name: &str) -> Option<Oid<BTerm>> {
        self.bterm_index.get(name).copied()
    }

    pub fn find_instance(&self, module: Oid<Module>, name: &str) -> Result<Option<Oid<Instance>>> {
        Ok(self.modules.get(module)?.inst_index.get(name).copied())
    }

    pub fn find_mod_inst(&self, module: Oid<Module>, name: &str) -> Result<Option<Oid<ModInst>>> {
        Ok(self.modules.get(module)?.modinst_index.get(name).copied())
    }

    pub fn find_mod_net(&self, module: Oid<Module>, name: &str) -> Result<Option<Oid<ModNet>>> {
        Ok(self.modules.get(module)?.modnet_index.get(name).copied())
    }

    pub fn find_mod_bterm(&self, module: Oid<Module>, name: &str) -> Result<Option<Oid<ModBTerm>>> {
        Ok(self.modules.get(module)?.modbterm_index.get(name).copied())
    }

    // ---- create ----

    pub fn create_module(&mut self, name: &str) -> Result<Oid<Module>> {
        if self.module_index.contains_key(name) {
            return Err(Error::NameCollision(format!("module {}", name)));
        }
        self.pre(ObjectKind::Module, 0, MutationOp::Create);
        let id = self.modules.create();
        self.modules.get_mut(id)?.name = name.to_string();
        self.module_index.insert(name.to_string(), id);
        self.post(ObjectKind::Module, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::Module,
            id: id.raw(),
        });
        debug!(module = name, id = id.raw(), "created module");
        Ok(id)
    }

    pub fn create_instance(&mut self, module: Oid<Module>, name: &str) -> Result<Oid<Instance>> {
        if self.modules.get(module)?.inst_index.contains_key(name) {
            return Err(Error::NameCollision(format!("instance {}", name)));
        }
        self.pre(ObjectKind::Instance, 0, MutationOp::Create);
        let id = self.instances.create();
        {
            let inst = self.instances.get_mut(id)?;
            inst.name = name.to_string();
            inst.module = module;
        }
        let mut insts = self.modules.get(module)?.insts;
        insts.push_front(&mut self.instances, id)?;
        let owner = self.modules.get_mut(module)?;
        owner.insts = insts;
        owner.inst_index.insert(name.to_string(), id);
        self.post(ObjectKind::Instance, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::Instance,
            id: id.raw(),
        });
        Ok(id)
    }

    pub fn create_iterm(&mut self, inst: Oid<Instance>, name: &str, io: IoType) -> Result<Oid<ITerm>> {
        self.instances.get(inst)?;
        self.pre(ObjectKind::ITerm, 0, MutationOp::Create);
        let id = self.iterms.create();
        {
            let pin = self.iterms.get_mut(id)?;
            pin.name = name.to_string();
            pin.inst = inst;
            pin.io = io;
        }
        let mut pins = self.instances.get(inst)?.iterms;
        pins.push_front(&mut self.iterms, id)?;
        self.instances.get_mut(inst)?.iterms = pins;
        self.post(ObjectKind::ITerm, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::ITerm,
            id: id.raw(),
        });
        Ok(id)
    }

    pub fn create_net(&mut self, name: &str) -> Result<Oid<Net>> {
        if self.net_index.contains_key(name) {
            return Err(Error::NameCollision(format!("net {}", name)));
        }
        self.pre(ObjectKind::Net, 0, MutationOp::Create);
        let id = self.nets.create();
        self.nets.get_mut(id)?.name = name.to_string();
        self.net_index.insert(name.to_string(), id);
        self.post(ObjectKind::Net, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::Net,
            id: id.raw(),
        });
        Ok(id)
    }

    pub fn create_bterm(&mut self, name: &str, io: IoType) -> Result<Oid<BTerm>> {
        if self.bterm_index.contains_key(name) {
            return Err(Error::NameCollision(format!("bterm {}", name)));
        }
        self.pre(ObjectKind::BTerm, 0, MutationOp::Create);
        let id = self.bterms.create();
        {
            let port = self.bterms.get_mut(id)?;
            port.name = name.to_string();
            port.io = io;
        }
        self.bterm_index.insert(name.to_string(), id);
        self.post(ObjectKind::BTerm, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::BTerm,
            id: id.raw(),
        });
        Ok(id)
    }

    /// Create a module instance of `master` inside `parent`, binding the
    /// master's back-pointer. A module may be instantiated at most once.
    pub fn create_mod_inst(
        &mut self,
        parent: Oid<Module>,
        master: Oid<Module>,
        name: &str,
    ) -> Result<Oid<ModInst>> {
        if self.modules.get(parent)?.modinst_index.contains_key(name) {
            return Err(Error::NameCollision(format!("modinst {}", name)));
        }
        if !self.modules.get(master)?.mod_inst.is_null() {
            return Err(Error::InvalidArgument(format!(
                "module {} is already instantiated",
                self.modules.get(master)?.name
            )));
        }
        self.pre(ObjectKind::ModInst, 0, MutationOp::Create);
        let id = self.modinsts.create();
        {
            let mi = self.modinsts.get_mut(id)?;
            mi.name = name.to_string();
            mi.parent = parent;
            mi.master = master;
        }
        let mut list = self.modules.get(parent)?.modinsts;
        list.push_front(&mut self.modinsts, id)?;
        let owner = self.modules.get_mut(parent)?;
        owner.modinsts = list;
        owner.modinst_index.insert(name.to_string(), id);
        self.modules.get_mut(master)?.mod_inst = id;
        self.post(ObjectKind::ModInst, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::ModInst,
            id: id.raw(),
        });
        Ok(id)
    }

    /// Create a port on a module instance. If the bound master has a
    /// boundary port of the same name, the two are linked both ways.
    pub fn create_mod_iterm(&mut self, inst: Oid<ModInst>, name: &str) -> Result<Oid<ModITerm>> {
        let master = self.modinsts.get(inst)?.master;
        self.pre(ObjectKind::ModITerm, 0, MutationOp::Create);
        let id = self.moditerms.create();
        {
            let mt = self.moditerms.get_mut(id)?;
            mt.name = name.to_string();
            mt.parent = inst;
        }
        let mut list = self.modinsts.get(inst)?.moditerms;
        list.push_front(&mut self.moditerms, id)?;
        self.modinsts.get_mut(inst)?.moditerms = list;

        if !master.is_null() {
            if let Some(&bterm) = self.modules.get(master)?.modbterm_index.get(name) {
                self.moditerms.get_mut(id)?.child_modbterm = bterm;
                self.modbterms.get_mut(bterm)?.moditerm = id;
            }
        }
        self.post(ObjectKind::ModITerm, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::ModITerm,
            id: id.raw(),
        });
        Ok(id)
    }

    pub fn create_mod_bterm(
        &mut self,
        module: Oid<Module>,
        name: &str,
        io: IoType,
    ) -> Result<Oid<ModBTerm>> {
        if self.modules.get(module)?.modbterm_index.contains_key(name) {
            return Err(Error::NameCollision(format!("modbterm {}", name)));
        }
        self.pre(ObjectKind::ModBTerm, 0, MutationOp::Create);
        let id = self.modbterms.create();
        {
            let bt = self.modbterms.get_mut(id)?;
            bt.name = name.to_string();
            bt.parent = module;
            bt.io = io;
        }
        let mut list = self.modules.get(module)?.modbterms;
        list.push_front(&mut self.modbterms, id)?;
        let owner = self.modules.get_mut(module)?;
        owner.modbterms = list;
        owner.modbterm_index.insert(name.to_string(), id);
        self.post(ObjectKind::ModBTerm, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::ModBTerm,
            id: id.raw(),
        });
        Ok(id)
    }

    pub fn create_mod_net(&mut self, module: Oid<Module>, name: &str) -> Result<Oid<ModNet>> {
        if self.modules.get(module)?.modnet_index.contains_key(name) {
            return Err(Error::NameCollision(format!("modnet {}", name)));
        }
        self.pre(ObjectKind::ModNet, 0, MutationOp::Create);
        let id = self.modnets.create();
        {
            let net = self.modnets.get_mut(id)?;
            net.name = name.to_string();
            net.parent = module;
        }
        let mut list = self.modules.get(module)?.modnets;
        list.push_front(&mut self.modnets, id)?;
        let owner = self.modules.get_mut(module)?;
        owner.modnets = list;
        owner.modnet_index.insert(name.to_string(), id);
        self.post(ObjectKind::ModNet, id.raw(), MutationOp::Create);
        self.journal.record(JournalAction::Create {
            kind: ObjectKind::ModNet,
            id: id.raw(),
        });
        Ok(id)
    }

    // ---- connect / disconnect ----

    /// Connect a leaf pin to a flat net. An existing connection is
    /// dropped first.
    pub fn connect_iterm(&mut self, iterm: Oid<ITerm>, net: Oid<Net>) -> Result<()> {
        self.nets.get(net)?;
        if !self.iterms.get(iterm)?.net.is_null() {
            self.disconnect_iterm(iterm)?;
        }
        let op = MutationOp::Connect { peer: net.raw() };
        self.pre(ObjectKind::ITerm, iterm.raw(), op);
        let mut pins = self.nets.get(net)?.iterms;
        pins.push_front(&mut self.iterms, iterm)?;
        self.nets.get_mut(net)?.iterms = pins;
        self.iterms.get_mut(iterm)?.net = net;
        self.post(ObjectKind::ITerm, iterm.raw(), op);
        self.journal.record(JournalAction::Connect {
            kind: ObjectKind::ITerm,
            id: iterm.raw(),
            peer: net.raw(),
        });
        Ok(())
    }

    pub fn disconnect_iterm(&mut self, iterm: Oid<ITerm>) -> Result<()> {
        let net = self.iterms.get(iterm)?.net;
        if net.is_null() {
            return Ok(());
        }
        let op = MutationOp::Disconnect { peer: net.raw() };
        self.pre(ObjectKind::ITerm, iterm.raw(), op);
        let mut pins = self.nets.get(net)?.iterms;
        pins.unlink(&mut self.iterms, iterm)?;
        self.nets.get_mut(net)?.iterms = pins;
        self.iterms.get_mut(iterm)?.net = Oid::NULL;
        self.post(ObjectKind::ITerm, iterm.raw(), op);
        self.journal.record(JournalAction::Disconnect {
            kind: ObjectKind::ITerm,
            id: iterm.raw(),
            peer: net.raw(),
        });
        Ok(())
    }

    pub fn connect_bterm(&mut self, bterm: Oid<BTerm>, net: Oid<Net>) -> Result<()> {
        self.nets.get(net)?;
        if !self.bterms.get(bterm)?.net.is_null() {
            self.disconnect_bterm(bterm)?;
        }
        let op = MutationOp::Connect { peer: net.raw() };
        self.pre(ObjectKind::BTerm, bterm.raw(), op);
        let mut ports = self.nets.get(net)?.bterms;
        ports.push_front(&mut self.bterms, bterm)?;
        self.nets.get_mut(net)?.bterms = ports;
        self.bterms.get_mut(bterm)?.net = net;
        self.post(ObjectKind::BTerm, bterm.raw(), op);
        self.journal.record(JournalAction::Connect {
            kind: ObjectKind::BTerm,
            id: bterm.raw(),
            peer: net.raw(),
        });
        Ok(())
    }

    pub fn disconnect_bterm(&mut self, bterm: Oid<BTerm>) -> Result<()> {
        let net = self.bterms.get(bterm)?.net;
        if net.is_null() {
            return Ok(());
        }
        let op = MutationOp::Disconnect { peer: net.raw() };
        self.pre(ObjectKind::BTerm, bterm.raw(), op);
        let mut ports = self.nets.get(net)?.bterms;
        ports.unlink(&mut self.bterms, bterm)?;
        self.nets.get_mut(net)?.bterms = ports;
        self.bterms.get_mut(bterm)?.net = Oid::NULL;
        self.post(ObjectKind::BTerm, bterm.raw(), op);
        self.journal.record(JournalAction::Disconnect {
            kind: ObjectKind::BTerm,
            id: bterm.raw(),
            peer: net.raw(),
        });
        Ok(())
    }

    /// Associate a leaf pin with a module net: the hierarchical side of
    /// the pin's connectivity, independent of its flat net.
    pub fn connect_iterm_hier(&mut self, iterm: Oid<ITerm>, mod_net: Oid<ModNet>) -> Result<()> {
        self.modnets.get(mod_net)?;
        if !self.iterms.get(iterm)?.mod_net.is_null() {
            self.disconnect_iterm_hier(iterm)?;
        }
        let op = MutationOp::Connect {
            peer: mod_net.raw(),
        };
        self.pre(ObjectKind::ITerm, iterm.raw(), op);
        let mut pins = self.modnets.get(mod_net)?.iterms;
        pins.push_front(&mut self.iterms, iterm)?;
        self.modnets.get_mut(mod_net)?.iterms = pins;
        self.iterms.get_mut(iterm)?.mod_net = mod_net;
        self.post(ObjectKind::ITerm, iterm.raw(), op);
        self.journal.record(JournalAction::Connect {
            kind: ObjectKind::ITerm,
            id: iterm.raw(),
            peer: mod_net.raw(),
        });
        Ok(())
    }

    pub fn disconnect_iterm_hier(&mut self, iterm: Oid<ITerm>) -> Result<()> {
        let mod_net = self.iterms.get(iterm)?.mod_net;
        if mod_net.is_null() {
            return Ok(());
        }
        let op = MutationOp::Disconnect {
            peer: mod_net.raw(),
        };
        self.pre(ObjectKind::ITerm, iterm.raw(), op);
        let mut pins = self.modnets.get(mod_net)?.iterms;
        pins.unlink(&mut self.iterms, iterm)?;
        self.modnets.get_mut(mod_net)?.iterms = pins;
        self.iterms.get_mut(iterm)?.mod_net = Oid::NULL;
        self.post(ObjectKind::ITerm, iterm.raw(), op);
        self.journal.record(JournalAction::Disconnect {
            kind: ObjectKind::ITerm,
            id: iterm.raw(),
            peer: mod_net.raw(),
        });
        Ok(())
    }

    /// Connect a module-instance port to a module net in the parent
    /// module's scope.
    pub fn connect_mod_iterm(&mut self, moditerm: Oid<ModITerm>, mod_net: Oid<ModNet>) -> Result<()> {
        let inst = self.moditerms.get(moditerm)?.parent;
        let parent = self.modinsts.get(inst)?.parent;
        if self.modnets.get(mod_net)?.parent != parent {
            return Err(Error::ConnectivityMismatch(
                "moditerm connects in the parent module's net scope".to_string(),
            ));
        }
        let op = MutationOp::Connect {
            peer: mod_net.raw(),
        };
        self.pre(ObjectKind::ModITerm, moditerm.raw(), op);
        let mut ports = self.modnets.get(mod_net)?.moditerms;
        ports.push_front(&mut self.moditerms, moditerm)?;
        self.modnets.get_mut(mod_net)?.moditerms = ports;
        self.moditerms.get_mut(moditerm)?.mod_net = mod_net;
        self.post(ObjectKind::ModITerm, moditerm.raw(), op);
        self.journal.record(JournalAction::Connect {
            kind: ObjectKind::ModITerm,
            id: moditerm.raw(),
            peer: mod_net.raw(),
        });
        Ok(())
    }

    /// Connect a boundary port to a module net inside its own module.
    pub fn connect_mod_bterm(&mut self, modbterm: Oid<ModBTerm>, mod_net: Oid<ModNet>) -> Result<()> {
        let parent = self.modbterms.get(modbterm)?.parent;
        if self.modnets.get(mod_net)?.parent != parent {
            return Err(Error::ConnectivityMismatch(
                "modbterm connects inside its own module".to_string(),
            ));
        }
        let op = MutationOp::Connect {
            peer: mod_net.raw(),
        };
        self.pre(ObjectKind::ModBTerm, modbterm.raw(), op);
        let mut ports = self.modnets.get(mod_net)?.modbterms;
        ports.push_front(&mut self.modbterms, modbterm)?;
        self.modnets.get_mut(mod_net)?.modbterms = ports;
        self.modbterms.get_mut(modbterm)?.mod_net = mod_net;
        self.post(ObjectKind::ModBTerm, modbterm.raw(), op);
        self.journal.record(JournalAction::Connect {
            kind: ObjectKind::ModBTerm,
            id: modbterm.raw(),
            peer: mod_net.raw(),
        });
        Ok(())
    }

    // ---- status ----

    pub fn set_inst_flags(&mut self, inst: Oid<Instance>, flags: InstFlags) -> Result<()> {
        if self.instances.get(inst)?.flags == flags {
            return Ok(());
        }
        self.pre(ObjectKind::Instance, inst.raw(), MutationOp::StatusChange);
        self.instances.get_mut(inst)?.flags = flags;
        self.post(ObjectKind::Instance, inst.raw(), MutationOp::StatusChange);
        self.journal.record(JournalAction::StatusChange {
            kind: ObjectKind::Instance,
            id: inst.raw(),
        });
        Ok(())
    }

    /// Rename an instance, keeping the owning module's name mirror in
    /// step.
    pub fn rename_instance(&mut self, inst: Oid<Instance>, name: &str) -> Result<()> {
        let (module, old_name) = {
            let rec = self.instances.get(inst)?;
            (rec.module, rec.name.clone())
        };
        if old_name == name {
            return Ok(());
        }
        if self.modules.get(module)?.inst_index.contains_key(name) {
            return Err(Error::NameCollision(format!("instance {}", name)));
        }
        self.pre(ObjectKind::Instance, inst.raw(), MutationOp::StatusChange);
        self.instances.get_mut(inst)?.name = name.to_string();
        let index = &mut self.modules.get_mut(module)?.inst_index;
        index.remove(&old_name);
        index.insert(name.to_string(), inst);
        self.post(ObjectKind::Instance, inst.raw(), MutationOp::StatusChange);
        self.journal.record(JournalAction::StatusChange {
            kind: ObjectKind::Instance,
            id: inst.raw(),
        });
        Ok(())
    }

    // ---- destroy ----

    /// Destroy a leaf pin, unlinking it from its instance, its flat net,
    /// and its module net.
    pub fn destroy_iterm(&mut self, iterm: Oid<ITerm>) -> Result<()> {
        self.pre(ObjectKind::ITerm, iterm.raw(), MutationOp::Destroy);
        self.disconnect_iterm(iterm)?;
        self.disconnect_iterm_hier(iterm)?;
        let inst = self.iterms.get(iterm)?.inst;
        if !inst.is_null() {
            let mut pins = self.instances.get(inst)?.iterms;
            pins.unlink(&mut self.iterms, iterm)?;
            self.instances.get_mut(inst)?.iterms = pins;
        }
        self.iterms.destroy(iterm)?;
        self.post(ObjectKind::ITerm, iterm.raw(), MutationOp::Destroy);
        self.journal.record(JournalAction::Destroy {
            kind: ObjectKind::ITerm,
            id: iterm.raw(),
        });
        Ok(())
    }

    /// Destroy an instance and all of its pins.
    pub fn destroy_instance(&mut self, inst: Oid<Instance>) -> Result<()> {
        self.pre(ObjectKind::Instance, inst.raw(), MutationOp::Destroy);
        let pins: Vec<_> = {
            let rec = self.instances.get(inst)?;
            rec.iterms.iter(&self.iterms).collect()
        };
        for pin in pins {
            self.destroy_iterm(pin)?;
        }
        let (module, name) = {
            let rec = self.instances.get(inst)?;
            (rec.module, rec.name.clone())
        };
        let mut insts = self.modules.get(module)?.insts;
        insts.unlink(&mut self.instances, inst)?;
        let owner = self.modules.get_mut(module)?;
        owner.insts = insts;
        owner.inst_index.remove(&name);
        self.instances.destroy(inst)?;
        self.post(ObjectKind::Instance, inst.raw(), MutationOp::Destroy);
        self.journal.record(JournalAction::Destroy {
            kind: ObjectKind::Instance,
            id: inst.raw(),
        });
        Ok(())
    }

    /// Destroy a flat net. Connected terminals are disconnected, not
    /// destroyed.
    pub fn destroy_net(&mut self, net: Oid<Net>) -> Result<()> {
        self.pre(ObjectKind::Net, net.raw(), MutationOp::Destroy);
        let pins: Vec<_> = self.nets.get(net)?.iterms.iter(&self.iterms).collect();
        for pin in pins {
            self.disconnect_iterm(pin)?;
        }
        let ports: Vec<_> = self.nets.get(net)?.bterms.iter(&self.bterms).collect();
        for port in ports {
            self.disconnect_bterm(port)?;
        }
        let name = self.nets.get(net)?.name.clone();
        self.net_index.remove(&name);
        self.nets.destroy(net)?;
        self.post(ObjectKind::Net, net.raw(), MutationOp::Destroy);
        self.journal.record(JournalAction::Destroy {
            kind: ObjectKind::Net,
            id: net.raw(),
        });
        Ok(())
    }

    /// Destroy a module net. Connected pins and ports fall back to
    /// no hierarchical connection.
    pub fn destroy_mod_net(&mut self, mod_net: Oid<ModNet>) -> Result<()> {
        self.pre(ObjectKind::ModNet, mod_net.raw(), MutationOp::Destroy);
        let pins: Vec<_> = self.modnets.get(mod_net)?.iterms.iter(&self.iterms).collect();
        for pin in pins {
            self.disconnect_iterm_hier(pin)?;
        }
        let rec = self.modnets.get(mod_net)?;
        let moditerm_ids: Vec<_> = rec.moditerms.iter(&self.moditerms).collect();
        let modbterm_ids: Vec<_> = rec.modbterms.iter(&self.modbterms).collect();
        for id in moditerm_ids {
            self.moditerms.get_mut(id)?.mod_net = Oid::NULL;
            self.moditerms.get_mut(id)?.mod_net_next = Oid::NULL;
        }
        for id in modbterm_ids {
            self.modbterms.get_mut(id)?.mod_net = Oid::NULL;
            self.modbterms.get_mut(id)?.mod_net_next = Oid::NULL;
        }
        let (parent, name) = {
            let rec = self.modnets.get(mod_net)?;
            (rec.parent, rec.name.clone())
        };
        let mut list = self.modules.get(parent)?.modnets;
        list.unlink(&mut self.modnets, mod_net)?;
        let owner = self.modules.get_mut(parent)?;
        owner.modnets = list;
        owner.modnet_index.remove(&name);
        self.modnets.destroy(mod_net)?;
        self.post(ObjectKind::ModNet, mod_net.raw(), MutationOp::Destroy);
        self.journal.record(JournalAction::Destroy {
            kind: ObjectKind::ModNet,
            id: mod_net.raw(),
        });
        Ok(())
    }

    /// Destroy a module instance and its ports, unbinding the master.
    pub fn destroy_mod_inst(&mut self, inst: Oid<ModInst>) -> Result<()> {
        self.pre(ObjectKind::ModInst, inst.raw(), MutationOp::Destroy);
        let ports: Vec<_> = {
            let rec = self.modinsts.get(inst)?;
            rec.moditerms.iter(&self.moditerms).collect()
        };
        for port in ports {
            let (mod_net, bound) = {
                let rec = self.moditerms.get(port)?;
                (rec.mod_net, rec.child_modbterm)
            };
            if !mod_net.is_null() {
                let mut list = self.modnets.get(mod_net)?.moditerms;
                list.unlink(&mut self.moditerms, port)?;
                self.modnets.get_mut(mod_net)?.moditerms = list;
            }
            if !bound.is_null() {
                self.modbterms.get_mut(bound)?.moditerm = Oid::NULL;
            }
            self.moditerms.destroy(port)?;
        }
        let (parent, master, name) = {
            let rec = self.modinsts.get(inst)?;
            (rec.parent, rec.master, rec.name.clone())
        };
        if !master.is_null() {
            self.modules.get_mut(master)?.mod_inst = Oid::NULL;
        }
        let mut list = self.modules.get(parent)?.modinsts;
        list.unlink(&mut self.modinsts, inst)?;
        let owner = self.modules.get_mut(parent)?;
        owner.modinsts = list;
        owner.modinst_index.remove(&name);
        self.modinsts.destroy(inst)?;
        self.post(ObjectKind::ModInst, inst.raw(), MutationOp::Destroy);
        self.journal.record(JournalAction::Destroy {
            kind: ObjectKind::ModInst,
            id: inst.raw(),
        });
        Ok(())
    }

    // ---- persistence ----

    /// Serialize the whole database at the current schema version.
    pub fn save(&self) -> Vec<u8> {
        let mut w = StreamWriter::current();
        codec::put_table(&mut w, &self.modules);
        codec::put_table(&mut w, &self.instances);
        codec::put_table(&mut w, &self.nets);
        codec::put_table(&mut w, &self.iterms);
        codec::put_table(&mut w, &self.bterms);
        codec::put_table(&mut w, &self.modinsts);
        codec::put_table(&mut w, &self.modnets);
        codec::put_table(&mut w, &self.moditerms);
        codec::put_table(&mut w, &self.modbterms);

        let body = w.into_bytes();
        let mut out = Vec::with_capacity(FileHeader::LEN + body.len());
        FileHeader {
            version: SCHEMA_VERSION,
        }
        .write(&mut out);
        out.extend_from_slice(&body);
        info!(bytes = out.len(), "database serialized");
        out
    }

    /// Deserialize a database, accepting any schema version up to the
    /// current one and rebuilding the name indexes.
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let (header, body) = FileHeader::parse(bytes)?;
        let mut r = StreamReader::new(body, header.version);
        let mut db = Self {
            modules: codec::get_table(&mut r)?,
            instances: codec::get_table(&mut r)?,
            nets: codec::get_table(&mut r)?,
            iterms: codec::get_table(&mut r)?,
            bterms: codec::get_table(&mut r)?,
            modinsts: codec::get_table(&mut r)?,
            modnets: codec::get_table(&mut r)?,
            moditerms: codec::get_table(&mut r)?,
            modbterms: codec::get_table(&mut r)?,
            module_index: HashMap::new(),
            net_index: HashMap::new(),
            bterm_index: HashMap::new(),
            bus: NotificationBus::new(),
            journal: ChangeJournal::new(),
        };
        db.rebuild_indexes()?;
        info!(version = header.version, "database loaded");
        Ok(db)
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.save())
            .map_err(|e| Error::Storage(format!("failed to write database file: {}", e)))
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())
            .map_err(|e| Error::Storage(format!("failed to read database file: {}", e)))?;
        Self::load(&bytes)
    }

    /// Rebuild every name index from the authoritative collections.
    fn rebuild_indexes(&mut self) -> Result<()> {
        self.module_index = self
            .modules
            .iter_live()
            .map(|(id, m)| (m.name.clone(), id))
            .collect();
        self.net_index = self
            .nets
            .iter_live()
            .map(|(id, n)| (n.name.clone(), id))
            .collect();
        self.bterm_index = self
            .bterms
            .iter_live()
            .map(|(id, b)| (b.name.clone(), id))
            .collect();

        let module_ids: Vec<_> = self.modules.iter_live().map(|(id, _)| id).collect();
        for mid in module_ids {
            let m = self.modules.get(mid)?;
            let (insts, modinsts, modnets, modbterms) =
                (m.insts, m.modinsts, m.modnets, m.modbterms);

            let mut inst_index = HashMap::new();
            for id in insts.iter(&self.instances) {
                inst_index.insert(self.instances.get(id)?.name.clone(), id);
            }
            let mut modinst_index = HashMap::new();
            for id in modinsts.iter(&self.modinsts) {
                modinst_index.insert(self.modinsts.get(id)?.name.clone(), id);
            }
            let mut modnet_index = HashMap::new();
            for id in modnets.iter(&self.modnets) {
                modnet_index.insert(self.modnets.get(id)?.name.clone(), id);
            }
            let mut modbterm_index = HashMap::new();
            for id in modbterms.iter(&self.modbterms) {
                modbterm_index.insert(self.modbterms.get(id)?.name.clone(), id);
            }

            let m = self.modules.get_mut(mid)?;
            m.inst_index = inst_index;
            m.modinst_index = modinst_index;
            m.modnet_index = modnet_index;
            m.modbterm_index = modbterm_index;
        }
        Ok(())
    }

    // ---- diff ----

    /// Field-level differences against another database, canonically
    /// ordered. Records are matched by stable hierarchical name keys, so
    /// storage order never shows up as a difference.
    pub fn differences(&self, other: &Database) -> Vec<FieldDelta> {
        let mut cx = DiffContext::new(true);
        self.diff_into(other, &mut cx);
        cx.into_deltas()
    }

    /// Symmetric equality over the full object model.
    pub fn equal(&self, other: &Database) -> bool {
        let mut cx = DiffContext::new(false);
        self.diff_into(other, &mut cx);
        cx.is_empty()
    }

    fn diff_into(&self, other: &Database, cx: &mut DiffContext) {
        cx.keyed_set_by(
            "modules",
            self.modules.iter_live().map(|(_, m)| m),
            other.modules.iter_live().map(|(_, m)| m),
            |m| m.name.clone(),
        );
        cx.keyed_set_by(
            "instances",
            self.instances.iter_live().map(|(_, i)| i),
            other.instances.iter_live().map(|(_, i)| i),
            |i| self.instance_path(i),
        );
        cx.keyed_set_by(
            "nets",
            self.nets.iter_live().map(|(_, n)| n),
            other.nets.iter_live().map(|(_, n)| n),
            |n| n.name.clone(),
        );
        cx.keyed_set_by(
            "iterms",
            self.iterms.iter_live().map(|(_, t)| t),
            other.iterms.iter_live().map(|(_, t)| t),
            |t| format!("{}/{}", t.inst.raw(), t.name),
        );
        cx.keyed_set_by(
            "bterms",
            self.bterms.iter_live().map(|(_, b)| b),
            other.bterms.iter_live().map(|(_, b)| b),
            |b| b.name.clone(),
        );
        cx.keyed_set_by(
            "modinsts",
            self.modinsts.iter_live().map(|(_, i)| i),
            other.modinsts.iter_live().map(|(_, i)| i),
            |i| format!("{}/{}", i.parent.raw(), i.name),
        );
        cx.keyed_set_by(
            "modnets",
            self.modnets.iter_live().map(|(_, n)| n),
            other.modnets.iter_live().map(|(_, n)| n),
            |n| format!("{}/{}", n.parent.raw(), n.name),
        );
        cx.keyed_set_by(
            "moditerms",
            self.moditerms.iter_live().map(|(_, t)| t),
            other.moditerms.iter_live().map(|(_, t)| t),
            |t| format!("{}/{}", t.parent.raw(), t.name),
        );
        cx.keyed_set_by(
            "modbterms",
            self.modbterms.iter_live().map(|(_, b)| b),
            other.modbterms.iter_live().map(|(_, b)| b),
            |b| format!("{}/{}", b.parent.raw(), b.name),
        );
    }

    fn instance_path(&self, inst: &Instance) -> String {
        let module_name = self
            .modules
            .get(inst.module)
            .map(|m| m.name.as_str())
            .unwrap_or("?");
        format!("{}/{}", module_name, inst.name)
    }

    // ---- notification plumbing ----

    pub(crate) fn pre(&mut self, kind: ObjectKind, id: u32, op: MutationOp) {
        self.bus.emit_pre(&MutationEvent { kind, id, op });
    }

    pub(crate) fn post(&mut self, kind: ObjectKind, id: u32, op: MutationOp) {
        self.bus.emit_post(&MutationEvent { kind, id, op });
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalAction;

    fn tiny_db() -> Result<(Database, Oid<Module>, Oid<Instance>, Oid<Net>)> {
        let mut db = Database::new();
        let top = db.create_module("top")?;
        let inst = db.create_instance(top, "u1")?;
        let net = db.create_net("n1")?;
        let a = db.create_iterm(inst, "a", IoType::Input)?;
        db.connect_iterm(a, net)?;
        Ok((db, top, inst, net))
    }

    #[test]
    fn test_create_and_lookup() -> Result<()> {
        let (db, top, inst, net) = tiny_db()?;
        assert_eq!(db.find_module("top"), Some(top));
        assert_eq!(db.find_instance(top, "u1")?, Some(inst));
        assert_eq!(db.find_net("n1"), Some(net));
        assert_eq!(db.module(top)?.insts.len(&db.instances), 1);
        Ok(())
    }

    #[test]
    fn test_name_collision() -> Result<()> {
        let (mut db, top, _, _) = tiny_db()?;
        assert!(matches!(
            db.create_instance(top, "u1"),
            Err(Error::NameCollision(_))
        ));
        Ok(())
    }

    #[test]
    fn test_connect_disconnect_maintains_lists() -> Result<()> {
        let (mut db, _, inst, net) = tiny_db()?;
        let pin = db.instance(inst)?.iterms.head();
        assert_eq!(db.iterm(pin)?.net, net);
        assert!(db.net(net)?.iterms.contains(&db.iterms, pin));

        db.disconnect_iterm(pin)?;
        assert!(db.iterm(pin)?.net.is_null());
        assert!(db.net(net)?.iterms.is_empty());
        Ok(())
    }

    #[test]
    fn test_reconnect_moves_pin() -> Result<()> {
        let (mut db, _, inst, net1) = tiny_db()?;
        let net2 = db.create_net("n2")?;
        let pin = db.instance(inst)?.iterms.head();
        db.connect_iterm(pin, net2)?;
        assert!(db.net(net1)?.iterms.is_empty());
        assert!(db.net(net2)?.iterms.contains(&db.iterms, pin));
        Ok(())
    }

    #[test]
    fn test_destroy_instance_unlinks_everything() -> Result<()> {
        let (mut db, top, inst, net) = tiny_db()?;
        let pin = db.instance(inst)?.iterms.head();
        db.destroy_instance(inst)?;
        assert!(db.instance(inst).is_err());
        assert!(db.iterm(pin).is_err());
        assert!(db.net(net)?.iterms.is_empty());
        assert_eq!(db.find_instance(top, "u1")?, None);
        Ok(())
    }

    #[test]
    fn test_rename_instance_keeps_mirror() -> Result<()> {
        let (mut db, top, inst, _) = tiny_db()?;
        db.rename_instance(inst, "u1_sized")?;
        assert_eq!(db.find_instance(top, "u1")?, None);
        assert_eq!(db.find_instance(top, "u1_sized")?, Some(inst));
        Ok(())
    }

    #[test]
    fn test_wrong_scope_hier_connect_rejected() -> Result<()> {
        let mut db = Database::new();
        let top = db.create_module("top")?;
        let gate = db.create_module("gate")?;
        let inst = db.create_mod_inst(top, gate, "u0")?;
        let port = db.create_mod_iterm(inst, "a")?;
        let bterm = db.create_mod_bterm(gate, "a", IoType::Input)?;
        // Inside gate; the moditerm may only connect in top's scope.
        let inner = db.create_mod_net(gate, "a_int")?;
        assert!(matches!(
            db.connect_mod_iterm(port, inner),
            Err(Error::ConnectivityMismatch(_))
        ));
        // In top's scope; the modbterm may only connect inside gate.
        let outer = db.create_mod_net(top, "a_top")?;
        assert!(matches!(
            db.connect_mod_bterm(bterm, outer),
            Err(Error::ConnectivityMismatch(_))
        ));
        Ok(())
    }

    #[test]
    fn test_eco_scope_records_actions() -> Result<()> {
        let (mut db, _, inst, _) = tiny_db()?;
        db.begin_eco()?;
        db.set_inst_flags(inst, InstFlags::DONT_TOUCH)?;
        let net = db.create_net("eco_net")?;
        let batch = db.end_eco()?;
        assert_eq!(
            batch,
            vec![
                JournalAction::StatusChange {
                    kind: ObjectKind::Instance,
                    id: inst.raw(),
                },
                JournalAction::Create {
                    kind: ObjectKind::Net,
                    id: net.raw(),
                },
            ]
        );
        Ok(())
    }

    #[test]
    fn test_database_self_diff_empty() -> Result<()> {
        let (db, _, _, _) = tiny_db()?;
        assert!(db.differences(&db).is_empty());
        assert!(db.equal(&db));
        Ok(())
    }

    #[test]
    fn test_database_diff_flags_delta() -> Result<()> {
        let (db, _, _, _) = tiny_db()?;
        let mut other = Database::load(&db.save())?;
        let inst = other.find_instance(other.find_module("top").unwrap(), "u1")?.unwrap();
        other.set_inst_flags(inst, InstFlags::DONT_TOUCH)?;
        let deltas = db.differences(&other);
        assert_eq!(deltas.len(), 2);
        assert!(deltas[0].path.starts_with("instances[top/u1]"));
        Ok(())
    }

    #[test]
    fn test_save_load_round_trip() -> Result<()> {
        let (db, top, inst, net) = tiny_db()?;
        let loaded = Database::load(&db.save())?;
        assert!(db.equal(&loaded));
        assert_eq!(loaded.find_module("top"), Some(top));
        assert_eq!(loaded.find_instance(top, "u1")?, Some(inst));
        assert_eq!(loaded.find_net("n1"), Some(net));
        // Indexes were rebuilt, not streamed.
        assert_eq!(loaded.module(top)?.inst_index.len(), 1);
        Ok(())
    }

    #[test]
    fn test_save_load_file_round_trip() -> Result<()> {
        let (db, _, _, _) = tiny_db()?;
        let path = std::env::temp_dir().join(format!("chipdb_test_{}.cdb", std::process::id()));
        db.save_to(&path)?;
        let loaded = Database::load_from(&path)?;
        assert!(db.equal(&loaded));
        std::fs::remove_file(path).ok();
        Ok(())
    }

    #[test]
    fn test_stale_handle_after_destroy() -> Result<()> {
        let (mut db, _, _, net) = tiny_db()?;
        db.destroy_net(net)?;
        match db.net(net) {
            Err(Error::InvalidHandle { kind, .. }) => assert_eq!(kind, "net"),
            other => panic!("expected InvalidHandle, got {:?}", other.map(|_| ())),
        }
        Ok(())
    }
}
