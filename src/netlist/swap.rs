//! Master swap: rebind a module instance to a different module
//!
//! Replaces the module bound to a module instance with another module
//! that is expected to be behaviorally equivalent: the instance's ports
//! are rewired to the new module's boundary ports by name, and the
//! back-pointers of both the old and the new master are re-homed. The
//! result is not trusted until [`run_sanity_check`](super::check::run_sanity_check)
//! has certified it.

use super::database::Database;
use super::hier::{ModInst, Module};
use crate::error::{Error, Result};
use crate::journal::JournalAction;
use crate::notify::{MutationOp, ObjectKind};
use crate::storage::Oid;
use tracing::{debug, info};

impl Database {
    /// Swap the master of `inst` to `new_master`.
    ///
    /// Ports are matched by name; a port with no counterpart on the new
    /// master is left unbound for the checker to report. Fails without
    /// mutating when `new_master` is already instantiated elsewhere or a
    /// handle is stale.
    pub fn swap_master(&mut self, inst: Oid<ModInst>, new_master: Oid<Module>) -> Result<()> {
        let old_master = self.modinsts.get(inst)?.master;
        self.modules.get(new_master)?;
        if old_master == new_master {
            debug!(inst = inst.raw(), "swap to identical master is a no-op");
            return Ok(());
        }
        let bound = self.modules.get(new_master)?.mod_inst;
        if !bound.is_null() && bound != inst {
            return Err(Error::InvalidArgument(format!(
                "module {} is already instantiated",
                self.modules.get(new_master)?.name
            )));
        }
        if !old_master.is_null() && self.modules.get(old_master)?.mod_inst != inst {
            return Err(Error::StructuralIntegrity(format!(
                "module {} does not point back to the instance being swapped",
                self.modules.get(old_master)?.name
            )));
        }

        self.journal.record(JournalAction::SwapMaster {
            inst: inst.raw(),
            old_master: old_master.raw(),
            new_master: new_master.raw(),
        });
        self.pre(ObjectKind::ModInst, inst.raw(), MutationOp::StatusChange);

        // Unbind the old master and its port back-links.
        if !old_master.is_null() {
            self.modules.get_mut(old_master)?.mod_inst = Oid::NULL;
        }
        let ports: Vec<_> = {
            let rec = self.modinsts.get(inst)?;
            rec.moditerms.iter(&self.moditerms).collect()
        };
        for port in &ports {
            let bound = self.moditerms.get(*port)?.child_modbterm;
            if !bound.is_null() {
                if let Ok(bterm) = self.modbterms.get_mut(bound) {
                    bterm.moditerm = Oid::NULL;
                }
            }
            self.moditerms.get_mut(*port)?.child_modbterm = Oid::NULL;
        }

        // Exchange masters.
        self.modinsts.get_mut(inst)?.master = new_master;
        self.modules.get_mut(new_master)?.mod_inst = inst;

        // Rewire ports to the new master's boundary ports by name.
        let mut rebound = 0usize;
        for port in &ports {
            let name = self.moditerms.get(*port)?.name.clone();
            let target = self
                .modules
                .get(new_master)?
                .modbterm_index
                .get(&name)
                .copied();
            if let Some(bterm) = target {
                self.moditerms.get_mut(*port)?.child_modbterm = bterm;
                self.modbterms.get_mut(bterm)?.moditerm = *port;
                rebound += 1;
            }
        }

        self.post(ObjectKind::ModInst, inst.raw(), MutationOp::StatusChange);
        info!(
            inst = inst.raw(),
            old_master = old_master.raw(),
            new_master = new_master.raw(),
            ports = ports.len(),
            rebound,
            "swapped master"
        );
        Ok(())
    }
}
