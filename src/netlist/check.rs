//! Post-swap consistency checker
//!
//! A fixed sequence of independent passes run immediately after a master
//! swap, before any other subsystem trusts the result. Each pass emits
//! zero or more findings classified warning (non-fatal, accumulated) or
//! error (fatal). All passes run to completion so one report shows every
//! problem; the only exception is the structural pass, whose failure
//! aborts the remaining passes because they would dereference invalid
//! state. Findings are logged through `tracing` as they are recorded.

use super::database::Database;
use super::hier::{ModInst, Module};
use crate::error::{Error, Result};
use crate::storage::Oid;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Pass name of the combinational-loop pass; its error findings carry the
/// cycle chain and are surfaced specially by [`CheckReport::certify`].
const LOOP_PASS: &str = "loop";

/// Finding classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    Warning,
    Error,
}

/// One checker finding: severity, originating pass, and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub pass: &'static str,
    pub message: String,
}

/// Aggregate result of one checker run.
#[derive(Debug, Default)]
pub struct CheckReport {
    findings: Vec<Finding>,
}

impl CheckReport {
    pub fn findings(&self) -> &[Finding] {
        &self.findings
    }

    pub fn len(&self) -> usize {
        self.findings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
            .count()
    }

    /// True when any error-class finding was recorded.
    pub fn failed(&self) -> bool {
        self.error_count() > 0
    }

    /// Findings as a JSON array, for external diagnostics tooling.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.findings)
            .map_err(|e| Error::Codec(format!("failed to serialize findings: {}", e)))
    }

    /// Total finding count on success. A combinational-loop finding is
    /// surfaced as `CombinationalLoop` carrying the cycle chain; any other
    /// error-class finding becomes `CheckFailed` with the complete tally.
    pub fn certify(&self) -> Result<usize> {
        if let Some(finding) = self
            .findings
            .iter()
            .find(|f| f.severity == Severity::Error && f.pass == LOOP_PASS)
        {
            return Err(Error::CombinationalLoop(finding.message.clone()));
        }
        if self.failed() {
            return Err(Error::CheckFailed {
                errors: self.error_count(),
                warnings: self.warning_count(),
            });
        }
        Ok(self.len())
    }

    fn warning(&mut self, pass: &'static str, message: String) {
        warn!(pass, "{}", message);
        self.findings.push(Finding {
            severity: Severity::Warning,
            pass,
            message,
        });
    }

    fn error(&mut self, pass: &'static str, message: String) {
        error!(pass, "{}", message);
        self.findings.push(Finding {
            severity: Severity::Error,
            pass,
            message,
        });
    }
}

/// Run the full pass sequence for `inst` after its master was swapped in
/// place of `source`.
///
/// Low-level handle failures mid-walk indicate corrupted storage and
/// surface immediately as errors; everything the checker can classify
/// becomes a finding instead.
pub fn run_sanity_check(
    db: &Database,
    inst: Oid<ModInst>,
    source: Oid<Module>,
) -> Result<CheckReport> {
    let mut report = CheckReport::default();

    if !structural_pass(db, inst, &mut report) {
        // Remaining passes would dereference invalid state.
        return Ok(report);
    }
    let (master, parent) = {
        let rec = db.modinsts.get(inst)?;
        (rec.master, rec.parent)
    };

    port_pass(db, inst, master, source, &mut report)?;
    hier_net_pass(db, master, &mut report)?;
    flat_net_pass(db, master, &mut report)?;
    hierarchy_pass(db, master, source, &mut report)?;
    mirror_pass(db, master, &mut report)?;
    dangling_pass(db, parent, &mut report)?;
    loop_pass(db, master, &mut report)?;

    info!(
        findings = report.len(),
        errors = report.error_count(),
        warnings = report.warning_count(),
        "sanity check complete"
    );
    Ok(report)
}

/// Pass 1: parent/master handles non-null, reverse pointers consistent,
/// parent name lookup resolves back. Returns false when any error was
/// recorded, aborting the dependent passes.
fn structural_pass(db: &Database, inst: Oid<ModInst>, report: &mut CheckReport) -> bool {
    const PASS: &str = "structural";
    let before = report.error_count();

    let rec = match db.modinsts.get(inst) {
        Ok(rec) => rec,
        Err(e) => {
            report.error(PASS, format!("module instance unresolvable: {}", e));
            return false;
        }
    };
    if rec.master.is_null() {
        report.error(PASS, format!("instance {} has no master", rec.name));
    } else {
        match db.modules.get(rec.master) {
            Ok(master) => {
                if master.mod_inst != inst {
                    report.error(
                        PASS,
                        format!(
                            "master {} does not point back to instance {}",
                            master.name, rec.name
                        ),
                    );
                }
            }
            Err(e) => report.error(PASS, format!("master unresolvable: {}", e)),
        }
    }
    if rec.parent.is_null() {
        report.error(PASS, format!("instance {} has no parent module", rec.name));
    } else {
        match db.modules.get(rec.parent) {
            Ok(parent) => {
                if parent.modinst_index.get(&rec.name) != Some(&inst) {
                    report.error(
                        PASS,
                        format!(
                            "parent {} name lookup does not resolve instance {}",
                            parent.name, rec.name
                        ),
                    );
                }
            }
            Err(e) => report.error(PASS, format!("parent unresolvable: {}", e)),
        }
    }

    report.error_count() == before
}

/// Pass 2: every moditerm maps to exactly one modbterm by name with a
/// correct back-link; port counts agree; direction changes against the
/// swapped-out module are warnings.
fn port_pass(
    db: &Database,
    inst: Oid<ModInst>,
    master: Oid<Module>,
    source: Oid<Module>,
    report: &mut CheckReport,
) -> Result<()> {
    const PASS: &str = "ports";
    let master_rec = db.modules.get(master)?;
    let source_rec = db.modules.get(source)?;
    let inst_rec = db.modinsts.get(inst)?;

    let mut moditerm_count = 0usize;
    for port in inst_rec.moditerms.iter(&db.moditerms) {
        moditerm_count += 1;
        let port_rec = db.moditerms.get(port)?;
        match master_rec.modbterm_index.get(&port_rec.name) {
            Some(&bterm) => {
                let bterm_rec = db.modbterms.get(bterm)?;
                if port_rec.child_modbterm != bterm {
                    report.error(
                        PASS,
                        format!("port {} is not bound to boundary port of the same name", port_rec.name),
                    );
                }
                if bterm_rec.moditerm != port {
                    report.error(
                        PASS,
                        format!("boundary port {} does not link back to port", bterm_rec.name),
                    );
                }
                if bterm_rec.parent != master {
                    report.error(
                        PASS,
                        format!("boundary port {} is owned by a different module", bterm_rec.name),
                    );
                }
                // Direction change against the swapped-out module is a
                // warning: behavior may still be compatible.
                if let Some(&old_bterm) = source_rec.modbterm_index.get(&port_rec.name) {
                    let old_io = db.modbterms.get(old_bterm)?.io;
                    if old_io != bterm_rec.io {
                        report.warning(
                            PASS,
                            format!(
                                "port {} changed direction: {} -> {}",
                                port_rec.name, old_io, bterm_rec.io
                            ),
                        );
                    }
                }
            }
            None => report.error(
                PASS,
                format!(
                    "port {} has no boundary port on module {}",
                    port_rec.name, master_rec.name
                ),
            ),
        }
    }

    let non_bus = master_rec
        .modbterms
        .iter(&db.modbterms)
        .filter(|&b| db.modbterms.get(b).map(|r| !r.bus).unwrap_or(false))
        .count();
    if moditerm_count != non_bus {
        report.error(
            PASS,
            format!(
                "port count mismatch: instance has {}, module {} has {} non-bus boundary port(s)",
                moditerm_count, master_rec.name, non_bus
            ),
        );
    }
    Ok(())
}

/// Pass 3: module-net parent pointers and bidirectional port links inside
/// the swapped-in module; floating nets and unconnected boundary ports
/// are warnings.
fn hier_net_pass(db: &Database, master: Oid<Module>, report: &mut CheckReport) -> Result<()> {
    const PASS: &str = "hier-net";
    let master_rec = db.modules.get(master)?;

    for net in master_rec.modnets.iter(&db.modnets) {
        let net_rec = db.modnets.get(net)?;
        if net_rec.parent != master {
            report.error(
                PASS,
                format!("module net {} has a wrong parent pointer", net_rec.name),
            );
        }
        for port in net_rec.moditerms.iter(&db.moditerms) {
            if db.moditerms.get(port)?.mod_net != net {
                report.error(
                    PASS,
                    format!("module net {} lists a port not connected to it", net_rec.name),
                );
            }
        }
        for bterm in net_rec.modbterms.iter(&db.modbterms) {
            if db.modbterms.get(bterm)?.mod_net != net {
                report.error(
                    PASS,
                    format!(
                        "module net {} lists a boundary port not connected to it",
                        net_rec.name
                    ),
                );
            }
        }
        let connections = net_rec.moditerms.len(&db.moditerms)
            + net_rec.modbterms.len(&db.modbterms)
            + net_rec.iterms.len(&db.iterms);
        if connections == 0 {
            report.warning(PASS, format!("module net {} has no connections", net_rec.name));
        }
    }

    for bterm in master_rec.modbterms.iter(&db.modbterms) {
        let bterm_rec = db.modbterms.get(bterm)?;
        if bterm_rec.mod_net.is_null() {
            report.warning(
                PASS,
                format!("boundary port {} has no internal net connection", bterm_rec.name),
            );
        }
    }

    // The opposite direction: a port that names a net must be on that
    // net's member list.
    for sub in master_rec.modinsts.iter(&db.modinsts) {
        let sub_rec = db.modinsts.get(sub)?;
        for port in sub_rec.moditerms.iter(&db.moditerms) {
            let port_rec = db.moditerms.get(port)?;
            if port_rec.mod_net.is_null() {
                continue;
            }
            let net_rec = db.modnets.get(port_rec.mod_net)?;
            if !net_rec.moditerms.contains(&db.moditerms, port) {
                report.error(
                    PASS,
                    format!(
                        "module net {} does not list connected port {}/{}",
                        net_rec.name, sub_rec.name, port_rec.name
                    ),
                );
            }
        }
    }
    Ok(())
}

/// Pass 4: leaf pins with a hierarchical connection must have flat-net
/// backing.
///
/// Policy: an output pin whose module net has no input consumer is a
/// dead-end producer and accepted as benign. This leniency is deliberate
/// and preserved from the original system; downstream consumers that
/// need stricter guarantees must check separately.
fn flat_net_pass(db: &Database, master: Oid<Module>, report: &mut CheckReport) -> Result<()> {
    const PASS: &str = "flat-net";
    let master_rec = db.modules.get(master)?;

    for inst in master_rec.insts.iter(&db.instances) {
        let inst_rec = db.instances.get(inst)?;
        for pin in inst_rec.iterms.iter(&db.iterms) {
            let pin_rec = db.iterms.get(pin)?;
            if pin_rec.mod_net.is_null() || !pin_rec.net.is_null() {
                continue;
            }
            let benign = pin_rec.io.is_output() && {
                let net_rec = db.modnets.get(pin_rec.mod_net)?;
                let mut has_consumer = false;
                for other in net_rec.iterms.iter(&db.iterms) {
                    if other != pin && db.iterms.get(other)?.io.is_input() {
                        has_consumer = true;
                        break;
                    }
                }
                !has_consumer
            };
            if !benign {
                report.error(
                    PASS,
                    format!(
                        "pin {}/{} has a hierarchical connection but no flat net",
                        inst_rec.name, pin_rec.name
                    ),
                );
            }
        }
    }
    Ok(())
}

/// Pass 5: owning-module pointers of every sub-instance, and count parity
/// against the swapped-out module (a proxy for nothing silently dropped).
fn hierarchy_pass(
    db: &Database,
    master: Oid<Module>,
    source: Oid<Module>,
    report: &mut CheckReport,
) -> Result<()> {
    const PASS: &str = "hierarchy";
    let master_rec = db.modules.get(master)?;
    let source_rec = db.modules.get(source)?;

    for inst in master_rec.insts.iter(&db.instances) {
        let inst_rec = db.instances.get(inst)?;
        if inst_rec.module != master {
            report.error(
                PASS,
                format!("leaf instance {} has a wrong owning module", inst_rec.name),
            );
        }
    }
    for sub in master_rec.modinsts.iter(&db.modinsts) {
        let sub_rec = db.modinsts.get(sub)?;
        if sub_rec.parent != master {
            report.error(
                PASS,
                format!("sub-instance {} has a wrong owning module", sub_rec.name),
            );
        }
    }

    let master_insts = master_rec.insts.len(&db.instances);
    let source_insts = source_rec.insts.len(&db.instances);
    if master_insts != source_insts {
        report.error(
            PASS,
            format!(
                "leaf instance count changed: {} -> {}",
                source_insts, master_insts
            ),
        );
    }
    let master_subs = master_rec.modinsts.len(&db.modinsts);
    let source_subs = source_rec.modinsts.len(&db.modinsts);
    if master_subs != source_subs {
        report.error(
            PASS,
            format!(
                "sub-module instance count changed: {} -> {}",
                source_subs, master_subs
            ),
        );
    }
    Ok(())
}

/// Pass 6: name-lookup mirrors must have the same cardinality as, and
/// resolve to the same objects as, the authoritative collections.
fn mirror_pass(db: &Database, master: Oid<Module>, report: &mut CheckReport) -> Result<()> {
    const PASS: &str = "hash-mirror";
    let master_rec = db.modules.get(master)?;

    let list_len = master_rec.insts.len(&db.instances);
    if master_rec.inst_index.len() != list_len {
        report.warning(
            PASS,
            format!(
                "instance index holds {} entries, list holds {}",
                master_rec.inst_index.len(),
                list_len
            ),
        );
    }
    for (name, &id) in &master_rec.inst_index {
        match db.instances.get(id) {
            Ok(rec) if rec.name == *name => {}
            _ => report.warning(PASS, format!("instance index entry {} is stale", name)),
        }
    }

    let list_len = master_rec.modinsts.len(&db.modinsts);
    if master_rec.modinst_index.len() != list_len {
        report.warning(
            PASS,
            format!(
                "modinst index holds {} entries, list holds {}",
                master_rec.modinst_index.len(),
                list_len
            ),
        );
    }
    for (name, &id) in &master_rec.modinst_index {
        match db.modinsts.get(id) {
            Ok(rec) if rec.name == *name => {}
            _ => report.warning(PASS, format!("modinst index entry {} is stale", name)),
        }
    }

    let list_len = master_rec.modnets.len(&db.modnets);
    if master_rec.modnet_index.len() != list_len {
        report.warning(
            PASS,
            format!(
                "modnet index holds {} entries, list holds {}",
                master_rec.modnet_index.len(),
                list_len
            ),
        );
    }
    for (name, &id) in &master_rec.modnet_index {
        match db.modnets.get(id) {
            Ok(rec) if rec.name == *name => {}
            _ => report.warning(PASS, format!("modnet index entry {} is stale", name)),
        }
    }

    let list_len = master_rec.modbterms.len(&db.modbterms);
    if master_rec.modbterm_index.len() != list_len {
        report.warning(
            PASS,
            format!(
                "modbterm index holds {} entries, list holds {}",
                master_rec.modbterm_index.len(),
                list_len
            ),
        );
    }
    for (name, &id) in &master_rec.modbterm_index {
        match db.modbterms.get(id) {
            Ok(rec) if rec.name == *name => {}
            _ => report.warning(PASS, format!("modbterm index entry {} is stale", name)),
        }
    }
    Ok(())
}

/// Pass 7: module nets in the parent scope with zero connections after
/// the swap.
fn dangling_pass(db: &Database, parent: Oid<Module>, report: &mut CheckReport) -> Result<()> {
    const PASS: &str = "dangling";
    let parent_rec = db.modules.get(parent)?;
    for net in parent_rec.modnets.iter(&db.modnets) {
        let net_rec = db.modnets.get(net)?;
        let connections = net_rec.moditerms.len(&db.moditerms)
            + net_rec.modbterms.len(&db.modbterms)
            + net_rec.iterms.len(&db.iterms);
        if connections == 0 {
            report.warning(
                PASS,
                format!("module net {} in parent scope has no connections", net_rec.name),
            );
        }
    }
    Ok(())
}

/// Pass 8: combinational-loop detection over the leaf instances of the
/// swapped-in module.
///
/// Builds a directed graph (edge A -> B when an output pin of A shares a
/// flat net with an input pin of B) and runs iterative depth-first
/// search with three-color marking on an explicit stack; the first back
/// edge found is reported with the full instance chain.
fn loop_pass(db: &Database, master: Oid<Module>, report: &mut CheckReport) -> Result<()> {
    let master_rec = db.modules.get(master)?;

    let insts: Vec<_> = master_rec.insts.iter(&db.instances).collect();
    let index_of: HashMap<u32, usize> = insts
        .iter()
        .enumerate()
        .map(|(i, id)| (id.raw(), i))
        .collect();

    let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); insts.len()];
    for (i, &inst) in insts.iter().enumerate() {
        let inst_rec = db.instances.get(inst)?;
        for pin in inst_rec.iterms.iter(&db.iterms) {
            let pin_rec = db.iterms.get(pin)?;
            if !pin_rec.io.is_output() || pin_rec.net.is_null() {
                continue;
            }
            let net_rec = db.nets.get(pin_rec.net)?;
            for sink in net_rec.iterms.iter(&db.iterms) {
                if sink == pin {
                    continue;
                }
                let sink_rec = db.iterms.get(sink)?;
                if !sink_rec.io.is_input() {
                    continue;
                }
                if let Some(&j) = index_of.get(&sink_rec.inst.raw()) {
                    if j != i {
                        adjacency[i].push(j);
                    }
                }
            }
        }
        adjacency[i].sort_unstable();
        adjacency[i].dedup();
    }

    const WHITE: u8 = 0;
    const GRAY: u8 = 1;
    const BLACK: u8 = 2;
    let mut color = vec![WHITE; insts.len()];

    for start in 0..insts.len() {
        if color[start] != WHITE {
            continue;
        }
        // Explicit stack: (node, next edge index). Deep netlists must not
        // recurse on the call stack.
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        let mut path: Vec<usize> = vec![start];
        color[start] = GRAY;

        while let Some(&mut (node, ref mut edge)) = stack.last_mut() {
            if *edge < adjacency[node].len() {
                let next = adjacency[node][*edge];
                *edge += 1;
                match color[next] {
                    WHITE => {
                        color[next] = GRAY;
                        stack.push((next, 0));
                        path.push(next);
                    }
                    GRAY => {
                        // Back edge: the cycle is the path suffix from
                        // the gray node.
                        if let Some(pos) = path.iter().position(|&p| p == next) {
                            let mut chain: Vec<&str> = Vec::new();
                            for &p in &path[pos..] {
                                chain.push(&db.instances.get(insts[p])?.name);
                            }
                            chain.push(&db.instances.get(insts[next])?.name);
                            report.error(LOOP_PASS, chain.join(" -> "));
                        }
                        return Ok(());
                    }
                    _ => {}
                }
            } else {
                color[node] = BLACK;
                stack.pop();
                path.pop();
            }
        }
    }
    Ok(())
}
