//! End-to-end swap scenarios: swap a module instance's master, then run
//! the consistency checker and assert on the resulting findings.

use anyhow::Result;
use chipdb::error::Error;
use chipdb::netlist::types::IoType;
use chipdb::{run_sanity_check, Database, Severity};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A two-input gate module with ports a/b (input) and z (output), each
/// boundary port wired to its own internal module net.
fn gate_module(db: &mut Database, name: &str) -> Result<chipdb::Oid<chipdb::netlist::Module>> {
    let module = db.create_module(name)?;
    for (port, io) in [
        ("a", IoType::Input),
        ("b", IoType::Input),
        ("z", IoType::Output),
    ] {
        let bterm = db.create_mod_bterm(module, port, io)?;
        let net = db.create_mod_net(module, &format!("{}_int", port))?;
        db.connect_mod_bterm(bterm, net)?;
    }
    Ok(module)
}

#[test]
fn test_equivalent_swap_is_clean() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let old = gate_module(&mut db, "and2_x1")?;
    let new = gate_module(&mut db, "and2_x2")?;

    let inst = db.create_mod_inst(top, old, "u_and")?;
    db.create_mod_iterm(inst, "a")?;
    db.create_mod_iterm(inst, "b")?;
    db.create_mod_iterm(inst, "z")?;

    db.swap_master(inst, new)?;
    let report = run_sanity_check(&db, inst, old)?;

    assert!(report.is_empty(), "unexpected findings: {:?}", report.findings());
    assert!(!report.failed());
    assert_eq!(report.certify()?, 0);
    Ok(())
}

#[test]
fn test_missing_boundary_port_fails() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let old = gate_module(&mut db, "and2_x1")?;

    // Replacement is missing the b and z ports entirely.
    let stripped = db.create_module("and2_stripped")?;
    let bterm = db.create_mod_bterm(stripped, "a", IoType::Input)?;
    let net = db.create_mod_net(stripped, "a_int")?;
    db.connect_mod_bterm(bterm, net)?;

    let inst = db.create_mod_inst(top, old, "u_and")?;
    db.create_mod_iterm(inst, "a")?;
    db.create_mod_iterm(inst, "b")?;
    db.create_mod_iterm(inst, "z")?;

    db.swap_master(inst, stripped)?;
    let report = run_sanity_check(&db, inst, old)?;

    assert!(report.failed());
    // Two unmatched ports plus the count mismatch.
    assert_eq!(report.error_count(), 3);
    let unmatched = report
        .findings()
        .iter()
        .filter(|f| f.pass == "ports" && f.message.contains("no boundary port"))
        .count();
    assert_eq!(unmatched, 2);
    assert!(matches!(
        report.certify(),
        Err(Error::CheckFailed { errors: 3, .. })
    ));
    Ok(())
}

#[test]
fn test_direction_change_is_warning() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let old = gate_module(&mut db, "and2_x1")?;

    // Same port names, but z flipped to an input.
    let flipped = db.create_module("and2_flipped")?;
    for (port, io) in [
        ("a", IoType::Input),
        ("b", IoType::Input),
        ("z", IoType::Input),
    ] {
        let bterm = db.create_mod_bterm(flipped, port, io)?;
        let net = db.create_mod_net(flipped, &format!("{}_int", port))?;
        db.connect_mod_bterm(bterm, net)?;
    }

    let inst = db.create_mod_inst(top, old, "u_and")?;
    db.create_mod_iterm(inst, "a")?;
    db.create_mod_iterm(inst, "b")?;
    db.create_mod_iterm(inst, "z")?;

    db.swap_master(inst, flipped)?;
    let report = run_sanity_check(&db, inst, old)?;

    assert!(!report.failed());
    assert_eq!(report.warning_count(), 1);
    let finding = &report.findings()[0];
    assert_eq!(finding.severity, Severity::Warning);
    assert!(finding.message.contains("z"));
    assert!(finding.message.contains("direction"));
    Ok(())
}

#[test]
fn test_combinational_loop_reports_cycle() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let ring = db.create_module("ring")?;
    let inst = db.create_mod_inst(top, ring, "u_ring")?;

    // g1.o -> g2.i, g2.o -> g3.i, g3.o -> g1.i
    let mut pins = Vec::new();
    for name in ["g1", "g2", "g3"] {
        let leaf = db.create_instance(ring, name)?;
        let i = db.create_iterm(leaf, "i", IoType::Input)?;
        let o = db.create_iterm(leaf, "o", IoType::Output)?;
        pins.push((i, o));
    }
    for k in 0..3 {
        let net = db.create_net(&format!("n{}", k))?;
        db.connect_iterm(pins[k].1, net)?;
        db.connect_iterm(pins[(k + 1) % 3].0, net)?;
    }

    let report = run_sanity_check(&db, inst, ring)?;

    let loops: Vec<_> = report
        .findings()
        .iter()
        .filter(|f| f.pass == "loop")
        .collect();
    assert_eq!(loops.len(), 1, "findings: {:?}", report.findings());
    assert_eq!(loops[0].severity, Severity::Error);
    for name in ["g1", "g2", "g3"] {
        assert!(loops[0].message.contains(name));
    }
    assert!(loops[0].message.contains(" -> "));
    assert!(report.failed());
    assert!(matches!(
        report.certify(),
        Err(Error::CombinationalLoop(_))
    ));
    Ok(())
}

#[test]
fn test_acyclic_chain_has_no_loop_finding() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let chain = db.create_module("chain")?;
    let inst = db.create_mod_inst(top, chain, "u_chain")?;

    let mut prev_out = None;
    for name in ["s1", "s2", "s3"] {
        let leaf = db.create_instance(chain, name)?;
        let i = db.create_iterm(leaf, "i", IoType::Input)?;
        let o = db.create_iterm(leaf, "o", IoType::Output)?;
        if let Some(out) = prev_out {
            let net = db.create_net(&format!("w_{}", name))?;
            db.connect_iterm(out, net)?;
            db.connect_iterm(i, net)?;
        }
        prev_out = Some(o);
    }

    let report = run_sanity_check(&db, inst, chain)?;
    assert!(report.findings().iter().all(|f| f.pass != "loop"));
    assert!(!report.failed());
    Ok(())
}

#[test]
fn test_floating_module_net_is_warning() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let master = db.create_module("leaf")?;
    let inst = db.create_mod_inst(top, master, "u0")?;
    db.create_mod_net(master, "floating")?;

    let report = run_sanity_check(&db, inst, master)?;

    assert_eq!(report.warning_count(), 1);
    assert_eq!(report.error_count(), 0);
    assert!(report.findings()[0].message.contains("floating"));
    assert_eq!(report.certify()?, 1);
    Ok(())
}

#[test]
fn test_stale_handle_is_invalid_handle_error() -> Result<()> {
    init_logging();
    let mut db = Database::new();
    let module = db.create_module("top")?;
    let inst = db.create_instance(module, "u1")?;
    db.destroy_instance(inst)?;

    match db.instance(inst) {
        Err(Error::InvalidHandle { kind, id }) => {
            assert_eq!(kind, "instance");
            assert_eq!(id, inst.raw());
        }
        other => panic!("expected InvalidHandle, got {:?}", other.map(|_| ())),
    }
    Ok(())
}
