//! Persistence round trips, handle-space restoration, and legacy-version
//! streams.

use anyhow::{Context, Result};
use chipdb::codec::{FileHeader, StreamWriter, SCHEMA_VERSION};
use chipdb::error::Error;
use chipdb::netlist::types::IoType;
use chipdb::{Database, Oid};

fn build_design() -> Result<Database> {
    let mut db = Database::new();
    let top = db.create_module("top")?;
    let gate = db.create_module("and2_x1")?;
    for (port, io) in [
        ("a", IoType::Input),
        ("b", IoType::Input),
        ("z", IoType::Output),
    ] {
        let bterm = db.create_mod_bterm(gate, port, io)?;
        let net = db.create_mod_net(gate, &format!("{}_int", port))?;
        db.connect_mod_bterm(bterm, net)?;
    }
    let inst = db.create_mod_inst(top, gate, "u_and")?;
    db.create_mod_iterm(inst, "a")?;
    db.create_mod_iterm(inst, "b")?;
    db.create_mod_iterm(inst, "z")?;

    let driver = db.create_instance(top, "u_drv")?;
    let sink = db.create_instance(top, "u_snk")?;
    let out = db.create_iterm(driver, "o", IoType::Output)?;
    let inp = db.create_iterm(sink, "i", IoType::Input)?;
    let wire = db.create_net("w0")?;
    db.connect_iterm(out, wire)?;
    db.connect_iterm(inp, wire)?;

    let pad = db.create_bterm("pad_in", IoType::Input)?;
    db.connect_bterm(pad, wire)?;
    Ok(db)
}

#[test]
fn test_save_load_round_trip() -> Result<()> {
    let db = build_design()?;
    let bytes = db.save();
    let loaded = Database::load(&bytes)?;

    assert!(loaded.equal(&db), "deltas: {:?}", loaded.differences(&db));
    assert!(db.differences(&loaded).is_empty());

    let top = loaded
        .find_module("top")
        .context("top module lost across round trip")?;
    assert!(loaded.find_instance(top, "u_drv")?.is_some());
    assert!(loaded.find_mod_inst(top, "u_and")?.is_some());
    assert!(loaded.find_net("w0").is_some());
    assert!(loaded.find_bterm("pad_in").is_some());
    Ok(())
}

#[test]
fn test_destroyed_slot_stays_dead_across_round_trip() -> Result<()> {
    let mut db = build_design()?;
    let doomed = db.create_net("scratch")?;
    db.destroy_net(doomed)?;

    let loaded = Database::load(&db.save())?;
    assert!(matches!(
        loaded.net(doomed),
        Err(Error::InvalidHandle { kind: "net", .. })
    ));
    assert_eq!(loaded.nets().len(), db.nets().len());
    assert_eq!(loaded.nets().capacity(), db.nets().capacity());
    Ok(())
}

#[test]
fn test_file_round_trip() -> Result<()> {
    let db = build_design()?;
    let path = std::env::temp_dir().join(format!("chipdb_persist_{}.db", std::process::id()));
    db.save_to(&path)?;
    let loaded = Database::load_from(&path)?;
    let _ = std::fs::remove_file(&path);

    assert!(loaded.equal(&db));
    Ok(())
}

fn put_empty_table(w: &mut StreamWriter) {
    w.put_u32(0); // slot count
    w.put_u32(0); // live count
}

/// A hand-assembled v1 stream: one module with one boundary port (no bus
/// flag in v1), and one net carrying the split wire/via counters.
fn v1_stream() -> Vec<u8> {
    let mut w = StreamWriter::new(1);

    // modules: 1 slot, 1 live
    w.put_u32(1);
    w.put_u32(1);
    w.put_u32(1); // handle
    w.put_str("leaf");
    w.put_u32(0); // mod_inst
    w.put_u32(0); // insts head
    w.put_u32(0); // modinsts head
    w.put_u32(0); // modnets head
    w.put_u32(1); // modbterms head

    put_empty_table(&mut w); // instances

    // nets: 1 slot, 1 live
    w.put_u32(1);
    w.put_u32(1);
    w.put_u32(1); // handle
    w.put_str("clk");
    w.put_flags(0);
    w.put_u32(3); // wires
    w.put_u32(2); // vias
    w.put_u32(0); // iterms head
    w.put_u32(0); // bterms head

    put_empty_table(&mut w); // iterms
    put_empty_table(&mut w); // bterms
    put_empty_table(&mut w); // modinsts
    put_empty_table(&mut w); // modnets
    put_empty_table(&mut w); // moditerms

    // modbterms: 1 slot, 1 live
    w.put_u32(1);
    w.put_u32(1);
    w.put_u32(1); // handle
    w.put_str("a");
    w.put_u32(1); // parent
    w.put_u8(0); // io: input
    w.put_u32(0); // mod_net
    w.put_u32(0); // moditerm
    w.put_u32(0); // parent_next
    w.put_u32(0); // mod_net_next

    let mut out = Vec::new();
    FileHeader { version: 1 }.write(&mut out);
    out.extend_from_slice(&w.into_bytes());
    out
}

#[test]
fn test_v1_stream_legacy_fallbacks() -> Result<()> {
    let loaded = Database::load(&v1_stream())?;

    // Split wire/via counters fold into the compacted shape counter.
    let clk = loaded
        .find_net("clk")
        .context("clk net missing from v1 stream")?;
    assert_eq!(loaded.net(clk)?.shape_count, 5);

    // Bus flag did not exist in v1 and defaults off.
    let leaf = loaded
        .find_module("leaf")
        .context("leaf module missing from v1 stream")?;
    let port = loaded
        .find_mod_bterm(leaf, "a")?
        .context("boundary port missing from v1 stream")?;
    let rec = loaded.mod_bterm(port)?;
    assert!(!rec.bus);
    assert_eq!(rec.io, IoType::Input);

    // Saving again upgrades to the current schema version.
    let resaved = loaded.save();
    let (header, _) = FileHeader::parse(&resaved)?;
    assert_eq!(header.version, SCHEMA_VERSION);
    let reloaded = Database::load(&resaved)?;
    assert_eq!(reloaded.net(clk)?.shape_count, 5);
    Ok(())
}

#[test]
fn test_newer_version_rejected() {
    let mut out = Vec::new();
    FileHeader {
        version: SCHEMA_VERSION + 1,
    }
    .write(&mut out);
    match Database::load(&out) {
        Err(Error::SchemaVersionUnsupported { found, supported }) => {
            assert_eq!(found, SCHEMA_VERSION + 1);
            assert_eq!(supported, SCHEMA_VERSION);
        }
        other => panic!("expected version error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_truncated_body_is_codec_error() -> Result<()> {
    let db = build_design()?;
    let mut bytes = db.save();
    bytes.truncate(bytes.len() / 2);
    assert!(matches!(Database::load(&bytes), Err(Error::Codec(_))));
    Ok(())
}

#[test]
fn test_handles_stay_valid_across_round_trip() -> Result<()> {
    let mut db = Database::new();
    let module = db.create_module("top")?;
    let keep = db.create_instance(module, "u_keep")?;
    let drop1 = db.create_instance(module, "u_a")?;
    let drop2 = db.create_instance(module, "u_b")?;
    db.destroy_instance(drop2)?;
    db.destroy_instance(drop1)?;

    let mut loaded = Database::load(&db.save())?;
    assert_eq!(loaded.instance(keep)?.name, "u_keep");

    // Freed slots are recycled in ascending order after a load.
    let module = loaded
        .find_module("top")
        .context("top module lost across round trip")?;
    let next = loaded.create_instance(module, "u_c")?;
    assert_eq!(next, Oid::from_raw(drop1.raw().min(drop2.raw())));
    Ok(())
}
