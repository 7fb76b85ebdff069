//! Versioned binary stream codec
//!
//! # Format
//!
//! ```text
//! File:
//! [magic "CHDB"][u32 schema version]
//! [table section]*
//!
//! Table section:
//! [u32 slot count][u32 live count]
//! [u32 handle][record payload]*      one entry per live record
//! ```
//!
//! All integers are little-endian. The schema version is carried by the
//! file header, not by individual records: both cursors are bound to one
//! version for their whole lifetime. Write always emits the layout of the
//! version the writer was opened with; read accepts any version up to
//! [`SCHEMA_VERSION`] and applies per-field legacy fallbacks inside the
//! record `decode` implementations.
//!
//! Field codecs are one of: plain value, packed flag word (one `u32`
//! written and compared as a unit), owned sub-table (nested count-prefixed
//! stream via [`put_table`]/[`get_table`]), or a read-only legacy
//! fallback for fields introduced after the stream's version.

use crate::error::{Error, Result};
use crate::storage::{Oid, SlabTable, TableRecord};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Current schema version. Monotonically increasing across releases.
///
/// v1: initial layout.
/// v2: `Net` wire/via counters compacted into one shape counter;
///     `ModBTerm` gained the bus flag.
pub const SCHEMA_VERSION: u32 = 2;

/// File magic, first four bytes of every persisted database.
pub const MAGIC: [u8; 4] = *b"CHDB";

/// Ordered binary read/write of one record.
pub trait Streamable: Sized {
    fn encode(&self, w: &mut StreamWriter);
    fn decode(r: &mut StreamReader) -> Result<Self>;
}

/// Write cursor bound to a schema version.
pub struct StreamWriter {
    buf: BytesMut,
    version: u32,
}

impl StreamWriter {
    /// Cursor emitting the layout of `version`.
    pub fn new(version: u32) -> Self {
        Self {
            buf: BytesMut::new(),
            version,
        }
    }

    /// Cursor for the current schema version.
    pub fn current() -> Self {
        Self::new(SCHEMA_VERSION)
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64_le(v);
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, v: &str) {
        self.buf.put_u32_le(v.len() as u32);
        self.buf.put_slice(v.as_bytes());
    }

    /// Handle as its raw slot number.
    pub fn put_oid<T>(&mut self, id: Oid<T>) {
        self.buf.put_u32_le(id.raw());
    }

    /// Packed flag group, byte-swapped as one word, never field-by-field.
    pub fn put_flags(&mut self, bits: u32) {
        self.buf.put_u32_le(bits);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Read cursor bound to the schema version the stream was written with.
pub struct StreamReader {
    buf: Bytes,
    version: u32,
}

impl StreamReader {
    pub fn new(buf: Bytes, version: u32) -> Self {
        Self { buf, version }
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(Error::Codec(format!(
                "truncated stream: need {} byte(s) for {}, {} left",
                n,
                what,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn get_u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn get_u32(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn get_i32(&mut self) -> Result<i32> {
        self.need(4, "i32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_str(&mut self) -> Result<String> {
        let len = self.get_u32()? as usize;
        self.need(len, "string payload")?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::Codec(format!("invalid UTF-8 in string field: {}", e)))
    }

    pub fn get_oid<T>(&mut self) -> Result<Oid<T>> {
        Ok(Oid::from_raw(self.get_u32()?))
    }

    pub fn get_flags(&mut self) -> Result<u32> {
        self.get_u32()
    }
}

/// Persisted file header: magic plus schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHeader {
    pub version: u32,
}

impl FileHeader {
    pub const LEN: usize = 8;

    pub fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
    }

    /// Parse and validate a header, returning it and the body bytes.
    ///
    /// Readers accept every version up to [`SCHEMA_VERSION`]; anything
    /// newer is fatal at load.
    pub fn parse(bytes: &[u8]) -> Result<(Self, Bytes)> {
        if bytes.len() < Self::LEN {
            return Err(Error::Codec(format!(
                "file too short for header: {} byte(s)",
                bytes.len()
            )));
        }
        if bytes[0..4] != MAGIC {
            return Err(Error::Codec("bad magic, not a ChipDB file".to_string()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version > SCHEMA_VERSION {
            return Err(Error::SchemaVersionUnsupported {
                found: version,
                supported: SCHEMA_VERSION,
            });
        }
        if version == 0 {
            return Err(Error::Codec("schema version 0 is reserved".to_string()));
        }
        Ok((Self { version }, Bytes::copy_from_slice(&bytes[Self::LEN..])))
    }
}

/// Write one table section: slot count, live count, then `(handle,
/// payload)` per live record in ascending handle order.
pub fn put_table<T>(w: &mut StreamWriter, table: &SlabTable<T>)
where
    T: TableRecord + Streamable,
{
    w.put_u32(table.capacity() as u32);
    w.put_u32(table.len() as u32);
    for (id, record) in table.iter_live() {
        w.put_oid(id);
        record.encode(w);
    }
}

/// Read one table section written by [`put_table`], restoring the full
/// handle space including recycled slots.
pub fn get_table<T>(r: &mut StreamReader) -> Result<SlabTable<T>>
where
    T: TableRecord + Streamable,
{
    let capacity = r.get_u32()? as usize;
    let live = r.get_u32()? as usize;
    if live > capacity {
        return Err(Error::Codec(format!(
            "{} section claims {} live records in {} slots",
            T::KIND,
            live,
            capacity
        )));
    }
    let mut table = SlabTable::new();
    for _ in 0..live {
        let id: Oid<T> = r.get_oid()?;
        let record = T::decode(r)?;
        table.insert_at(id, record)?;
    }
    table.pad_to(capacity);
    table.rebuild_free_list();
    Ok(table)
}
