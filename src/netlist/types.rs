//! Shared netlist value types and packed flag groups

use crate::codec::{StreamReader, StreamWriter};
use crate::error::{Error, Result};
use bitflags::bitflags;
use serde::Serialize;

/// Signal direction of a terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum IoType {
    #[default]
    Input,
    Output,
    InOut,
}

impl IoType {
    /// True for directions that consume a signal.
    pub fn is_input(self) -> bool {
        matches!(self, IoType::Input | IoType::InOut)
    }

    /// True for directions that drive a signal.
    pub fn is_output(self) -> bool {
        matches!(self, IoType::Output | IoType::InOut)
    }

    pub fn encode(self, w: &mut StreamWriter) {
        w.put_u8(match self {
            IoType::Input => 0,
            IoType::Output => 1,
            IoType::InOut => 2,
        });
    }

    pub fn decode(r: &mut StreamReader) -> Result<Self> {
        match r.get_u8()? {
            0 => Ok(IoType::Input),
            1 => Ok(IoType::Output),
            2 => Ok(IoType::InOut),
            other => Err(Error::Codec(format!("unknown io type tag {}", other))),
        }
    }
}

impl std::fmt::Display for IoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IoType::Input => "input",
            IoType::Output => "output",
            IoType::InOut => "inout",
        };
        write!(f, "{}", s)
    }
}

bitflags! {
    /// Instance status flags, packed into one word.
    ///
    /// Serialized and diffed as a single unit, never field-by-field; the
    /// binary format depends on the packed-word layout.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct InstFlags: u32 {
        const DONT_TOUCH = 1 << 0;
        const DONT_SIZE  = 1 << 1;
        const SIZE_ONLY  = 1 << 2;
        const LOCKED     = 1 << 3;
    }
}

bitflags! {
    /// Net status flags, packed into one word.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct NetFlags: u32 {
        const SPECIAL    = 1 << 0;
        const DONT_TOUCH = 1 << 1;
        const MARKED     = 1 << 2;
    }
}
