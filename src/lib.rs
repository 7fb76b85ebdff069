// ChipDB - Rust implementation
// Persistence and object-management kernel for IC physical design data

#![warn(rust_2018_idioms)]

pub mod codec;
pub mod diff;
pub mod journal;
pub mod netlist;
pub mod notify;
pub mod storage;

// Re-exports for convenience
pub use netlist::check::{run_sanity_check, CheckReport, Finding, Severity};
pub use netlist::database::Database;
pub use storage::{Oid, SlabTable};

/// ChipDB error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum Error {
        #[error("invalid handle {id} in {kind} table")]
        InvalidHandle { kind: &'static str, id: u32 },

        #[error("schema version {found} is newer than supported version {supported}")]
        SchemaVersionUnsupported { found: u32, supported: u32 },

        #[error("codec error: {0}")]
        Codec(String),

        #[error("storage error: {0}")]
        Storage(String),

        #[error("structural integrity violation: {0}")]
        StructuralIntegrity(String),

        #[error("connectivity mismatch: {0}")]
        ConnectivityMismatch(String),

        #[error("combinational loop: {0}")]
        CombinationalLoop(String),

        #[error("sanity check failed with {errors} error(s), {warnings} warning(s)")]
        CheckFailed { errors: usize, warnings: usize },

        #[error("name collision: {0}")]
        NameCollision(String),

        #[error("invalid argument: {0}")]
        InvalidArgument(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        let _version: &str = VERSION;
    }
}
