//! Crate-wide error type.
//!
//! `spec.md` §7 names three error kinds: format violations (malformed DWARF),
//! constraint violations (relocation/version/size mismatches) and resource
//! errors (I/O, allocation). All three are fatal at the point of detection;
//! there is no retry. The two non-fatal warning paths (`DW_FORM_string`
//! comp_dir overflow, unreferenced `.debug_str_offsets` entries) are emitted
//! via `tracing::warn!` directly rather than through this type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed DWARF or ELF input: bad version, unknown form, truncated
    /// unit, duplicate abbreviation code, and the like.
    #[error("{0}")]
    Format(String),

    /// Input obeys the format but violates a constraint this tool enforces:
    /// an unhandled relocation type, a pointer-size mismatch, a replacement
    /// string that would grow a fixed-size encoding.
    #[error("{0}")]
    Constraint(String),

    /// Allocation or I/O failure reading, writing, or resizing the object
    /// file or the source listing sink.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn format(msg: impl Into<String>) -> Error {
        Error::Format(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Error {
        Error::Constraint(msg.into())
    }
}
