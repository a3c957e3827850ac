//! Runtime error types.

use crate::unit::UnitFormatError;

/// Errors that can occur while building a loader, resolving, loading, or
/// launching code units.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Qualified unit name absent from every bundle
    #[error("Code unit not found: {0}")]
    UnitNotFound(String),

    /// Bundle identifier or startup configuration is unusable
    #[error("Malformed configuration: {0}")]
    ConfigMalformed(String),

    /// I/O failure while copying a unit's bytes
    #[error("Failed to read code unit '{name}': {source}")]
    StreamRead {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Unit bytes do not form a valid unit image
    #[error("Invalid code unit '{name}': {source}")]
    UnitFormat {
        name: String,
        #[source]
        source: UnitFormatError,
    },

    /// Entry capability missing, unbound, or failed while running
    #[error("Entry '{name}' failed: {reason}")]
    EntryInvocation { name: String, reason: String },

    /// A second definition for an already-defined unit reached the cache
    #[error("Duplicate definition of code unit '{0}'")]
    DuplicateDefinition(String),

    /// Launcher argument that cannot be forwarded to an entry
    #[error("Invalid launcher argument: {0}")]
    InvalidArgument(String),

    /// Container payload absent, truncated, or corrupt
    #[error("Container error: {0}")]
    Container(String),

    /// File I/O error
    #[error("{0}")]
    Io(#[from] std::io::Error),
}
