//! Code unit image format and defined units.
//!
//! ```text
//! magic "SUNT" | version u32 LE | crc32 u32 LE | payload
//! payload = name    (u32 len + UTF-8)
//!         | entry   (u8 flag [+ u32 len + UTF-8])
//!         | body    (u32 len + bytes)
//! ```
//!
//! The CRC-32 covers the payload only.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::registry::{IsolationDomain, RESERVED_MARKER};

/// Magic number for unit images: "SUNT"
pub const UNIT_MAGIC: [u8; 4] = *b"SUNT";

/// Current unit image version
pub const UNIT_VERSION: u32 = 1;

/// File suffix appended to a unit's path inside a bundle.
pub const UNIT_SUFFIX: &str = ".unit";

const HEADER_SIZE: usize = 12;

/// Unit image encoding/decoding errors
#[derive(Debug, Error)]
pub enum UnitFormatError {
    /// Invalid magic number
    #[error("Invalid magic number: expected SUNT, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported version
    #[error("Unsupported version: {0} (current: {UNIT_VERSION})")]
    UnsupportedVersion(u32),

    /// Checksum mismatch
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// Image ended before a field was complete
    #[error("Unexpected end of image at offset {0}")]
    Truncated(usize),

    /// Bytes left over after the body
    #[error("{0} trailing bytes after unit body")]
    TrailingBytes(usize),

    /// A string field is not valid UTF-8
    #[error("Invalid UTF-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Declared name differs from the requested one
    #[error("Image declares unit '{declared}'")]
    NameMismatch { declared: String },
}

/// Serialized form of a code unit, as stored inside a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitImage {
    /// Qualified unit name (e.g. `com.example.Main`)
    pub name: String,
    /// Entry symbol bound through the entry table, if the unit is launchable
    pub entry: Option<String>,
    /// Opaque compiled logic
    pub body: Vec<u8>,
}

impl UnitImage {
    /// Create an image without an entry symbol.
    pub fn new(name: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            entry: None,
            body: body.into(),
        }
    }

    /// Declare the entry symbol this unit exposes.
    pub fn with_entry(mut self, symbol: impl Into<String>) -> Self {
        self.entry = Some(symbol.into());
        self
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::new();
        write_str(&mut payload, &self.name);
        match &self.entry {
            Some(symbol) => {
                payload.push(1);
                write_str(&mut payload, symbol);
            }
            None => payload.push(0),
        }
        payload.extend_from_slice(&(self.body.len() as u32).to_le_bytes());
        payload.extend_from_slice(&self.body);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
        bytes.extend_from_slice(&UNIT_MAGIC);
        bytes.extend_from_slice(&UNIT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        bytes.extend_from_slice(&payload);
        bytes
    }

    /// Decode from bytes, verifying magic, version, and checksum.
    pub fn decode(data: &[u8]) -> Result<Self, UnitFormatError> {
        let mut reader = Reader { data, pos: 0 };

        let magic: [u8; 4] = reader.take(4)?.try_into().unwrap_or_default();
        if magic != UNIT_MAGIC {
            return Err(UnitFormatError::InvalidMagic(magic));
        }

        let version = reader.read_u32()?;
        if version != UNIT_VERSION {
            return Err(UnitFormatError::UnsupportedVersion(version));
        }

        let expected = reader.read_u32()?;
        let actual = crc32fast::hash(&data[HEADER_SIZE..]);
        if expected != actual {
            return Err(UnitFormatError::ChecksumMismatch { expected, actual });
        }

        let name = reader.read_str("name")?;
        let entry = match reader.take(1)?[0] {
            0 => None,
            _ => Some(reader.read_str("entry symbol")?),
        };
        let body_len = reader.read_u32()? as usize;
        let body = reader.take(body_len)?.to_vec();

        let remaining = data.len() - reader.pos;
        if remaining > 0 {
            return Err(UnitFormatError::TrailingBytes(remaining));
        }

        Ok(Self { name, entry, body })
    }
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], UnitFormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(UnitFormatError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32, UnitFormatError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_str(&mut self, field: &'static str) -> Result<String, UnitFormatError> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| UnitFormatError::InvalidUtf8(field))
    }
}

/// A code unit defined by a loader under its bundle's isolation domain.
#[derive(Debug)]
pub struct CodeUnit {
    name: String,
    entry: Option<String>,
    body: Vec<u8>,
    digest: [u8; 32],
    domain: Arc<IsolationDomain>,
}

impl CodeUnit {
    /// Define a unit from a decoded image.
    ///
    /// Fails if the image declares a different name than the one requested.
    pub(crate) fn define(
        requested: &str,
        image: UnitImage,
        domain: Arc<IsolationDomain>,
    ) -> Result<Self, UnitFormatError> {
        if image.name != requested {
            return Err(UnitFormatError::NameMismatch {
                declared: image.name,
            });
        }

        let digest: [u8; 32] = Sha256::digest(&image.body).into();
        Ok(Self {
            name: image.name,
            entry: image.entry,
            body: image.body,
            digest,
            domain,
        })
    }

    /// Qualified unit name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Entry symbol declared by the unit
    pub fn entry_symbol(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    /// Compiled logic
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// SHA-256 of the body, hex-encoded
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Isolation domain the unit was defined under
    pub fn domain(&self) -> &Arc<IsolationDomain> {
        &self.domain
    }
}

/// Translate a qualified unit name to its bundle-relative path.
///
/// `com.example.Main` → `com/example/Main.unit`. Returns `None` for empty
/// names, names with empty segments, and names carrying the reserved marker.
pub fn unit_path(qualified_name: &str) -> Option<String> {
    if qualified_name.contains(RESERVED_MARKER)
        || qualified_name
            .split('.')
            .any(|segment| segment.is_empty() || segment.contains('/'))
    {
        return None;
    }
    Some(format!("{}{}", qualified_name.replace('.', "/"), UNIT_SUFFIX))
}

/// Namespace part of a qualified unit name (everything before the last `.`).
pub fn namespace_of(qualified_name: &str) -> Option<&str> {
    qualified_name.rfind('.').map(|i| &qualified_name[..i])
}
