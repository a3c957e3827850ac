//! Container payload format
//!
//! Defines the structure of the payload appended to a host executable.
//!
//! ```text
//! ┌──────────────────────────┐
//! │  host binary (unchanged) │  ← normal executable
//! ├──────────────────────────┤
//! │  Entry Section           │  ← [EntryHeader][path][data] per resource
//! ├──────────────────────────┤
//! │  Trailer                 │  ← fixed-size, at very end of file
//! └──────────────────────────┘
//! ```
//!
//! Entry paths are container-absolute. Bundle resources live under
//! `RESERVED_MARKER + identifier + "/"`, the startup configuration at the root.

use std::io::{self, Write};

use crate::error::RuntimeError;

/// Magic bytes identifying a container trailer.
pub const TRAILER_MAGIC: [u8; 8] = *b"SATCHEL\0";

/// Size of the container trailer in bytes.
pub const TRAILER_SIZE: usize = std::mem::size_of::<ContainerTrailer>();

const ENTRY_HEADER_SIZE: usize = std::mem::size_of::<EntryHeader>();

/// Fixed-size trailer at the very end of a container file.
///
/// To detect whether a file carries a payload, read the last `TRAILER_SIZE`
/// bytes and check the magic.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct ContainerTrailer {
    /// Magic bytes: b"SATCHEL\0"
    pub magic: [u8; 8],

    /// Byte offset of the entry section from start of payload.
    pub entries_offset: u64,

    /// Size of the entry section in bytes.
    pub entries_size: u64,

    /// Number of entries in the entry section.
    pub entry_count: u32,

    /// CRC32 checksum of the entire payload.
    pub checksum: u32,

    /// Size of this trailer struct (for forward compatibility).
    pub trailer_size: u32,

    /// Offset from the start of the file to the start of the payload.
    /// This equals the size of the host binary.
    pub payload_offset: u64,
}

/// Header preceding each entry in the entry section.
#[repr(C, packed)]
#[derive(Debug, Clone, Copy)]
pub struct EntryHeader {
    /// Length of the entry path (UTF-8 bytes).
    pub path_len: u32,

    /// Size of the entry data in bytes.
    pub data_size: u64,
}

impl EntryHeader {
    /// Write the header to a byte buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; ENTRY_HEADER_SIZE];
        unsafe {
            std::ptr::write_unaligned(bytes.as_mut_ptr() as *mut EntryHeader, *self);
        }
        bytes
    }
}

impl ContainerTrailer {
    /// Check if this trailer has the correct magic bytes.
    pub fn is_valid(&self) -> bool {
        self.magic == TRAILER_MAGIC
    }

    /// Read a trailer from raw bytes (must be at least TRAILER_SIZE bytes).
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TRAILER_SIZE {
            return None;
        }

        // Safety: ContainerTrailer is repr(C, packed) with no padding
        let trailer =
            unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const ContainerTrailer) };

        if trailer.is_valid() {
            Some(trailer)
        } else {
            None
        }
    }

    /// Write the trailer to a byte buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; TRAILER_SIZE];
        unsafe {
            std::ptr::write_unaligned(bytes.as_mut_ptr() as *mut ContainerTrailer, *self);
        }
        bytes
    }

    /// Write the trailer to a writer.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }
}

/// Write the entry section to a writer.
///
/// Format: for each entry:
///   [EntryHeader][path_bytes][data]
pub fn write_entry_section<W: Write>(
    writer: &mut W,
    entries: &[(String, Vec<u8>)],
) -> io::Result<u64> {
    let mut total = 0u64;

    for (path, data) in entries {
        let header = EntryHeader {
            path_len: path.len() as u32,
            data_size: data.len() as u64,
        };

        let header_bytes = header.to_bytes();

        writer.write_all(&header_bytes)?;
        writer.write_all(path.as_bytes())?;
        writer.write_all(data)?;

        total += header_bytes.len() as u64 + path.len() as u64 + data.len() as u64;
    }

    Ok(total)
}

/// Read the entry section from a byte slice.
///
/// Returns the `(path, data)` pairs in stored order. A truncated section or a
/// non-UTF-8 path is a container error.
pub fn read_entry_section(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>, RuntimeError> {
    let mut result = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        if offset + ENTRY_HEADER_SIZE > data.len() {
            return Err(RuntimeError::Container(format!(
                "truncated entry header at offset {}",
                offset
            )));
        }
        let header =
            unsafe { std::ptr::read_unaligned(data[offset..].as_ptr() as *const EntryHeader) };
        offset += ENTRY_HEADER_SIZE;

        let path_len = header.path_len as usize;
        let data_size = usize::try_from(header.data_size).unwrap_or(usize::MAX);

        let entry_end = offset
            .checked_add(path_len)
            .and_then(|end| end.checked_add(data_size))
            .filter(|end| *end <= data.len());
        if entry_end.is_none() {
            return Err(RuntimeError::Container(format!(
                "entry at offset {} overruns the entry section",
                offset - ENTRY_HEADER_SIZE
            )));
        }

        let path = std::str::from_utf8(&data[offset..offset + path_len])
            .map_err(|e| RuntimeError::Container(format!("entry path is not UTF-8: {}", e)))?
            .to_string();
        offset += path_len;

        let entry_data = data[offset..offset + data_size].to_vec();
        offset += data_size;

        result.push((path, entry_data));
    }

    Ok(result)
}

/// Append a payload holding `entries` to `host` and write the whole
/// container to `writer`.
///
/// This is the packaging step's on-disk contract; entries are written in the
/// order given.
pub fn pack<W: Write>(
    host: &[u8],
    entries: &[(String, Vec<u8>)],
    writer: &mut W,
) -> io::Result<()> {
    let mut payload = Vec::new();
    let entries_size = write_entry_section(&mut payload, entries)?;

    let trailer = ContainerTrailer {
        magic: TRAILER_MAGIC,
        entries_offset: 0,
        entries_size,
        entry_count: entries.len() as u32,
        checksum: crc32fast::hash(&payload),
        trailer_size: TRAILER_SIZE as u32,
        payload_offset: host.len() as u64,
    };

    writer.write_all(host)?;
    writer.write_all(&payload)?;
    trailer.write_to(writer)
}
