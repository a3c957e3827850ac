//! Container detection
//!
//! Detects a payload appended to an executable and mounts it:
//! 1. Read trailer from end of file
//! 2. Validate magic + checksum
//! 3. Parse entry section → embedded container entries

use std::fs;
use std::path::Path;

use super::format::{read_entry_section, ContainerTrailer, TRAILER_SIZE};
use super::Container;
use crate::error::RuntimeError;

/// Detect a container payload appended to the current executable.
///
/// Returns `Ok(None)` if the executable carries no payload.
pub fn detect_container() -> Result<Option<Container>, RuntimeError> {
    let exe_path = std::env::current_exe()?;
    detect_container_at(&exe_path)
}

/// Detect a container payload in the given file.
///
/// A file without a trailer is `Ok(None)`; a trailer whose payload is out of
/// bounds or fails its checksum is an error.
pub fn detect_container_at(path: &Path) -> Result<Option<Container>, RuntimeError> {
    let data = fs::read(path)?;

    if data.len() < TRAILER_SIZE {
        return Ok(None);
    }

    // Read trailer from the end
    let trailer = match ContainerTrailer::from_bytes(&data[data.len() - TRAILER_SIZE..]) {
        Some(trailer) => trailer,
        None => return Ok(None),
    };

    let payload_start = usize::try_from(trailer.payload_offset).unwrap_or(usize::MAX);
    let payload_end = data.len() - TRAILER_SIZE;
    if payload_start > payload_end {
        return Err(RuntimeError::Container(format!(
            "payload offset {} lies past the trailer in {}",
            payload_start,
            path.display()
        )));
    }

    let payload = &data[payload_start..payload_end];
    let computed = crc32fast::hash(payload);
    let expected = trailer.checksum;
    if computed != expected {
        tracing::warn!(path = %path.display(), expected, computed, "container checksum mismatch");
        return Err(RuntimeError::Container(format!(
            "checksum mismatch in {}: expected {:#x}, got {:#x}",
            path.display(),
            expected,
            computed
        )));
    }

    let section = usize::try_from(trailer.entries_offset)
        .ok()
        .zip(usize::try_from(trailer.entries_size).ok())
        .and_then(|(start, size)| Some((start, start.checked_add(size)?)))
        .filter(|(_, end)| *end <= payload.len());
    let (entries_start, entries_end) = section.ok_or_else(|| {
        RuntimeError::Container(format!(
            "entry section overruns the payload in {}",
            path.display()
        ))
    })?;

    let entries = read_entry_section(&payload[entries_start..entries_end])?;
    let expected_count = trailer.entry_count as usize;
    if entries.len() != expected_count {
        return Err(RuntimeError::Container(format!(
            "expected {} entries, found {}",
            expected_count,
            entries.len()
        )));
    }

    tracing::debug!(path = %path.display(), entries = entries.len(), "mounted container payload");
    Ok(Some(Container::from_entries(entries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::format::{pack, EntryHeader, TRAILER_MAGIC};

    #[test]
    fn test_detect_no_payload() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"not a container").unwrap();
        assert!(detect_container_at(temp.path()).unwrap().is_none());
    }

    #[test]
    fn test_detect_packed_container() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let entries = vec![
            ("satchel.conf".to_string(), b"com.example.Main\nlibA\n".to_vec()),
            ("$$satchel$$libA/data.txt".to_string(), b"payload".to_vec()),
        ];
        let mut out = Vec::new();
        pack(b"host-executable-bytes", &entries, &mut out).unwrap();
        std::fs::write(temp.path(), &out).unwrap();

        let container = detect_container_at(temp.path()).unwrap().unwrap();
        assert_eq!(container.len(), 2);
        assert!(container.exists("satchel.conf"));
        assert!(container.exists("$$satchel$$libA/data.txt"));
    }

    #[test]
    fn test_detect_rejects_out_of_range_entry_section() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let entries = vec![("a.txt".to_string(), b"payload".to_vec())];
        let mut out = Vec::new();
        pack(b"host", &entries, &mut out).unwrap();

        // Checksum still matches: only the trailer changes
        let trailer_start = out.len() - TRAILER_SIZE;
        let mut trailer = ContainerTrailer::from_bytes(&out[trailer_start..]).unwrap();
        trailer.entries_offset = u64::MAX;
        out.truncate(trailer_start);
        out.extend_from_slice(&trailer.to_bytes());
        std::fs::write(temp.path(), &out).unwrap();

        assert!(matches!(
            detect_container_at(temp.path()),
            Err(RuntimeError::Container(_))
        ));
    }

    #[test]
    fn test_detect_rejects_oversized_entry() {
        let temp = tempfile::NamedTempFile::new().unwrap();

        // Entry section declaring far more data than it carries
        let mut payload = EntryHeader {
            path_len: 5,
            data_size: u64::MAX,
        }
        .to_bytes();
        payload.extend_from_slice(b"a.txt");
        let trailer = ContainerTrailer {
            magic: TRAILER_MAGIC,
            entries_offset: 0,
            entries_size: payload.len() as u64,
            entry_count: 1,
            checksum: crc32fast::hash(&payload),
            trailer_size: TRAILER_SIZE as u32,
            payload_offset: 4,
        };
        let mut out = b"host".to_vec();
        out.extend_from_slice(&payload);
        out.extend_from_slice(&trailer.to_bytes());
        std::fs::write(temp.path(), &out).unwrap();

        assert!(matches!(
            detect_container_at(temp.path()),
            Err(RuntimeError::Container(_))
        ));
    }

    #[test]
    fn test_detect_corrupt_payload() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        let entries = vec![("a.txt".to_string(), b"payload".to_vec())];
        let mut out = Vec::new();
        pack(b"host", &entries, &mut out).unwrap();
        // Flip a byte inside the payload, past the host bytes
        out[6] ^= 0xFF;
        std::fs::write(temp.path(), &out).unwrap();

        assert!(matches!(
            detect_container_at(temp.path()),
            Err(RuntimeError::Container(_))
        ));
    }
}
