//! Segment payload loading
//!
//! Segment rows carry metadata only; the plaintext slice is re-read
//! from the folder at post time. Pack segments rebuild their exact
//! plaintext (header plus concatenated sub-files) so the recorded hash
//! still matches. A source file that changed since indexing is detected
//! by length and surfaces as [`IndexError::FileChanged`].

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::pack;
use silo_core::types::{PackGroup, SegmentRecord};

/// Read one file segment's plaintext slice
pub fn load_file_segment(
    root: &Path,
    rel_path: &str,
    segment: &SegmentRecord,
) -> Result<Vec<u8>> {
    let mut handle = File::open(root.join(rel_path))?;
    handle.seek(SeekFrom::Start(segment.offset))?;

    let mut buf = vec![0u8; segment.length as usize];
    handle
        .read_exact(&mut buf)
        .map_err(|_| IndexError::FileChanged(rel_path.to_string()))?;
    Ok(buf)
}

/// Rebuild a packed segment's plaintext from its group table
pub fn load_pack_segment(root: &Path, group: &PackGroup) -> Result<Vec<u8>> {
    let mut payload = Vec::with_capacity(group.total_length as usize);
    for entry in &group.entries {
        let mut bytes = Vec::with_capacity(entry.length as usize);
        File::open(root.join(&entry.rel_path))?.read_to_end(&mut bytes)?;
        if bytes.len() != entry.length as usize {
            return Err(IndexError::FileChanged(entry.rel_path.clone()));
        }
        payload.extend_from_slice(&bytes);
    }
    if payload.len() != group.total_length as usize {
        return Err(IndexError::FileChanged(format!("pack {}", group.pack_id)));
    }
    pack::encode(&group.entries, &payload)
}
