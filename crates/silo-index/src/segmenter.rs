//! Segment planning
//!
//! Files at or above the segment size slice into fixed
//! `ceil(size / segment_size)` ranges; smaller files accumulate into
//! pack groups in scan order. Every logical segment yields one record
//! per redundancy copy, all sharing the plaintext hash and the internal
//! subject, each with its own wire subject.
//!
//! The internal subject ordinal counts logical segments across the whole
//! folder version so no two segments of one version derive the same
//! subject.

use rand::rngs::OsRng;
use rand::RngCore;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{IndexError, Result};
use crate::pack;
use silo_core::config::SegmentSettings;
use silo_core::types::{
    FileId, FileVersion, FolderId, PackEntry, PackGroup, PackGroupId, SegmentId, SegmentParent,
    SegmentRecord, SegmentState, Sha256Digest, SubjectPair,
};
use silo_crypto::hash::sha256;
use silo_crypto::obfuscate::{internal_subject, mint_usenet_subject};

/// Mint a random file row identifier
pub fn mint_file_id() -> FileId {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    FileId::new(bytes)
}

fn mint_pack_id() -> PackGroupId {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    PackGroupId::new(bytes)
}

fn mint_segment_id() -> SegmentId {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    SegmentId::new(bytes)
}

/// Plans the segments of one folder version
pub struct SegmentPlanner {
    folder_id: FolderId,
    version: u64,
    segment_size: u32,
    /// Total copies per logical segment (redundancy 0 and 1 both mean a
    /// single copy)
    copies: u8,
    signing_key: [u8; 32],
    /// Logical segment ordinal across the folder version, feeding the
    /// internal subject derivation
    next_ordinal: u32,
}

impl SegmentPlanner {
    pub fn new(
        folder_id: FolderId,
        version: u64,
        settings: &SegmentSettings,
        signing_key: [u8; 32],
    ) -> Self {
        Self {
            folder_id,
            version,
            segment_size: settings.segment_size,
            copies: settings.redundancy_level.max(1),
            signing_key,
            next_ordinal: 0,
        }
    }

    pub fn segment_size(&self) -> u32 {
        self.segment_size
    }

    /// Records for one logical segment: one per redundancy copy, shared
    /// internal subject, fresh wire subject each
    fn records_for_slice(
        &mut self,
        parent: SegmentParent,
        segment_index: u32,
        offset: u64,
        length: u32,
        sha256: Sha256Digest,
    ) -> Vec<SegmentRecord> {
        let ordinal = self.next_ordinal;
        self.next_ordinal += 1;

        let internal =
            internal_subject(&self.folder_id, self.version, ordinal, &self.signing_key);

        (0..self.copies)
            .map(|redundancy| {
                // same internal subject across copies, fresh wire subject each
                let subjects = SubjectPair {
                    internal,
                    usenet: mint_usenet_subject(),
                };
                SegmentRecord {
                    segment_id: mint_segment_id(),
                    folder_id: self.folder_id,
                    parent,
                    segment_index,
                    offset,
                    length,
                    sha256,
                    redundancy,
                    subjects,
                    state: SegmentState::Pending,
                    message_id: None,
                    posted_at: None,
                    failure: None,
                }
            })
            .collect()
    }

    /// Slice a file of size >= the segment size. Streams the file once,
    /// hashing each slice; memory use is one slice.
    pub fn plan_file(&mut self, root: &Path, file: &FileVersion) -> Result<Vec<SegmentRecord>> {
        let mut handle = File::open(root.join(&file.rel_path))?;
        let mut records = Vec::new();
        let mut buf = vec![0u8; self.segment_size as usize];
        let mut segment_index = 0u32;
        let mut total = 0u64;

        loop {
            let filled = fill_buffer(&mut handle, &mut buf)?;
            if filled == 0 {
                break;
            }
            let slice = &buf[..filled];
            records.extend(self.records_for_slice(
                SegmentParent::File(file.file_id),
                segment_index,
                total,
                filled as u32,
                sha256(slice),
            ));
            total += filled as u64;
            segment_index += 1;
            if filled < buf.len() {
                break;
            }
        }

        if total != file.size {
            return Err(IndexError::FileChanged(file.rel_path.clone()));
        }
        tracing::debug!(
            file = %file.rel_path,
            segments = segment_index,
            copies = self.copies,
            "planned file segments"
        );
        Ok(records)
    }

    /// Plan the packed segment for a full pack buffer
    fn plan_pack(
        &mut self,
        folder_version: u64,
        entries: Vec<PackEntry>,
        payload: &[u8],
    ) -> Result<(PackGroup, Vec<SegmentRecord>)> {
        let group = PackGroup {
            pack_id: mint_pack_id(),
            folder_id: self.folder_id,
            folder_version,
            total_length: payload.len() as u32,
            entries,
        };

        let plaintext = pack::encode(&group.entries, payload)?;
        let records = self.records_for_slice(
            SegmentParent::Pack(group.pack_id),
            0,
            0,
            plaintext.len() as u32,
            sha256(&plaintext),
        );
        tracing::debug!(
            pack = %group.pack_id,
            files = group.entries.len(),
            bytes = group.total_length,
            "planned pack group"
        );
        Ok((group, records))
    }
}

/// Read until the buffer is full or the file ends
fn fill_buffer(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Accumulates small files (strictly below the segment size) into pack
/// groups in scan order. A file joins the open buffer only if it fits
/// entirely; otherwise the buffer flushes first. Exactly filling the
/// buffer flushes without overflow.
pub struct Packer {
    segment_size: u32,
    buffer: Vec<u8>,
    entries: Vec<PackEntry>,
}

impl Packer {
    pub fn new(segment_size: u32) -> Self {
        Self {
            segment_size,
            buffer: Vec::new(),
            entries: Vec::new(),
        }
    }

    /// Add a small file. Returns a flushed pack group when this file
    /// would have overflowed the open buffer.
    pub fn push(
        &mut self,
        root: &Path,
        file: &FileVersion,
        planner: &mut SegmentPlanner,
    ) -> Result<Option<(PackGroup, Vec<SegmentRecord>)>> {
        debug_assert!(file.size < self.segment_size as u64);

        let mut bytes = Vec::with_capacity(file.size as usize);
        File::open(root.join(&file.rel_path))?.read_to_end(&mut bytes)?;
        if bytes.len() as u64 != file.size {
            return Err(IndexError::FileChanged(file.rel_path.clone()));
        }

        let flushed = if !self.buffer.is_empty()
            && self.buffer.len() + bytes.len() > self.segment_size as usize
        {
            Some(self.flush(file.version, planner)?)
        } else {
            None
        };

        self.entries.push(PackEntry {
            file_id: file.file_id,
            rel_path: file.rel_path.clone(),
            offset: self.buffer.len() as u32,
            length: bytes.len() as u32,
        });
        self.buffer.extend_from_slice(&bytes);
        Ok(flushed)
    }

    /// Flush whatever remains
    pub fn finish(
        &mut self,
        folder_version: u64,
        planner: &mut SegmentPlanner,
    ) -> Result<Option<(PackGroup, Vec<SegmentRecord>)>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.flush(folder_version, planner)?))
    }

    fn flush(
        &mut self,
        folder_version: u64,
        planner: &mut SegmentPlanner,
    ) -> Result<(PackGroup, Vec<SegmentRecord>)> {
        let entries = std::mem::take(&mut self.entries);
        let payload = std::mem::take(&mut self.buffer);
        if payload.len() > self.segment_size as usize {
            return Err(IndexError::PackOverflow {
                attempted: payload.len() as u64,
                max: self.segment_size as u64,
            });
        }
        planner.plan_pack(folder_version, entries, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    const SEG: u32 = 1000; // small segment size keeps tests fast

    fn settings(redundancy: u8) -> SegmentSettings {
        SegmentSettings {
            segment_size: SEG,
            redundancy_level: redundancy,
        }
    }

    fn planner(redundancy: u8) -> SegmentPlanner {
        SegmentPlanner::new(FolderId::new([1; 32]), 1, &settings(redundancy), [2; 32])
    }

    fn file_row(rel_path: &str, size: u64) -> FileVersion {
        FileVersion {
            file_id: mint_file_id(),
            folder_id: FolderId::new([1; 32]),
            rel_path: rel_path.to_string(),
            version: 1,
            size,
            sha256: Sha256Digest::default(),
            mime: None,
            mtime: 0,
            deleted: false,
            created_at: Utc::now(),
        }
    }

    fn write_file(dir: &TempDir, rel_path: &str, bytes: &[u8]) -> FileVersion {
        fs::write(dir.path().join(rel_path), bytes).unwrap();
        file_row(rel_path, bytes.len() as u64)
    }

    #[test]
    fn test_exact_segment_size_single_slice() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "exact.bin", &vec![7u8; SEG as usize]);

        let records = planner(0).plan_file(dir.path(), &file).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].length, SEG);
        assert_eq!(records[0].segment_index, 0);
    }

    #[test]
    fn test_one_byte_over_yields_two_slices() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "over.bin", &vec![7u8; SEG as usize + 1]);

        let records = planner(0).plan_file(dir.path(), &file).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].length, SEG);
        assert_eq!(records[1].length, 1);
        assert_eq!(records[1].offset, SEG as u64);
    }

    #[test]
    fn test_slice_hashes_are_content_addresses() {
        let dir = TempDir::new().unwrap();
        let mut content = vec![1u8; SEG as usize];
        content.extend_from_slice(&[2u8; 500]);
        let file = write_file(&dir, "two.bin", &content);

        let records = planner(0).plan_file(dir.path(), &file).unwrap();
        assert_eq!(records[0].sha256, sha256(&content[..SEG as usize]));
        assert_eq!(records[1].sha256, sha256(&content[SEG as usize..]));
    }

    #[test]
    fn test_redundancy_copies_share_subject_identity() {
        let dir = TempDir::new().unwrap();
        let file = write_file(&dir, "r.bin", &vec![7u8; SEG as usize]);

        let records = planner(3).plan_file(dir.path(), &file).unwrap();
        assert_eq!(records.len(), 3);

        let internal: Vec<_> = records.iter().map(|r| r.subjects.internal).collect();
        assert_eq!(internal[0], internal[1]);
        assert_eq!(internal[1], internal[2]);

        let wire: Vec<_> = records.iter().map(|r| r.subjects.usenet.clone()).collect();
        assert_ne!(wire[0], wire[1]);
        assert_ne!(wire[1], wire[2]);

        let copies: Vec<_> = records.iter().map(|r| r.redundancy).collect();
        assert_eq!(copies, vec![0, 1, 2]);
    }

    #[test]
    fn test_ordinals_distinct_across_files() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.bin", &vec![1u8; SEG as usize]);
        let b = write_file(&dir, "b.bin", &vec![2u8; SEG as usize]);

        let mut planner = planner(0);
        let ra = planner.plan_file(dir.path(), &a).unwrap();
        let rb = planner.plan_file(dir.path(), &b).unwrap();

        // both are segment 0 of their file but derive distinct subjects
        assert_eq!(ra[0].segment_index, 0);
        assert_eq!(rb[0].segment_index, 0);
        assert_ne!(ra[0].subjects.internal, rb[0].subjects.internal);
    }

    #[test]
    fn test_size_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let mut file = write_file(&dir, "grown.bin", &vec![7u8; SEG as usize]);
        file.size += 10; // pretend the scan saw a different size
        assert!(matches!(
            planner(0).plan_file(dir.path(), &file),
            Err(IndexError::FileChanged(_))
        ));
    }

    #[test]
    fn test_packer_flushes_on_overflow() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", &[1u8; 600]);
        let b = write_file(&dir, "b.txt", &[2u8; 600]);

        let mut planner = planner(0);
        let mut packer = Packer::new(SEG);

        assert!(packer.push(dir.path(), &a, &mut planner).unwrap().is_none());
        // b does not fit beside a; a flushes alone
        let (group, records) = packer
            .push(dir.path(), &b, &mut planner)
            .unwrap()
            .expect("overflow must flush");
        assert_eq!(group.entries.len(), 1);
        assert_eq!(group.entries[0].rel_path, "a.txt");
        assert_eq!(group.total_length, 600);
        assert_eq!(records.len(), 1);

        let (tail, _) = packer.finish(1, &mut planner).unwrap().expect("b remains");
        assert_eq!(tail.entries[0].rel_path, "b.txt");
    }

    #[test]
    fn test_packer_exact_fill_no_overflow() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", &[1u8; 400]);
        let b = write_file(&dir, "b.txt", &[2u8; 600]);

        let mut planner = planner(0);
        let mut packer = Packer::new(SEG);

        assert!(packer.push(dir.path(), &a, &mut planner).unwrap().is_none());
        // exactly fills the buffer: no flush on push
        assert!(packer.push(dir.path(), &b, &mut planner).unwrap().is_none());

        let (group, _) = packer.finish(1, &mut planner).unwrap().unwrap();
        assert_eq!(group.total_length, SEG);
        assert_eq!(group.entries.len(), 2);
        assert_eq!(group.entries[1].offset, 400);
    }

    #[test]
    fn test_packed_plaintext_roundtrips() {
        let dir = TempDir::new().unwrap();
        let a = write_file(&dir, "a.txt", b"hello");
        let b = write_file(&dir, "b.txt", b"world!");

        let mut planner = planner(0);
        let mut packer = Packer::new(SEG);
        packer.push(dir.path(), &a, &mut planner).unwrap();
        packer.push(dir.path(), &b, &mut planner).unwrap();
        let (group, records) = packer.finish(1, &mut planner).unwrap().unwrap();

        let plaintext = crate::payload::load_pack_segment(dir.path(), &group).unwrap();
        assert_eq!(sha256(&plaintext), records[0].sha256);

        let (entries, payload) = crate::pack::decode(&plaintext).unwrap();
        assert_eq!(crate::pack::slice_entry(&payload, &entries[0]), b"hello");
        assert_eq!(crate::pack::slice_entry(&payload, &entries[1]), b"world!");
    }
}
