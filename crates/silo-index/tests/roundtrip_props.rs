//! Property tests for the pack and redundancy round-trip laws

use proptest::prelude::*;
use silo_core::types::{FileId, PackEntry};
use silo_index::pack;
use silo_index::redundancy;

proptest! {
    /// Packing N small files and unpacking by header yields the original
    /// N files byte-identical
    #[test]
    fn pack_unpack_identity(files in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..12)) {
        let mut entries = Vec::new();
        let mut payload = Vec::new();
        for (i, bytes) in files.iter().enumerate() {
            entries.push(PackEntry {
                file_id: FileId::new([i as u8; 16]),
                rel_path: format!("f{}", i),
                offset: payload.len() as u32,
                length: bytes.len() as u32,
            });
            payload.extend_from_slice(bytes);
        }

        let packed = pack::encode(&entries, &payload).unwrap();
        let (decoded_entries, decoded_payload) = pack::decode(&packed).unwrap();

        prop_assert_eq!(&decoded_entries, &entries);
        for (entry, original) in decoded_entries.iter().zip(files.iter()) {
            prop_assert_eq!(pack::slice_entry(&decoded_payload, entry), &original[..]);
        }
    }

    /// Every redundancy copy decodes back to the exact body, and copies
    /// above zero never equal the wire bytes of the base copy
    #[test]
    fn redundancy_copy_roundtrip(body in prop::collection::vec(any::<u8>(), 0..4096), copy in 0u8..5) {
        let wire = redundancy::encode_copy(&body, copy);
        prop_assert_eq!(redundancy::decode_copy(&wire, copy).unwrap(), body.clone());
        if copy > 0 && !body.is_empty() {
            prop_assert_ne!(wire, body);
        }
    }
}
