//! Subject obfuscation and wire identifier minting
//!
//! Two-layer subject scheme: the internal subject is a keyed hash only
//! the owner can derive; the usenet subject is uniform random and is the
//! only one that appears on the wire. The owner's index is the sole
//! linkage between the two.

use rand::rngs::OsRng;
use rand::{Rng, RngCore};

use crate::hash::sha256_concat;
use silo_core::types::{
    FolderId, InternalSubject, MessageId, ShareId, SubjectPair, UsenetSubject,
    MESSAGE_ID_ALPHABET, MESSAGE_ID_LOCAL_LEN,
};

/// Deterministic owner-side subject:
/// `sha256(folder_id || version || segment_index || folder_signing_key)`
pub fn internal_subject(
    folder_id: &FolderId,
    version: u64,
    segment_index: u32,
    folder_signing_key: &[u8; 32],
) -> InternalSubject {
    let digest = sha256_concat(&[
        folder_id.as_bytes(),
        &version.to_le_bytes(),
        &segment_index.to_le_bytes(),
        folder_signing_key,
    ]);
    InternalSubject::new(*digest.as_bytes())
}

/// Uniform random wire subject; no keyed relationship to anything
pub fn mint_usenet_subject() -> UsenetSubject {
    let mut entropy = [0u8; 12];
    OsRng.fill_bytes(&mut entropy);
    UsenetSubject::from_entropy(entropy)
}

/// Derive the owner-side subject and mint its wire counterpart
pub fn mint_subject_pair(
    folder_id: &FolderId,
    version: u64,
    segment_index: u32,
    folder_signing_key: &[u8; 32],
) -> SubjectPair {
    SubjectPair {
        internal: internal_subject(folder_id, version, segment_index, folder_signing_key),
        usenet: mint_usenet_subject(),
    }
}

/// Mint a fresh Message-ID: 16 random lowercase alphanumerics at a
/// domain that blends with common posting tools. 80 bits of entropy
/// plus server-side uniqueness handle collisions.
pub fn mint_message_id() -> MessageId {
    let mut rng = OsRng;
    let local: String = (0..MESSAGE_ID_LOCAL_LEN)
        .map(|_| MESSAGE_ID_ALPHABET[rng.gen_range(0..MESSAGE_ID_ALPHABET.len())] as char)
        .collect();
    MessageId::from_local(&local).expect("alphabet-constrained local part is always valid")
}

/// Mint a share ID: 15 random bytes, 24 base32 characters, 120 bits
pub fn mint_share_id() -> ShareId {
    let mut entropy = [0u8; 15];
    OsRng.fill_bytes(&mut entropy);
    ShareId::from_entropy(entropy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_internal_subject_deterministic() {
        let folder = FolderId::new([1; 32]);
        let key = [2u8; 32];
        let a = internal_subject(&folder, 1, 0, &key);
        let b = internal_subject(&folder, 1, 0, &key);
        assert_eq!(a, b);
    }

    #[test]
    fn test_internal_subject_separates_inputs() {
        let folder = FolderId::new([1; 32]);
        let key = [2u8; 32];
        let base = internal_subject(&folder, 1, 0, &key);

        assert_ne!(base, internal_subject(&folder, 2, 0, &key));
        assert_ne!(base, internal_subject(&folder, 1, 1, &key));
        assert_ne!(base, internal_subject(&folder, 1, 0, &[3u8; 32]));
        assert_ne!(base, internal_subject(&FolderId::new([9; 32]), 1, 0, &key));
    }

    #[test]
    fn test_usenet_subject_no_repeats() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(mint_usenet_subject().as_str().to_string()));
        }
    }

    #[test]
    fn test_subject_pair_sides_unrelated() {
        let folder = FolderId::new([1; 32]);
        let key = [2u8; 32];

        // same derivation inputs, fresh wire subject each time
        let a = mint_subject_pair(&folder, 1, 0, &key);
        let b = mint_subject_pair(&folder, 1, 0, &key);
        assert_eq!(a.internal, b.internal);
        assert_ne!(a.usenet, b.usenet);
    }

    #[test]
    fn test_message_id_format_and_uniqueness() {
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = mint_message_id();
            assert!(id.as_str().starts_with('<'));
            assert!(id.as_str().ends_with("@ngPost.com>"));
            assert!(seen.insert(id.as_str().to_string()));
        }
    }

    #[test]
    fn test_share_id_uniform_alphabet() {
        // drawing many share IDs should touch most of the base32 alphabet
        let mut chars = HashSet::new();
        for _ in 0..200 {
            for c in mint_share_id().as_str().chars() {
                chars.insert(c);
            }
        }
        assert!(chars.len() > 25, "alphabet coverage too small: {}", chars.len());
    }
}
