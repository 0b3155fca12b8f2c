//! Packed segment wire layout
//!
//! A packed segment's plaintext is a small header enumerating its
//! sub-files followed by their concatenated bytes:
//!
//! `header_len(u32 le) || bincode(Vec<PackEntry>) || payload`
//!
//! Entry offsets are relative to the payload start. Unpacking by header
//! yields the original files byte-identical.

use crate::error::{IndexError, Result};
use silo_core::types::PackEntry;

/// Encode header + payload into one plaintext buffer
pub fn encode(entries: &[PackEntry], payload: &[u8]) -> Result<Vec<u8>> {
    let header = bincode::serialize(entries).map_err(|_| IndexError::MalformedPackHeader)?;
    let mut out = Vec::with_capacity(4 + header.len() + payload.len());
    out.extend_from_slice(&(header.len() as u32).to_le_bytes());
    out.extend_from_slice(&header);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Split a packed plaintext back into header entries and payload
pub fn decode(plaintext: &[u8]) -> Result<(Vec<PackEntry>, Vec<u8>)> {
    if plaintext.len() < 4 {
        return Err(IndexError::MalformedPackHeader);
    }
    let header_len = u32::from_le_bytes(plaintext[..4].try_into().unwrap()) as usize;
    let payload_start = 4usize
        .checked_add(header_len)
        .filter(|&end| end <= plaintext.len())
        .ok_or(IndexError::MalformedPackHeader)?;

    let entries: Vec<PackEntry> = bincode::deserialize(&plaintext[4..payload_start])
        .map_err(|_| IndexError::MalformedPackHeader)?;
    let payload = plaintext[payload_start..].to_vec();

    // entries must stay within the payload they describe
    for entry in &entries {
        let end = entry.offset as usize + entry.length as usize;
        if end > payload.len() {
            return Err(IndexError::MalformedPackHeader);
        }
    }
    Ok((entries, payload))
}

/// Borrow one sub-file's bytes out of a decoded payload
pub fn slice_entry<'a>(payload: &'a [u8], entry: &PackEntry) -> &'a [u8] {
    &payload[entry.offset as usize..(entry.offset + entry.length) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use silo_core::types::FileId;

    fn entry(byte: u8, offset: u32, length: u32) -> PackEntry {
        PackEntry {
            file_id: FileId::new([byte; 16]),
            rel_path: format!("file-{}.txt", byte),
            offset,
            length,
        }
    }

    #[test]
    fn test_pack_unpack_identity() {
        let entries = vec![entry(1, 0, 5), entry(2, 5, 3)];
        let payload = b"hellowow";

        let packed = encode(&entries, payload).unwrap();
        let (decoded_entries, decoded_payload) = decode(&packed).unwrap();

        assert_eq!(decoded_entries, entries);
        assert_eq!(decoded_payload, payload);
        assert_eq!(slice_entry(&decoded_payload, &decoded_entries[0]), b"hello");
        assert_eq!(slice_entry(&decoded_payload, &decoded_entries[1]), b"wow");
    }

    #[test]
    fn test_truncated_header_rejected() {
        let packed = encode(&[entry(1, 0, 5)], b"hello").unwrap();
        assert!(decode(&packed[..3]).is_err());
        assert!(decode(&packed[..10]).is_err());
    }

    #[test]
    fn test_entry_past_payload_rejected() {
        let packed = encode(&[entry(1, 0, 50)], b"short").unwrap();
        assert!(matches!(decode(&packed), Err(IndexError::MalformedPackHeader)));
    }
}
