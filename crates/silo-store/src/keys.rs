//! Key encodings for the entity column families
//!
//! Keys sort in the order the pipeline iterates: file keys encode path
//! components NUL-separated so byte order over keys equals the
//! scanner's sorted depth-first emission order, and version numbers are
//! big-endian so versions of one path are adjacent and ascending.

use silo_core::types::{FolderId, PackGroupId, SegmentParent, ShareId};

/// Separator between path components (never occurs inside a component)
const PATH_SEP: u8 = 0x00;

/// Terminator after the final component; sorts below any component byte
/// except the separator, keeping "a" < "a.txt" < "a/b" ordering aligned
/// with sorted DFS traversal
const PATH_END: u8 = 0x01;

/// Encode a relative path for use inside a key
pub fn encode_path(rel_path: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(rel_path.len() + 1);
    for (i, component) in rel_path.split('/').enumerate() {
        if i > 0 {
            out.push(PATH_SEP);
        }
        out.extend_from_slice(component.as_bytes());
    }
    out.push(PATH_END);
    out
}

/// files CF: folder_id || encoded_path || version(be)
pub fn file_key(folder_id: &FolderId, rel_path: &str, version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + rel_path.len() + 9);
    key.extend_from_slice(folder_id.as_bytes());
    key.extend_from_slice(&encode_path(rel_path));
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// Prefix covering every version of every file in a folder
pub fn folder_files_prefix(folder_id: &FolderId) -> Vec<u8> {
    folder_id.as_bytes().to_vec()
}

/// Prefix covering every version of one path
pub fn file_versions_prefix(folder_id: &FolderId, rel_path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + rel_path.len() + 1);
    key.extend_from_slice(folder_id.as_bytes());
    key.extend_from_slice(&encode_path(rel_path));
    key
}

fn parent_tag(parent: &SegmentParent) -> (u8, [u8; 16]) {
    match parent {
        SegmentParent::File(id) => (0, *id.as_bytes()),
        SegmentParent::Pack(id) => (1, *id.as_bytes()),
    }
}

/// segments CF: tag || parent_id || segment_index(be) || redundancy
pub fn segment_key(parent: &SegmentParent, segment_index: u32, redundancy: u8) -> Vec<u8> {
    let (tag, id) = parent_tag(parent);
    let mut key = Vec::with_capacity(1 + 16 + 4 + 1);
    key.push(tag);
    key.extend_from_slice(&id);
    key.extend_from_slice(&segment_index.to_be_bytes());
    key.push(redundancy);
    key
}

/// Prefix covering every copy of every segment of one parent
pub fn parent_segments_prefix(parent: &SegmentParent) -> Vec<u8> {
    let (tag, id) = parent_tag(parent);
    let mut key = Vec::with_capacity(17);
    key.push(tag);
    key.extend_from_slice(&id);
    key
}

/// pack_groups CF: folder_id || version(be) || pack_id
pub fn pack_group_key(folder_id: &FolderId, version: u64, pack_id: &PackGroupId) -> Vec<u8> {
    let mut key = Vec::with_capacity(32 + 8 + 16);
    key.extend_from_slice(folder_id.as_bytes());
    key.extend_from_slice(&version.to_be_bytes());
    key.extend_from_slice(pack_id.as_bytes());
    key
}

/// Prefix covering the pack groups of one folder version
pub fn pack_groups_prefix(folder_id: &FolderId, version: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(40);
    key.extend_from_slice(folder_id.as_bytes());
    key.extend_from_slice(&version.to_be_bytes());
    key
}

/// authorized_users CF: share_id || commitment
pub fn authorized_user_key(share_id: &ShareId, commitment: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(24 + 32);
    key.extend_from_slice(share_id.as_str().as_bytes());
    key.extend_from_slice(commitment);
    key
}

/// Prefix covering the authorized set of one share
pub fn authorized_users_prefix(share_id: &ShareId) -> Vec<u8> {
    share_id.as_str().as_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_order_matches_sorted_dfs() {
        // sorted DFS visits directory "a" before sibling file "a.txt"
        let folder = FolderId::new([0; 32]);
        let nested = file_key(&folder, "a/b", 1);
        let sibling = file_key(&folder, "a.txt", 1);
        assert!(nested < sibling);

        // plain file ordering stays lexicographic
        assert!(file_key(&folder, "a.txt", 1) < file_key(&folder, "b.txt", 1));
    }

    #[test]
    fn test_versions_adjacent_ascending() {
        let folder = FolderId::new([0; 32]);
        let v1 = file_key(&folder, "doc.txt", 1);
        let v2 = file_key(&folder, "doc.txt", 2);
        let v10 = file_key(&folder, "doc.txt", 10);
        assert!(v1 < v2);
        assert!(v2 < v10);
        assert!(v1.starts_with(&file_versions_prefix(&folder, "doc.txt")));
    }

    #[test]
    fn test_segment_keys_grouped_by_parent() {
        let parent = SegmentParent::File(silo_core::types::FileId::new([7; 16]));
        let prefix = parent_segments_prefix(&parent);

        let k0 = segment_key(&parent, 0, 0);
        let k0r1 = segment_key(&parent, 0, 1);
        let k1 = segment_key(&parent, 1, 0);

        assert!(k0.starts_with(&prefix));
        assert!(k0 < k0r1);
        assert!(k0r1 < k1);
    }
}
