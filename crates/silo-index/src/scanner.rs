//! Filesystem scanner
//!
//! Depth-first traversal with per-directory lexicographic child order,
//! so emission order is deterministic and matches the store's file key
//! order. Files hash through a streaming SHA-256 in 1 MiB chunks;
//! nothing is held fully in memory. Symlinks are followed only when
//! their target stays inside the root.
//!
//! Individual file read errors surface as [`ScanItem::Error`] and the
//! scan continues; an unavailable root aborts.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use walkdir::WalkDir;

use crate::error::{IndexError, Result};
use silo_core::CancelToken;
use silo_crypto::hash::StreamingHasher;
use silo_core::types::Sha256Digest;

/// Hash chunk size
const CHUNK_SIZE: usize = 1024 * 1024;

/// One regular file as observed on disk
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScannedFile {
    /// Path relative to the scan root, forward-slash separated
    pub rel_path: String,
    pub size: u64,
    pub sha256: Sha256Digest,
    /// Seconds since the epoch
    pub mtime: i64,
}

/// Scanner emission: a file record or a per-file error
#[derive(Debug)]
pub enum ScanItem {
    File(ScannedFile),
    /// Read failure on one path; the scan continues past it
    Error { rel_path: String, message: String },
}

/// Lazily scan `root`. The returned iterator performs I/O as it is
/// driven; dropping it stops the scan.
pub fn scan(
    root: &Path,
    cancel: CancelToken,
) -> Result<impl Iterator<Item = Result<ScanItem>>> {
    let canonical_root = root
        .canonicalize()
        .map_err(|e| IndexError::RootUnavailable(format!("{}: {}", root.display(), e)))?;

    let walker = WalkDir::new(&canonical_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter();

    let root_for_items = canonical_root.clone();
    Ok(walker.filter_map(move |entry| {
        if cancel.is_cancelled() {
            return Some(Err(IndexError::Cancelled));
        }
        scan_entry(&root_for_items, entry).transpose()
    }))
}

fn scan_entry(
    root: &Path,
    entry: walkdir::Result<walkdir::DirEntry>,
) -> Result<Option<ScanItem>> {
    let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
            // a vanished subtree is a per-path error, a vanished root is fatal
            let path = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            if e.path() == Some(root) {
                return Err(IndexError::RootUnavailable(path));
            }
            return Ok(Some(ScanItem::Error {
                rel_path: path,
                message: e.to_string(),
            }));
        }
    };

    let path = entry.path();
    if entry.file_type().is_dir() {
        return Ok(None);
    }

    // symlinks: include only when the target stays inside the root
    let effective: PathBuf = if entry.file_type().is_symlink() {
        match path.canonicalize() {
            Ok(target) if target.starts_with(root) && target.is_file() => target,
            Ok(_) => {
                tracing::debug!(path = %path.display(), "skipping symlink escaping root");
                return Ok(None);
            }
            Err(_) => return Ok(None), // dangling link
        }
    } else if entry.file_type().is_file() {
        path.to_path_buf()
    } else {
        return Ok(None); // sockets, fifos
    };

    let rel_path = relative_path(root, path)?;
    match hash_file(&effective) {
        Ok((size, sha256, mtime)) => Ok(Some(ScanItem::File(ScannedFile {
            rel_path,
            size,
            sha256,
            mtime,
        }))),
        Err(e) => Ok(Some(ScanItem::Error {
            rel_path,
            message: e.to_string(),
        })),
    }
}

fn relative_path(root: &Path, path: &Path) -> Result<String> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| IndexError::InvalidPath(path.display().to_string()))?;
    let mut out = String::new();
    for component in rel.components() {
        if !out.is_empty() {
            out.push('/');
        }
        out.push_str(&component.as_os_str().to_string_lossy());
    }
    if out.is_empty() {
        return Err(IndexError::InvalidPath(path.display().to_string()));
    }
    Ok(out)
}

fn hash_file(path: &Path) -> std::io::Result<(u64, Sha256Digest, i64)> {
    let mut file = File::open(path)?;
    let metadata = file.metadata()?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);

    let mut hasher = StreamingHasher::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok((hasher.bytes_hashed(), hasher.finalize(), mtime))
}

/// Guess a MIME hint from the file extension; callers persist it as-is
pub fn mime_hint(rel_path: &str) -> Option<String> {
    let ext = rel_path.rsplit('.').next()?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "txt" | "md" | "log" => "text/plain",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" | "tgz" => "application/gzip",
        _ => return None,
    };
    Some(mime.to_string())
}
