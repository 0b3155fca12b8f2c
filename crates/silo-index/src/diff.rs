//! Change detection between folder versions
//!
//! Both inputs arrive sorted in scanner emission order (sorted DFS, the
//! same order the store's file keys produce), so detection is a single
//! streaming merge-join comparing (path, sha256). O(1) memory.

use std::cmp::Ordering;
use std::iter::Peekable;

use crate::scanner::ScannedFile;
use silo_core::types::Sha256Digest;

/// A file as recorded in the prior version
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PriorFile {
    pub rel_path: String,
    pub version: u64,
    pub sha256: Sha256Digest,
}

/// Outcome for one path when comparing a scan against the prior version
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Present now, absent before
    Added(ScannedFile),
    /// Present in both with differing content; a new version row is due
    Modified {
        file: ScannedFile,
        prior_version: u64,
    },
    /// Absent now, present before; a tombstone row is due
    Deleted {
        rel_path: String,
        prior_version: u64,
    },
    /// Present in both, byte-identical; no new version row
    Unchanged {
        file: ScannedFile,
        version: u64,
    },
}

/// Compare paths component-wise, matching sorted-DFS emission order
/// ("a/b" sorts before "a.txt" because the directory entry "a" does)
pub fn cmp_scan_order(a: &str, b: &str) -> Ordering {
    a.split('/').cmp(b.split('/'))
}

/// Streaming merge-join of the current scan against the prior version
pub fn diff<C, P>(current: C, prior: P) -> Diff<C, P>
where
    C: Iterator<Item = ScannedFile>,
    P: Iterator<Item = PriorFile>,
{
    Diff {
        current: current.peekable(),
        prior: prior.peekable(),
    }
}

/// Iterator over [`ChangeEvent`]s
pub struct Diff<C, P>
where
    C: Iterator<Item = ScannedFile>,
    P: Iterator<Item = PriorFile>,
{
    current: Peekable<C>,
    prior: Peekable<P>,
}

impl<C, P> Iterator for Diff<C, P>
where
    C: Iterator<Item = ScannedFile>,
    P: Iterator<Item = PriorFile>,
{
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        match (self.current.peek(), self.prior.peek()) {
            (Some(cur), Some(old)) => match cmp_scan_order(&cur.rel_path, &old.rel_path) {
                Ordering::Less => Some(ChangeEvent::Added(self.current.next()?)),
                Ordering::Greater => {
                    let old = self.prior.next()?;
                    Some(ChangeEvent::Deleted {
                        rel_path: old.rel_path,
                        prior_version: old.version,
                    })
                }
                Ordering::Equal => {
                    let cur = self.current.next()?;
                    let old = self.prior.next()?;
                    if cur.sha256 == old.sha256 {
                        Some(ChangeEvent::Unchanged {
                            file: cur,
                            version: old.version,
                        })
                    } else {
                        Some(ChangeEvent::Modified {
                            file: cur,
                            prior_version: old.version,
                        })
                    }
                }
            },
            (Some(_), None) => Some(ChangeEvent::Added(self.current.next()?)),
            (None, Some(_)) => {
                let old = self.prior.next()?;
                Some(ChangeEvent::Deleted {
                    rel_path: old.rel_path,
                    prior_version: old.version,
                })
            }
            (None, None) => None,
        }
    }
}
