//! # Silo Store
//!
//! Persistence for the entity tables of the storage pipeline, backed by
//! RocksDB.
//!
//! ## Layout
//!
//! One column family per logical table (`users`, `folders`, `files`,
//! `segments`, `pack_groups`, `publications`, `publication_blobs`,
//! `authorized_users`, `commitments`, `sessions`) plus the `msgid_index`
//! secondary index. Rows are bincode. Key encodings in [`keys`] make
//! prefix iteration return rows in pipeline order: files in scanner
//! emission order with versions ascending per path, segments grouped by
//! parent ordered by (index, redundancy).
//!
//! ## Transactions
//!
//! Writes that the integrity rules group together go through a single
//! `WriteBatch`: file + segments, posted-state + Message-ID index,
//! publication row + blob + authorized set.

pub mod error;
pub mod keys;
pub mod store;

pub use error::{Result, StoreError};
pub use store::{RowStream, SnapshotStream, Store};
