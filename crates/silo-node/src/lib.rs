//! # Silo Node
//!
//! The coordinator crate: constructs the store, connection pool,
//! engines, and publication manager, and sequences them into the
//! end-to-end workflows an RPC surface calls into:
//!
//! `add_folder` -> `index_folder` -> `upload_folder` ->
//! `publish_folder` -> share ID, and share ID -> `download_share` ->
//! reconstructed bytes, with `cancel` / `get_progress` riding alongside.

pub mod config;
pub mod node;
pub mod progress;

pub use config::load_config;
pub use node::{ShareCredentials, SiloNode};
pub use progress::OperationRegistry;

/// Install the tracing subscriber for binaries and integration runs.
/// Filter via `RUST_LOG` (falls back to `info`).
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}
