//! # Silo Crypto
//!
//! Every cryptographic decision in the pipeline lives here:
//!
//! - **AES-256-GCM** binds authentication to encryption per segment,
//!   ruling out silent corruption ([`cipher`])
//! - **Ed25519** gives deterministic small signatures with no nonce risk
//!   for folder artifacts and access proofs ([`sign`])
//! - **Scrypt** is the default password KDF because it resists GPU
//!   attack; PBKDF2 is the fallback ([`kdf`])
//! - **SHA-256** is the content address of files and segments ([`hash`])
//! - The dual-subject scheme and Message-ID minting keep the wire free
//!   of anything keyed to plaintext ([`obfuscate`])
//! - User and folder key lifecycles, wrapped-at-rest ([`identity`])
//! - Share key derivation and challenge-response access proofs
//!   ([`access`])

pub mod access;
pub mod cipher;
pub mod error;
pub mod hash;
pub mod identity;
pub mod kdf;
pub mod obfuscate;
pub mod sign;

pub use error::{CryptoError, Result};
