//! Identity and key lifecycle
//!
//! A user is a permanent 256-bit identifier plus an Ed25519 keypair and
//! an X25519 encryption key, all recoverable only from the user secret.
//! The secret is generated exactly once; losing it is losing the
//! identity. Folders carry their own Ed25519 keypair and a random data
//! key for segment payloads, both wrapped with the owner's storage key.

use chrono::Utc;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::Zeroizing;

use crate::cipher::{unwrap_key, wrap_key};
use crate::error::{CryptoError, Result};
use crate::hash::hmac_sha256;
use crate::kdf::derive_scrypt;
use crate::sign::generate_keypair;
use silo_core::config::KdfSettings;
use silo_core::types::{Folder, FolderId, User, UserId};

/// Domain separator for deriving the X25519 secret from the storage key
const X25519_CONTEXT: &[u8] = b"silo/user/x25519/v1";

/// The user master secret. Never persisted; the caller is responsible
/// for presenting it at session start.
pub struct UserSecret(Zeroizing<[u8; 32]>);

impl UserSecret {
    /// Generate a fresh secret at first run
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(Zeroizing::new(bytes))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Unlocked key material for one user session
pub struct UserKeys {
    pub user_id: UserId,
    /// Ed25519 signing key for access proofs
    pub signing: SigningKey,
    /// X25519 secret for unwrapping PRIVATE share keys
    pub encryption: StaticSecret,
    storage_key: Zeroizing<[u8; 32]>,
}

impl UserKeys {
    /// The symmetric key wrapping everything this user stores at rest
    pub fn storage_key(&self) -> &[u8; 32] {
        &self.storage_key
    }

    pub fn ed25519_public(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn x25519_public(&self) -> [u8; 32] {
        X25519Public::from(&self.encryption).to_bytes()
    }
}

/// Unlocked key material for one folder
#[derive(Debug)]
pub struct FolderKeys {
    /// Ed25519 signing key for per-folder artifacts (subject derivation)
    pub signing: SigningKey,
    /// AES key for segment payloads; travels only inside encrypted
    /// indexes
    pub data_key: Zeroizing<[u8; 32]>,
}

fn derive_x25519(storage_key: &[u8; 32]) -> StaticSecret {
    StaticSecret::from(hmac_sha256(storage_key, X25519_CONTEXT))
}

/// First-run registration: mint the user ID, generate keypairs, wrap
/// the signing key with a key derived from the secret, and return the
/// persistable record beside the unlocked keys.
pub fn create_user(secret: &UserSecret, kdf: &KdfSettings) -> Result<(User, UserKeys)> {
    let mut id_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut id_bytes);
    let user_id = UserId::new(id_bytes);

    let mut kdf_salt = [0u8; 32];
    OsRng.fill_bytes(&mut kdf_salt);

    let storage_key = derive_scrypt(secret.as_bytes(), &kdf_salt, kdf)?;
    let (signing, ed25519_public) = generate_keypair();
    let encryption = derive_x25519(&storage_key);

    let wrapped_signing_key = wrap_key(&signing.to_bytes(), &storage_key)?;

    let record = User {
        user_id,
        ed25519_public,
        x25519_public: X25519Public::from(&encryption).to_bytes(),
        wrapped_signing_key,
        kdf_salt,
        created_at: Utc::now(),
    };

    tracing::info!(user = %user_id, "registered new user identity");

    let keys = UserKeys {
        user_id,
        signing,
        encryption,
        storage_key: Zeroizing::new(storage_key),
    };
    Ok((record, keys))
}

/// Unlock a persisted user with their secret. A wrong secret fails the
/// GCM tag on the wrapped signing key.
pub fn open_user(record: &User, secret: &UserSecret, kdf: &KdfSettings) -> Result<UserKeys> {
    let storage_key = derive_scrypt(secret.as_bytes(), &record.kdf_salt, kdf)?;

    let signing_bytes = unwrap_key(&record.wrapped_signing_key, &storage_key)?;
    let signing = SigningKey::from_bytes(&signing_bytes);

    if signing.verifying_key().to_bytes() != record.ed25519_public {
        return Err(CryptoError::WrapFailed);
    }

    let encryption = derive_x25519(&storage_key);
    if X25519Public::from(&encryption).to_bytes() != record.x25519_public {
        return Err(CryptoError::WrapFailed);
    }

    Ok(UserKeys {
        user_id: record.user_id,
        signing,
        encryption,
        storage_key: Zeroizing::new(storage_key),
    })
}

/// Mint a folder: fresh ID, fresh Ed25519 keypair, fresh data key, both
/// wrapped with the owner's storage key. Folder keys are generated once
/// and never rotated; rotation requires a new folder.
pub fn create_folder(owner: &UserKeys, root_path: &str) -> Result<(Folder, FolderKeys)> {
    let mut id_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut id_bytes);
    let folder_id = FolderId::new(id_bytes);

    let (signing, ed25519_public) = generate_keypair();

    let mut data_key = [0u8; 32];
    OsRng.fill_bytes(&mut data_key);

    let record = Folder {
        folder_id,
        owner: owner.user_id,
        root_path: root_path.to_string(),
        ed25519_public,
        wrapped_signing_key: wrap_key(&signing.to_bytes(), owner.storage_key())?,
        wrapped_data_key: wrap_key(&data_key, owner.storage_key())?,
        current_version: 0,
        deleted: false,
        created_at: Utc::now(),
    };

    tracing::info!(folder = %folder_id, "created folder keys");

    Ok((
        record,
        FolderKeys {
            signing,
            data_key: Zeroizing::new(data_key),
        },
    ))
}

/// Unwrap a folder's keys with its owner's storage key
pub fn open_folder(owner: &UserKeys, folder: &Folder) -> Result<FolderKeys> {
    if folder.owner != owner.user_id {
        return Err(CryptoError::AccessDenied);
    }

    let signing_bytes = unwrap_key(&folder.wrapped_signing_key, owner.storage_key())?;
    let signing = SigningKey::from_bytes(&signing_bytes);
    if signing.verifying_key().to_bytes() != folder.ed25519_public {
        return Err(CryptoError::WrapFailed);
    }

    let data_key = unwrap_key(&folder.wrapped_data_key, owner.storage_key())?;

    Ok(FolderKeys {
        signing,
        data_key: Zeroizing::new(data_key),
    })
}
