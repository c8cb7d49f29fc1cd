//! File-backed custody for real installs.
//!
//! The private key exists on disk only as PKCS#8 DER sealed with
//! ChaCha20-Poly1305 under an Argon2id key derived from the device secret.
//! In memory it lives inside the custody and is reachable only through
//! [`UnwrapHandle`].

use crate::cipher::{self, EncryptedData};
use crate::custody::{
    generate_private_key, KeyCustody, KeySlot, PublicKey, UnwrapHandle, KEY_BITS,
};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt, SALT_SIZE};
use chrono::{DateTime, Utc};
use rsa::RsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// File name of the sealed keypair inside the keystore directory.
pub const KEYSTORE_FILE: &str = "device_key.json";

const FORMAT_VERSION: u8 = 1;

/// On-disk keystore record.
#[derive(Debug, Serialize, Deserialize)]
struct StoredKeypair {
    version: u8,
    salt: [u8; SALT_SIZE],
    /// Base64 SubjectPublicKeyInfo DER, readable without the secret.
    public_key: String,
    sealed_private_key: EncryptedData,
    created_at: DateTime<Utc>,
}

/// Custody backed by a sealed keypair file.
pub struct SealedKeystore {
    path: PathBuf,
    secret: Zeroizing<String>,
    kdf: KdfParams,
    slot: KeySlot,
}

impl SealedKeystore {
    /// Opens the keystore in `dir`. No I/O happens until first use.
    ///
    /// A blank secret is refused: there is no unsealed mode.
    pub fn open(
        dir: impl AsRef<Path>,
        secret: impl Into<String>,
        kdf: KdfParams,
    ) -> CryptoResult<Self> {
        let secret = Zeroizing::new(secret.into());
        if secret.trim().is_empty() {
            return Err(CryptoError::CustodyInitialization(
                "keystore secret is empty".to_string(),
            ));
        }

        Ok(Self {
            path: dir.as_ref().join(KEYSTORE_FILE),
            secret,
            kdf,
            slot: KeySlot::default(),
        })
    }

    /// Path of the sealed keypair file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a keypair has been provisioned on disk.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    fn private_key(&self) -> CryptoResult<Arc<RsaPrivateKey>> {
        self.slot.get_or_try_init(|| {
            if self.path.exists() {
                self.load()
            } else {
                self.generate_and_store()
            }
        })
    }

    fn load(&self) -> CryptoResult<RsaPrivateKey> {
        let json = std::fs::read_to_string(&self.path).map_err(|e| {
            CryptoError::CustodyInitialization(format!("cannot read keystore: {e}"))
        })?;
        let stored: StoredKeypair = serde_json::from_str(&json).map_err(|e| {
            CryptoError::CustodyInitialization(format!("corrupt keystore record: {e}"))
        })?;

        if stored.version != FORMAT_VERSION {
            return Err(CryptoError::CustodyInitialization(format!(
                "unsupported keystore version {}",
                stored.version
            )));
        }

        let sealing_key = derive_key(&self.secret, &Salt::from_bytes(stored.salt), &self.kdf)
            .map_err(|e| CryptoError::CustodyInitialization(e.to_string()))?;
        let der = Zeroizing::new(cipher::decrypt(&sealing_key, &stored.sealed_private_key).map_err(
            |_| {
                warn!("keystore unseal failed at {}", self.path.display());
                CryptoError::CustodyInitialization(
                    "keystore could not be unsealed (wrong secret or tampered file)".to_string(),
                )
            },
        )?);

        let key = RsaPrivateKey::from_pkcs8_der(&der).map_err(|e| {
            CryptoError::CustodyInitialization(format!("invalid sealed private key: {e}"))
        })?;

        let recorded = PublicKey::from_base64(&stored.public_key)
            .map_err(|e| CryptoError::CustodyInitialization(e.to_string()))?;
        if recorded != PublicKey::from(key.to_public_key()) {
            return Err(CryptoError::CustodyInitialization(
                "keystore public key does not match sealed private key".to_string(),
            ));
        }

        debug!("loaded device keypair from {}", self.path.display());
        Ok(key)
    }

    fn generate_and_store(&self) -> CryptoResult<RsaPrivateKey> {
        let key = generate_private_key(KEY_BITS)?;

        let der = key.to_pkcs8_der().map_err(|e| {
            CryptoError::CustodyInitialization(format!("private key encoding failed: {e}"))
        })?;

        let salt = Salt::random();
        let sealing_key = derive_key(&self.secret, &salt, &self.kdf)
            .map_err(|e| CryptoError::CustodyInitialization(e.to_string()))?;
        let sealed_private_key = cipher::encrypt(&sealing_key, der.as_bytes())
            .map_err(|e| CryptoError::CustodyInitialization(e.to_string()))?;

        let public_key = PublicKey::from(key.to_public_key())
            .to_base64()
            .map_err(|e| CryptoError::CustodyInitialization(e.to_string()))?;

        let stored = StoredKeypair {
            version: FORMAT_VERSION,
            salt: *salt.as_bytes(),
            public_key,
            sealed_private_key,
            created_at: Utc::now(),
        };
        self.write(&stored)?;

        debug!("provisioned device keypair at {}", self.path.display());
        Ok(key)
    }

    fn write(&self, stored: &StoredKeypair) -> CryptoResult<()> {
        let io_err = |e: std::io::Error| {
            CryptoError::CustodyInitialization(format!("cannot write keystore: {e}"))
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(stored).map_err(|e| {
            CryptoError::CustodyInitialization(format!("keystore encoding failed: {e}"))
        })?;

        let tmp = self.path.with_extension("json.tmp");
        write_private(&tmp, json.as_bytes()).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}

/// Writes `contents` to a freshly created file that is owner-only from the
/// moment it exists.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

impl KeyCustody for SealedKeystore {
    fn ensure_public_key(&self) -> CryptoResult<PublicKey> {
        Ok(PublicKey::from(self.private_key()?.to_public_key()))
    }

    fn unwrap_handle(&self) -> CryptoResult<UnwrapHandle> {
        Ok(UnwrapHandle::new(self.private_key()?))
    }
}
