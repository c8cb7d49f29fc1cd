//! Device key custody.
//!
//! A custody owns the install's RSA keypair and never hands out the private
//! half. Consumers get the public key for exchange, and two opaque
//! capabilities:
//!
//! - [`WrapHandle`]: RSA-OAEP (SHA-256, MGF1-SHA-256) encryption of a
//!   per-message key under some public key.
//! - [`UnwrapHandle`]: the matching decryption with the custody-held private
//!   key.
//!
//! Both operations are crate-private, so only the hybrid engine in
//! [`crate::envelope`] can exercise them. Custody backends live in this crate
//! for the same reason: [`MemoryCustody`] for tests and simulations, and
//! [`crate::keystore::SealedKeystore`] for real installs.

use crate::error::{CryptoError, CryptoResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::{CryptoRng, RngCore};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;
use zeroize::Zeroizing;

/// Modulus size of device keypairs.
pub const KEY_BITS: usize = 2048;

/// Smallest recipient key the engine will wrap for.
pub const MIN_RECIPIENT_KEY_BITS: usize = 2048;

/// An RSA public key, exchanged as SubjectPublicKeyInfo DER.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(RsaPublicKey);

impl PublicKey {
    /// Parses a SubjectPublicKeyInfo DER document.
    pub fn from_der(der: &[u8]) -> CryptoResult<Self> {
        RsaPublicKey::from_public_key_der(der)
            .map(Self)
            .map_err(|e| CryptoError::KeyWrap(format!("invalid recipient public key: {e}")))
    }

    /// Parses base64-encoded SubjectPublicKeyInfo DER.
    pub fn from_base64(encoded: &str) -> CryptoResult<Self> {
        let der = BASE64
            .decode(encoded.trim())
            .map_err(|e| CryptoError::KeyWrap(format!("invalid recipient public key: {e}")))?;
        Self::from_der(&der)
    }

    pub fn to_der(&self) -> CryptoResult<Vec<u8>> {
        self.0
            .to_public_key_der()
            .map(|doc| doc.as_bytes().to_vec())
            .map_err(|e| CryptoError::Encryption(format!("public key encoding failed: {e}")))
    }

    pub fn to_base64(&self) -> CryptoResult<String> {
        Ok(BASE64.encode(self.to_der()?))
    }

    /// Modulus size in bits.
    pub fn bits(&self) -> usize {
        self.0.size() * 8
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({} bits)", self.bits())
    }
}

impl From<RsaPublicKey> for PublicKey {
    fn from(key: RsaPublicKey) -> Self {
        Self(key)
    }
}

/// Capability to wrap a message key for one public key.
#[derive(Clone, Debug)]
pub struct WrapHandle {
    key: PublicKey,
}

impl WrapHandle {
    pub fn for_recipient(key: &PublicKey) -> Self {
        Self { key: key.clone() }
    }

    pub(crate) fn wrap_key<R: CryptoRng + RngCore>(
        &self,
        rng: &mut R,
        message_key: &[u8],
    ) -> CryptoResult<Vec<u8>> {
        let bits = self.key.bits();
        if bits < MIN_RECIPIENT_KEY_BITS {
            return Err(CryptoError::KeyWrap(format!(
                "recipient key is {bits} bits, at least {MIN_RECIPIENT_KEY_BITS} required"
            )));
        }

        self.key
            .0
            .encrypt(rng, Oaep::new::<Sha256>(), message_key)
            .map_err(|e| CryptoError::KeyWrap(e.to_string()))
    }
}

/// Capability to unwrap message keys with the custody-held private key.
#[derive(Clone)]
pub struct UnwrapHandle {
    key: Arc<RsaPrivateKey>,
}

impl UnwrapHandle {
    pub(crate) fn new(key: Arc<RsaPrivateKey>) -> Self {
        Self { key }
    }

    /// The private-key operation is blinded with fresh randomness.
    ///
    /// Any OAEP failure means the wrap was not made for this keypair (or was
    /// altered), so it is reported as an authentication failure.
    pub(crate) fn unwrap_key(&self, wrapped: &[u8]) -> CryptoResult<Zeroizing<Vec<u8>>> {
        self.key
            .decrypt_blinded(&mut rand::rngs::OsRng, Oaep::new::<Sha256>(), wrapped)
            .map(Zeroizing::new)
            .map_err(|_| {
                CryptoError::Authentication(
                    "message key was not wrapped for this identity".to_string(),
                )
            })
    }

    /// The public half of the keypair behind this handle.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.key.to_public_key())
    }
}

impl fmt::Debug for UnwrapHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("UnwrapHandle(..)")
    }
}

/// Owner of the install's keypair.
pub trait KeyCustody: Send + Sync {
    /// Returns the public key, generating the keypair on first use.
    ///
    /// Idempotent. Concurrent first calls coalesce into one generation.
    fn ensure_public_key(&self) -> CryptoResult<PublicKey>;

    /// Capability to wrap message keys for this install's own public key.
    fn wrap_handle(&self) -> CryptoResult<WrapHandle> {
        Ok(WrapHandle::for_recipient(&self.ensure_public_key()?))
    }

    /// Capability to unwrap message keys addressed to this install.
    fn unwrap_handle(&self) -> CryptoResult<UnwrapHandle>;
}

/// Lazily initialized private key shared by the custody backends.
///
/// The mutex is held across initialization, which is what serializes
/// concurrent first calls. Afterwards it only guards an `Arc` clone.
#[derive(Default)]
pub(crate) struct KeySlot {
    inner: Mutex<Option<Arc<RsaPrivateKey>>>,
}

impl KeySlot {
    pub(crate) fn get_or_try_init(
        &self,
        init: impl FnOnce() -> CryptoResult<RsaPrivateKey>,
    ) -> CryptoResult<Arc<RsaPrivateKey>> {
        let mut guard = self.inner.lock().map_err(|_| {
            CryptoError::CustodyInitialization("custody lock poisoned".to_string())
        })?;

        if let Some(key) = guard.as_ref() {
            return Ok(Arc::clone(key));
        }

        let key = Arc::new(init()?);
        *guard = Some(Arc::clone(&key));
        Ok(key)
    }
}

pub(crate) fn generate_private_key(bits: usize) -> CryptoResult<RsaPrivateKey> {
    debug!("generating {bits}-bit device keypair");
    RsaPrivateKey::new(&mut rand::rngs::OsRng, bits)
        .map_err(|e| CryptoError::CustodyInitialization(format!("key generation failed: {e}")))
}

/// In-process custody whose keypair lives only as long as the value.
///
/// Meant for tests and simulations. Nothing in the crate falls back to it
/// when a real keystore fails.
pub struct MemoryCustody {
    slot: KeySlot,
    generations: AtomicUsize,
}

impl MemoryCustody {
    pub fn new() -> Self {
        Self {
            slot: KeySlot::default(),
            generations: AtomicUsize::new(0),
        }
    }

    /// How many keypairs this custody has generated. Never exceeds one.
    pub fn generation_count(&self) -> usize {
        self.generations.load(Ordering::SeqCst)
    }

    fn private_key(&self) -> CryptoResult<Arc<RsaPrivateKey>> {
        self.slot.get_or_try_init(|| {
            let key = generate_private_key(KEY_BITS)?;
            self.generations.fetch_add(1, Ordering::SeqCst);
            Ok(key)
        })
    }
}

impl Default for MemoryCustody {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCustody for MemoryCustody {
    fn ensure_public_key(&self) -> CryptoResult<PublicKey> {
        Ok(PublicKey(self.private_key()?.to_public_key()))
    }

    fn unwrap_handle(&self) -> CryptoResult<UnwrapHandle> {
        Ok(UnwrapHandle::new(self.private_key()?))
    }
}
