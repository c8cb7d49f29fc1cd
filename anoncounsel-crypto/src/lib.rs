//! Encryption layer for AnonCounsel.
//!
//! Provides end-to-end message encryption using:
//! - AES-256-GCM for message bodies, one fresh key and nonce per message
//! - RSA-OAEP (SHA-256) to wrap each message key for its recipient
//! - A custody boundary that owns the device keypair and never exports the
//!   private half
//!
//! # Architecture
//!
//! 1. **Device Keypair**: RSA-2048, one per install, generated lazily inside a
//!    [`KeyCustody`]. [`SealedKeystore`] keeps it on disk sealed with
//!    Argon2id + ChaCha20-Poly1305 under a device secret.
//!
//! 2. **Message Key**: a random AES-256 key generated for each message. It is
//!    wrapped for the recipient's public key (and for the sender's own key, so
//!    the sender can read back what they sent) and travels inside the
//!    [`Envelope`].
//!
//! Decryption failures caused by a wrong keypair or tampering surface as
//! [`CryptoError::Authentication`] and never as garbled plaintext.

mod cipher;
pub mod custody;
pub mod envelope;
mod error;
mod key;
pub mod keystore;

pub use cipher::{EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use custody::{
    KeyCustody, MemoryCustody, PublicKey, UnwrapHandle, WrapHandle, KEY_BITS,
    MIN_RECIPIENT_KEY_BITS,
};
pub use envelope::{
    decrypt, encrypt, encrypt_with_rng, EncodedEnvelope, Envelope, HybridEngine, AEAD_TAG_SIZE,
    IV_SIZE, MESSAGE_KEY_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use keystore::{SealedKeystore, KEYSTORE_FILE};
