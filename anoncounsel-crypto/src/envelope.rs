//! Hybrid message encryption.
//!
//! Every message gets a fresh AES-256 key and a fresh 96-bit nonce. The body
//! is sealed with AES-256-GCM and the key is wrapped with RSA-OAEP for the
//! recipient's public key. An optional second wrap for the sender's own key
//! lets the sender read back the transport copy of their outgoing message.
//!
//! Envelope fields on the wire (all base64):
//!
//! | field              | contents                               |
//! |--------------------|----------------------------------------|
//! | `cipherText`       | AES-256-GCM ciphertext + 16-byte tag   |
//! | `iv`               | 12-byte nonce                          |
//! | `wrappedKey`       | message key wrapped for the recipient  |
//! | `senderWrappedKey` | optional, message key wrapped for self |

use crate::custody::{KeyCustody, PublicKey, UnwrapHandle, WrapHandle};
use crate::error::{CryptoError, CryptoResult};
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the per-message AES key.
pub const MESSAGE_KEY_SIZE: usize = 32;

/// Size of the AES-GCM nonce.
pub const IV_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag.
pub const AEAD_TAG_SIZE: usize = 16;

/// Single-use AES-256 key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct MessageKey([u8; MESSAGE_KEY_SIZE]);

impl MessageKey {
    fn generate<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut bytes = [0u8; MESSAGE_KEY_SIZE];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn from_unwrapped(bytes: &[u8]) -> CryptoResult<Self> {
        let array: [u8; MESSAGE_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
                expected: MESSAGE_KEY_SIZE,
                actual: bytes.len(),
            })?;
        Ok(Self(array))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

/// One encrypted message. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(with = "b64")]
    cipher_text: Vec<u8>,
    #[serde(with = "b64")]
    iv: Vec<u8>,
    #[serde(with = "b64")]
    wrapped_key: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "b64_opt")]
    sender_wrapped_key: Option<Vec<u8>>,
}

/// The envelope fields as carried verbatim by external schemas.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedEnvelope {
    pub cipher_text: String,
    pub iv: String,
    pub wrapped_key: String,
    pub sender_wrapped_key: Option<String>,
}

impl Envelope {
    /// Builds an envelope from raw field bytes, e.g. read back from storage.
    pub fn from_parts(
        cipher_text: Vec<u8>,
        iv: Vec<u8>,
        wrapped_key: Vec<u8>,
        sender_wrapped_key: Option<Vec<u8>>,
    ) -> Self {
        Self {
            cipher_text,
            iv,
            wrapped_key,
            sender_wrapped_key,
        }
    }

    /// Decodes the base64 wire fields.
    pub fn from_encoded(encoded: &EncodedEnvelope) -> CryptoResult<Self> {
        Ok(Self {
            cipher_text: decode_field("cipherText", &encoded.cipher_text)?,
            iv: decode_field("iv", &encoded.iv)?,
            wrapped_key: decode_field("wrappedKey", &encoded.wrapped_key)?,
            sender_wrapped_key: encoded
                .sender_wrapped_key
                .as_deref()
                .map(|v| decode_field("senderWrappedKey", v))
                .transpose()?,
        })
    }

    /// Encodes the fields as base64 for external schemas.
    pub fn encoded(&self) -> EncodedEnvelope {
        EncodedEnvelope {
            cipher_text: BASE64.encode(&self.cipher_text),
            iv: BASE64.encode(&self.iv),
            wrapped_key: BASE64.encode(&self.wrapped_key),
            sender_wrapped_key: self.sender_wrapped_key.as_ref().map(|k| BASE64.encode(k)),
        }
    }

    pub fn cipher_text(&self) -> &[u8] {
        &self.cipher_text
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    pub fn sender_wrapped_key(&self) -> Option<&[u8]> {
        self.sender_wrapped_key.as_deref()
    }

    /// Consumes the envelope into `(cipher_text, iv, wrapped_key, sender_wrapped_key)`.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>, Vec<u8>, Option<Vec<u8>>) {
        (
            self.cipher_text,
            self.iv,
            self.wrapped_key,
            self.sender_wrapped_key,
        )
    }

    fn validate(&self) -> CryptoResult<()> {
        if self.iv.len() != IV_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "iv has {} bytes, expected {IV_SIZE}",
                self.iv.len()
            )));
        }
        if self.cipher_text.len() < AEAD_TAG_SIZE {
            return Err(CryptoError::MalformedEnvelope(format!(
                "cipherText has {} bytes, shorter than the {AEAD_TAG_SIZE}-byte tag",
                self.cipher_text.len()
            )));
        }
        if self.wrapped_key.is_empty() {
            return Err(CryptoError::MalformedEnvelope("wrappedKey is empty".to_string()));
        }
        Ok(())
    }
}

fn decode_field(name: &str, value: &str) -> CryptoResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| CryptoError::MalformedEnvelope(format!("{name} is not base64: {e}")))
}

/// Encrypts `plaintext` for `recipient`, and for `sender` too when given.
///
/// Pure apart from `rng`: no state is shared between calls. Every sub-step
/// runs before the envelope is assembled, so a failure never yields a partial
/// envelope.
pub fn encrypt_with_rng<R: CryptoRng + RngCore>(
    rng: &mut R,
    plaintext: &[u8],
    recipient: &WrapHandle,
    sender: Option<&WrapHandle>,
) -> CryptoResult<Envelope> {
    let key = MessageKey::generate(rng);

    let mut iv = [0u8; IV_SIZE];
    rng.fill_bytes(&mut iv);

    let cipher_text = key
        .cipher()
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|e| CryptoError::Encryption(format!("message seal failed: {e}")))?;

    let wrapped_key = recipient.wrap_key(rng, &key.0)?;
    let sender_wrapped_key = sender.map(|s| s.wrap_key(rng, &key.0)).transpose()?;

    Ok(Envelope {
        cipher_text,
        iv: iv.to_vec(),
        wrapped_key,
        sender_wrapped_key,
    })
}

/// Encrypts `plaintext` for `recipient` only, using the OS RNG.
pub fn encrypt(plaintext: &[u8], recipient: &PublicKey) -> CryptoResult<Envelope> {
    encrypt_with_rng(
        &mut rand::rngs::OsRng,
        plaintext,
        &WrapHandle::for_recipient(recipient),
        None,
    )
}

/// Decrypts an envelope with the holder's unwrap capability.
///
/// Tries the recipient wrap first, then the sender wrap. A keypair that
/// matches neither, or any tag mismatch, is [`CryptoError::Authentication`].
pub fn decrypt(envelope: &Envelope, own_key: &UnwrapHandle) -> CryptoResult<Vec<u8>> {
    envelope.validate()?;

    let raw_key = match own_key.unwrap_key(&envelope.wrapped_key) {
        Ok(key) => key,
        Err(recipient_err) => match envelope.sender_wrapped_key.as_deref() {
            Some(sender_wrap) => own_key.unwrap_key(sender_wrap)?,
            None => return Err(recipient_err),
        },
    };
    let key = MessageKey::from_unwrapped(&raw_key)?;

    key.cipher()
        .decrypt(Nonce::from_slice(&envelope.iv), envelope.cipher_text.as_ref())
        .map_err(|_| {
            CryptoError::Authentication("message tag mismatch (tampered or wrong key)".to_string())
        })
}

/// Message encryption bound to this install's custody.
///
/// Built once at startup and shared; cloning is cheap.
#[derive(Clone)]
pub struct HybridEngine {
    custody: Arc<dyn KeyCustody>,
}

impl HybridEngine {
    pub fn new(custody: Arc<dyn KeyCustody>) -> Self {
        Self { custody }
    }

    /// This install's public key, for publishing to counterparts.
    pub fn public_key(&self) -> CryptoResult<PublicKey> {
        self.custody.ensure_public_key()
    }

    /// Encrypts for `recipient` and wraps the key for this install as well,
    /// so the sender can read its own transport copy.
    pub fn seal_for(&self, plaintext: &[u8], recipient: &PublicKey) -> CryptoResult<Envelope> {
        let own = self.custody.wrap_handle()?;
        encrypt_with_rng(
            &mut rand::rngs::OsRng,
            plaintext,
            &WrapHandle::for_recipient(recipient),
            Some(&own),
        )
    }

    /// Encrypts for `recipient` alone. The sender cannot decrypt the result.
    pub fn seal_for_recipient_only(
        &self,
        plaintext: &[u8],
        recipient: &PublicKey,
    ) -> CryptoResult<Envelope> {
        encrypt(plaintext, recipient)
    }

    pub fn open(&self, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
        decrypt(envelope, &self.custody.unwrap_handle()?)
    }

    pub fn encrypt_text(&self, text: &str, recipient: &PublicKey) -> CryptoResult<Envelope> {
        self.seal_for(text.as_bytes(), recipient)
    }

    pub fn decrypt_text(&self, envelope: &Envelope) -> CryptoResult<String> {
        let bytes = self.open(envelope)?;
        String::from_utf8(bytes).map_err(|_| {
            CryptoError::MalformedEnvelope("decrypted message is not valid UTF-8".to_string())
        })
    }
}

mod b64 {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod b64_opt {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD as BASE64;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&BASE64.encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|encoded| BASE64.decode(encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
