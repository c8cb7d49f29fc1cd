//! Stable per-install pseudonyms.
//!
//! A pseudonym is `"anon-"` followed by the first 10 hex characters of a
//! SHA-256 digest over 128 random bits. It is derived from nothing about the
//! user, so it cannot be reversed to a real identity.
//!
//! The 10-hex prefix carries 40 bits. Across `N` installs the chance that two
//! share a pseudonym is roughly `N² / 2⁴¹`: about 0.5% at 100k installs. This
//! is a bounded unlinkability budget, not a uniqueness guarantee.

use crate::error::{IdentityError, IdentityResult};
use crate::store::KeyValueStore;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Tag every generated pseudonym starts with.
pub const PSEUDONYM_TAG: &str = "anon-";

/// Number of hex characters kept from the digest.
pub const PSEUDONYM_HEX_LEN: usize = 10;

/// Store key the pseudonym is persisted under.
pub const PSEUDONYM_STORE_KEY: &str = "anon_id";

const ENTROPY_BYTES: usize = 16;

/// A pseudonymous participant identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pseudonym(String);

impl Pseudonym {
    /// Derives a fresh pseudonym from `rng`.
    pub fn generate_with_rng<R: CryptoRng + RngCore>(rng: &mut R) -> Self {
        let mut entropy = [0u8; ENTROPY_BYTES];
        rng.fill_bytes(&mut entropy);

        let digest = hex::encode(Sha256::digest(entropy));
        Self(format!("{PSEUDONYM_TAG}{}", &digest[..PSEUDONYM_HEX_LEN]))
    }

    pub fn generate() -> Self {
        Self::generate_with_rng(&mut rand::rngs::OsRng)
    }

    /// Whether `raw` looks like a pseudonym rather than a real identity.
    pub fn is_pseudonym(raw: &str) -> bool {
        raw.starts_with(PSEUDONYM_TAG)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Pseudonym {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Pseudonym {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Provisions and persists this install's pseudonym.
///
/// One generator per store. Its mutex makes the read-then-write provisioning
/// a critical section, so concurrent first calls cannot persist two
/// different pseudonyms.
pub struct PseudonymGenerator {
    store: Arc<dyn KeyValueStore>,
    provisioning: Mutex<()>,
}

impl PseudonymGenerator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            provisioning: Mutex::new(()),
        }
    }

    /// Returns the persisted pseudonym, creating it on first call.
    ///
    /// Provisioning is a single atomic update on the store, so handles that
    /// share the underlying file agree on one pseudonym.
    pub fn get_or_create(&self) -> IdentityResult<Pseudonym> {
        let _guard = self
            .provisioning
            .lock()
            .map_err(|_| IdentityError::LockPoisoned)?;

        let mut provisioned = false;
        let mut provision = |current: Option<&str>| match current {
            Some(existing) if !existing.trim().is_empty() => None,
            _ => {
                provisioned = true;
                Some(Pseudonym::generate().into_string())
            }
        };
        let value = self.store.update(PSEUDONYM_STORE_KEY, &mut provision)?;

        if provisioned {
            debug!("provisioned new install pseudonym");
        }
        value
            .map(Pseudonym)
            .ok_or_else(|| IdentityError::Storage("pseudonym missing after provisioning".into()))
    }

    /// Replaces the pseudonym with a caller-supplied value.
    ///
    /// The value is trimmed and tagged with [`PSEUDONYM_TAG`] when it does not
    /// already carry it, so an override is always recognized as a pseudonym.
    /// A blank value generates a fresh pseudonym instead of persisting an
    /// empty identity.
    pub fn set_explicit(&self, value: &str) -> IdentityResult<Pseudonym> {
        let _guard = self
            .provisioning
            .lock()
            .map_err(|_| IdentityError::LockPoisoned)?;

        let candidate = value.trim();
        let pseudonym = if candidate.is_empty() {
            Pseudonym::generate()
        } else if Pseudonym::is_pseudonym(candidate) {
            Pseudonym(candidate.to_string())
        } else {
            Pseudonym(format!("{PSEUDONYM_TAG}{candidate}"))
        };

        self.store.put(PSEUDONYM_STORE_KEY, pseudonym.as_str())?;
        debug!("install pseudonym replaced");
        Ok(pseudonym)
    }

    /// Forgets the pseudonym. The next [`get_or_create`](Self::get_or_create)
    /// provisions a new one.
    pub fn reset(&self) -> IdentityResult<()> {
        let _guard = self
            .provisioning
            .lock()
            .map_err(|_| IdentityError::LockPoisoned)?;
        self.store.remove(PSEUDONYM_STORE_KEY)
    }
}
