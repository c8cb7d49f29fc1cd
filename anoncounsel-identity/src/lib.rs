//! Pseudonymous identity for AnonCounsel.
//!
//! Each install owns one [`Pseudonym`], provisioned on first use and kept in
//! a local [`KeyValueStore`]. The same store also carries the local role
//! preference used by the access layer.

mod error;
pub mod pseudonym;
pub mod store;

pub use error::{IdentityError, IdentityResult};
pub use pseudonym::{
    Pseudonym, PseudonymGenerator, PSEUDONYM_HEX_LEN, PSEUDONYM_STORE_KEY, PSEUDONYM_TAG,
};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
