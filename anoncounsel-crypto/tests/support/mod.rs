//! Shared fixtures. RSA keygen is the slow part of every test, so each test
//! binary generates its two identities once.

#![allow(dead_code)]

use anoncounsel_crypto::{KeyCustody, MemoryCustody, PublicKey, UnwrapHandle};
use std::sync::{Arc, OnceLock};

static ALICE: OnceLock<Arc<MemoryCustody>> = OnceLock::new();
static BOB: OnceLock<Arc<MemoryCustody>> = OnceLock::new();

pub fn alice() -> Arc<MemoryCustody> {
    Arc::clone(ALICE.get_or_init(|| Arc::new(MemoryCustody::new())))
}

pub fn bob() -> Arc<MemoryCustody> {
    Arc::clone(BOB.get_or_init(|| Arc::new(MemoryCustody::new())))
}

pub fn public_key(custody: &MemoryCustody) -> PublicKey {
    custody.ensure_public_key().unwrap()
}

pub fn unwrap_handle(custody: &MemoryCustody) -> UnwrapHandle {
    custody.unwrap_handle().unwrap()
}
