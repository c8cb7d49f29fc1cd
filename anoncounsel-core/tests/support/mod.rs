//! Shared helpers for security context tests.

#![allow(dead_code)]

use anoncounsel_core::access::{ClaimError, ClaimSource, NoClaims, Session, StaffEntry};
use anoncounsel_core::crypto::MemoryCustody;
use anoncounsel_core::identity::MemoryStore;
use anoncounsel_core::{CoreConfig, SecurityContext};
use async_trait::async_trait;
use std::sync::Arc;

/// Claim source that hands every signed-in session the same claim.
pub struct FixedClaim(pub &'static str);

#[async_trait]
impl ClaimSource for FixedClaim {
    async fn fetch_role_claim(&self, _session: &Session) -> Result<Option<String>, ClaimError> {
        Ok(Some(self.0.to_string()))
    }
}

pub fn config() -> CoreConfig {
    CoreConfig {
        staff_directory: vec![StaffEntry {
            name: "Kim Minji".into(),
            email: "minji.kim@univ.ac.kr".into(),
        }],
        ..CoreConfig::default()
    }
}

pub fn context_with(claims: Arc<dyn ClaimSource>) -> SecurityContext {
    SecurityContext::from_parts(
        Arc::new(MemoryCustody::new()),
        Arc::new(MemoryStore::new()),
        claims,
        &config(),
    )
}

pub fn student() -> SecurityContext {
    context_with(Arc::new(NoClaims))
}

pub async fn respondent() -> SecurityContext {
    let ctx = context_with(Arc::new(FixedClaim("professor")));
    ctx.refresh_role(&Session::authenticated("uid-prof")).await;
    ctx
}
