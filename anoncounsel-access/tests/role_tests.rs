//! Role resolution chain: claim mapping, login state, local preference, and
//! degradation when the claim source fails or hangs.

use anoncounsel_access::{
    ClaimError, ClaimSource, NoClaims, ResolverStep, Role, RoleResolver, Session,
    LOCAL_ROLE_STORE_KEY,
};
use anoncounsel_identity::{KeyValueStore, MemoryStore};
use async_trait::async_trait;
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_millis(500);

enum Script {
    Claim(&'static str),
    NoClaim,
    Fail,
    Hang,
}

struct ScriptedClaims {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedClaims {
    fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClaimSource for ScriptedClaims {
    async fn fetch_role_claim(&self, _session: &Session) -> Result<Option<String>, ClaimError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Claim(claim) => Ok(Some(claim.to_string())),
            Script::NoClaim => Ok(None),
            Script::Fail => Err(ClaimError::Fetch("token refresh rejected".into())),
            Script::Hang => std::future::pending().await,
        }
    }
}

fn resolver(claims: Arc<dyn ClaimSource>) -> (RoleResolver, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (RoleResolver::new(store.clone(), claims, TIMEOUT), store)
}

// ── Claim step ──

#[tokio::test]
async fn admin_claim_resolves_admin() {
    let (resolver, _) = resolver(ScriptedClaims::new(Script::Claim("ADMIN_USER")));
    assert_eq!(resolver.resolve(&Session::authenticated("u1")).await, Role::Admin);
}

#[tokio::test]
async fn ta_claim_resolves_respondent() {
    let (resolver, _) = resolver(ScriptedClaims::new(Script::Claim("ta-assistant")));
    assert_eq!(resolver.resolve(&Session::anonymous("u1")).await, Role::Respondent);
}

#[tokio::test]
async fn unrecognized_claim_falls_through_to_login_state() {
    let (resolver, _) = resolver(ScriptedClaims::new(Script::Claim("student")));
    assert_eq!(resolver.resolve(&Session::authenticated("u1")).await, Role::Respondent);
}

#[tokio::test]
async fn signed_out_session_never_fetches_claims() {
    let claims = ScriptedClaims::new(Script::Claim("admin"));
    let (resolver, _) = resolver(claims.clone());

    assert_eq!(resolver.resolve(&Session::signed_out()).await, Role::Student);
    assert_eq!(claims.calls(), 0);
}

// ── Login state and local preference ──

#[tokio::test]
async fn authenticated_without_claim_is_respondent() {
    let (resolver, _) = resolver(Arc::new(NoClaims));
    assert_eq!(resolver.resolve(&Session::authenticated("u1")).await, Role::Respondent);
}

#[tokio::test]
async fn fresh_anonymous_install_is_student() {
    let (resolver, _) = resolver(Arc::new(NoClaims));
    assert_eq!(resolver.resolve(&Session::anonymous("device")).await, Role::Student);
}

#[tokio::test]
async fn anonymous_session_uses_local_override() {
    let (resolver, store) = resolver(Arc::new(NoClaims));
    resolver.set_local_override(Role::Respondent).unwrap();

    assert_eq!(
        store.get(LOCAL_ROLE_STORE_KEY).unwrap().as_deref(),
        Some("RESPONDENT")
    );
    assert_eq!(resolver.resolve(&Session::anonymous("device")).await, Role::Respondent);
}

#[tokio::test]
async fn garbage_local_preference_reads_as_student() {
    let store = Arc::new(MemoryStore::new());
    store.put(LOCAL_ROLE_STORE_KEY, "superuser").unwrap();
    let resolver = RoleResolver::new(store, Arc::new(NoClaims), TIMEOUT);

    assert_eq!(resolver.local_preference(), Role::Student);
    assert_eq!(resolver.resolve(&Session::signed_out()).await, Role::Student);
}

// ── Degradation ──

#[tokio::test]
async fn fetch_error_skips_login_state() {
    let (resolver, _) = resolver(ScriptedClaims::new(Script::Fail));
    // An authenticated session would otherwise be a respondent.
    assert_eq!(resolver.resolve(&Session::authenticated("u1")).await, Role::Student);
}

#[tokio::test(start_paused = true)]
async fn hung_claim_source_times_out_to_local_preference() {
    let claims = ScriptedClaims::new(Script::Hang);
    let (resolver, _) = resolver(claims.clone());
    resolver.set_local_override(Role::Admin).unwrap();

    let role = resolver.resolve(&Session::authenticated("u1")).await;
    assert_eq!(role, Role::Admin);
    assert_eq!(claims.calls(), 1);
}

// ── Step ordering and cache ──

#[tokio::test]
async fn default_step_order() {
    let (resolver, _) = resolver(Arc::new(NoClaims));
    assert_eq!(
        resolver.steps(),
        &[
            ResolverStep::RemoteClaim,
            ResolverStep::LoginState,
            ResolverStep::LocalPreference
        ]
    );
}

#[tokio::test]
async fn login_state_step_in_isolation() {
    let store = Arc::new(MemoryStore::new());
    let resolver = RoleResolver::new(store, Arc::new(NoClaims), TIMEOUT)
        .with_steps(vec![ResolverStep::LoginState]);

    assert_eq!(resolver.resolve(&Session::authenticated("u1")).await, Role::Respondent);
    // Nothing definitive: the local preference still answers.
    assert_eq!(resolver.resolve(&Session::anonymous("u1")).await, Role::Student);
}

#[tokio::test]
async fn current_tracks_last_resolution() {
    let (resolver, _) = resolver(ScriptedClaims::new(Script::Claim("professor")));
    assert_eq!(resolver.current(), Role::Student);

    resolver.resolve(&Session::authenticated("u1")).await;
    assert_eq!(resolver.current(), Role::Respondent);
}

#[tokio::test]
async fn no_claim_on_token_continues_chain() {
    let claims = ScriptedClaims::new(Script::NoClaim);
    let (resolver, _) = resolver(claims.clone());
    assert_eq!(resolver.resolve(&Session::anonymous("u1")).await, Role::Student);
    assert_eq!(claims.calls(), 1);
}
