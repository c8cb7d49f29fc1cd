//! Authorization role resolution.
//!
//! The role is resolved per session by an explicit, ordered list of steps,
//! stopping at the first definitive answer:
//!
//! 1. [`ResolverStep::RemoteClaim`]: a server-issued role claim on the session
//!    token, matched case-insensitively by substring.
//! 2. [`ResolverStep::LoginState`]: a genuinely authenticated (non-anonymous)
//!    session counts as a respondent.
//! 3. [`ResolverStep::LocalPreference`]: the locally persisted fallback,
//!    `STUDENT` on first run.
//!
//! A failed or timed-out claim fetch skips straight to step 3. Nothing the
//! claim source does propagates past the resolver.

use anoncounsel_identity::{IdentityResult, KeyValueStore};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Store key of the local fallback role.
pub const LOCAL_ROLE_STORE_KEY: &str = "local_role";

/// Default bound on the remote claim fetch.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(5);

/// Authorization tier governing what identity information a viewer sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Student,
    Respondent,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "STUDENT",
            Role::Respondent => "RESPONDENT",
            Role::Admin => "ADMIN",
        }
    }

    /// Respondents and admins see pseudonyms, never real student labels.
    pub fn is_privileged(self) -> bool {
        matches!(self, Role::Respondent | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STUDENT" => Ok(Role::Student),
            "RESPONDENT" => Ok(Role::Respondent),
            "ADMIN" => Ok(Role::Admin),
            _ => Err(UnknownRole(s.to_string())),
        }
    }
}

/// Maps an opaque role claim to a role.
///
/// `admin` wins over the respondent keywords. Anything else is not a usable
/// claim.
pub fn role_from_claim(claim: &str) -> Option<Role> {
    let value = claim.to_lowercase();
    if value.contains("admin") {
        return Some(Role::Admin);
    }
    if ["respondent", "professor", "ta"]
        .iter()
        .any(|keyword| value.contains(keyword))
    {
        return Some(Role::Respondent);
    }
    None
}

/// The signed-in state the resolver reasons about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    /// Account id of the signed-in user, if any.
    pub user_id: Option<String>,
    /// True for anonymous (device-only) sign-ins.
    pub is_anonymous: bool,
}

impl Session {
    pub fn signed_out() -> Self {
        Self::default()
    }

    pub fn anonymous(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            is_anonymous: true,
        }
    }

    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            is_anonymous: false,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.is_signed_in() && !self.is_anonymous
    }
}

#[derive(Debug, Error)]
pub enum ClaimError {
    #[error("role claim fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("role claim fetch failed: {0}")]
    Fetch(String),
}

/// Issuer of server-authored role claims for a session token.
#[async_trait]
pub trait ClaimSource: Send + Sync {
    /// The raw role claim on the session's token, if the token carries one.
    async fn fetch_role_claim(&self, session: &Session) -> Result<Option<String>, ClaimError>;
}

/// Claim source for deployments without a token issuer.
pub struct NoClaims;

#[async_trait]
impl ClaimSource for NoClaims {
    async fn fetch_role_claim(&self, _session: &Session) -> Result<Option<String>, ClaimError> {
        Ok(None)
    }
}

/// One link of the fallback chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverStep {
    RemoteClaim,
    LoginState,
    LocalPreference,
}

/// Claim first, then login state, then local preference.
pub const DEFAULT_STEPS: [ResolverStep; 3] = [
    ResolverStep::RemoteClaim,
    ResolverStep::LoginState,
    ResolverStep::LocalPreference,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepOutcome {
    Resolved(Role),
    Continue,
    /// The claim source failed; jump to the local preference.
    Degraded,
}

/// Resolves the session role and remembers the last known answer.
pub struct RoleResolver {
    store: Arc<dyn KeyValueStore>,
    claims: Arc<dyn ClaimSource>,
    claim_timeout: Duration,
    steps: Vec<ResolverStep>,
    last_known: RwLock<Role>,
}

impl RoleResolver {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        claims: Arc<dyn ClaimSource>,
        claim_timeout: Duration,
    ) -> Self {
        let initial = load_local(store.as_ref());
        Self {
            store,
            claims,
            claim_timeout,
            steps: DEFAULT_STEPS.to_vec(),
            last_known: RwLock::new(initial),
        }
    }

    /// Replaces the step order. Lets a single step be exercised in isolation.
    pub fn with_steps(mut self, steps: impl Into<Vec<ResolverStep>>) -> Self {
        self.steps = steps.into();
        self
    }

    pub fn steps(&self) -> &[ResolverStep] {
        &self.steps
    }

    /// Resolves the role for `session`. Never fails.
    pub async fn resolve(&self, session: &Session) -> Role {
        let mut resolved = None;

        for step in &self.steps {
            match self.run_step(*step, session).await {
                StepOutcome::Resolved(role) => {
                    debug!(?step, %role, "role resolved");
                    resolved = Some(role);
                    break;
                }
                StepOutcome::Continue => {}
                StepOutcome::Degraded => {
                    resolved = Some(self.local_preference());
                    break;
                }
            }
        }

        let role = resolved.unwrap_or_else(|| self.local_preference());
        *self.last_known.write().unwrap_or_else(|p| p.into_inner()) = role;
        role
    }

    /// The last resolved role, without waiting on the claim source.
    pub fn current(&self) -> Role {
        *self.last_known.read().unwrap_or_else(|p| p.into_inner())
    }

    /// Persists the local fallback role.
    ///
    /// Only changes the degraded-mode default on this device; server-side
    /// authorization is unaffected.
    pub fn set_local_override(&self, role: Role) -> IdentityResult<()> {
        self.store.put(LOCAL_ROLE_STORE_KEY, role.as_str())?;
        *self.last_known.write().unwrap_or_else(|p| p.into_inner()) = role;
        Ok(())
    }

    /// The persisted fallback role, `STUDENT` when unset or unreadable.
    pub fn local_preference(&self) -> Role {
        load_local(self.store.as_ref())
    }

    async fn run_step(&self, step: ResolverStep, session: &Session) -> StepOutcome {
        match step {
            ResolverStep::RemoteClaim => self.claim_step(session).await,
            ResolverStep::LoginState => {
                if session.is_authenticated() {
                    StepOutcome::Resolved(Role::Respondent)
                } else {
                    StepOutcome::Continue
                }
            }
            ResolverStep::LocalPreference => StepOutcome::Resolved(self.local_preference()),
        }
    }

    async fn claim_step(&self, session: &Session) -> StepOutcome {
        if !session.is_signed_in() {
            return StepOutcome::Continue;
        }

        let fetched = tokio::time::timeout(
            self.claim_timeout,
            self.claims.fetch_role_claim(session),
        )
        .await
        .unwrap_or(Err(ClaimError::Timeout(self.claim_timeout)));

        match fetched {
            Ok(Some(claim)) => match role_from_claim(&claim) {
                Some(role) => StepOutcome::Resolved(role),
                None => StepOutcome::Continue,
            },
            Ok(None) => StepOutcome::Continue,
            Err(e) => {
                warn!("{e}; falling back to local role");
                StepOutcome::Degraded
            }
        }
    }
}

fn load_local(store: &dyn KeyValueStore) -> Role {
    match store.get(LOCAL_ROLE_STORE_KEY) {
        Ok(Some(saved)) => saved.parse().unwrap_or(Role::Student),
        Ok(None) => Role::Student,
        Err(e) => {
            warn!("cannot read local role: {e}");
            Role::Student
        }
    }
}
