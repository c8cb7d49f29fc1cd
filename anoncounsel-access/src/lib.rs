//! Role resolution and role-gated identity presentation.
//!
//! - [`RoleResolver`] decides a session's [`Role`] through an ordered
//!   fallback chain that never fails.
//! - [`VisibilityMapper`] turns raw participant identifiers into what a
//!   viewer of a given role may see.
//! - [`SenderIdentity`] picks the identity written on outgoing messages.

pub mod role;
pub mod sender;
pub mod visibility;

pub use role::{
    role_from_claim, ClaimError, ClaimSource, NoClaims, ResolverStep, Role, RoleResolver, Session,
    UnknownRole, DEFAULT_CLAIM_TIMEOUT, DEFAULT_STEPS, LOCAL_ROLE_STORE_KEY,
};
pub use sender::{Account, SenderIdentity};
pub use visibility::{
    SessionBinding, StaffDirectory, StaffEntry, VisibilityMapper, ANONYMOUS_LABEL_PREFIX,
};
