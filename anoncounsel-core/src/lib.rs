//! AnonCounsel security core.
//!
//! [`SecurityContext`] ties together the pieces a messaging client needs:
//! end-to-end message encryption from `anoncounsel-crypto`, the install
//! pseudonym from `anoncounsel-identity`, and role-gated labels from
//! `anoncounsel-access`.

pub mod config;
pub mod context;
mod error;
pub mod logging;

pub use config::{CoreConfig, IDENTITY_FILE};
pub use context::{MessageBody, SecurityContext, ViewerSession, UNREADABLE_PLACEHOLDER};
pub use error::{CoreError, CoreResult};
pub use logging::init_tracing;

pub use anoncounsel_access as access;
pub use anoncounsel_crypto as crypto;
pub use anoncounsel_identity as identity;
