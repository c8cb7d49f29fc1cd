//! The per-process security context.
//!
//! Owns this install's custody, pseudonym, role resolver and label rules.
//! Built once at startup and passed to whatever renders or sends messages.

use crate::config::CoreConfig;
use crate::error::CoreResult;
use anoncounsel_access::{
    Account, ClaimSource, Role, RoleResolver, SenderIdentity, Session, SessionBinding,
    StaffDirectory, VisibilityMapper,
};
use anoncounsel_crypto::{Envelope, HybridEngine, KeyCustody, PublicKey, SealedKeystore};
use anoncounsel_identity::{JsonFileStore, KeyValueStore, Pseudonym, PseudonymGenerator};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Shown in place of a message body that could not be decrypted.
pub const UNREADABLE_PLACEHOLDER: &str = "[This message could not be decrypted]";

/// A message body as presented to the reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    /// Wrong keypair, tampering, or a broken envelope.
    Unreadable,
}

impl MessageBody {
    pub fn is_readable(&self) -> bool {
        matches!(self, MessageBody::Text(_))
    }

    pub fn display(&self) -> &str {
        match self {
            MessageBody::Text(text) => text,
            MessageBody::Unreadable => UNREADABLE_PLACEHOLDER,
        }
    }
}

impl fmt::Display for MessageBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display())
    }
}

pub struct SecurityContext {
    engine: HybridEngine,
    identity: PseudonymGenerator,
    roles: RoleResolver,
    mapper: VisibilityMapper,
    directory: StaffDirectory,
}

impl SecurityContext {
    /// Opens the on-disk keystore and identity file under `config.data_dir`.
    ///
    /// The keystore secret is read from the environment variable named in
    /// the config.
    pub fn bootstrap(config: &CoreConfig, claims: Arc<dyn ClaimSource>) -> CoreResult<Self> {
        let secret = config.keystore_secret()?;
        Self::bootstrap_with_secret(config, secret, claims)
    }

    pub fn bootstrap_with_secret(
        config: &CoreConfig,
        secret: impl Into<String>,
        claims: Arc<dyn ClaimSource>,
    ) -> CoreResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let custody = SealedKeystore::open(&config.data_dir, secret, config.kdf)?;
        let store = JsonFileStore::open(config.identity_path())?;
        debug!(data_dir = %config.data_dir.display(), "security context opened");

        Ok(Self::from_parts(
            Arc::new(custody),
            Arc::new(store),
            claims,
            config,
        ))
    }

    /// Assembles a context from explicit backends.
    pub fn from_parts(
        custody: Arc<dyn KeyCustody>,
        store: Arc<dyn KeyValueStore>,
        claims: Arc<dyn ClaimSource>,
        config: &CoreConfig,
    ) -> Self {
        Self {
            engine: HybridEngine::new(custody),
            identity: PseudonymGenerator::new(Arc::clone(&store)),
            roles: RoleResolver::new(store, claims, config.claim_timeout()),
            mapper: VisibilityMapper::new(config.anonymous_label_prefix.clone()),
            directory: StaffDirectory::new(config.staff_directory.iter().cloned()),
        }
    }

    // ── Keys and messages ──

    /// This install's public key, generating the keypair on first use.
    pub fn public_key(&self) -> CoreResult<PublicKey> {
        Ok(self.engine.public_key()?)
    }

    /// Encrypts `text` for `recipient`, also readable by this install.
    pub fn seal_message(&self, text: &str, recipient: &PublicKey) -> CoreResult<Envelope> {
        Ok(self.engine.encrypt_text(text, recipient)?)
    }

    /// Decrypts an envelope for display. Failure yields
    /// [`MessageBody::Unreadable`], never partial or garbled text.
    pub fn open_message(&self, envelope: &Envelope) -> MessageBody {
        match self.engine.decrypt_text(envelope) {
            Ok(text) => MessageBody::Text(text),
            Err(e) if e.is_authentication_failure() => {
                warn!("message not readable with this install's key");
                MessageBody::Unreadable
            }
            Err(e) => {
                error!("cannot open message: {e}");
                MessageBody::Unreadable
            }
        }
    }

    // ── Identity and role ──

    pub fn pseudonym(&self) -> CoreResult<Pseudonym> {
        Ok(self.identity.get_or_create()?)
    }

    pub fn pseudonyms(&self) -> &PseudonymGenerator {
        &self.identity
    }

    /// Re-resolves the role for `session` and caches it.
    pub async fn refresh_role(&self, session: &Session) -> Role {
        self.roles.resolve(session).await
    }

    pub fn current_role(&self) -> Role {
        self.roles.current()
    }

    pub fn set_local_role(&self, role: Role) -> CoreResult<()> {
        Ok(self.roles.set_local_override(role)?)
    }

    /// Sender identity for an outgoing message under the current role.
    pub fn outgoing_sender(&self, account: Option<&Account>) -> CoreResult<SenderIdentity> {
        let pseudonym = self.pseudonym()?;
        Ok(SenderIdentity::for_role(self.current_role(), &pseudonym, account))
    }

    /// Participant keys for a thread started under the current role.
    pub fn participant_keys(&self, account: Option<&Account>) -> CoreResult<Vec<String>> {
        let pseudonym = self.pseudonym()?;
        Ok(SenderIdentity::participant_keys(
            self.current_role(),
            &pseudonym,
            account,
        ))
    }

    /// Starts a viewing session with fresh anonymous numbering, fixed to the
    /// role known right now.
    pub fn viewer_session(&self) -> ViewerSession<'_> {
        let session = ViewerSession {
            mapper: &self.mapper,
            directory: &self.directory,
            role: self.current_role(),
            binding: SessionBinding::new(),
        };
        debug!(session_id = %session.session_id(), role = %session.role, "viewer session started");
        session
    }
}

/// Labels for one screen's worth of participants.
pub struct ViewerSession<'a> {
    mapper: &'a VisibilityMapper,
    directory: &'a StaffDirectory,
    role: Role,
    binding: SessionBinding,
}

impl ViewerSession<'_> {
    pub fn role(&self) -> Role {
        self.role
    }

    pub fn session_id(&self) -> Uuid {
        self.binding.session_id()
    }

    /// What this viewer sees for the participant `raw`.
    pub fn label_for(&mut self, raw: &str) -> String {
        self.mapper.display_name_for(raw, self.role, &mut self.binding)
    }

    /// What this viewer sees for the other side of a thread.
    ///
    /// Students see the respondent's stored or directory name. Privileged
    /// viewers get the anonymous label for `counterpart_id`.
    pub fn counterpart_label(
        &mut self,
        counterpart_id: &str,
        stored_label: Option<&str>,
        counterpart_email: Option<&str>,
    ) -> String {
        if self.role.is_privileged() {
            self.label_for(counterpart_id)
        } else {
            self.mapper
                .student_counterpart_label(stored_label, counterpart_email, self.directory)
        }
    }
}
