//! Identity attached to outgoing messages.

use crate::role::Role;
use anoncounsel_identity::Pseudonym;
use serde::{Deserialize, Serialize};

/// The signed-in account of a respondent or admin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: String,
    pub email: Option<String>,
}

/// Sender id and label written on an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderIdentity {
    pub sender_id: String,
    pub sender_label: String,
}

impl SenderIdentity {
    /// Students always send as their pseudonym, even when signed in.
    /// Privileged senders use their account id and email, and fall back to
    /// the pseudonym when no account is available.
    pub fn for_role(role: Role, pseudonym: &Pseudonym, account: Option<&Account>) -> Self {
        match account {
            Some(account) if role.is_privileged() => Self {
                sender_id: account.user_id.clone(),
                sender_label: account
                    .email
                    .clone()
                    .unwrap_or_else(|| account.user_id.clone()),
            },
            _ => Self {
                sender_id: pseudonym.as_str().to_string(),
                sender_label: pseudonym.as_str().to_string(),
            },
        }
    }

    /// Participant keys a new thread is indexed under for this sender.
    pub fn participant_keys(
        role: Role,
        pseudonym: &Pseudonym,
        account: Option<&Account>,
    ) -> Vec<String> {
        match account {
            Some(account) if role.is_privileged() => {
                let mut keys = vec![account.user_id.clone()];
                if let Some(email) = &account.email {
                    keys.push(email.clone());
                }
                keys
            }
            _ => vec![pseudonym.as_str().to_string()],
        }
    }
}
