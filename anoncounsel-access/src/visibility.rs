//! Role-gated display labels.
//!
//! Privileged viewers never see a student's pseudonym. They see
//! `"Anonymous n"`, where `n` is assigned in first-seen order and is stable
//! only within one [`SessionBinding`]. Numbering restarts for every binding.

use crate::role::Role;
use anoncounsel_identity::Pseudonym;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Default prefix of anonymous display labels.
pub const ANONYMOUS_LABEL_PREFIX: &str = "Anonymous";

/// Raw-identifier to number assignments for one viewing session.
///
/// Owned by the viewer; discarded with the session. Never persisted.
#[derive(Debug, Clone)]
pub struct SessionBinding {
    session_id: Uuid,
    assigned: HashMap<String, u32>,
    next: u32,
}

impl SessionBinding {
    pub fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            assigned: HashMap::new(),
            next: 1,
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// The number assigned to `raw`, assigning the next one on first sight.
    pub fn number_for(&mut self, raw: &str) -> u32 {
        if let Some(n) = self.assigned.get(raw) {
            return *n;
        }
        let n = self.next;
        self.next += 1;
        self.assigned.insert(raw.to_string(), n);
        n
    }

    /// The number already assigned to `raw`, without assigning one.
    pub fn get(&self, raw: &str) -> Option<u32> {
        self.assigned.get(raw).copied()
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}

impl Default for SessionBinding {
    fn default() -> Self {
        Self::new()
    }
}

/// A respondent's real name keyed by contact email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffEntry {
    pub name: String,
    pub email: String,
}

/// Email-to-name lookup for respondents. Emails compare case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaffDirectory {
    by_email: HashMap<String, String>,
}

impl StaffDirectory {
    pub fn new(entries: impl IntoIterator<Item = StaffEntry>) -> Self {
        let by_email = entries
            .into_iter()
            .map(|e| (e.email.trim().to_lowercase(), e.name))
            .collect();
        Self { by_email }
    }

    pub fn name_for_email(&self, email: &str) -> Option<&str> {
        self.by_email
            .get(&email.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_email.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_email.is_empty()
    }
}

/// Computes what a viewer is shown for a participant.
#[derive(Debug, Clone)]
pub struct VisibilityMapper {
    prefix: String,
}

impl VisibilityMapper {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Display name for `raw` as seen by `viewer`.
    ///
    /// A pseudonym seen by a privileged viewer becomes `"{prefix} n"` from
    /// `binding`. Everything else, including every student view, is returned
    /// unchanged.
    pub fn display_name_for(
        &self,
        raw: &str,
        viewer: Role,
        binding: &mut SessionBinding,
    ) -> String {
        if viewer.is_privileged() && Pseudonym::is_pseudonym(raw) {
            format!("{} {}", self.prefix, binding.number_for(raw))
        } else {
            raw.to_string()
        }
    }

    /// Label a student sees for the respondent on the other side of a thread.
    ///
    /// Prefers a stored human label, then the directory name for the
    /// respondent's email, then the email's local part. Falls back to the bare
    /// prefix when nothing identifying is known.
    pub fn student_counterpart_label(
        &self,
        stored_label: Option<&str>,
        counterpart_email: Option<&str>,
        directory: &StaffDirectory,
    ) -> String {
        if let Some(label) = stored_label.map(str::trim) {
            if !label.is_empty() && !self.is_anonymous_label(label) {
                return label.to_string();
            }
        }

        if let Some(email) = counterpart_email.map(str::trim) {
            if let Some(name) = directory.name_for_email(email) {
                return name.to_string();
            }
            if let Some((local, _)) = email.split_once('@') {
                if !local.is_empty() {
                    return local.to_string();
                }
            }
        }

        self.prefix.clone()
    }

    fn is_anonymous_label(&self, label: &str) -> bool {
        Pseudonym::is_pseudonym(label) || label.starts_with(&self.prefix)
    }
}

impl Default for VisibilityMapper {
    fn default() -> Self {
        Self::new(ANONYMOUS_LABEL_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_follow_first_seen_order() {
        let mut binding = SessionBinding::new();
        assert_eq!(binding.number_for("anon-aaaaaaaaaa"), 1);
        assert_eq!(binding.number_for("anon-bbbbbbbbbb"), 2);
        assert_eq!(binding.number_for("anon-aaaaaaaaaa"), 1);
        assert_eq!(binding.get("anon-cccccccccc"), None);
        assert_eq!(binding.len(), 2);
    }

    #[test]
    fn bindings_have_distinct_ids() {
        assert_ne!(SessionBinding::new().session_id(), SessionBinding::new().session_id());
    }

    #[test]
    fn directory_is_case_insensitive() {
        let dir = StaffDirectory::new([StaffEntry {
            name: "Dr. Kim".into(),
            email: "Kim@Univ.ac.kr".into(),
        }]);
        assert_eq!(dir.name_for_email(" kim@univ.AC.kr "), Some("Dr. Kim"));
        assert_eq!(dir.name_for_email("lee@univ.ac.kr"), None);
    }
}
