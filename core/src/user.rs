use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an account.
///
/// Transitions are one-way: `Active -> SoftDeleted -> Anonymized`.
/// Anonymization is also reachable directly from `Active`. No state ever
/// returns to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    Active,
    SoftDeleted,
    Anonymized,
}

impl AccountState {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountState::Active => "active",
            AccountState::SoftDeleted => "soft_deleted",
            AccountState::Anonymized => "anonymized",
        }
    }

    /// Terminal states freeze the profile: no merge may write to it.
    pub fn is_terminal(self) -> bool {
        !matches!(self, AccountState::Active)
    }
}

/// A member account.
///
/// Rows are never physically deleted. Deletion and anonymization scrub the
/// identifying fields in place and advance `state`, so that profile history,
/// consent records, and the audit trail keep a stable `user_id` to hang off
/// for the retention period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub state: AccountState,
    /// Set when the account leaves `Active`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(email: &str, first_name: &str, last_name: &str, phone: Option<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone,
            state: AccountState::Active,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    /// Soft delete: overwrite contact details with inert placeholders and
    /// mark the account `SoftDeleted`. The placeholder email keeps the row
    /// unique and undeliverable.
    pub fn scrub(&mut self, now: DateTime<Utc>) {
        self.email = format!("deleted+{}@redacted.invalid", self.id.simple());
        self.first_name = "Deleted".to_string();
        self.last_name = "User".to_string();
        self.phone = None;
        self.state = AccountState::SoftDeleted;
        self.deleted_at = Some(now);
    }

    /// Replace the identity with a pseudonym, severing the link between the
    /// row and the person. Financial history stays attached to the id for
    /// aggregate analysis; nothing identifying survives on the row itself.
    pub fn anonymize(&mut self, pseudonym: &str, now: DateTime<Utc>) {
        self.email = format!("{pseudonym}@anon.invalid");
        self.first_name = pseudonym.to_string();
        self.last_name = String::new();
        self.phone = None;
        self.state = AccountState::Anonymized;
        if self.deleted_at.is_none() {
            self.deleted_at = Some(now);
        }
    }

    /// Display name for advisor dashboards. Scrubbed and anonymized accounts
    /// render their placeholders, so this never leaks a real name for a
    /// non-active account.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        name.trim().to_string()
    }
}

/// Generate a pseudonym for anonymized accounts: `member_` + 12 hex chars.
pub fn pseudonym() -> String {
    format!("member_{}", random_hex(6))
}

/// Generate `n` random bytes and return them hex-encoded.
fn random_hex(n: usize) -> String {
    let bytes: Vec<u8> = (0..n).map(|_| rand::thread_rng().r#gen::<u8>()).collect();
    hex::encode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudonym_has_prefix_and_hex_tail() {
        let p = pseudonym();
        let tail = p.strip_prefix("member_").unwrap();
        assert_eq!(tail.len(), 12);
        assert!(tail.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn pseudonyms_are_unique() {
        assert_ne!(pseudonym(), pseudonym());
    }

    #[test]
    fn scrub_removes_identifying_fields() {
        let mut user = User::new("amy@example.com", "Amy", "Wong", Some("+61400000000".into()));
        let id = user.id;
        user.scrub(Utc::now());

        assert_eq!(user.state, AccountState::SoftDeleted);
        assert_eq!(user.id, id);
        assert!(user.email.starts_with("deleted+"));
        assert!(user.email.ends_with("@redacted.invalid"));
        assert_eq!(user.display_name(), "Deleted User");
        assert!(user.phone.is_none());
        assert!(user.deleted_at.is_some());
    }

    #[test]
    fn anonymize_replaces_identity_with_pseudonym() {
        let mut user = User::new("amy@example.com", "Amy", "Wong", None);
        user.anonymize("member_0a1b2c3d4e5f", Utc::now());

        assert_eq!(user.state, AccountState::Anonymized);
        assert_eq!(user.email, "member_0a1b2c3d4e5f@anon.invalid");
        assert_eq!(user.display_name(), "member_0a1b2c3d4e5f");
        assert!(user.state.is_terminal());
    }

    #[test]
    fn only_active_accounts_are_writable() {
        assert!(!AccountState::Active.is_terminal());
        assert!(AccountState::SoftDeleted.is_terminal());
        assert!(AccountState::Anonymized.is_terminal());
    }
}
