use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::audit::AuditLogEntry;
use crate::consent::ConsentRecord;
use crate::intent::IntentRecord;
use crate::profile::FinancialProfile;
use crate::session::{ChatMessage, ChatSession};
use crate::user::User;

/// Complete portable copy of one user's data, the subject-access shape.
///
/// Export is read-only and available in every account state, including
/// after deletion and anonymization (the scrubbed rows export as stored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataExport {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<FinancialProfile>,
    pub sessions: Vec<ChatSession>,
    pub messages: Vec<ChatMessage>,
    pub intents: Vec<IntentRecord>,
    pub consents: Vec<ConsentRecord>,
    pub audit_trail: Vec<AuditLogEntry>,
    pub generated_at: DateTime<Utc>,
}

impl UserDataExport {
    /// SHA-256 hex digest over the canonical JSON serialization. The
    /// recipient can re-hash the document to prove integrity in transit.
    pub fn checksum(&self) -> String {
        let canonical = serde_json::to_vec(self).expect("export document serializes");
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        hex::encode(hasher.finalize())
    }
}

/// An export document sealed with its integrity checksum.
#[derive(Debug, Clone, Serialize)]
pub struct ExportBundle {
    pub checksum: String,
    pub document: UserDataExport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_export() -> UserDataExport {
        UserDataExport {
            user: User::new("amy@example.com", "Amy", "Wong", None),
            profile: None,
            sessions: Vec::new(),
            messages: Vec::new(),
            intents: Vec::new(),
            consents: Vec::new(),
            audit_trail: Vec::new(),
            generated_at: Utc.with_ymd_and_hms(2026, 1, 10, 8, 0, 0).unwrap(),
        }
    }

    #[test]
    fn checksum_is_deterministic() {
        let export = sample_export();
        assert_eq!(export.checksum(), export.checksum());
        assert_eq!(export.checksum().len(), 64);
    }

    #[test]
    fn checksum_changes_when_content_changes() {
        let export = sample_export();
        let mut tampered = export.clone();
        tampered.user.email = "mallory@example.com".to_string();
        assert_ne!(export.checksum(), tampered.checksum());
    }

    #[test]
    fn checksum_matches_rehash_of_serialized_document() {
        let export = sample_export();
        let bytes = serde_json::to_vec(&export).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        assert_eq!(export.checksum(), hex::encode(hasher.finalize()));
    }
}
