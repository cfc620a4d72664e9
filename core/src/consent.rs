use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The consent documents the platform versions independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    PrivacyPolicy,
    Terms,
}

impl ConsentType {
    pub const ALL: [ConsentType; 2] = [ConsentType::PrivacyPolicy, ConsentType::Terms];

    pub fn as_str(self) -> &'static str {
        match self {
            ConsentType::PrivacyPolicy => "privacy_policy",
            ConsentType::Terms => "terms",
        }
    }
}

/// One acceptance of one document version. Append-only: re-consent after a
/// version bump adds a row, it never rewrites the old one, so the table is
/// usable as evidence of what was agreed to and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub consent_type: ConsentType,
    pub version: String,
    pub accepted_at: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn new(user_id: Uuid, consent_type: ConsentType, version: &str) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            consent_type,
            version: version.to_string(),
            accepted_at: Utc::now(),
        }
    }
}
