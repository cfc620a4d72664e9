use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipStatus {
    Pending,
    Active,
    Terminated,
}

impl RelationshipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationshipStatus::Pending => "pending",
            RelationshipStatus::Active => "active",
            RelationshipStatus::Terminated => "terminated",
        }
    }

    /// Pending and active relationships both count against the one-open-
    /// relationship-per-pair rule.
    pub fn is_open(self) -> bool {
        !matches!(self, RelationshipStatus::Terminated)
    }
}

/// The link that lets an advisor see a client's profile.
///
/// Advisor access is only ever removed by terminating the relationship;
/// account deletion does not silently revoke it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvisorClientRelationship {
    pub id: Uuid,
    pub advisor_id: Uuid,
    pub client_id: Uuid,
    pub status: RelationshipStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl AdvisorClientRelationship {
    pub fn new(advisor_id: Uuid, client_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            advisor_id,
            client_id,
            status: RelationshipStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
        }
    }
}
