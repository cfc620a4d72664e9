use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Member,
    Advisor,
    System,
    Admin,
}

impl ActorRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Member => "member",
            ActorRole::Advisor => "advisor",
            ActorRole::System => "system",
            ActorRole::Admin => "admin",
        }
    }
}

/// Who performed an audited action. Always passed down explicitly; the
/// engine never infers an actor from ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn member(id: Uuid) -> Self {
        Self { id, role: ActorRole::Member }
    }

    pub fn advisor(id: Uuid) -> Self {
        Self { id, role: ActorRole::Advisor }
    }

    /// Scheduled jobs and incident tooling act as the nil-id system actor.
    pub fn system() -> Self {
        Self { id: Uuid::nil(), role: ActorRole::System }
    }
}

/// What happened. Paired with a [`ResourceKind`], so consent acceptance is
/// `Created` on a `Consent` resource, a merge is `Updated` on a `Profile`,
/// and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    SoftDeleted,
    Anonymized,
    Exported,
    AccessDenied,
    Activated,
    Terminated,
    BreachNotified,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::Created => "created",
            AuditAction::Updated => "updated",
            AuditAction::SoftDeleted => "soft_deleted",
            AuditAction::Anonymized => "anonymized",
            AuditAction::Exported => "exported",
            AuditAction::AccessDenied => "access_denied",
            AuditAction::Activated => "activated",
            AuditAction::Terminated => "terminated",
            AuditAction::BreachNotified => "breach_notified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    User,
    Profile,
    Session,
    Message,
    Intent,
    Consent,
    Relationship,
    Breach,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::User => "user",
            ResourceKind::Profile => "profile",
            ResourceKind::Session => "session",
            ResourceKind::Message => "message",
            ResourceKind::Intent => "intent",
            ResourceKind::Consent => "consent",
            ResourceKind::Relationship => "relationship",
            ResourceKind::Breach => "breach",
        }
    }

    /// Profile mutations are the compliance-critical writes: a failed audit
    /// append for them is retried once before being downgraded to a warning.
    pub fn is_compliance_critical(self) -> bool {
        matches!(self, ResourceKind::Profile)
    }
}

/// The record an audit entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditResource {
    pub kind: ResourceKind,
    pub id: Uuid,
}

impl AuditResource {
    pub fn new(kind: ResourceKind, id: Uuid) -> Self {
        Self { kind, id }
    }
}

/// One immutable audit entry.
///
/// `subject_id` is the user whose records the action touched, which is what
/// trail queries and exports filter on. It is `None` for entries that are
/// not about a single user, such as breach incidents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub actor_role: ActorRole,
    pub action: AuditAction,
    pub resource: AuditResource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<Uuid>,
    /// Small structured payload: changed field names, missing consent types.
    /// Never raw financial values.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub detail: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        actor: Actor,
        action: AuditAction,
        resource: AuditResource,
        subject_id: Option<Uuid>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            actor_id: actor.id,
            actor_role: actor.role,
            action,
            resource,
            subject_id,
            detail,
            recorded_at: Utc::now(),
        }
    }
}
