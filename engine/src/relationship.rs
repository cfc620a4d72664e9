//! Advisor-client relationships.
//!
//! A relationship starts pending when an advisor requests access, becomes
//! active when the client side accepts, and ends terminated. At most one
//! non-terminated row exists per (advisor, client) pair; termination is the
//! only reversal, after which a fresh request starts over at pending.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use yarra_core::audit::{Actor, AuditAction, AuditResource, ResourceKind};
use yarra_core::profile;
use yarra_core::relationship::{AdvisorClientRelationship, RelationshipStatus};
use yarra_core::user::User;

use crate::audit::AuditTrail;
use crate::error::{Error, Result};
use crate::store::{with_read_retries, ProfileStore, RelationshipStore, StoreError, UserStore};

#[derive(Clone)]
pub struct AdvisorRelationships {
    relationships: Arc<dyn RelationshipStore>,
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileStore>,
    audit: AuditTrail,
    read_retries: u32,
}

/// One advisor's book of clients, as shown on their dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct ClientDashboard {
    pub advisor_id: Uuid,
    pub clients: Vec<ClientSummary>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClientSummary {
    pub client_id: Uuid,
    /// Display name at projection time. Scrubbed accounts show their
    /// scrubbed name; the dashboard never resurrects deleted identities.
    pub display_name: String,
    pub status: RelationshipStatus,
    pub fields_captured: usize,
    pub fields_total: usize,
    pub profile_updated_at: Option<DateTime<Utc>>,
}

impl AdvisorRelationships {
    pub fn new(
        relationships: Arc<dyn RelationshipStore>,
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileStore>,
        audit: AuditTrail,
        read_retries: u32,
    ) -> Self {
        Self { relationships, users, profiles, audit, read_retries }
    }

    /// Open a pending relationship between an advisor and a client.
    pub async fn request(&self, actor: Actor, advisor_id: Uuid, client_id: Uuid) -> Result<AdvisorClientRelationship> {
        if advisor_id == client_id {
            return Err(Error::Validation {
                field: "client_id",
                message: "advisor and client must be different users".to_string(),
                received: Some(serde_json::json!(client_id)),
            });
        }
        self.fetch_user_required(advisor_id).await?;
        self.fetch_user_required(client_id).await?;

        let existing = with_read_retries(self.read_retries, || {
            self.relationships.open_relationship(advisor_id, client_id)
        })
        .await
        .map_err(Error::store)?;
        if let Some(existing) = existing {
            return Err(Error::Conflict {
                message: format!(
                    "relationship between advisor and client already exists with status {}",
                    existing.status.as_str()
                ),
            });
        }

        let relationship = AdvisorClientRelationship::new(advisor_id, client_id);
        self.relationships
            .insert_relationship(&relationship)
            .await
            .map_err(|e| match e {
                StoreError::Constraint(message) => Error::Conflict { message },
                other => Error::store(other),
            })?;

        self.audit
            .record(
                actor,
                AuditAction::Created,
                AuditResource::new(ResourceKind::Relationship, relationship.id),
                Some(client_id),
                serde_json::json!({ "advisor_id": advisor_id }),
            )
            .await;
        tracing::info!(
            relationship_id = %relationship.id,
            advisor_id = %advisor_id,
            client_id = %client_id,
            "relationship requested"
        );
        Ok(relationship)
    }

    /// Move a pending relationship to active.
    pub async fn activate(&self, actor: Actor, relationship_id: Uuid) -> Result<AdvisorClientRelationship> {
        let mut relationship = self.fetch_relationship_required(relationship_id).await?;
        if relationship.status != RelationshipStatus::Pending {
            return Err(Error::Conflict {
                message: format!(
                    "only pending relationships can be activated, found {}",
                    relationship.status.as_str()
                ),
            });
        }

        relationship.status = RelationshipStatus::Active;
        self.relationships
            .update_relationship(&relationship)
            .await
            .map_err(Error::store)?;
        self.audit
            .record(
                actor,
                AuditAction::Activated,
                AuditResource::new(ResourceKind::Relationship, relationship.id),
                Some(relationship.client_id),
                serde_json::Value::Null,
            )
            .await;
        tracing::info!(relationship_id = %relationship.id, "relationship activated");
        Ok(relationship)
    }

    /// End a relationship from either open state. Already-terminated rows
    /// are returned unchanged.
    pub async fn terminate(&self, actor: Actor, relationship_id: Uuid) -> Result<AdvisorClientRelationship> {
        let mut relationship = self.fetch_relationship_required(relationship_id).await?;
        if relationship.status == RelationshipStatus::Terminated {
            return Ok(relationship);
        }

        relationship.status = RelationshipStatus::Terminated;
        relationship.ended_at = Some(Utc::now());
        self.relationships
            .update_relationship(&relationship)
            .await
            .map_err(Error::store)?;
        self.audit
            .record(
                actor,
                AuditAction::Terminated,
                AuditResource::new(ResourceKind::Relationship, relationship.id),
                Some(relationship.client_id),
                serde_json::Value::Null,
            )
            .await;
        tracing::info!(relationship_id = %relationship.id, "relationship terminated");
        Ok(relationship)
    }

    /// Project the advisor's open relationships into dashboard rows with
    /// profile completeness per client.
    pub async fn client_dashboard(&self, advisor_id: Uuid) -> Result<ClientDashboard> {
        self.fetch_user_required(advisor_id).await?;

        let relationships = with_read_retries(self.read_retries, || {
            self.relationships.relationships_for_advisor(advisor_id)
        })
        .await
        .map_err(Error::store)?;

        let mut clients = Vec::new();
        for relationship in relationships.iter().filter(|r| r.status.is_open()) {
            let user = self.fetch_user_required(relationship.client_id).await?;
            let profile = with_read_retries(self.read_retries, || {
                self.profiles.active_profile(relationship.client_id)
            })
            .await
            .map_err(Error::store)?;

            let (fields_captured, profile_updated_at) = match &profile {
                Some(p) => (p.fields.completeness().0, Some(p.updated_at)),
                None => (0, None),
            };
            clients.push(ClientSummary {
                client_id: relationship.client_id,
                display_name: user.display_name(),
                status: relationship.status,
                fields_captured,
                fields_total: profile::FIELD_COUNT,
                profile_updated_at,
            });
        }

        Ok(ClientDashboard { advisor_id, clients, generated_at: Utc::now() })
    }

    async fn fetch_user_required(&self, user_id: Uuid) -> Result<User> {
        with_read_retries(self.read_retries, || self.users.fetch_user(user_id))
            .await
            .map_err(Error::store)?
            .ok_or(Error::NotFound { resource: "user" })
    }

    async fn fetch_relationship_required(&self, relationship_id: Uuid) -> Result<AdvisorClientRelationship> {
        with_read_retries(self.read_retries, || self.relationships.fetch_relationship(relationship_id))
            .await
            .map_err(Error::store)?
            .ok_or(Error::NotFound { resource: "relationship" })
    }
}
