//! Embedded reference store.
//!
//! Keeps every table in process behind `tokio::sync::RwLock` and implements
//! the same transactional contract expected of the hosted store: the
//! session find-or-create and the profile revision check each happen under
//! a single write lock, so they are atomic with respect to other callers.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use yarra_core::audit::AuditLogEntry;
use yarra_core::consent::{ConsentRecord, ConsentType};
use yarra_core::intent::IntentRecord;
use yarra_core::profile::FinancialProfile;
use yarra_core::relationship::AdvisorClientRelationship;
use yarra_core::session::{ChatMessage, ChatSession};
use yarra_core::user::User;

use super::{
    AuditStore, ConsentStore, IntentStore, MessageStore, ProfileStore, RelationshipStore,
    SessionStore, StoreError, StoreResult, TimeRange, UserStore,
};

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Uuid, User>>,
    /// Per user: full profile history, at most one row active.
    profiles: RwLock<HashMap<Uuid, Vec<FinancialProfile>>>,
    sessions: RwLock<Vec<ChatSession>>,
    messages: RwLock<Vec<ChatMessage>>,
    intents: RwLock<Vec<IntentRecord>>,
    consents: RwLock<Vec<ConsentRecord>>,
    audit: RwLock<Vec<AuditLogEntry>>,
    relationships: RwLock<Vec<AdvisorClientRelationship>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(StoreError::Constraint(format!("user {} already exists", user.id)));
        }
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Constraint(format!("email {} already registered", user.email)));
        }
        users.insert(user.id, user.clone());
        Ok(())
    }

    async fn fetch_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&user_id).cloned())
    }

    async fn update_user(&self, user: &User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.id) {
            Some(row) => {
                *row = user.clone();
                Ok(())
            }
            None => Err(StoreError::Constraint(format!("user {} does not exist", user.id))),
        }
    }
}

#[async_trait]
impl ProfileStore for MemoryStore {
    async fn active_profile(&self, user_id: Uuid) -> StoreResult<Option<FinancialProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles
            .get(&user_id)
            .and_then(|rows| rows.iter().find(|p| p.active))
            .cloned())
    }

    async fn put_active_profile(
        &self,
        profile: &FinancialProfile,
        expected_revision: Option<i64>,
    ) -> StoreResult<FinancialProfile> {
        let mut profiles = self.profiles.write().await;
        let rows = profiles.entry(profile.user_id).or_default();
        let active_idx = rows.iter().position(|p| p.active);

        match (expected_revision, active_idx) {
            // Create: no active row may exist yet.
            (None, None) => {
                let mut stored = profile.clone();
                stored.active = true;
                stored.revision = 0;
                rows.push(stored.clone());
                Ok(stored)
            }
            // Update: the active row must still carry the revision we read.
            (Some(expected), Some(idx)) => {
                if rows[idx].revision != expected {
                    return Err(StoreError::RevisionConflict { user_id: profile.user_id });
                }
                let mut stored = profile.clone();
                stored.id = rows[idx].id;
                stored.created_at = rows[idx].created_at;
                stored.active = true;
                stored.revision = expected + 1;
                rows[idx] = stored.clone();
                Ok(stored)
            }
            _ => Err(StoreError::RevisionConflict { user_id: profile.user_id }),
        }
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_or_create_session(&self, candidate: ChatSession) -> StoreResult<ChatSession> {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.iter().find(|s| {
            s.active
                && s.user_id == candidate.user_id
                && s.platform == candidate.platform
                && s.external_session_id == candidate.external_session_id
        }) {
            return Ok(existing.clone());
        }
        sessions.push(candidate.clone());
        Ok(candidate)
    }

    async fn fetch_session(&self, session_id: Uuid) -> StoreResult<Option<ChatSession>> {
        Ok(self.sessions.read().await.iter().find(|s| s.id == session_id).cloned())
    }

    async fn update_session(&self, session: &ChatSession) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        match sessions.iter_mut().find(|s| s.id == session.id) {
            Some(row) => {
                *row = session.clone();
                Ok(())
            }
            None => Err(StoreError::Constraint(format!("session {} does not exist", session.id))),
        }
    }

    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ChatSession>> {
        Ok(self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append_message(&self, message: &ChatMessage) -> StoreResult<()> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn messages_for_session(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn messages_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ChatMessage>> {
        let session_ids: Vec<Uuid> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| session_ids.contains(&m.session_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl IntentStore for MemoryStore {
    async fn append_intent(&self, record: &IntentRecord) -> StoreResult<()> {
        self.intents.write().await.push(record.clone());
        Ok(())
    }

    async fn last_intent_for_user(&self, user_id: Uuid) -> StoreResult<Option<IntentRecord>> {
        Ok(self
            .intents
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .max_by_key(|r| (r.created_at, r.id))
            .cloned())
    }

    async fn intents_for_user(&self, user_id: Uuid) -> StoreResult<Vec<IntentRecord>> {
        Ok(self
            .intents
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ConsentStore for MemoryStore {
    async fn append_consent(&self, record: &ConsentRecord) -> StoreResult<()> {
        self.consents.write().await.push(record.clone());
        Ok(())
    }

    async fn latest_consent(
        &self,
        user_id: Uuid,
        consent_type: ConsentType,
    ) -> StoreResult<Option<ConsentRecord>> {
        Ok(self
            .consents
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id && r.consent_type == consent_type)
            .max_by_key(|r| (r.accepted_at, r.id))
            .cloned())
    }

    async fn consents_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ConsentRecord>> {
        Ok(self
            .consents
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit(&self, entry: &AuditLogEntry) -> StoreResult<()> {
        self.audit.write().await.push(entry.clone());
        Ok(())
    }

    async fn audit_page(
        &self,
        subject_id: Uuid,
        range: TimeRange,
        before: Option<(DateTime<Utc>, Uuid)>,
        limit: usize,
    ) -> StoreResult<Vec<AuditLogEntry>> {
        let audit = self.audit.read().await;
        let mut entries: Vec<AuditLogEntry> = audit
            .iter()
            .filter(|e| e.subject_id == Some(subject_id) && range.contains(e.recorded_at))
            .filter(|e| before.is_none_or(|(at, id)| (e.recorded_at, e.id) < (at, id)))
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.recorded_at, b.id).cmp(&(a.recorded_at, a.id)));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[async_trait]
impl RelationshipStore for MemoryStore {
    async fn insert_relationship(&self, relationship: &AdvisorClientRelationship) -> StoreResult<()> {
        let mut relationships = self.relationships.write().await;
        let open_exists = relationships.iter().any(|r| {
            r.advisor_id == relationship.advisor_id
                && r.client_id == relationship.client_id
                && r.status.is_open()
        });
        if open_exists {
            return Err(StoreError::Constraint(
                "an open relationship already exists for this advisor and client".to_string(),
            ));
        }
        relationships.push(relationship.clone());
        Ok(())
    }

    async fn update_relationship(&self, relationship: &AdvisorClientRelationship) -> StoreResult<()> {
        let mut relationships = self.relationships.write().await;
        match relationships.iter_mut().find(|r| r.id == relationship.id) {
            Some(row) => {
                *row = relationship.clone();
                Ok(())
            }
            None => Err(StoreError::Constraint(format!(
                "relationship {} does not exist",
                relationship.id
            ))),
        }
    }

    async fn fetch_relationship(&self, id: Uuid) -> StoreResult<Option<AdvisorClientRelationship>> {
        Ok(self.relationships.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn open_relationship(
        &self,
        advisor_id: Uuid,
        client_id: Uuid,
    ) -> StoreResult<Option<AdvisorClientRelationship>> {
        Ok(self
            .relationships
            .read()
            .await
            .iter()
            .find(|r| r.advisor_id == advisor_id && r.client_id == client_id && r.status.is_open())
            .cloned())
    }

    async fn relationships_for_advisor(
        &self,
        advisor_id: Uuid,
    ) -> StoreResult<Vec<AdvisorClientRelationship>> {
        Ok(self
            .relationships
            .read()
            .await
            .iter()
            .filter(|r| r.advisor_id == advisor_id)
            .cloned()
            .collect())
    }
}
