//! Storage contracts.
//!
//! The hosted relational store is an external collaborator; these traits
//! are the only surface the engine sees, and they carry the transactional
//! contract the engine depends on: atomic session find-or-create,
//! revision-checked profile upserts, and append-only audit, intent, and
//! consent tables (no update or delete methods exist for those).
//!
//! [`memory`] implements the same contract in process for tests and
//! embedded use.

pub mod memory;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use yarra_core::audit::AuditLogEntry;
use yarra_core::consent::{ConsentRecord, ConsentType};
use yarra_core::intent::IntentRecord;
use yarra_core::profile::FinancialProfile;
use yarra_core::relationship::AdvisorClientRelationship;
use yarra_core::session::{ChatMessage, ChatSession};
use yarra_core::user::User;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Connection-level trouble. The engine retries reads on this variant.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The optimistic revision check failed on a profile write: another
    /// writer committed between this caller's read and write.
    #[error("revision conflict for user {user_id}")]
    RevisionConflict { user_id: Uuid },

    /// A uniqueness or append-only constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// Inclusive-since, exclusive-until window. Either bound may be open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.since.is_none_or(|s| at >= s) && self.until.is_none_or(|u| at < u)
    }
}

/// Retry a read that failed as unavailable: `retries` extra attempts with a
/// short doubling delay. Conflict and constraint errors pass straight
/// through, they are not transient.
pub(crate) async fn with_read_retries<T, F, Fut>(retries: u32, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut remaining = retries;
    let mut delay = Duration::from_millis(50);
    loop {
        match op().await {
            Err(StoreError::Unavailable(reason)) if remaining > 0 => {
                tracing::debug!(%reason, remaining, "store read failed, retrying");
                remaining -= 1;
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            other => return other,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn insert_user(&self, user: &User) -> StoreResult<()>;
    async fn fetch_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    /// Full-row update. Lifecycle scrubs go through here; the row must
    /// already exist.
    async fn update_user(&self, user: &User) -> StoreResult<()>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn active_profile(&self, user_id: Uuid) -> StoreResult<Option<FinancialProfile>>;

    /// Atomic write of the active profile row.
    ///
    /// `expected_revision` is the revision the caller read, or `None` when
    /// creating. The store must reject with [`StoreError::RevisionConflict`]
    /// if the stored state differs (a row already exists on create, or the
    /// revision moved on update), bump the revision, and return the
    /// committed row.
    async fn put_active_profile(
        &self,
        profile: &FinancialProfile,
        expected_revision: Option<i64>,
    ) -> StoreResult<FinancialProfile>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the active session matching the candidate's
    /// `(user, platform, external id)` tuple, or insert the candidate.
    /// One atomic step: two racing turns must land in the same session.
    async fn find_or_create_session(&self, candidate: ChatSession) -> StoreResult<ChatSession>;
    async fn fetch_session(&self, session_id: Uuid) -> StoreResult<Option<ChatSession>>;
    async fn update_session(&self, session: &ChatSession) -> StoreResult<()>;
    async fn sessions_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ChatSession>>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append_message(&self, message: &ChatMessage) -> StoreResult<()>;
    /// Messages in insertion order.
    async fn messages_for_session(&self, session_id: Uuid) -> StoreResult<Vec<ChatMessage>>;
    /// All of a user's messages across sessions, for export.
    async fn messages_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ChatMessage>>;
}

#[async_trait]
pub trait IntentStore: Send + Sync {
    async fn append_intent(&self, record: &IntentRecord) -> StoreResult<()>;
    /// Most recent record for the user across all sessions.
    async fn last_intent_for_user(&self, user_id: Uuid) -> StoreResult<Option<IntentRecord>>;
    async fn intents_for_user(&self, user_id: Uuid) -> StoreResult<Vec<IntentRecord>>;
}

#[async_trait]
pub trait ConsentStore: Send + Sync {
    async fn append_consent(&self, record: &ConsentRecord) -> StoreResult<()>;
    /// Most recent record of the given type.
    async fn latest_consent(
        &self,
        user_id: Uuid,
        consent_type: ConsentType,
    ) -> StoreResult<Option<ConsentRecord>>;
    async fn consents_for_user(&self, user_id: Uuid) -> StoreResult<Vec<ConsentRecord>>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit(&self, entry: &AuditLogEntry) -> StoreResult<()>;

    /// One page of a user's entries, newest first, ordered by
    /// `(recorded_at, id)` descending. `before` is the exclusive cursor
    /// position from the previous page.
    async fn audit_page(
        &self,
        subject_id: Uuid,
        range: TimeRange,
        before: Option<(DateTime<Utc>, Uuid)>,
        limit: usize,
    ) -> StoreResult<Vec<AuditLogEntry>>;
}

#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Insert. Must reject a second open (pending or active) row for the
    /// same advisor-client pair.
    async fn insert_relationship(&self, relationship: &AdvisorClientRelationship) -> StoreResult<()>;
    async fn update_relationship(&self, relationship: &AdvisorClientRelationship) -> StoreResult<()>;
    async fn fetch_relationship(&self, id: Uuid) -> StoreResult<Option<AdvisorClientRelationship>>;
    /// The open row for a pair, if any.
    async fn open_relationship(
        &self,
        advisor_id: Uuid,
        client_id: Uuid,
    ) -> StoreResult<Option<AdvisorClientRelationship>>;
    async fn relationships_for_advisor(
        &self,
        advisor_id: Uuid,
    ) -> StoreResult<Vec<AdvisorClientRelationship>>;
}

/// Everything the engine needs from one backend.
pub trait Store:
    UserStore
    + ProfileStore
    + SessionStore
    + MessageStore
    + IntentStore
    + ConsentStore
    + AuditStore
    + RelationshipStore
{
}

impl<T> Store for T where
    T: UserStore
        + ProfileStore
        + SessionStore
        + MessageStore
        + IntentStore
        + ConsentStore
        + AuditStore
        + RelationshipStore
{
}
