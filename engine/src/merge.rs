//! Profile state merge.
//!
//! The merge itself is the pure coalesce on `ProfileFields`; this component
//! wraps it with everything a concurrent service needs: per-user
//! serialization, the create-or-merge decision, bound validation, the
//! account lifecycle gate, and audit entries naming the changed fields.
//!
//! Two layers of protection against lost updates: an in-process per-user
//! lock serializes merges on this instance, and the store's revision check
//! catches writers on other instances. A revision conflict is retried once
//! against freshly read state before surfacing.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use yarra_core::audit::{Actor, AuditAction, AuditResource, ResourceKind};
use yarra_core::profile::{FinancialProfile, ProfileFields};
use yarra_core::user::User;

use crate::audit::AuditTrail;
use crate::error::{Error, Result};
use crate::store::{with_read_retries, ProfileStore, StoreError, UserStore};

/// Age bounds accepted for `current_age`. Mirrors what the conversational
/// validators enforce before a value ever reaches the store.
pub const MIN_AGE: i32 = 15;
pub const MAX_AGE: i32 = 100;

#[derive(Clone)]
pub struct MergeEngine {
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileStore>,
    audit: AuditTrail,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
    read_retries: u32,
}

impl MergeEngine {
    pub fn new(
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileStore>,
        audit: AuditTrail,
        read_retries: u32,
    ) -> Self {
        Self {
            users,
            profiles,
            audit,
            locks: Arc::new(Mutex::new(HashMap::new())),
            read_retries,
        }
    }

    /// Merge one turn's disclosed fields into the user's active profile,
    /// creating the profile if none exists. Returns the committed row.
    ///
    /// Absent fields never clear stored values, and a merge that changes
    /// nothing writes nothing: the revision stays put and no audit entry is
    /// produced, so retrying a turn is safe.
    pub async fn merge(
        &self,
        actor: Actor,
        user_id: Uuid,
        incoming: &ProfileFields,
    ) -> Result<FinancialProfile> {
        let user = self.fetch_user_required(user_id).await?;
        if user.state.is_terminal() {
            return Err(Error::ProfileNotWritable { state: user.state });
        }

        let lock = self.user_lock(user_id).await;
        let guard = lock.lock().await;
        let outcome = self.merge_serialized(actor, user_id, incoming).await;
        drop(guard);
        drop(lock);
        self.evict_idle_lock(user_id).await;
        outcome
    }

    /// The create-or-merge loop. Caller holds the user's lock.
    async fn merge_serialized(
        &self,
        actor: Actor,
        user_id: Uuid,
        incoming: &ProfileFields,
    ) -> Result<FinancialProfile> {
        let mut retried = false;
        loop {
            let current = with_read_retries(self.read_retries, || self.profiles.active_profile(user_id))
                .await
                .map_err(Error::store)?;

            let outcome = match current {
                None => self.create_profile(actor, user_id, incoming).await,
                Some(existing) => self.merge_into(actor, existing, incoming).await,
            };

            match outcome {
                Err(Error::StoreUnavailable {
                    source: StoreError::RevisionConflict { .. },
                }) if !retried => {
                    // Lost the race to a writer on another instance; re-read
                    // and try once more.
                    retried = true;
                    tracing::debug!(user_id = %user_id, "profile revision moved, retrying merge");
                }
                Err(Error::StoreUnavailable {
                    source: StoreError::RevisionConflict { .. },
                }) => return Err(Error::ConcurrencyConflict { user_id }),
                other => return other,
            }
        }
    }

    /// Read-only view of the active profile.
    pub async fn profile(&self, user_id: Uuid) -> Result<Option<FinancialProfile>> {
        self.fetch_user_required(user_id).await?;
        with_read_retries(self.read_retries, || self.profiles.active_profile(user_id))
            .await
            .map_err(Error::store)
    }

    async fn create_profile(
        &self,
        actor: Actor,
        user_id: Uuid,
        incoming: &ProfileFields,
    ) -> Result<FinancialProfile> {
        validate_fields(incoming, None)?;

        let profile = FinancialProfile::new(user_id, incoming.clone(), Utc::now());
        let stored = self
            .profiles
            .put_active_profile(&profile, None)
            .await
            .map_err(Error::store)?;

        self.audit
            .record(
                actor,
                AuditAction::Created,
                AuditResource::new(ResourceKind::Profile, stored.id),
                Some(user_id),
                serde_json::json!({ "fields": incoming.present_fields() }),
            )
            .await;
        tracing::info!(
            user_id = %user_id,
            profile_id = %stored.id,
            fields = ?incoming.present_fields(),
            "profile created"
        );
        Ok(stored)
    }

    async fn merge_into(
        &self,
        actor: Actor,
        existing: FinancialProfile,
        incoming: &ProfileFields,
    ) -> Result<FinancialProfile> {
        validate_fields(incoming, existing.fields.current_age)?;

        let mut updated = existing.clone();
        if !updated.fields.coalesce(incoming) {
            return Ok(existing);
        }
        updated.updated_at = Utc::now();

        let stored = self
            .profiles
            .put_active_profile(&updated, Some(existing.revision))
            .await
            .map_err(Error::store)?;

        self.audit
            .record(
                actor,
                AuditAction::Updated,
                AuditResource::new(ResourceKind::Profile, stored.id),
                Some(stored.user_id),
                serde_json::json!({ "fields": incoming.present_fields() }),
            )
            .await;
        tracing::info!(
            user_id = %stored.user_id,
            profile_id = %stored.id,
            revision = stored.revision,
            fields = ?incoming.present_fields(),
            "profile updated"
        );
        Ok(stored)
    }

    async fn fetch_user_required(&self, user_id: Uuid) -> Result<User> {
        with_read_retries(self.read_retries, || self.users.fetch_user(user_id))
            .await
            .map_err(Error::store)?
            .ok_or(Error::NotFound { resource: "user" })
    }

    async fn user_lock(&self, user_id: Uuid) -> Arc<Mutex<()>> {
        self.locks.lock().await.entry(user_id).or_default().clone()
    }

    /// Remove the user's lock entry when nothing else holds or awaits it,
    /// keeping the map to merges in flight. Strong count 1 under the map
    /// lock means the map's reference is the last.
    async fn evict_idle_lock(&self, user_id: Uuid) {
        let mut locks = self.locks.lock().await;
        if locks.get(&user_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&user_id);
        }
    }
}

/// Bound checks, applied before any write. `known_age` is the stored
/// current age, used when a retirement age arrives without one in the same
/// turn.
fn validate_fields(incoming: &ProfileFields, known_age: Option<i32>) -> Result<()> {
    if let Some(age) = incoming.current_age {
        if !(MIN_AGE..=MAX_AGE).contains(&age) {
            return Err(Error::Validation {
                field: "current_age",
                message: format!("age must be between {MIN_AGE} and {MAX_AGE}"),
                received: Some(serde_json::json!(age)),
            });
        }
    }

    if let Some(retirement_age) = incoming.retirement_age {
        let floor = incoming.current_age.or(known_age).unwrap_or(0);
        if retirement_age <= floor || retirement_age > MAX_AGE {
            return Err(Error::Validation {
                field: "retirement_age",
                message: format!("retirement age must be above {floor} and at most {MAX_AGE}"),
                received: Some(serde_json::json!(retirement_age)),
            });
        }
    }

    for (field, value) in [
        ("current_balance", incoming.current_balance),
        ("current_income", incoming.current_income),
        ("retirement_income", incoming.retirement_income),
        ("assets_property", incoming.assets_property),
        ("assets_shares", incoming.assets_shares),
        ("assets_cash", incoming.assets_cash),
    ] {
        if let Some(amount) = value {
            if !amount.is_finite() || amount < 0.0 {
                return Err(Error::Validation {
                    field,
                    message: "amount must be a non-negative number".to_string(),
                    received: Some(serde_json::json!(amount)),
                });
            }
        }
    }

    for (field, value) in [
        ("current_fund", incoming.current_fund.as_deref()),
        ("retirement_income_option", incoming.retirement_income_option.as_deref()),
    ] {
        if let Some(text) = value {
            if text.trim().is_empty() {
                return Err(Error::Validation {
                    field,
                    message: "value must not be blank".to_string(),
                    received: Some(serde_json::json!(text)),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use crate::store::memory::MemoryStore;
    use crate::store::{StoreResult, TimeRange};

    fn engine_on(store: Arc<MemoryStore>) -> MergeEngine {
        let audit = AuditTrail::new(store.clone(), 0);
        MergeEngine::new(store.clone(), store.clone(), audit, 0)
    }

    async fn seeded_user(store: &Arc<MemoryStore>) -> Uuid {
        let user = User::new("amy@example.com", "Amy", "Wong", None);
        store.insert_user(&user).await.unwrap();
        user.id
    }

    fn fields(age: Option<i32>, balance: Option<f64>) -> ProfileFields {
        ProfileFields {
            current_age: age,
            current_balance: balance,
            ..ProfileFields::default()
        }
    }

    #[tokio::test]
    async fn first_merge_creates_the_profile() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;

        let profile = engine
            .merge(Actor::member(user_id), user_id, &fields(Some(45), None))
            .await
            .unwrap();

        assert_eq!(profile.revision, 0);
        assert!(profile.active);
        assert_eq!(profile.fields.current_age, Some(45));
    }

    #[tokio::test]
    async fn merges_accumulate_and_absent_fields_survive() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);

        engine.merge(actor, user_id, &fields(Some(45), Some(100_000.0))).await.unwrap();
        let after = engine
            .merge(
                actor,
                user_id,
                &ProfileFields {
                    retirement_age: Some(67),
                    ..ProfileFields::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(after.fields.current_age, Some(45));
        assert_eq!(after.fields.current_balance, Some(100_000.0));
        assert_eq!(after.fields.retirement_age, Some(67));
        assert_eq!(after.revision, 1);
    }

    #[tokio::test]
    async fn identical_merge_is_a_full_no_op() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);
        let incoming = fields(Some(45), Some(100_000.0));

        let first = engine.merge(actor, user_id, &incoming).await.unwrap();
        let second = engine.merge(actor, user_id, &incoming).await.unwrap();

        // Same row, same revision: nothing was written the second time.
        assert_eq!(second.revision, first.revision);
        assert_eq!(second.updated_at, first.updated_at);

        let trail = AuditTrail::new(store.clone(), 0);
        let page = trail.trail(user_id, TimeRange::all(), None, None).await.unwrap();
        assert_eq!(page.entries.len(), 1, "no audit entry for the no-op merge");
    }

    #[tokio::test]
    async fn empty_update_never_clears_stored_values() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);

        engine.merge(actor, user_id, &fields(Some(45), Some(100_000.0))).await.unwrap();
        let after = engine.merge(actor, user_id, &ProfileFields::default()).await.unwrap();

        assert_eq!(after.fields.current_age, Some(45));
        assert_eq!(after.fields.current_balance, Some(100_000.0));
        assert_eq!(after.revision, 0);
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store);

        let err = engine
            .merge(Actor::system(), Uuid::now_v7(), &fields(Some(45), None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn terminal_accounts_reject_merges() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;

        let mut user = store.fetch_user(user_id).await.unwrap().unwrap();
        user.scrub(Utc::now());
        store.update_user(&user).await.unwrap();

        let err = engine
            .merge(Actor::member(user_id), user_id, &fields(Some(46), None))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "profile_not_writable");
    }

    #[tokio::test]
    async fn out_of_bound_values_are_rejected_before_any_write() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);

        let err = engine.merge(actor, user_id, &fields(Some(14), None)).await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        let err = engine
            .merge(actor, user_id, &fields(None, Some(-1.0)))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        // Nothing reached the store.
        assert!(store.active_profile(user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retirement_age_is_checked_against_the_stored_age() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);

        engine.merge(actor, user_id, &fields(Some(60), None)).await.unwrap();

        let err = engine
            .merge(
                actor,
                user_id,
                &ProfileFields { retirement_age: Some(55), ..ProfileFields::default() },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_failed");

        engine
            .merge(
                actor,
                user_id,
                &ProfileFields { retirement_age: Some(67), ..ProfileFields::default() },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_merges_both_land() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);

        engine.merge(actor, user_id, &fields(Some(45), None)).await.unwrap();

        let a = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .merge(actor, user_id, &fields(None, Some(100_000.0)))
                    .await
            })
        };
        let b = {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .merge(
                        actor,
                        user_id,
                        &ProfileFields { retirement_age: Some(67), ..ProfileFields::default() },
                    )
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let profile = store.active_profile(user_id).await.unwrap().unwrap();
        assert_eq!(profile.fields.current_age, Some(45));
        assert_eq!(profile.fields.current_balance, Some(100_000.0));
        assert_eq!(profile.fields.retirement_age, Some(67));
        assert_eq!(profile.revision, 2);
        assert!(engine.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn user_lock_entries_do_not_accumulate() {
        let store = Arc::new(MemoryStore::new());
        let engine = engine_on(store.clone());
        let user_id = seeded_user(&store).await;
        let actor = Actor::member(user_id);

        engine.merge(actor, user_id, &fields(Some(45), None)).await.unwrap();
        assert!(engine.locks.lock().await.is_empty());

        // Failed merges release their entry too.
        engine.merge(actor, user_id, &fields(Some(14), None)).await.unwrap_err();
        assert!(engine.locks.lock().await.is_empty());
    }

    /// ProfileStore wrapper that fakes a cross-instance race: the first
    /// `conflicts` writes fail with a revision conflict.
    struct RacingProfileStore {
        inner: Arc<MemoryStore>,
        conflicts: AtomicU32,
        writes: AtomicU32,
    }

    #[async_trait]
    impl ProfileStore for RacingProfileStore {
        async fn active_profile(&self, user_id: Uuid) -> StoreResult<Option<FinancialProfile>> {
            self.inner.active_profile(user_id).await
        }

        async fn put_active_profile(
            &self,
            profile: &FinancialProfile,
            expected_revision: Option<i64>,
        ) -> StoreResult<FinancialProfile> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StoreError::RevisionConflict { user_id: profile.user_id });
            }
            self.inner.put_active_profile(profile, expected_revision).await
        }
    }

    fn racing_engine(store: Arc<MemoryStore>, conflicts: u32) -> (MergeEngine, Arc<RacingProfileStore>) {
        let profiles = Arc::new(RacingProfileStore {
            inner: store.clone(),
            conflicts: AtomicU32::new(conflicts),
            writes: AtomicU32::new(0),
        });
        let audit = AuditTrail::new(store.clone(), 0);
        (
            MergeEngine::new(store.clone(), profiles.clone(), audit, 0),
            profiles,
        )
    }

    #[tokio::test]
    async fn one_revision_conflict_is_retried_and_succeeds() {
        let store = Arc::new(MemoryStore::new());
        let user_id = seeded_user(&store).await;
        let (engine, profiles) = racing_engine(store, 1);

        let profile = engine
            .merge(Actor::member(user_id), user_id, &fields(Some(45), None))
            .await
            .unwrap();

        assert_eq!(profile.fields.current_age, Some(45));
        assert_eq!(profiles.writes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn repeated_conflicts_surface_as_concurrency_error() {
        let store = Arc::new(MemoryStore::new());
        let user_id = seeded_user(&store).await;
        let (engine, profiles) = racing_engine(store, 5);

        let err = engine
            .merge(Actor::member(user_id), user_id, &fields(Some(45), None))
            .await
            .unwrap_err();

        assert_eq!(err.code(), "concurrency_conflict");
        assert_eq!(profiles.writes.load(Ordering::SeqCst), 2);
    }
}
