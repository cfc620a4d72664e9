//! Intent change tracking.
//!
//! The intent table is a transition history, not a turn log: a record is
//! appended only when the classified goal differs from the last one
//! recorded for the user. The comparison reads the user's global last
//! record, not per-session state, because continuity belongs to the user;
//! switching platforms mid-goal is not a transition.

use std::sync::Arc;

use uuid::Uuid;

use yarra_core::intent::{IntentKind, IntentRecord, TurnContext};
use yarra_core::profile::ProfileFields;

use crate::error::{Error, Result};
use crate::store::{with_read_retries, IntentStore};

#[derive(Clone)]
pub struct IntentTracker {
    store: Arc<dyn IntentStore>,
    read_retries: u32,
}

impl IntentTracker {
    pub fn new(store: Arc<dyn IntentStore>, read_retries: u32) -> Self {
        Self { store, read_retries }
    }

    /// Record a transition if `kind` differs from the last recorded intent.
    ///
    /// `Unknown` is never recorded, and never displaces the last recorded
    /// intent either: a fact-only turn in the middle of a goal leaves the
    /// transition history untouched. Returns the appended record, or `None`
    /// when nothing changed.
    pub async fn record_if_changed(
        &self,
        user_id: Uuid,
        session_id: Uuid,
        kind: IntentKind,
        profile_snapshot: ProfileFields,
        context: TurnContext,
        message_id: Option<Uuid>,
    ) -> Result<Option<IntentRecord>> {
        if kind.is_unknown() {
            return Ok(None);
        }

        let last = with_read_retries(self.read_retries, || self.store.last_intent_for_user(user_id))
            .await
            .map_err(Error::store)?;
        if last.is_some_and(|r| r.kind == kind) {
            return Ok(None);
        }

        let record = IntentRecord::new(user_id, session_id, kind, profile_snapshot, context, message_id);
        self.store.append_intent(&record).await.map_err(Error::store)?;
        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            intent = kind.as_str(),
            "intent transition recorded"
        );
        Ok(Some(record))
    }

    /// Full transition history for a user, oldest first.
    pub async fn history(&self, user_id: Uuid) -> Result<Vec<IntentRecord>> {
        with_read_retries(self.read_retries, || self.store.intents_for_user(user_id))
            .await
            .map_err(Error::store)
    }
}
