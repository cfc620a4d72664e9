//! Session registry.
//!
//! Sessions are created lazily on the first turn of a `(user, platform,
//! external id)` tuple and resolved idempotently afterwards; the atomic
//! find-or-create lives in the store contract so racing turns share one
//! session. Message history is a plain append-only log under the session.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use yarra_core::session::{ChatMessage, ChatSession, Sender};

use crate::error::{Error, Result};
use crate::store::{with_read_retries, MessageStore, SessionStore, UserStore};

#[derive(Clone)]
pub struct SessionRegistry {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    read_retries: u32,
}

impl SessionRegistry {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        read_retries: u32,
    ) -> Self {
        Self { users, sessions, messages, read_retries }
    }

    /// Resolve the active session for the tuple, creating one if needed.
    pub async fn resolve(
        &self,
        user_id: Uuid,
        platform: &str,
        external_session_id: Option<&str>,
    ) -> Result<ChatSession> {
        if platform.trim().is_empty() {
            return Err(Error::Validation {
                field: "platform",
                message: "platform must not be empty".to_string(),
                received: None,
            });
        }

        let user = with_read_retries(self.read_retries, || self.users.fetch_user(user_id))
            .await
            .map_err(Error::store)?;
        if user.is_none() {
            return Err(Error::NotFound { resource: "user" });
        }

        let candidate = ChatSession::new(user_id, platform, external_session_id);
        let session = self
            .sessions
            .find_or_create_session(candidate.clone())
            .await
            .map_err(Error::store)?;
        if session.id == candidate.id {
            tracing::info!(
                user_id = %user_id,
                session_id = %session.id,
                platform,
                "session created"
            );
        }
        Ok(session)
    }

    /// End a session. Repeating the call is a no-op, not an error.
    pub async fn end_session(&self, session_id: Uuid) -> Result<ChatSession> {
        let mut session = self.fetch_session_required(session_id).await?;
        if !session.active {
            return Ok(session);
        }
        session.active = false;
        session.ended_at = Some(Utc::now());
        self.sessions.update_session(&session).await.map_err(Error::store)?;
        tracing::info!(session_id = %session_id, "session ended");
        Ok(session)
    }

    /// Append one message to a session's log. The session must still be
    /// active; an ended session rejects new messages.
    pub async fn append_message(
        &self,
        session_id: Uuid,
        sender: Sender,
        content: &str,
        metadata: serde_json::Value,
    ) -> Result<ChatMessage> {
        let session = self.fetch_session_required(session_id).await?;
        if !session.active {
            return Err(Error::Conflict {
                message: format!("session {session_id} has ended"),
            });
        }
        let message = ChatMessage::new(session_id, sender, content, metadata);
        self.messages.append_message(&message).await.map_err(Error::store)?;
        Ok(message)
    }

    /// Message history in insertion order.
    pub async fn history(&self, session_id: Uuid) -> Result<Vec<ChatMessage>> {
        self.fetch_session_required(session_id).await?;
        with_read_retries(self.read_retries, || self.messages.messages_for_session(session_id))
            .await
            .map_err(Error::store)
    }

    /// Every session the user has opened, on any platform.
    pub async fn sessions_for_user(&self, user_id: Uuid) -> Result<Vec<ChatSession>> {
        with_read_retries(self.read_retries, || self.sessions.sessions_for_user(user_id))
            .await
            .map_err(Error::store)
    }

    async fn fetch_session_required(&self, session_id: Uuid) -> Result<ChatSession> {
        with_read_retries(self.read_retries, || self.sessions.fetch_session(session_id))
            .await
            .map_err(Error::store)?
            .ok_or(Error::NotFound { resource: "session" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use yarra_core::user::User;

    use crate::store::memory::MemoryStore;

    async fn registry_with_user() -> (SessionRegistry, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let user = User::new("amy@example.com", "Amy", "Wong", None);
        store.insert_user(&user).await.unwrap();
        (
            SessionRegistry::new(store.clone(), store.clone(), store, 0),
            user.id,
        )
    }

    #[tokio::test]
    async fn resolve_is_idempotent_per_tuple() {
        let (registry, user_id) = registry_with_user().await;

        let first = registry.resolve(user_id, "whatsapp", Some("wa-1")).await.unwrap();
        let again = registry.resolve(user_id, "whatsapp", Some("wa-1")).await.unwrap();
        assert_eq!(first.id, again.id);

        let web = registry.resolve(user_id, "web", Some("wa-1")).await.unwrap();
        assert_ne!(first.id, web.id);
    }

    #[tokio::test]
    async fn resolve_requires_a_known_user_and_platform() {
        let (registry, user_id) = registry_with_user().await;

        let err = registry.resolve(Uuid::now_v7(), "web", None).await.unwrap_err();
        assert_eq!(err.code(), "not_found");

        let err = registry.resolve(user_id, "  ", None).await.unwrap_err();
        assert_eq!(err.code(), "validation_failed");
    }

    #[tokio::test]
    async fn ending_a_session_twice_is_a_no_op() {
        let (registry, user_id) = registry_with_user().await;
        let session = registry.resolve(user_id, "web", None).await.unwrap();

        let ended = registry.end_session(session.id).await.unwrap();
        assert!(!ended.active);
        let ended_at = ended.ended_at.unwrap();

        let again = registry.end_session(session.id).await.unwrap();
        assert_eq!(again.ended_at, Some(ended_at));
    }

    #[tokio::test]
    async fn ended_sessions_reject_new_messages() {
        let (registry, user_id) = registry_with_user().await;
        let session = registry.resolve(user_id, "web", None).await.unwrap();
        registry
            .append_message(session.id, Sender::User, "hello", serde_json::Value::Null)
            .await
            .unwrap();
        registry.end_session(session.id).await.unwrap();

        let err = registry
            .append_message(session.id, Sender::Assistant, "late reply", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        // History is readable after the end, but unchanged.
        let history = registry.history(session.id).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn ending_a_session_frees_the_tuple_for_a_new_one() {
        let (registry, user_id) = registry_with_user().await;

        let first = registry.resolve(user_id, "web", None).await.unwrap();
        registry.end_session(first.id).await.unwrap();

        let second = registry.resolve(user_id, "web", None).await.unwrap();
        assert_ne!(second.id, first.id);
    }

    #[tokio::test]
    async fn history_keeps_insertion_order() {
        let (registry, user_id) = registry_with_user().await;
        let session = registry.resolve(user_id, "web", None).await.unwrap();

        registry
            .append_message(session.id, Sender::User, "I am 45", serde_json::Value::Null)
            .await
            .unwrap();
        registry
            .append_message(session.id, Sender::Assistant, "Noted.", serde_json::Value::Null)
            .await
            .unwrap();

        let history = registry.history(session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].sender, Sender::User);
        assert_eq!(history[0].content, "I am 45");
        assert_eq!(history[1].sender, Sender::Assistant);
    }

    #[tokio::test]
    async fn messages_require_an_existing_session() {
        let (registry, _user_id) = registry_with_user().await;

        let err = registry
            .append_message(Uuid::now_v7(), Sender::User, "hello", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
