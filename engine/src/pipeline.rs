//! The conversational turn pipeline.
//!
//! One inbound message runs the full loop: resolve the session, persist the
//! message, classify it, gate and merge any extracted profile facts, and
//! record the intent transition. The message append is deliberately first;
//! a consent denial later in the turn leaves the message in history, because
//! history records what was said, not what was acted on.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use yarra_core::audit::Actor;
use yarra_core::consent::ConsentType;
use yarra_core::intent::{IntentKind, IntentRecord, TurnContext};
use yarra_core::profile::{FinancialProfile, ProfileFields};
use yarra_core::session::{ChatMessage, Sender};

use crate::audit::AuditTrail;
use crate::classify::{Classifier, KeywordClassifier};
use crate::config::EngineConfig;
use crate::consent::ConsentGate;
use crate::error::Result;
use crate::intent::IntentTracker;
use crate::lifecycle::{AccountLifecycle, BreachNotifier, LogOnlyNotifier};
use crate::merge::MergeEngine;
use crate::relationship::AdvisorRelationships;
use crate::session::SessionRegistry;
use crate::store::memory::MemoryStore;
use crate::store::{
    AuditStore, ConsentStore, IntentStore, MessageStore, ProfileStore, RelationshipStore,
    SessionStore, Store, UserStore,
};

/// Consents required before a conversational turn may write profile fields.
pub const PROFILE_WRITE_CONSENTS: &[ConsentType] =
    &[ConsentType::PrivacyPolicy, ConsentType::Terms];

/// One inbound user message with its addressing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    pub user_id: Uuid,
    pub platform: String,
    /// Platform-side conversation id, e.g. a WhatsApp chat id. `None` means
    /// the caller wants whichever session is currently open on the platform.
    #[serde(default)]
    pub external_session_id: Option<String>,
    pub message: String,
    /// The assistant reply the user is responding to. Recorded alongside
    /// the intent so a transition can be read in context later.
    #[serde(default)]
    pub previous_reply: Option<String>,
}

/// What one turn did.
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: Uuid,
    pub message_id: Uuid,
    pub intent: IntentKind,
    /// Present only when this turn changed the user's goal.
    pub recorded_intent: Option<IntentRecord>,
    /// The active profile after the turn, if one exists.
    pub profile: Option<FinancialProfile>,
    /// The fields this turn extracted and merged. Empty for fact-free turns.
    pub merged_fields: ProfileFields,
}

/// The assembled engine. Components share one store and one audit trail;
/// each is also usable on its own through the public fields.
#[derive(Clone)]
pub struct Engine {
    pub sessions: SessionRegistry,
    pub merge: MergeEngine,
    pub intents: IntentTracker,
    pub consent: ConsentGate,
    pub audit: AuditTrail,
    pub lifecycle: AccountLifecycle,
    pub relationships: AdvisorRelationships,
    classifier: Arc<dyn Classifier>,
}

impl Engine {
    pub fn new<S: Store + 'static>(
        store: Arc<S>,
        classifier: Arc<dyn Classifier>,
        notifier: Arc<dyn BreachNotifier>,
        config: EngineConfig,
    ) -> Self {
        let users: Arc<dyn UserStore> = store.clone();
        let profiles: Arc<dyn ProfileStore> = store.clone();
        let sessions: Arc<dyn SessionStore> = store.clone();
        let messages: Arc<dyn MessageStore> = store.clone();
        let intents: Arc<dyn IntentStore> = store.clone();
        let consents: Arc<dyn ConsentStore> = store.clone();
        let audits: Arc<dyn AuditStore> = store.clone();
        let rels: Arc<dyn RelationshipStore> = store.clone();
        let retries = config.store_read_retries;

        let audit = AuditTrail::new(audits, retries);
        let consent = ConsentGate::new(consents.clone(), audit.clone(), config.consent.clone(), retries);
        let merge = MergeEngine::new(users.clone(), profiles.clone(), audit.clone(), retries);
        let registry = SessionRegistry::new(users.clone(), sessions.clone(), messages.clone(), retries);
        let tracker = IntentTracker::new(intents.clone(), retries);
        let lifecycle = AccountLifecycle::new(
            users.clone(),
            profiles.clone(),
            sessions,
            messages,
            intents,
            consents,
            audit.clone(),
            consent.clone(),
            merge.clone(),
            notifier,
            retries,
        );
        let relationships = AdvisorRelationships::new(rels, users, profiles, audit.clone(), retries);

        Self {
            sessions: registry,
            merge,
            intents: tracker,
            consent,
            audit,
            lifecycle,
            relationships,
            classifier,
        }
    }

    /// Engine over an in-memory store, with the keyword classifier and a
    /// log-only breach notifier. The store is returned for test inspection.
    pub fn in_memory(config: EngineConfig) -> (Self, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let classifier = Arc::new(KeywordClassifier::new(config.fund_catalog.clone()));
        let engine = Self::new(store.clone(), classifier, Arc::new(LogOnlyNotifier), config);
        (engine, store)
    }

    /// Run one conversational turn.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnOutcome> {
        let session = self
            .sessions
            .resolve(request.user_id, &request.platform, request.external_session_id.as_deref())
            .await?;
        let history = self.sessions.history(session.id).await?;
        let message = self
            .sessions
            .append_message(session.id, Sender::User, &request.message, serde_json::Value::Null)
            .await?;

        let classification = self.classifier.classify(&history, &request.message).await;
        let actor = Actor::member(request.user_id);

        let profile = if classification.fields.is_empty() {
            self.merge.profile(request.user_id).await?
        } else {
            self.consent
                .check_access(actor, request.user_id, PROFILE_WRITE_CONSENTS)
                .await?;
            Some(self.merge.merge(actor, request.user_id, &classification.fields).await?)
        };

        let snapshot = profile.as_ref().map(|p| p.fields.clone()).unwrap_or_default();
        let context = TurnContext {
            user_message: request.message.clone(),
            assistant_reply: request.previous_reply.clone(),
        };
        let recorded_intent = self
            .intents
            .record_if_changed(
                request.user_id,
                session.id,
                classification.kind,
                snapshot,
                context,
                Some(message.id),
            )
            .await?;

        tracing::info!(
            user_id = %request.user_id,
            session_id = %session.id,
            intent = classification.kind.as_str(),
            merged = !classification.fields.is_empty(),
            "turn processed"
        );

        Ok(TurnOutcome {
            session_id: session.id,
            message_id: message.id,
            intent: classification.kind,
            recorded_intent,
            profile,
            merged_fields: classification.fields,
        })
    }

    /// Persist the assistant's reply into the session history.
    pub async fn append_assistant_reply(&self, session_id: Uuid, reply: &str) -> Result<ChatMessage> {
        self.sessions
            .append_message(session_id, Sender::Assistant, reply, serde_json::Value::Null)
            .await
    }

    /// Read-only view of the user's active profile.
    pub async fn profile(&self, user_id: Uuid) -> Result<Option<FinancialProfile>> {
        self.merge.profile(user_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use yarra_core::audit::AuditAction;
    use yarra_core::user::User;

    use crate::lifecycle::SignupRequest;
    use crate::store::TimeRange;

    async fn consented_member(engine: &Engine, email: &str) -> User {
        engine
            .lifecycle
            .signup(SignupRequest {
                accepted_privacy_version: Some("1.0".to_string()),
                accepted_terms_version: Some("1.0".to_string()),
                ..SignupRequest::new(email, "Amy", "Wong")
            })
            .await
            .unwrap()
    }

    fn turn(user_id: Uuid, platform: &str, message: &str) -> TurnRequest {
        TurnRequest {
            user_id,
            platform: platform.to_string(),
            external_session_id: None,
            message: message.to_string(),
            previous_reply: None,
        }
    }

    #[tokio::test]
    async fn turns_accumulate_one_profile_across_platforms() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let user = consented_member(&engine, "amy@example.com").await;

        let first = engine
            .process_turn(turn(user.id, "web", "I'm 45 and my balance is $100k"))
            .await
            .unwrap();
        assert_eq!(first.intent, IntentKind::Unknown);
        assert!(first.recorded_intent.is_none());
        let profile = first.profile.unwrap();
        assert_eq!(profile.fields.current_age, Some(45));
        assert_eq!(profile.fields.current_balance, Some(100_000.0));

        let second = engine
            .process_turn(TurnRequest {
                external_session_id: Some("wa-61400000000".to_string()),
                ..turn(user.id, "whatsapp", "compare fees with AustralianSuper")
            })
            .await
            .unwrap();
        assert_ne!(second.session_id, first.session_id, "platforms get their own sessions");
        assert_eq!(second.intent, IntentKind::CompareFeesNominated);
        assert!(second.recorded_intent.is_some());

        // Facts from the web session are still there.
        let profile = second.profile.unwrap();
        assert_eq!(profile.fields.current_age, Some(45));
        assert_eq!(profile.fields.current_fund.as_deref(), Some("AustralianSuper"));
    }

    #[tokio::test]
    async fn denied_turn_keeps_the_message_but_merges_nothing() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let user = engine
            .lifecycle
            .signup(SignupRequest::new("amy@example.com", "Amy", "Wong"))
            .await
            .unwrap();

        let err = engine
            .process_turn(turn(user.id, "web", "I'm 52"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "access_denied");
        assert_eq!(
            err.missing_consents(),
            &[ConsentType::PrivacyPolicy, ConsentType::Terms]
        );

        // The message survives the denial; the profile and intent do not
        // come into existence.
        let sessions = engine.sessions.sessions_for_user(user.id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        let history = engine.sessions.history(sessions[0].id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "I'm 52");
        assert!(engine.profile(user.id).await.unwrap().is_none());
        assert!(engine.intents.history(user.id).await.unwrap().is_empty());

        // The denial itself is on the record.
        let page = engine
            .audit
            .trail(user.id, TimeRange::all(), None, Some(50))
            .await
            .unwrap();
        assert!(page.entries.iter().any(|e| e.action == AuditAction::AccessDenied));
    }

    #[tokio::test]
    async fn fact_only_turns_never_displace_the_goal() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let user = consented_member(&engine, "amy@example.com").await;

        engine
            .process_turn(turn(user.id, "web", "compare fees with AustralianSuper"))
            .await
            .unwrap();
        let fact = engine
            .process_turn(turn(user.id, "web", "I'm 45"))
            .await
            .unwrap();
        assert_eq!(fact.intent, IntentKind::Unknown);
        assert!(fact.recorded_intent.is_none());
        let ranked = engine
            .process_turn(turn(user.id, "web", "rank all the fees for me"))
            .await
            .unwrap();
        assert_eq!(ranked.intent, IntentKind::RankFees);

        let kinds: Vec<IntentKind> = engine
            .intents
            .history(user.id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.kind)
            .collect();
        assert_eq!(kinds, vec![IntentKind::CompareFeesNominated, IntentKind::RankFees]);
    }

    #[tokio::test]
    async fn repeated_goal_is_recorded_once() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let user = consented_member(&engine, "amy@example.com").await;

        engine
            .process_turn(turn(user.id, "web", "project my balance to retirement"))
            .await
            .unwrap();
        engine
            .process_turn(turn(user.id, "web", "project it again with more growth"))
            .await
            .unwrap();

        let history = engine.intents.history(user.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, IntentKind::ProjectBalance);
    }

    #[tokio::test]
    async fn intent_context_pairs_message_with_previous_reply() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let user = consented_member(&engine, "amy@example.com").await;

        let outcome = engine
            .process_turn(TurnRequest {
                previous_reply: Some("Would you like a fee comparison?".to_string()),
                ..turn(user.id, "web", "yes, find the cheapest fund")
            })
            .await
            .unwrap();

        let recorded = outcome.recorded_intent.unwrap();
        assert_eq!(recorded.kind, IntentKind::FindCheapest);
        assert_eq!(recorded.context.user_message, "yes, find the cheapest fund");
        assert_eq!(
            recorded.context.assistant_reply.as_deref(),
            Some("Would you like a fee comparison?")
        );
        assert_eq!(recorded.message_id, Some(outcome.message_id));
    }

    #[tokio::test]
    async fn assistant_replies_land_in_the_same_session() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let user = consented_member(&engine, "amy@example.com").await;

        let outcome = engine
            .process_turn(turn(user.id, "web", "hello there"))
            .await
            .unwrap();
        engine
            .append_assistant_reply(outcome.session_id, "Hi! How can I help with your super?")
            .await
            .unwrap();

        let next = engine
            .process_turn(turn(user.id, "web", "what can you do?"))
            .await
            .unwrap();
        assert_eq!(next.session_id, outcome.session_id, "open web session is reused");

        let history = engine.sessions.history(outcome.session_id).await.unwrap();
        let senders: Vec<Sender> = history.iter().map(|m| m.sender).collect();
        assert_eq!(senders, vec![Sender::User, Sender::Assistant, Sender::User]);
    }

    #[tokio::test]
    async fn advisor_reads_profile_without_client_consents() {
        let (engine, _store) = Engine::in_memory(EngineConfig::default());
        let advisor = engine
            .lifecycle
            .signup(SignupRequest::new("advisor@example.com", "Ben", "Ota"))
            .await
            .unwrap();
        let client = consented_member(&engine, "client@example.com").await;
        engine
            .process_turn(turn(client.id, "web", "I'm 58 and my balance is 420000"))
            .await
            .unwrap();

        let actor = Actor::advisor(advisor.id);
        let rel = engine
            .relationships
            .request(actor, advisor.id, client.id)
            .await
            .unwrap();
        engine.relationships.activate(actor, rel.id).await.unwrap();

        let dashboard = engine.relationships.client_dashboard(advisor.id).await.unwrap();
        assert_eq!(dashboard.clients.len(), 1);
        assert_eq!(dashboard.clients[0].fields_captured, 2);
    }
}
