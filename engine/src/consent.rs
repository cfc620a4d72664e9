//! Consent version gate.
//!
//! Consent to an old document version is not consent to the current one:
//! the gate compares the latest accepted version per type against the
//! required version by exact equality. Every denial is itself audited
//! before the error is returned, so refusals show up in the trail next to
//! the operations they blocked.

use std::sync::Arc;

use uuid::Uuid;

use yarra_core::audit::{Actor, ActorRole, AuditAction, AuditResource, ResourceKind};
use yarra_core::consent::{ConsentRecord, ConsentType};

use crate::audit::AuditTrail;
use crate::config::ConsentPolicy;
use crate::error::{Error, Result};
use crate::store::{with_read_retries, ConsentStore};

#[derive(Clone)]
pub struct ConsentGate {
    store: Arc<dyn ConsentStore>,
    audit: AuditTrail,
    policy: ConsentPolicy,
    read_retries: u32,
}

/// One consent type's standing for a user.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ConsentStatus {
    pub consent_type: ConsentType,
    pub required_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accepted_version: Option<String>,
    pub current: bool,
}

impl ConsentGate {
    pub fn new(
        store: Arc<dyn ConsentStore>,
        audit: AuditTrail,
        policy: ConsentPolicy,
        read_retries: u32,
    ) -> Self {
        Self { store, audit, policy, read_retries }
    }

    /// Check that `user_id` holds a current consent for every required
    /// type. On failure, audits an `access_denied` entry listing the
    /// missing types and returns [`Error::AccessDenied`] carrying the same
    /// list.
    ///
    /// Advisors pass without a check: their access rides on the advisor
    /// client relationship established at onboarding, not on the member's
    /// document consents.
    pub async fn check_access(
        &self,
        actor: Actor,
        user_id: Uuid,
        required: &[ConsentType],
    ) -> Result<()> {
        if actor.role == ActorRole::Advisor {
            return Ok(());
        }

        let mut missing = Vec::new();
        for &consent_type in required {
            let Some(required_version) = self.policy.required_version(consent_type) else {
                continue;
            };
            let latest = with_read_retries(self.read_retries, || {
                self.store.latest_consent(user_id, consent_type)
            })
            .await
            .map_err(Error::store)?;

            let current = latest.as_ref().is_some_and(|r| r.version == required_version);
            if !current {
                missing.push(consent_type);
            }
        }

        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();

        self.audit
            .record(
                actor,
                AuditAction::AccessDenied,
                AuditResource::new(ResourceKind::Consent, user_id),
                Some(user_id),
                serde_json::json!({ "missing": missing }),
            )
            .await;
        tracing::info!(
            user_id = %user_id,
            actor_role = actor.role.as_str(),
            missing = ?missing.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
            "consent gate denied access"
        );

        Err(Error::AccessDenied { missing })
    }

    /// Append a consent acceptance. Re-consent after a version bump adds a
    /// new record; nothing is overwritten.
    pub async fn record_consent(
        &self,
        actor: Actor,
        user_id: Uuid,
        consent_type: ConsentType,
        version: &str,
    ) -> Result<ConsentRecord> {
        let version = version.trim();
        if version.is_empty() {
            return Err(Error::Validation {
                field: "version",
                message: "consent version must not be empty".to_string(),
                received: None,
            });
        }

        let record = ConsentRecord::new(user_id, consent_type, version);
        self.store.append_consent(&record).await.map_err(Error::store)?;
        self.audit
            .record(
                actor,
                AuditAction::Created,
                AuditResource::new(ResourceKind::Consent, record.id),
                Some(user_id),
                serde_json::json!({
                    "consent_type": consent_type.as_str(),
                    "version": version,
                }),
            )
            .await;
        Ok(record)
    }

    /// Per-type standing against the current policy, for settings screens
    /// and the re-consent prompt.
    pub async fn consent_status(&self, user_id: Uuid) -> Result<Vec<ConsentStatus>> {
        let mut statuses = Vec::with_capacity(ConsentType::ALL.len());
        for consent_type in ConsentType::ALL {
            let Some(required_version) = self.policy.required_version(consent_type) else {
                continue;
            };
            let latest = with_read_retries(self.read_retries, || {
                self.store.latest_consent(user_id, consent_type)
            })
            .await
            .map_err(Error::store)?;

            let accepted_version = latest.map(|r| r.version);
            let current = accepted_version.as_deref() == Some(required_version);
            statuses.push(ConsentStatus {
                consent_type,
                required_version: required_version.to_string(),
                accepted_version,
                current,
            });
        }
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::memory::MemoryStore;
    use crate::store::TimeRange;

    fn gate_with(policy: ConsentPolicy) -> (ConsentGate, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let audit = AuditTrail::new(store.clone(), 0);
        (ConsentGate::new(store.clone(), audit, policy, 0), store)
    }

    async fn denied_entries(store: &Arc<MemoryStore>, user_id: Uuid) -> usize {
        let trail = AuditTrail::new(store.clone(), 0);
        trail
            .trail(user_id, TimeRange::all(), None, None)
            .await
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.action == AuditAction::AccessDenied)
            .count()
    }

    #[tokio::test]
    async fn missing_consent_is_denied_and_audited() {
        let (gate, store) = gate_with(ConsentPolicy::default());
        let user_id = Uuid::now_v7();

        let err = gate
            .check_access(Actor::member(user_id), user_id, &ConsentType::ALL)
            .await
            .unwrap_err();

        assert_eq!(err.code(), "access_denied");
        assert_eq!(
            err.missing_consents(),
            &[ConsentType::PrivacyPolicy, ConsentType::Terms]
        );
        assert_eq!(denied_entries(&store, user_id).await, 1);
    }

    #[tokio::test]
    async fn outdated_version_is_not_consent() {
        let (gate, store) = gate_with(ConsentPolicy::new("2.0", "1.0"));
        let user_id = Uuid::now_v7();
        let actor = Actor::member(user_id);

        gate.record_consent(actor, user_id, ConsentType::PrivacyPolicy, "1.0")
            .await
            .unwrap();
        gate.record_consent(actor, user_id, ConsentType::Terms, "1.0")
            .await
            .unwrap();

        let err = gate
            .check_access(actor, user_id, &ConsentType::ALL)
            .await
            .unwrap_err();
        assert_eq!(err.missing_consents(), &[ConsentType::PrivacyPolicy]);
        assert_eq!(denied_entries(&store, user_id).await, 1);

        // Re-consent to the current version clears the gate.
        gate.record_consent(actor, user_id, ConsentType::PrivacyPolicy, "2.0")
            .await
            .unwrap();
        gate.check_access(actor, user_id, &ConsentType::ALL).await.unwrap();
    }

    #[tokio::test]
    async fn current_consents_pass_without_audit_noise() {
        let (gate, store) = gate_with(ConsentPolicy::default());
        let user_id = Uuid::now_v7();
        let actor = Actor::member(user_id);

        gate.record_consent(actor, user_id, ConsentType::PrivacyPolicy, "1.0")
            .await
            .unwrap();
        gate.record_consent(actor, user_id, ConsentType::Terms, "1.0")
            .await
            .unwrap();

        gate.check_access(actor, user_id, &ConsentType::ALL).await.unwrap();
        assert_eq!(denied_entries(&store, user_id).await, 0);
    }

    #[tokio::test]
    async fn advisors_bypass_the_member_consent_gate() {
        let (gate, _store) = gate_with(ConsentPolicy::default());
        let client_id = Uuid::now_v7();

        gate.check_access(Actor::advisor(Uuid::now_v7()), client_id, &ConsentType::ALL)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn consent_status_reports_standing_per_type() {
        let (gate, _store) = gate_with(ConsentPolicy::new("2.0", "1.0"));
        let user_id = Uuid::now_v7();
        let actor = Actor::member(user_id);

        gate.record_consent(actor, user_id, ConsentType::Terms, "1.0")
            .await
            .unwrap();

        let statuses = gate.consent_status(user_id).await.unwrap();
        assert_eq!(statuses.len(), 2);

        let privacy = statuses
            .iter()
            .find(|s| s.consent_type == ConsentType::PrivacyPolicy)
            .unwrap();
        assert!(!privacy.current);
        assert!(privacy.accepted_version.is_none());

        let terms = statuses.iter().find(|s| s.consent_type == ConsentType::Terms).unwrap();
        assert!(terms.current);
        assert_eq!(terms.accepted_version.as_deref(), Some("1.0"));
    }

    #[tokio::test]
    async fn blank_version_is_rejected() {
        let (gate, _store) = gate_with(ConsentPolicy::default());
        let user_id = Uuid::now_v7();

        let err = gate
            .record_consent(Actor::member(user_id), user_id, ConsentType::Terms, "  ")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_failed");
    }
}
