//! Account lifecycle.
//!
//! Deletion here is degradation, not destruction: a soft delete scrubs the
//! identifying fields in place, anonymization replaces the identity with a
//! pseudonym, and both leave profile history, consents, and the audit trail
//! attached to the stable user id for the retention period. Neither
//! transition has a way back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use yarra_core::audit::{Actor, AuditAction, AuditResource, ResourceKind};
use yarra_core::consent::ConsentType;
use yarra_core::export::{ExportBundle, UserDataExport};
use yarra_core::profile::ProfileFields;
use yarra_core::user::{pseudonym, AccountState, User};

use crate::audit::AuditTrail;
use crate::consent::ConsentGate;
use crate::error::{Error, Result};
use crate::merge::MergeEngine;
use crate::store::{
    with_read_retries, ConsentStore, IntentStore, MessageStore, ProfileStore, SessionStore,
    StoreError, TimeRange, UserStore,
};

/// Delivery channel for breach notices. Real deployments send email or SMS;
/// the engine only depends on this contract.
#[async_trait]
pub trait BreachNotifier: Send + Sync {
    async fn notify(&self, user: &User, incident: &BreachIncident) -> std::result::Result<(), NotifyError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NotifyError(pub String);

/// Notifier that only records the attempt in the log. Used by the embedded
/// wiring and tests.
pub struct LogOnlyNotifier;

#[async_trait]
impl BreachNotifier for LogOnlyNotifier {
    async fn notify(&self, user: &User, incident: &BreachIncident) -> std::result::Result<(), NotifyError> {
        tracing::info!(
            user_id = %user.id,
            incident_id = %incident.id,
            "breach notification dispatched (log only)"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreachIncident {
    pub id: Uuid,
    pub summary: String,
    pub occurred_at: DateTime<Utc>,
}

impl BreachIncident {
    pub fn new(summary: &str, occurred_at: DateTime<Utc>) -> Self {
        Self { id: Uuid::now_v7(), summary: summary.to_string(), occurred_at }
    }
}

/// Outcome of a breach fan-out. The batch completing is not the same thing
/// as every notice landing: failed user ids are listed for the follow-up
/// run.
#[derive(Debug, Clone, Serialize)]
pub struct BreachReport {
    pub incident_id: Uuid,
    pub success: bool,
    pub notification_count: usize,
    pub failures: Vec<Uuid>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// The account had already left `Active`; nothing was re-scrubbed.
    AlreadyDeleted,
}

/// Everything needed to open an account. Consent versions are what the
/// signup surface showed the user; `None` means the box was not ticked and
/// no record is written.
#[derive(Debug, Clone)]
pub struct SignupRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub accepted_privacy_version: Option<String>,
    pub accepted_terms_version: Option<String>,
    /// Fields collected during onboarding, merged as the first profile
    /// write.
    pub initial_fields: ProfileFields,
}

impl SignupRequest {
    pub fn new(email: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            email: email.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: None,
            accepted_privacy_version: None,
            accepted_terms_version: None,
            initial_fields: ProfileFields::default(),
        }
    }
}

#[derive(Clone)]
pub struct AccountLifecycle {
    users: Arc<dyn UserStore>,
    profiles: Arc<dyn ProfileStore>,
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    intents: Arc<dyn IntentStore>,
    consents: Arc<dyn ConsentStore>,
    audit: AuditTrail,
    gate: ConsentGate,
    merge: MergeEngine,
    notifier: Arc<dyn BreachNotifier>,
    read_retries: u32,
}

impl AccountLifecycle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<dyn UserStore>,
        profiles: Arc<dyn ProfileStore>,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        intents: Arc<dyn IntentStore>,
        consents: Arc<dyn ConsentStore>,
        audit: AuditTrail,
        gate: ConsentGate,
        merge: MergeEngine,
        notifier: Arc<dyn BreachNotifier>,
        read_retries: u32,
    ) -> Self {
        Self {
            users,
            profiles,
            sessions,
            messages,
            intents,
            consents,
            audit,
            gate,
            merge,
            notifier,
            read_retries,
        }
    }

    /// Open an account: insert the user, record the accepted consents, and
    /// seed the profile with whatever onboarding collected.
    pub async fn signup(&self, request: SignupRequest) -> Result<User> {
        let email = request.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(Error::Validation {
                field: "email",
                message: "a valid email address is required".to_string(),
                received: Some(serde_json::json!(request.email)),
            });
        }
        if request.first_name.trim().is_empty() {
            return Err(Error::Validation {
                field: "first_name",
                message: "first name must not be empty".to_string(),
                received: None,
            });
        }

        let user = User::new(email, request.first_name.trim(), request.last_name.trim(), request.phone.clone());
        self.users.insert_user(&user).await.map_err(|e| match e {
            StoreError::Constraint(message) => Error::Conflict { message },
            other => Error::store(other),
        })?;

        let actor = Actor::member(user.id);
        self.audit
            .record(
                actor,
                AuditAction::Created,
                AuditResource::new(ResourceKind::User, user.id),
                Some(user.id),
                serde_json::Value::Null,
            )
            .await;
        tracing::info!(user_id = %user.id, "account created");

        if let Some(version) = &request.accepted_privacy_version {
            self.gate
                .record_consent(actor, user.id, ConsentType::PrivacyPolicy, version)
                .await?;
        }
        if let Some(version) = &request.accepted_terms_version {
            self.gate
                .record_consent(actor, user.id, ConsentType::Terms, version)
                .await?;
        }

        if !request.initial_fields.is_empty() {
            self.merge.merge(actor, user.id, &request.initial_fields).await?;
        }

        Ok(user)
    }

    /// Soft delete: scrub identifying fields and freeze the profile.
    /// Calling it again is a no-op.
    pub async fn delete_user(&self, actor: Actor, user_id: Uuid) -> Result<DeleteOutcome> {
        let mut user = self.fetch_user_required(user_id).await?;
        if user.state != AccountState::Active {
            tracing::info!(user_id = %user_id, state = user.state.as_str(), "delete repeated, no-op");
            return Ok(DeleteOutcome::AlreadyDeleted);
        }

        user.scrub(Utc::now());
        self.users.update_user(&user).await.map_err(Error::store)?;
        self.audit
            .record(
                actor,
                AuditAction::SoftDeleted,
                AuditResource::new(ResourceKind::User, user_id),
                Some(user_id),
                serde_json::Value::Null,
            )
            .await;
        tracing::info!(user_id = %user_id, "account soft-deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Replace the identity with a pseudonym. Legal from any state; calling
    /// it on an already anonymized account is a no-op.
    pub async fn anonymize_user(&self, actor: Actor, user_id: Uuid) -> Result<User> {
        let mut user = self.fetch_user_required(user_id).await?;
        if user.state == AccountState::Anonymized {
            return Ok(user);
        }

        user.anonymize(&pseudonym(), Utc::now());
        self.users.update_user(&user).await.map_err(Error::store)?;
        self.audit
            .record(
                actor,
                AuditAction::Anonymized,
                AuditResource::new(ResourceKind::User, user_id),
                Some(user_id),
                serde_json::Value::Null,
            )
            .await;
        tracing::info!(user_id = %user_id, "account anonymized");
        Ok(user)
    }

    /// Assemble the complete portable copy of a user's data, sealed with a
    /// checksum. Available in every account state; the export itself is
    /// audited.
    pub async fn export_user_data(&self, actor: Actor, user_id: Uuid) -> Result<ExportBundle> {
        let user = self.fetch_user_required(user_id).await?;

        let profile = with_read_retries(self.read_retries, || self.profiles.active_profile(user_id))
            .await
            .map_err(Error::store)?;
        let sessions = with_read_retries(self.read_retries, || self.sessions.sessions_for_user(user_id))
            .await
            .map_err(Error::store)?;
        let messages = with_read_retries(self.read_retries, || self.messages.messages_for_user(user_id))
            .await
            .map_err(Error::store)?;
        let intents = with_read_retries(self.read_retries, || self.intents.intents_for_user(user_id))
            .await
            .map_err(Error::store)?;
        let consents = with_read_retries(self.read_retries, || self.consents.consents_for_user(user_id))
            .await
            .map_err(Error::store)?;

        // The trail pages newest first; collect everything and flip to
        // chronological order for the document.
        let mut audit_trail = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .audit
                .trail(user_id, TimeRange::all(), cursor.as_deref(), Some(200))
                .await?;
            audit_trail.extend(page.entries);
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
        }
        audit_trail.reverse();

        let document = UserDataExport {
            user,
            profile,
            sessions,
            messages,
            intents,
            consents,
            audit_trail,
            generated_at: Utc::now(),
        };
        let checksum = document.checksum();

        self.audit
            .record(
                actor,
                AuditAction::Exported,
                AuditResource::new(ResourceKind::User, user_id),
                Some(user_id),
                serde_json::json!({ "checksum": checksum }),
            )
            .await;
        tracing::info!(user_id = %user_id, %checksum, "data export generated");

        Ok(ExportBundle { checksum, document })
    }

    /// Notify every affected user about an incident. Attempts are
    /// independent: one failed delivery (or one missing user) never stops
    /// the rest. One audit entry records the fan-out for the incident.
    pub async fn notify_breach(
        &self,
        actor: Actor,
        incident: &BreachIncident,
        affected: &[Uuid],
    ) -> Result<BreachReport> {
        let mut notified = 0usize;
        let mut failures = Vec::new();

        for &user_id in affected {
            let user = match with_read_retries(self.read_retries, || self.users.fetch_user(user_id)).await
            {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(user_id = %user_id, incident_id = %incident.id, "breach target unknown");
                    failures.push(user_id);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        incident_id = %incident.id,
                        error = %err,
                        "breach target lookup failed"
                    );
                    failures.push(user_id);
                    continue;
                }
            };

            match self.notifier.notify(&user, incident).await {
                Ok(()) => notified += 1,
                Err(err) => {
                    tracing::warn!(
                        user_id = %user_id,
                        incident_id = %incident.id,
                        error = %err,
                        "breach notification failed"
                    );
                    failures.push(user_id);
                }
            }
        }

        self.audit
            .record(
                actor,
                AuditAction::BreachNotified,
                AuditResource::new(ResourceKind::Breach, incident.id),
                None,
                serde_json::json!({
                    "affected": affected.len(),
                    "notified": notified,
                    "failed": failures.len(),
                }),
            )
            .await;
        tracing::info!(
            incident_id = %incident.id,
            affected = affected.len(),
            notified,
            failed = failures.len(),
            "breach fan-out finished"
        );

        Ok(BreachReport {
            incident_id: incident.id,
            success: affected.is_empty() || notified > 0,
            notification_count: notified,
            failures,
        })
    }

    async fn fetch_user_required(&self, user_id: Uuid) -> Result<User> {
        with_read_retries(self.read_retries, || self.users.fetch_user(user_id))
            .await
            .map_err(Error::store)?
            .ok_or(Error::NotFound { resource: "user" })
    }
}
