//! Append-only audit trail.
//!
//! Recording is synchronous with the operation that produced the entry, so
//! trail order matches commit order. Persistence problems are contained
//! here: a failed append is logged (and retried once for profile
//! mutations), it never fails the business operation.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use yarra_core::audit::{Actor, AuditAction, AuditLogEntry, AuditResource};

use crate::error::{Error, Result};
use crate::store::{with_read_retries, AuditStore, TimeRange};

/// Default page size for trail reads, also the hard cap.
const DEFAULT_TRAIL_LIMIT: usize = 50;
const MAX_TRAIL_LIMIT: usize = 200;

#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    read_retries: u32,
}

/// One page of a user's audit history, newest first.
#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<AuditLogEntry>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, read_retries: u32) -> Self {
        Self { store, read_retries }
    }

    /// Build and append one entry, returning it either way.
    ///
    /// Failures stay contained: compliance-critical resources get one
    /// retry, then the failure is downgraded to a warning. Callers can rely
    /// on this never erroring.
    pub async fn record(
        &self,
        actor: Actor,
        action: AuditAction,
        resource: AuditResource,
        subject_id: Option<Uuid>,
        detail: serde_json::Value,
    ) -> AuditLogEntry {
        let entry = AuditLogEntry::new(actor, action, resource, subject_id, detail);
        match self.store.append_audit(&entry).await {
            Ok(()) => {}
            Err(first) if resource.kind.is_compliance_critical() => {
                tracing::warn!(
                    error = %first,
                    action = entry.action.as_str(),
                    resource = resource.kind.as_str(),
                    "audit append failed, retrying once"
                );
                if let Err(second) = self.store.append_audit(&entry).await {
                    tracing::warn!(
                        error = %second,
                        action = entry.action.as_str(),
                        resource = resource.kind.as_str(),
                        resource_id = %resource.id,
                        "audit append failed after retry, entry dropped"
                    );
                }
            }
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    action = entry.action.as_str(),
                    resource = resource.kind.as_str(),
                    "audit append failed, entry dropped"
                );
            }
        }
        entry
    }

    /// Cursor-paginated read of a user's audit history, newest first,
    /// optionally bounded to a time range.
    pub async fn trail(
        &self,
        user_id: Uuid,
        range: TimeRange,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<AuditPage> {
        let limit = limit.unwrap_or(DEFAULT_TRAIL_LIMIT).min(MAX_TRAIL_LIMIT).max(1);
        let before = match cursor {
            Some(cursor) => Some(decode_cursor(cursor)?),
            None => None,
        };

        // Fetch one extra to determine has_more.
        let mut entries = with_read_retries(self.read_retries, || {
            self.store.audit_page(user_id, range, before, limit + 1)
        })
        .await
        .map_err(Error::store)?;

        let has_more = entries.len() > limit;
        entries.truncate(limit);
        let next_cursor = if has_more {
            entries.last().map(|e| encode_cursor(e.recorded_at, e.id))
        } else {
            None
        };

        Ok(AuditPage { entries, next_cursor, has_more })
    }
}

/// Cursor is base64("recorded_at\0id"), opaque to the client and stable
/// under concurrent appends.
fn encode_cursor(recorded_at: DateTime<Utc>, id: Uuid) -> String {
    use base64::Engine;
    let raw = format!("{}\0{}", recorded_at.to_rfc3339(), id);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, Uuid)> {
    use base64::Engine;
    let invalid = |message: &str| Error::Validation {
        field: "cursor",
        message: message.to_string(),
        received: Some(serde_json::Value::String(cursor.to_string())),
    };

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| invalid("invalid cursor format"))?;
    let raw = String::from_utf8(bytes).map_err(|_| invalid("invalid cursor encoding"))?;

    let (timestamp, id) = raw
        .split_once('\0')
        .ok_or_else(|| invalid("invalid cursor structure"))?;
    let recorded_at = DateTime::parse_from_rfc3339(timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| invalid("invalid cursor timestamp"))?;
    let id = Uuid::parse_str(id).map_err(|_| invalid("invalid cursor id"))?;

    Ok((recorded_at, id))
}
