use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::ProfileFields;

/// Conversation goals the classifier can label a turn with.
///
/// `Unknown` is the sentinel for turns that carry facts but no recognizable
/// goal. It is never written to the intent history, so a fact-only turn
/// between two goal-carrying turns does not register as a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    CompareFeesNominated,
    CompareFeesAll,
    RankFees,
    FindCheapest,
    ProjectBalance,
    RetirementIncome,
    Unknown,
}

impl IntentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IntentKind::CompareFeesNominated => "compare_fees_nominated",
            IntentKind::CompareFeesAll => "compare_fees_all",
            IntentKind::RankFees => "rank_fees",
            IntentKind::FindCheapest => "find_cheapest",
            IntentKind::ProjectBalance => "project_balance",
            IntentKind::RetirementIncome => "retirement_income",
            IntentKind::Unknown => "unknown",
        }
    }

    /// Parse a stored label. Anything unrecognized folds into `Unknown`
    /// rather than failing, so old rows survive label changes.
    pub fn parse(label: &str) -> IntentKind {
        match label {
            "compare_fees_nominated" => IntentKind::CompareFeesNominated,
            "compare_fees_all" => IntentKind::CompareFeesAll,
            "rank_fees" => IntentKind::RankFees,
            "find_cheapest" => IntentKind::FindCheapest,
            "project_balance" => IntentKind::ProjectBalance,
            "retirement_income" => IntentKind::RetirementIncome,
            _ => IntentKind::Unknown,
        }
    }

    pub fn is_unknown(self) -> bool {
        matches!(self, IntentKind::Unknown)
    }
}

/// The raw conversation turn an intent record was cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnContext {
    pub user_message: String,
    /// The assistant turn the user was replying to, when the transport
    /// carries it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_reply: Option<String>,
}

/// A durable record of a goal the user expressed.
///
/// Appended only when the classified goal differs from the last one
/// recorded for the user, so the table reads as a transition history
/// rather than a per-turn log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub kind: IntentKind,
    /// Snapshot of the merged profile fields at recording time, so the
    /// record can be interpreted without replaying later merges.
    pub profile_snapshot: ProfileFields,
    pub context: TurnContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl IntentRecord {
    pub fn new(
        user_id: Uuid,
        session_id: Uuid,
        kind: IntentKind,
        profile_snapshot: ProfileFields,
        context: TurnContext,
        message_id: Option<Uuid>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            session_id,
            kind,
            profile_snapshot,
            context,
            message_id,
            created_at: Utc::now(),
        }
    }
}
