use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of mergeable fields on a profile. Drives completeness reporting.
pub const FIELD_COUNT: usize = 11;

/// The sparse field set a conversation turn can disclose.
///
/// This doubles as the merge payload and as the point-in-time snapshot
/// stored on intent records. Absent fields and explicit JSON nulls both
/// deserialize to `None`; under the coalesce merge neither can clear a
/// stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileFields {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_income: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retirement_age: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_fund: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub super_included: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retirement_income_option: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retirement_income: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_property: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_shares: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets_cash: Option<f64>,
}

impl ProfileFields {
    pub fn is_empty(&self) -> bool {
        self.present_fields().is_empty()
    }

    /// Field-wise coalesce: a present incoming value replaces the stored
    /// one, an absent incoming value leaves it alone. Returns whether
    /// anything actually changed, so callers can skip the write (and its
    /// audit entry) for a no-op merge.
    pub fn coalesce(&mut self, incoming: &ProfileFields) -> bool {
        let mut changed = false;
        merge_field(&mut self.current_age, &incoming.current_age, &mut changed);
        merge_field(&mut self.current_balance, &incoming.current_balance, &mut changed);
        merge_field(&mut self.current_income, &incoming.current_income, &mut changed);
        merge_field(&mut self.retirement_age, &incoming.retirement_age, &mut changed);
        merge_field(&mut self.current_fund, &incoming.current_fund, &mut changed);
        merge_field(&mut self.super_included, &incoming.super_included, &mut changed);
        merge_field(
            &mut self.retirement_income_option,
            &incoming.retirement_income_option,
            &mut changed,
        );
        merge_field(&mut self.retirement_income, &incoming.retirement_income, &mut changed);
        merge_field(&mut self.assets_property, &incoming.assets_property, &mut changed);
        merge_field(&mut self.assets_shares, &incoming.assets_shares, &mut changed);
        merge_field(&mut self.assets_cash, &incoming.assets_cash, &mut changed);
        changed
    }

    /// Names of the fields set on this value. Used for audit detail (field
    /// names only, never values) and completeness reporting.
    pub fn present_fields(&self) -> Vec<&'static str> {
        let mut present = Vec::new();
        if self.current_age.is_some() {
            present.push("current_age");
        }
        if self.current_balance.is_some() {
            present.push("current_balance");
        }
        if self.current_income.is_some() {
            present.push("current_income");
        }
        if self.retirement_age.is_some() {
            present.push("retirement_age");
        }
        if self.current_fund.is_some() {
            present.push("current_fund");
        }
        if self.super_included.is_some() {
            present.push("super_included");
        }
        if self.retirement_income_option.is_some() {
            present.push("retirement_income_option");
        }
        if self.retirement_income.is_some() {
            present.push("retirement_income");
        }
        if self.assets_property.is_some() {
            present.push("assets_property");
        }
        if self.assets_shares.is_some() {
            present.push("assets_shares");
        }
        if self.assets_cash.is_some() {
            present.push("assets_cash");
        }
        present
    }

    /// Filled-field count out of [`FIELD_COUNT`].
    pub fn completeness(&self) -> (usize, usize) {
        (self.present_fields().len(), FIELD_COUNT)
    }
}

fn merge_field<T: Clone + PartialEq>(current: &mut Option<T>, incoming: &Option<T>, changed: &mut bool) {
    if let Some(value) = incoming {
        if current.as_ref() != Some(value) {
            *current = Some(value.clone());
            *changed = true;
        }
    }
}

/// One member's financial profile.
///
/// At most one row per user is `active`; the merge path only ever touches
/// the active row. `revision` is bumped by the store on every committed
/// write and is the compare-and-swap token for optimistic concurrency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub active: bool,
    pub revision: i64,
    #[serde(flatten)]
    pub fields: ProfileFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FinancialProfile {
    pub fn new(user_id: Uuid, fields: ProfileFields, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id,
            active: true,
            revision: 0,
            fields,
            created_at: now,
            updated_at: now,
        }
    }
}
