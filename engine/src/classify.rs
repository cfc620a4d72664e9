//! Turn classification.
//!
//! The engine only depends on the [`Classifier`] contract; production
//! deployments put their NLU behind it. [`KeywordClassifier`] is the
//! deterministic reference implementation: a keyword table for the goal,
//! numeric extraction with k/m suffixes, and fuzzy fund-name resolution
//! against the configured catalog.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use yarra_core::intent::IntentKind;
use yarra_core::profile::ProfileFields;
use yarra_core::session::ChatMessage;

/// What one turn yielded: a goal label and whatever facts were disclosed.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub kind: IntentKind,
    pub fields: ProfileFields,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, history: &[ChatMessage], message: &str) -> Classification;
}

/// Below this Jaro-Winkler score a fund mention is not considered a match.
const FUND_MATCH_FLOOR: f64 = 0.84;

static AGE_STATEMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bi\s*'?a?m\s+(\d{1,3})\b").expect("valid age regex"));
static AGE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,3})\s*years?\s*old\b").expect("valid age regex"));
static RETIREMENT_AGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bretire\s+(?:at|by)\s+(\d{1,3})\b").expect("valid retirement regex"));
static BALANCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bbalance\s+(?:is\s+|of\s+)?\$?([\d][\d.,]*\s*[km]?)\b").expect("valid balance regex")
});
static INCOME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:earn|income)\s+(?:is\s+|of\s+)?\$?([\d][\d.,]*\s*[km]?)\b")
        .expect("valid income regex")
});
static FUND_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:with|at|to|from)\s+([A-Za-z][A-Za-z0-9&()' ]{2,40})").expect("valid fund regex")
});
static NUMERIC_WITH_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\d.]+)([km])?$").expect("valid numeric suffix regex"));

/// Parse a conversational amount: `80k`, `1.5m`, `$80,000`, `45`.
/// Returns `None` when the text is not a bare number.
pub fn parse_numeric_with_suffix(text: &str) -> Option<f64> {
    let cleaned: String = text
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| !matches!(c, ',' | ' '))
        .collect::<String>()
        .to_lowercase();

    let caps = NUMERIC_WITH_SUFFIX.captures(&cleaned)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let scaled = match caps.get(2).map(|m| m.as_str()) {
        Some("k") => number * 1_000.0,
        Some("m") => number * 1_000_000.0,
        _ => number,
    };
    Some(scaled)
}

/// Generic words that appear inside catalog names. A mention matching only
/// one of these ("to retirement", "my super") names no fund at all.
const GENERIC_FUND_WORDS: &[&str] = &["retirement", "super", "superannuation", "fund", "funds", "trust"];

/// Resolve a user-typed fund name against the catalog.
///
/// Exact containment wins first (covers abbreviations like "ART" living in
/// the catalog entry), then the best Jaro-Winkler score above the floor.
pub fn canonical_fund_name<'a>(input: &str, catalog: &'a [String]) -> Option<&'a str> {
    let needle = input.trim().to_lowercase();
    if needle.len() < 3 || GENERIC_FUND_WORDS.contains(&needle.as_str()) {
        return None;
    }

    for name in catalog {
        if name.to_lowercase().contains(&needle) {
            return Some(name);
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for name in catalog {
        let score = strsim::jaro_winkler(&needle, &name.to_lowercase());
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((name, score));
        }
    }
    best.and_then(|(name, score)| (score >= FUND_MATCH_FLOOR).then_some(name))
}

pub struct KeywordClassifier {
    catalog: Vec<String>,
}

impl KeywordClassifier {
    pub fn new(catalog: Vec<String>) -> Self {
        Self { catalog }
    }

    fn extract_fields(&self, message: &str) -> ProfileFields {
        let mut fields = ProfileFields::default();

        let age = AGE_STATEMENT
            .captures(message)
            .or_else(|| AGE_SUFFIX.captures(message))
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok());
        if let Some(age) = age {
            fields.current_age = Some(age);
        }

        if let Some(retirement_age) = RETIREMENT_AGE
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse::<i32>().ok())
        {
            fields.retirement_age = Some(retirement_age);
        }

        if let Some(balance) = BALANCE
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_numeric_with_suffix(m.as_str()))
        {
            fields.current_balance = Some(balance);
        }

        if let Some(income) = INCOME
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| parse_numeric_with_suffix(m.as_str()))
        {
            fields.current_income = Some(income);
        }

        let lower = message.to_lowercase();
        if lower.contains("including super") || lower.contains("plus super") {
            fields.super_included = Some(true);
        } else if lower.contains("excluding super") || lower.contains("without super") {
            fields.super_included = Some(false);
        }

        if let Some(fund) = FUND_MENTION
            .captures(message)
            .and_then(|c| c.get(1))
            .and_then(|m| canonical_fund_name(m.as_str(), &self.catalog))
        {
            fields.current_fund = Some(fund.to_string());
        }

        fields
    }

    fn intent_for(&self, message: &str, fields: &ProfileFields) -> IntentKind {
        let lower = message.to_lowercase();
        if lower.contains("compare") {
            if fields.current_fund.is_some() {
                IntentKind::CompareFeesNominated
            } else {
                IntentKind::CompareFeesAll
            }
        } else if lower.contains("rank") {
            IntentKind::RankFees
        } else if lower.contains("project") || lower.contains("growth") {
            IntentKind::ProjectBalance
        } else if lower.contains("income") || lower.contains("drawdown") {
            IntentKind::RetirementIncome
        } else if lower.contains("cheapest") || lower.contains("lowest fee") {
            IntentKind::FindCheapest
        } else {
            IntentKind::Unknown
        }
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn classify(&self, _history: &[ChatMessage], message: &str) -> Classification {
        let fields = self.extract_fields(message);
        let kind = self.intent_for(message, &fields);
        Classification { kind, fields }
    }
}
