use std::collections::BTreeMap;

use yarra_core::consent::ConsentType;

/// Version seeded for both documents at launch; also the fallback when the
/// environment does not override.
pub const DEFAULT_CONSENT_VERSION: &str = "1.0";

const ENV_PRIVACY_VERSION: &str = "YARRA_REQUIRED_PRIVACY_VERSION";
const ENV_TERMS_VERSION: &str = "YARRA_REQUIRED_TERMS_VERSION";
const ENV_READ_RETRIES: &str = "YARRA_STORE_READ_RETRIES";

/// Currently required document versions, compared for exact equality
/// against each user's most recent consent record. Publishing a new
/// version is a config change here, not a data migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentPolicy {
    required: BTreeMap<ConsentType, String>,
}

impl ConsentPolicy {
    pub fn new(privacy_policy_version: &str, terms_version: &str) -> Self {
        let mut required = BTreeMap::new();
        required.insert(ConsentType::PrivacyPolicy, privacy_policy_version.to_string());
        required.insert(ConsentType::Terms, terms_version.to_string());
        Self { required }
    }

    pub fn required_version(&self, consent_type: ConsentType) -> Option<&str> {
        self.required.get(&consent_type).map(String::as_str)
    }

    /// Read required versions from the environment, `.env` honored.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let privacy = lookup(ENV_PRIVACY_VERSION).unwrap_or_else(|| DEFAULT_CONSENT_VERSION.to_string());
        let terms = lookup(ENV_TERMS_VERSION).unwrap_or_else(|| DEFAULT_CONSENT_VERSION.to_string());
        Self::new(&privacy, &terms)
    }
}

impl Default for ConsentPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONSENT_VERSION, DEFAULT_CONSENT_VERSION)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub consent: ConsentPolicy,
    /// Canonical fund names the classifier resolves free-text mentions
    /// against.
    pub fund_catalog: Vec<String>,
    /// Extra attempts for store reads that fail as unavailable. Writes are
    /// never retried here; the merge path has its own single revision retry.
    pub store_read_retries: u32,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let consent = ConsentPolicy::from_lookup(&lookup);
        let store_read_retries = lookup(ENV_READ_RETRIES)
            .and_then(|v| v.parse().ok())
            .unwrap_or(2);
        Self {
            consent,
            fund_catalog: default_fund_catalog(),
            store_read_retries,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            consent: ConsentPolicy::default(),
            fund_catalog: default_fund_catalog(),
            store_read_retries: 2,
        }
    }
}

/// Funds the assistant can talk about out of the box. Deployments replace
/// this from their product catalog.
fn default_fund_catalog() -> Vec<String> {
    [
        "AustralianSuper",
        "Australian Retirement Trust (ART)",
        "Aware Super",
        "Colonial First State FirstChoice",
        "HESTA",
        "Hostplus",
        "Rest Super",
        "UniSuper",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}
