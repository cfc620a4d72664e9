use uuid::Uuid;

use yarra_core::consent::ConsentType;
use yarra_core::error::codes;
use yarra_core::user::AccountState;

use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine failure taxonomy.
///
/// `AccessDenied` is the one variant the conversational layer must handle
/// specifically (re-consent prompt with the missing types); everything else
/// it may collapse into "please try again".
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A field value was rejected before any write was attempted.
    #[error("validation failed for {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
        received: Option<serde_json::Value>,
    },

    /// The consent gate rejected the operation. The denial itself has
    /// already been audited by the time this is returned.
    #[error("access denied: missing or outdated consent")]
    AccessDenied { missing: Vec<ConsentType> },

    #[error("{resource} not found")]
    NotFound { resource: &'static str },

    /// A uniqueness rule rejected the write.
    #[error("{message}")]
    Conflict { message: String },

    /// Two merges for the same user collided and the automatic retry also
    /// lost the revision race.
    #[error("concurrent profile write for user {user_id} lost the revision race")]
    ConcurrencyConflict { user_id: Uuid },

    /// The backing store failed. Reads are retried with backoff before this
    /// surfaces; writes surface immediately.
    #[error("store unavailable")]
    StoreUnavailable {
        #[source]
        source: StoreError,
    },

    /// The account is in a terminal lifecycle state; its profile is frozen.
    #[error("profile is not writable while the account is {}", state.as_str())]
    ProfileNotWritable { state: AccountState },
}

impl Error {
    pub(crate) fn store(source: StoreError) -> Self {
        Error::StoreUnavailable { source }
    }

    /// Stable machine-readable code for transport layers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation { .. } => codes::VALIDATION_FAILED,
            Error::AccessDenied { .. } => codes::ACCESS_DENIED,
            Error::NotFound { .. } => codes::NOT_FOUND,
            Error::Conflict { .. } => codes::CONFLICT,
            Error::ConcurrencyConflict { .. } => codes::CONCURRENCY_CONFLICT,
            Error::StoreUnavailable { .. } => codes::STORE_UNAVAILABLE,
            Error::ProfileNotWritable { .. } => codes::PROFILE_NOT_WRITABLE,
        }
    }

    /// The consent types a denied caller still needs, empty for other
    /// variants. Saves the chat layer a match when building the re-consent
    /// prompt.
    pub fn missing_consents(&self) -> &[ConsentType] {
        match self {
            Error::AccessDenied { missing } => missing,
            _ => &[],
        }
    }
}
