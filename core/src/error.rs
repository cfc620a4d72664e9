/// Error codes used across the engine.
///
/// The conversational layer keys its recovery behavior off these: every code
/// except `access_denied` is presented as a transient "please try again",
/// while `access_denied` carries the missing consent types and triggers the
/// re-consent prompt.
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const ACCESS_DENIED: &str = "access_denied";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const CONCURRENCY_CONFLICT: &str = "concurrency_conflict";
    pub const STORE_UNAVAILABLE: &str = "store_unavailable";
    pub const PROFILE_NOT_WRITABLE: &str = "profile_not_writable";
}
