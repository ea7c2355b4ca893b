//! Metric name and label definitions.
//!
//! This module defines all metric names and common label keys used by the
//! flow engine. Centralizing these definitions ensures consistency and makes
//! it easier to document what metrics are available.

/// OAuth flow metrics
pub mod oauth {
    /// Authorization requests built, by flow variant
    pub const FLOW_STARTS_TOTAL: &str = "flowlab_oauth_flow_starts_total";
    /// Flows that reached a stored token set
    pub const FLOW_COMPLETIONS_TOTAL: &str = "flowlab_oauth_flow_completions_total";
    /// Callbacks parsed, by response mode
    pub const CALLBACKS_TOTAL: &str = "flowlab_oauth_callbacks_total";
    /// Callbacks rejected by state validation
    pub const CSRF_REJECTIONS_TOTAL: &str = "flowlab_oauth_csrf_rejections_total";
    /// Code exchange operations
    pub const CODE_EXCHANGE_TOTAL: &str = "flowlab_oauth_code_exchange_total";
    /// Code exchange errors
    pub const CODE_EXCHANGE_ERRORS_TOTAL: &str = "flowlab_oauth_code_exchange_errors_total";
    /// Token refreshes
    pub const TOKEN_REFRESH_TOTAL: &str = "flowlab_oauth_token_refresh_total";
    /// Token refresh failures
    pub const TOKEN_REFRESH_FAILURES_TOTAL: &str = "flowlab_oauth_token_refresh_failures_total";
}

/// Discovery metrics
pub mod discovery {
    /// Discovery fetch attempts (each retry counts)
    pub const FETCH_ATTEMPTS_TOTAL: &str = "flowlab_discovery_fetch_attempts_total";
    /// Documents served from the synthesized fallback
    pub const FALLBACKS_TOTAL: &str = "flowlab_discovery_fallbacks_total";
}

/// Token store metrics
pub mod tokens {
    /// Token sets stored
    pub const STORED_TOTAL: &str = "flowlab_tokens_stored_total";
    /// Expired token sets pruned
    pub const PRUNED_TOTAL: &str = "flowlab_tokens_pruned_total";
}

/// Common label keys used across metrics
pub mod labels {
    /// Flow variant label
    pub const FLOW: &str = "flow";
    /// Response mode label
    pub const RESPONSE_MODE: &str = "response_mode";
    /// Provider error code label
    pub const ERROR: &str = "error";
}
