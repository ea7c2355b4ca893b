//! OIDC provider metadata discovery.
//!
//! Implements:
//! - RFC 8414 / OIDC Discovery: `/.well-known/openid-configuration`
//! - RFC 8615 well-known path conventions
//!
//! Fetches carry a bounded retry policy (3 attempts, exponential backoff,
//! 30s request timeout) and fall back to a synthesized document when the
//! provider cannot be reached, so a flow can still be assembled offline.

use std::time::Duration;

use {
    reqwest::Client,
    serde::{Deserialize, Serialize},
    tracing::{debug, info, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use flowlab_metrics::{counter, discovery as discovery_metrics};

use crate::{Error, Result};

/// Default per-request timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Metadata returned by `/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// The issuer identifier (a URL).
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_authorization_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_authorization_request_endpoint: Option<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    /// Response types supported (`code` expected).
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub response_modes_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    /// PKCE challenge methods supported (`S256` expected).
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    /// True when this document was synthesized locally instead of fetched.
    /// Synthesized endpoints follow path conventions and are not
    /// authoritatively confirmed; callers should surface a warning.
    #[serde(skip)]
    pub fallback: bool,
}

impl DiscoveryDocument {
    /// Synthesize a document from well-known path conventions under `issuer`.
    #[must_use]
    pub fn synthesized(issuer: &Url) -> Self {
        let join = |suffix: &str| {
            let base = issuer.as_str().trim_end_matches('/');
            format!("{base}/{suffix}")
        };
        Self {
            issuer: issuer.as_str().trim_end_matches('/').to_string(),
            authorization_endpoint: join("authorize"),
            token_endpoint: join("token"),
            userinfo_endpoint: Some(join("userinfo")),
            jwks_uri: Some(join("jwks")),
            device_authorization_endpoint: Some(join("device_authorization")),
            revocation_endpoint: Some(join("revoke")),
            introspection_endpoint: Some(join("introspect")),
            end_session_endpoint: Some(join("signoff")),
            pushed_authorization_request_endpoint: Some(join("par")),
            scopes_supported: vec!["openid".into(), "profile".into(), "email".into()],
            response_types_supported: vec![
                "code".into(),
                "token".into(),
                "id_token".into(),
                "code id_token".into(),
                "id_token token".into(),
            ],
            response_modes_supported: vec!["query".into(), "fragment".into(), "form_post".into()],
            grant_types_supported: vec!["authorization_code".into(), "refresh_token".into()],
            code_challenge_methods_supported: vec!["S256".into()],
            fallback: true,
        }
    }

    /// Enforce the document invariants: required fields present, every
    /// endpoint an absolute HTTPS URL under the issuer's origin.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.trim().is_empty() {
            return Err(Error::discovery(&self.issuer, "document missing issuer"));
        }
        let issuer = Url::parse(&self.issuer)
            .map_err(|e| Error::discovery(&self.issuer, format!("invalid issuer URL: {e}")))?;
        if issuer.scheme() != "https" {
            return Err(Error::discovery(&self.issuer, "issuer must use HTTPS"));
        }

        if self.authorization_endpoint.trim().is_empty() {
            return Err(Error::discovery(
                &self.issuer,
                "document missing authorization_endpoint",
            ));
        }
        if self.token_endpoint.trim().is_empty() {
            return Err(Error::discovery(
                &self.issuer,
                "document missing token_endpoint",
            ));
        }

        for (name, endpoint) in self.named_endpoints() {
            let url = Url::parse(endpoint).map_err(|e| {
                Error::discovery(&self.issuer, format!("{name} is not a valid URL: {e}"))
            })?;
            if url.scheme() != "https" {
                return Err(Error::discovery(
                    &self.issuer,
                    format!("{name} must be an absolute HTTPS URL"),
                ));
            }
            if url.origin() != issuer.origin() {
                return Err(Error::discovery(
                    &self.issuer,
                    format!("{name} is not scoped under the issuer"),
                ));
            }
        }
        Ok(())
    }

    /// True when the provider advertises the given PKCE method.
    #[must_use]
    pub fn supports_pkce_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m == method)
    }

    fn named_endpoints(&self) -> Vec<(&'static str, &str)> {
        let mut endpoints = vec![
            ("authorization_endpoint", self.authorization_endpoint.as_str()),
            ("token_endpoint", self.token_endpoint.as_str()),
        ];
        let optional: [(&'static str, &Option<String>); 7] = [
            ("userinfo_endpoint", &self.userinfo_endpoint),
            ("jwks_uri", &self.jwks_uri),
            (
                "device_authorization_endpoint",
                &self.device_authorization_endpoint,
            ),
            ("revocation_endpoint", &self.revocation_endpoint),
            ("introspection_endpoint", &self.introspection_endpoint),
            ("end_session_endpoint", &self.end_session_endpoint),
            (
                "pushed_authorization_request_endpoint",
                &self.pushed_authorization_request_endpoint,
            ),
        ];
        for (name, value) in optional {
            if let Some(v) = value {
                endpoints.push((name, v.as_str()));
            }
        }
        endpoints
    }
}

/// Build a `/.well-known/<suffix>` URL following RFC 8615 path conventions.
pub fn build_well_known_url(base: &Url, suffix: &str) -> Result<Url> {
    let mut url = base.clone();
    // Ensure path ends with /
    if !url.path().ends_with('/') {
        url.set_path(&format!("{}/", url.path()));
    }
    url.join(&format!(".well-known/{suffix}")).map_err(|source| {
        Error::external(
            format!("failed to build .well-known/{suffix} URL from {base}"),
            source,
        )
    })
}

/// Retry policy for discovery fetches.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry following `attempt` (1-based): exponential,
    /// capped at `max_backoff`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let doubled = self
            .initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        doubled.min(self.max_backoff)
    }
}

/// Fetches and validates provider metadata.
#[derive(Debug, Clone)]
pub struct DiscoveryClient {
    client: Client,
    policy: RetryPolicy,
    well_known_suffix: String,
}

impl DiscoveryClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|source| Error::external("failed to build discovery HTTP client", source))?;
        Ok(Self::with_client(client))
    }

    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
            well_known_suffix: "openid-configuration".into(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Provider-specific well-known suffix, for issuers that publish their
    /// metadata somewhere other than `openid-configuration`.
    #[must_use]
    pub fn with_well_known_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.well_known_suffix = suffix.into();
        self
    }

    /// Fetch `{issuer}/.well-known/openid-configuration` with retries.
    ///
    /// Network errors and 5xx responses are retried up to three attempts
    /// with exponential backoff; any 4xx returns immediately as a client
    /// error. The fetched document is validated before being returned.
    pub async fn resolve(&self, issuer: &Url) -> Result<DiscoveryDocument> {
        let well_known = build_well_known_url(issuer, &self.well_known_suffix)?;
        let mut last_error = None;

        for attempt in 1..=self.policy.max_attempts {
            #[cfg(feature = "metrics")]
            counter!(discovery_metrics::FETCH_ATTEMPTS_TOTAL).increment(1);

            debug!(url = %well_known, attempt, "fetching provider metadata");

            match self.fetch_once(&well_known).await {
                Ok(doc) => {
                    doc.validate()?;
                    info!(issuer = %doc.issuer, "fetched provider metadata");
                    return Ok(doc);
                },
                Err(FetchError::Client(e)) => return Err(e),
                Err(FetchError::Retryable(e)) => {
                    warn!(url = %well_known, attempt, error = %e, "discovery fetch failed");
                    last_error = Some(e);
                },
            }

            if attempt < self.policy.max_attempts {
                tokio::time::sleep(self.policy.backoff_for(attempt)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Error::discovery(issuer.as_str(), "discovery retries exhausted")
        }))
    }

    /// Resolve with a synthesized-document fallback.
    ///
    /// Any discovery failure (exhausted retries, 4xx, invalid document)
    /// degrades to path-convention endpoints flagged `fallback: true`, so
    /// callers can warn that the configuration is unverified.
    pub async fn resolve_or_fallback(&self, issuer: &Url) -> DiscoveryDocument {
        match self.resolve(issuer).await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(issuer = %issuer, error = %e, "discovery failed, using synthesized endpoints");
                #[cfg(feature = "metrics")]
                counter!(discovery_metrics::FALLBACKS_TOTAL).increment(1);
                DiscoveryDocument::synthesized(issuer)
            },
        }
    }

    async fn fetch_once(&self, well_known: &Url) -> std::result::Result<DiscoveryDocument, FetchError> {
        let resp = self
            .client
            .get(well_known.as_str())
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|source| {
                FetchError::Retryable(Error::external("failed to fetch provider metadata", source))
            })?;

        let status = resp.status();
        if status.is_client_error() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Client(Error::message(format!(
                "provider metadata returned HTTP {status}: {body}"
            ))));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Retryable(Error::message(format!(
                "provider metadata returned HTTP {status}: {body}"
            ))));
        }

        resp.json::<DiscoveryDocument>().await.map_err(|source| {
            FetchError::Retryable(Error::external("failed to parse provider metadata", source))
        })
    }
}

enum FetchError {
    /// 4xx: the caller's fault, never retried.
    Client(Error),
    /// Network error or 5xx.
    Retryable(Error),
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        }
    }

    fn valid_body(issuer: &str) -> String {
        serde_json::json!({
            "issuer": issuer,
            "authorization_endpoint": format!("{issuer}/authorize"),
            "token_endpoint": format!("{issuer}/token"),
            "jwks_uri": format!("{issuer}/jwks"),
            "scopes_supported": ["openid", "profile"],
            "response_types_supported": ["code"],
            "code_challenge_methods_supported": ["S256"]
        })
        .to_string()
    }

    // ── Well-known URL building ────────────────────────────────────────

    #[test]
    fn build_well_known_url_basic() {
        let base = Url::parse("https://auth.example.com").unwrap();
        let url = build_well_known_url(&base, "openid-configuration").unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.example.com/.well-known/openid-configuration"
        );
    }

    #[test]
    fn build_well_known_url_with_path() {
        let base = Url::parse("https://auth.pingone.com/env-123/as").unwrap();
        let url = build_well_known_url(&base, "openid-configuration").unwrap();
        assert_eq!(
            url.as_str(),
            "https://auth.pingone.com/env-123/as/.well-known/openid-configuration"
        );
    }

    // ── Document validation ────────────────────────────────────────────

    #[test]
    fn synthesized_document_is_valid_and_flagged() {
        let issuer = Url::parse("https://auth.example.com/env/as").unwrap();
        let doc = DiscoveryDocument::synthesized(&issuer);
        assert!(doc.fallback);
        doc.validate().unwrap();
        assert_eq!(
            doc.authorization_endpoint,
            "https://auth.example.com/env/as/authorize"
        );
        assert_eq!(doc.token_endpoint, "https://auth.example.com/env/as/token");
    }

    #[test]
    fn document_missing_token_endpoint_is_invalid() {
        let raw = serde_json::json!({
            "issuer": "https://auth.example.com",
            "authorization_endpoint": "https://auth.example.com/authorize",
            "token_endpoint": ""
        });
        let doc: DiscoveryDocument = serde_json::from_value(raw).unwrap();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn document_with_http_endpoint_is_invalid() {
        let mut doc =
            DiscoveryDocument::synthesized(&Url::parse("https://auth.example.com").unwrap());
        doc.token_endpoint = "http://auth.example.com/token".into();
        assert!(doc.validate().is_err());
    }

    #[test]
    fn document_with_foreign_endpoint_is_invalid() {
        let mut doc =
            DiscoveryDocument::synthesized(&Url::parse("https://auth.example.com").unwrap());
        doc.token_endpoint = "https://evil.example.net/token".into();
        assert!(doc.validate().is_err());
    }

    // ── Retry policy ───────────────────────────────────────────────────

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for(1), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(3), Duration::from_secs(4));
        assert_eq!(policy.backoff_for(4), Duration::from_secs(5));
        assert_eq!(policy.backoff_for(10), Duration::from_secs(5));
    }

    // ── HTTP integration tests (with mockito) ──────────────────────────

    #[tokio::test]
    async fn resolve_rejects_document_from_wrong_origin() {
        // The mock serves a document whose issuer is https but whose
        // endpoints live elsewhere.
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                serde_json::json!({
                    "issuer": "https://auth.example.com",
                    "authorization_endpoint": "https://other.example.net/authorize",
                    "token_endpoint": "https://auth.example.com/token"
                })
                .to_string(),
            )
            .create_async()
            .await;

        let client = DiscoveryClient::with_client(Client::new()).with_policy(fast_policy());
        let url = Url::parse(&server.url()).unwrap();
        let result = client.resolve(&url).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn resolve_404_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(404)
            .with_body("not found")
            .expect(1)
            .create_async()
            .await;

        let client = DiscoveryClient::with_client(Client::new()).with_policy(fast_policy());
        let url = Url::parse(&server.url()).unwrap();
        let result = client.resolve(&url).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("404"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resolve_retries_5xx_at_most_three_times() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(503)
            .with_body("unavailable")
            .expect(3)
            .create_async()
            .await;

        let client = DiscoveryClient::with_client(Client::new()).with_policy(fast_policy());
        let url = Url::parse(&server.url()).unwrap();
        assert!(client.resolve(&url).await.is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resolve_fetches_and_validates_document() {
        let issuer = "https://auth.example.com";
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/.well-known/openid-configuration")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(valid_body(issuer))
            .expect(1)
            .create_async()
            .await;

        let client = DiscoveryClient::with_client(Client::new()).with_policy(fast_policy());
        let url = Url::parse(&server.url()).unwrap();
        let doc = client.resolve(&url).await.unwrap();

        assert_eq!(doc.issuer, issuer);
        assert!(!doc.fallback);
        assert_eq!(doc.token_endpoint, format!("{issuer}/token"));
        assert!(doc.supports_pkce_method("S256"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn resolve_or_fallback_synthesizes_on_failure() {
        let client = Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let client = DiscoveryClient::with_client(client).with_policy(RetryPolicy {
            max_attempts: 1,
            ..fast_policy()
        });

        let issuer = Url::parse("https://127.0.0.1:1/env/as").unwrap();
        let doc = client.resolve_or_fallback(&issuer).await;

        assert!(doc.fallback);
        assert_eq!(doc.token_endpoint, "https://127.0.0.1:1/env/as/token");
    }
}
