//! The authorization flow engine.
//!
//! [`AuthFlow`] ties the pieces together: it builds authorization URLs
//! (persisting state/nonce/PKCE context under its flow key), classifies
//! callbacks, and exchanges codes for tokens. One `AuthFlow` instance owns
//! one flow key; concurrent flows get separate instances over the same
//! store and cannot collide.

use std::sync::Arc;

use {
    secrecy::ExposeSecret,
    serde::Deserialize,
    tracing::{debug, info, warn},
    url::Url,
};

#[cfg(feature = "metrics")]
use flowlab_metrics::{counter, oauth as oauth_metrics};

use flowlab_storage::{Entry, KeyValueStore, flow_key, now_ms};

use crate::{
    Error, Result,
    callback::{self, AuthorizationResult},
    csrf::{CsrfGuard, DEFAULT_TTL},
    discovery::{DiscoveryClient, DiscoveryDocument},
    pkce::{self, generate_nonce},
    types::{
        ClientConfig, FlowVariant, PkceMethod, ResponseMode, TokenSet,
        response_type_includes_id_token,
    },
};

const STATE_FIELD: &str = "state";
const NONCE_FIELD: &str = "nonce";
const VERIFIER_FIELD: &str = "pkce_verifier";

/// Result of starting a flow: the URL to send the user to, plus the
/// context that was persisted for the callback.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub context: RequestContext,
}

/// Everything generated for one authorization attempt. The PKCE verifier
/// stays in storage; only its derived challenge is in the URL.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub flow_key: String,
    pub variant: FlowVariant,
    pub state: String,
    pub nonce: Option<String>,
    pub code_challenge: Option<String>,
    pub response_type: String,
    pub response_mode: ResponseMode,
}

/// Manages one OAuth 2.0 / OIDC authorization flow end to end.
pub struct AuthFlow {
    config: ClientConfig,
    endpoints: DiscoveryDocument,
    guard: CsrfGuard,
    store: Arc<dyn KeyValueStore>,
    client: reqwest::Client,
    flow_key: String,
}

impl AuthFlow {
    /// Build a flow over explicit endpoints. Configuration errors surface
    /// here, before any storage or network activity.
    pub fn new(
        config: ClientConfig,
        endpoints: DiscoveryDocument,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            endpoints,
            guard: CsrfGuard::new(store.clone()),
            store,
            client: reqwest::Client::new(),
            flow_key: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Build a flow, resolving endpoints through discovery.
    ///
    /// Explicit `auth_url`/`token_url` overrides (both or neither) skip
    /// discovery entirely; otherwise the issuer's well-known document is
    /// fetched, degrading to synthesized endpoints when the provider is
    /// unreachable.
    pub async fn discover(
        config: ClientConfig,
        store: Arc<dyn KeyValueStore>,
        discovery: &DiscoveryClient,
    ) -> Result<Self> {
        config.validate()?;

        let issuer = Url::parse(&config.issuer)
            .map_err(|e| Error::Config(format!("invalid issuer URL: {e}")))?;

        let endpoints = match (&config.auth_url, &config.token_url) {
            (Some(auth), Some(token)) => {
                debug!(issuer = %issuer, "using explicitly configured endpoints");
                let mut doc = DiscoveryDocument::synthesized(&issuer);
                doc.authorization_endpoint = auth.clone();
                doc.token_endpoint = token.clone();
                doc.fallback = false;
                doc
            },
            (Some(_), None) | (None, Some(_)) => {
                return Err(Error::Config(
                    "auth_url and token_url must be configured together".into(),
                ));
            },
            (None, None) => {
                let doc = discovery.resolve_or_fallback(&issuer).await;
                if doc.fallback {
                    warn!(issuer = %issuer, "endpoints are synthesized and unverified");
                }
                doc
            },
        };

        Self::new(config, endpoints, store)
    }

    /// Pin the flow key instead of generating one (callback handling after
    /// a browser round trip needs to reconstruct the same flow).
    #[must_use]
    pub fn with_flow_key(mut self, flow_key: impl Into<String>) -> Self {
        self.flow_key = flow_key.into();
        self
    }

    #[must_use]
    pub fn flow_key(&self) -> &str {
        &self.flow_key
    }

    #[must_use]
    pub fn endpoints(&self) -> &DiscoveryDocument {
        &self.endpoints
    }

    /// Build the authorization URL for `variant` and persist the context.
    ///
    /// State is written synchronously before the URL is handed out, so a
    /// callback can never arrive ahead of its own request context.
    pub fn start(&self, variant: FlowVariant) -> Result<AuthorizationRequest> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::FLOW_STARTS_TOTAL, "flow" => variant.as_str()).increment(1);

        let response_type = variant.response_type().to_string();
        let response_mode = self
            .config
            .response_mode
            .unwrap_or_else(|| ResponseMode::default_for(variant));

        let state = self.guard.generate()?;
        self.persist(STATE_FIELD, serde_json::json!({
            "value": &state,
            "variant": variant,
            "response_mode": response_mode,
        }))?;

        // The nonce is never a guard token: it is verified against the
        // id_token claim, not the echoed state, and it leaks into every
        // issued id_token where the state does not.
        let nonce = if response_type_includes_id_token(&response_type) {
            let nonce = generate_nonce();
            self.persist(NONCE_FIELD, serde_json::json!(&nonce))?;
            Some(nonce)
        } else {
            None
        };

        let pkce = if variant.supports_pkce() {
            let method = pkce::select_method(PkceMethod::S256, &self.endpoints)?;
            let pair = pkce::generate_pkce_with_method(method);
            self.persist(VERIFIER_FIELD, serde_json::json!({
                "verifier": &pair.verifier,
                "method": method,
            }))?;
            Some(pair)
        } else {
            None
        };

        let mut url = Url::parse(&self.endpoints.authorization_endpoint)
            .map_err(|source| Error::external("invalid authorization endpoint", source))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("response_type", &response_type)
            .append_pair("response_mode", response_mode.as_str())
            .append_pair("state", &state);

        if !self.config.scopes.is_empty() {
            url.query_pairs_mut()
                .append_pair("scope", &self.config.scopes.join(" "));
        }

        if let Some(nonce) = &nonce {
            url.query_pairs_mut().append_pair("nonce", nonce);
        }

        if let Some(pkce) = &pkce {
            url.query_pairs_mut()
                .append_pair("code_challenge", &pkce.challenge)
                .append_pair("code_challenge_method", pkce.method.as_str());
        }

        for (key, value) in &self.config.extra_auth_params {
            url.query_pairs_mut().append_pair(key, value);
        }

        info!(flow = %self.flow_key, variant = variant.as_str(), "authorization request built");

        Ok(AuthorizationRequest {
            url: url.to_string(),
            context: RequestContext {
                flow_key: self.flow_key.clone(),
                variant,
                state,
                nonce,
                code_challenge: pkce.map(|p| p.challenge),
                response_type,
                response_mode,
            },
        })
    }

    /// Parse and validate a redirect callback for this flow.
    ///
    /// The response mode recorded at `start` decides where to look. The
    /// persisted state/nonce context is retired here; a flow with no
    /// pending context rejects every callback.
    pub fn handle_callback(&self, callback_url: &str) -> Result<AuthorizationResult> {
        let pending = self
            .store
            .get(&self.scoped(STATE_FIELD))?
            .ok_or_else(|| {
                Error::CsrfValidation("no pending authorization request for this flow".into())
            })?;
        let response_mode: ResponseMode = pending
            .value
            .get("response_mode")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let params = callback::parse_callback_url(callback_url, response_mode)?;
        self.finish_callback(params)
    }

    /// Parse and validate a `form_post` callback body for this flow.
    pub fn handle_form_post(&self, body: &str) -> Result<AuthorizationResult> {
        if self.store.get(&self.scoped(STATE_FIELD))?.is_none() {
            return Err(Error::CsrfValidation(
                "no pending authorization request for this flow".into(),
            ));
        }
        let params = callback::parse_form_post(body);
        self.finish_callback(params)
    }

    fn finish_callback(&self, params: callback::CallbackParams) -> Result<AuthorizationResult> {
        let result = callback::finish(params, &self.guard);
        if matches!(&result, Ok(AuthorizationResult::ProviderError { .. })) {
            return result;
        }

        // Retire the flow-scoped context whatever the outcome; a second
        // delivery must start from a fresh request.
        self.store.delete(&self.scoped(STATE_FIELD))?;
        let expected_nonce = self
            .store
            .delete(&self.scoped(NONCE_FIELD))?
            .and_then(|entry| entry.value.as_str().map(str::to_string));

        let result = result?;

        // Tie fragment-delivered ID tokens to this attempt via the nonce
        // claim. Tokens arriving without a parseable matching nonce are
        // rejected whenever one was generated for the request.
        if let Some(expected) = expected_nonce
            && let Some(id_token) = result_id_token(&result)
        {
            let actual = callback::id_token_nonce(id_token.expose_secret());
            if actual.as_deref() != Some(expected.as_str()) {
                return Err(Error::CsrfValidation(
                    "id_token nonce is missing or does not match".into(),
                ));
            }
        }

        Ok(result)
    }

    /// Exchange an authorization code for tokens.
    ///
    /// The PKCE verifier is removed from storage before the request is
    /// dispatched: codes are single-use at the provider, so a failed
    /// exchange is never retried with the same code.
    pub async fn exchange(&self, code: &str) -> Result<TokenSet> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::CODE_EXCHANGE_TOTAL).increment(1);

        let verifier = self
            .store
            .delete(&self.scoped(VERIFIER_FIELD))?
            .and_then(|entry| {
                entry
                    .value
                    .get("verifier")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            });

        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];
        if let Some(verifier) = verifier {
            form.push(("code_verifier".to_string(), verifier));
        }
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret".to_string(), secret.expose_secret().clone()));
        }

        let result = self.post_token_request(&form).await;

        #[cfg(feature = "metrics")]
        if result.is_err() {
            counter!(oauth_metrics::CODE_EXCHANGE_ERRORS_TOTAL).increment(1);
        }
        #[cfg(feature = "metrics")]
        if result.is_ok() {
            counter!(oauth_metrics::FLOW_COMPLETIONS_TOTAL).increment(1);
        }

        result
    }

    /// Refresh an access token using a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::TOKEN_REFRESH_TOTAL).increment(1);

        let mut form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
            ("client_id".to_string(), self.config.client_id.clone()),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret".to_string(), secret.expose_secret().clone()));
        }

        let result = self.post_token_request(&form).await;

        #[cfg(feature = "metrics")]
        if result.is_err() {
            counter!(oauth_metrics::TOKEN_REFRESH_FAILURES_TOTAL).increment(1);
        }

        result
    }

    async fn post_token_request(&self, form: &[(String, String)]) -> Result<TokenSet> {
        let resp = self
            .client
            .post(&self.endpoints.token_endpoint)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let err: ProviderErrorBody = serde_json::from_str(&body).unwrap_or_else(|_| {
                ProviderErrorBody {
                    error: format!("http_{}", status.as_u16()),
                    error_description: Some(body.clone()),
                }
            });
            warn!(status = %status, error = %err.error, "token endpoint rejected the request");
            return Err(Error::token_exchange(err.error, err.error_description));
        }

        let wire: TokenResponse = serde_json::from_str(&body)
            .map_err(|source| Error::external("unrecognized token response shape", source))?;

        info!(flow = %self.flow_key, "token response received");
        Ok(wire.into_token_set(now_ms()))
    }

    fn scoped(&self, field: &str) -> String {
        flow_key(&self.flow_key, field)
    }

    fn persist(&self, field: &str, value: serde_json::Value) -> Result<()> {
        self.store
            .set(&self.scoped(field), Entry::expiring(value, DEFAULT_TTL))?;
        Ok(())
    }
}

fn result_id_token(result: &AuthorizationResult) -> Option<&secrecy::Secret<String>> {
    match result {
        AuthorizationResult::Tokens(tokens)
        | AuthorizationResult::CodeAndTokens { tokens, .. } => tokens.id_token.as_ref(),
        _ => None,
    }
}

/// Success shape of a token endpoint response.
///
/// Together with [`ProviderErrorBody`] this forms the closed set of shapes
/// accepted at the network boundary; anything else is rejected.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_token_set(self, issued_at_ms: u64) -> TokenSet {
        TokenSet {
            access_token: Some(secrecy::Secret::new(self.access_token)),
            id_token: self.id_token.map(secrecy::Secret::new),
            refresh_token: self.refresh_token.map(secrecy::Secret::new),
            token_type: self.token_type,
            expires_in: self.expires_in,
            scope: self.scope,
            issued_at_ms: Some(issued_at_ms),
        }
    }
}

/// Error shape of a token endpoint response (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}
