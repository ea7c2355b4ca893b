use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use flowlab_storage::now_ms;

/// Flow variant selecting how the provider returns credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowVariant {
    AuthorizationCode,
    Implicit,
    Hybrid,
}

impl FlowVariant {
    /// Default `response_type` parameter for the variant.
    #[must_use]
    pub fn response_type(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "code",
            Self::Implicit => "id_token token",
            Self::Hybrid => "code id_token",
        }
    }

    /// PKCE applies to code-bearing variants; pure implicit has no code to
    /// prove possession for.
    #[must_use]
    pub fn supports_pkce(self) -> bool {
        matches!(self, Self::AuthorizationCode | Self::Hybrid)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::Implicit => "implicit",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Whether a `response_type` will carry an ID token (and thus needs a nonce).
#[must_use]
pub fn response_type_includes_id_token(response_type: &str) -> bool {
    response_type.split_whitespace().any(|t| t == "id_token")
}

/// How the provider delivers the authorization response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseMode {
    #[default]
    Query,
    Fragment,
    FormPost,
    /// PingOne redirectless mode: the response comes back as a JSON flow
    /// object instead of a redirect.
    #[serde(rename = "pi.flow")]
    PiFlow,
}

impl ResponseMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Fragment => "fragment",
            Self::FormPost => "form_post",
            Self::PiFlow => "pi.flow",
        }
    }

    /// Spec default per variant: codes arrive in the query string, tokens
    /// must never appear there.
    #[must_use]
    pub fn default_for(variant: FlowVariant) -> Self {
        match variant {
            FlowVariant::AuthorizationCode => Self::Query,
            FlowVariant::Implicit | FlowVariant::Hybrid => Self::Fragment,
        }
    }
}

/// OAuth client configuration for one provider environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_id: String,
    /// Issuer base URL; discovery appends the well-known path to it.
    pub issuer: String,
    /// Provider environment identifier, when the issuer is synthesized from
    /// one (see `defaults::issuer_for_environment`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_id: Option<String>,
    pub redirect_uri: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Explicit endpoint overrides; when set, discovery is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    /// Response mode override; defaults per flow variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_mode: Option<ResponseMode>,
    /// Secret for confidential clients; public clients leave this unset.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    /// Extra query parameters to include in the authorization URL.
    #[serde(default)]
    pub extra_auth_params: Vec<(String, String)>,
}

impl ClientConfig {
    /// Configuration errors are raised here, before any storage or network
    /// activity happens.
    pub fn validate(&self) -> crate::Result<()> {
        if self.client_id.trim().is_empty() {
            return Err(crate::Error::Config("client_id is required".into()));
        }
        if self.issuer.trim().is_empty() {
            return Err(crate::Error::Config(
                "issuer (or environment_id) is required".into(),
            ));
        }
        if self.redirect_uri.trim().is_empty() {
            return Err(crate::Error::Config("redirect_uri is required".into()));
        }
        Ok(())
    }
}

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PkceMethod {
    #[default]
    #[serde(rename = "S256")]
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl PkceMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

/// PKCE verifier/challenge pair.
///
/// The verifier never leaves the client before the exchange; only the
/// derived challenge goes into the authorization URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
    pub method: PkceMethod,
}

/// Freshness of a stored token set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Expired,
    /// No locally recorded issue time, so expiry cannot be computed.
    /// Unknown is never treated as valid.
    Unknown,
}

/// Tokens returned by the provider, stamped with a local issue time.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenSet {
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub access_token: Option<Secret<String>>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub id_token: Option<Secret<String>>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    /// Provider-reported lifetime in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Millisecond Unix timestamp recorded when the tokens arrived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at_ms: Option<u64>,
}

impl TokenSet {
    /// `issued_at + expires_in * 1000`, when both are known.
    #[must_use]
    pub fn expires_at_ms(&self) -> Option<u64> {
        let issued = self.issued_at_ms?;
        let lifetime = self.expires_in?;
        Some(issued.saturating_add(lifetime.saturating_mul(1000)))
    }

    #[must_use]
    pub fn freshness_at(&self, now_ms: u64) -> Freshness {
        match self.expires_at_ms() {
            // Exactly at expires_at counts as expired.
            Some(at) if now_ms >= at => Freshness::Expired,
            Some(_) => Freshness::Fresh,
            None => Freshness::Unknown,
        }
    }

    #[must_use]
    pub fn freshness(&self) -> Freshness {
        self.freshness_at(now_ms())
    }

    /// True only for positively known expiry; unknown freshness is handled
    /// separately by callers that require validity.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.freshness() == Freshness::Expired
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("issued_at_ms", &self.issued_at_ms)
            .finish()
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through storage.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn token_set(issued_at_ms: Option<u64>, expires_in: Option<u64>) -> TokenSet {
        TokenSet {
            access_token: Some(Secret::new("at".into())),
            id_token: None,
            refresh_token: None,
            token_type: Some("Bearer".into()),
            expires_in,
            scope: None,
            issued_at_ms,
        }
    }

    #[test]
    fn expires_at_is_issued_plus_lifetime_millis() {
        let tokens = token_set(Some(1_000_000), Some(3600));
        assert_eq!(tokens.expires_at_ms(), Some(1_000_000 + 3600 * 1000));
    }

    #[test]
    fn freshness_boundary_is_expired() {
        let tokens = token_set(Some(1_000_000), Some(60));
        let at = tokens.expires_at_ms().unwrap();
        assert_eq!(tokens.freshness_at(at - 1), Freshness::Fresh);
        assert_eq!(tokens.freshness_at(at), Freshness::Expired);
        assert_eq!(tokens.freshness_at(at + 1), Freshness::Expired);
    }

    #[test]
    fn missing_issued_at_is_unknown_not_fresh() {
        let tokens = token_set(None, Some(3600));
        assert_eq!(tokens.freshness_at(0), Freshness::Unknown);
        assert!(!tokens.is_expired());
    }

    #[test]
    fn debug_redacts_all_token_material() {
        let mut tokens = token_set(Some(1), Some(2));
        tokens.id_token = Some(Secret::new("jwt-id".into()));
        tokens.refresh_token = Some(Secret::new("rt".into()));
        let debug = format!("{tokens:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("jwt-id"));
    }

    #[test]
    fn response_type_id_token_detection() {
        assert!(response_type_includes_id_token("id_token"));
        assert!(response_type_includes_id_token("code id_token"));
        assert!(response_type_includes_id_token("id_token token"));
        assert!(!response_type_includes_id_token("code"));
        assert!(!response_type_includes_id_token("token"));
    }

    #[test]
    fn default_response_modes_per_variant() {
        assert_eq!(
            ResponseMode::default_for(FlowVariant::AuthorizationCode),
            ResponseMode::Query
        );
        assert_eq!(
            ResponseMode::default_for(FlowVariant::Implicit),
            ResponseMode::Fragment
        );
        assert_eq!(
            ResponseMode::default_for(FlowVariant::Hybrid),
            ResponseMode::Fragment
        );
    }

    #[test]
    fn config_validation_catches_missing_fields() {
        let config = ClientConfig {
            client_id: String::new(),
            issuer: "https://auth.example.com".into(),
            environment_id: None,
            redirect_uri: "https://app.example/cb".into(),
            scopes: vec![],
            auth_url: None,
            token_url: None,
            response_mode: None,
            client_secret: None,
            extra_auth_params: vec![],
        };
        assert!(config.validate().is_err());
    }
}
