//! Authorization response parsing.
//!
//! A callback arrives as a query string, a URL fragment, or a posted form
//! body depending on the negotiated response mode. Parsing is a pure
//! function over the delivered URL/body; state validation against the
//! [`CsrfGuard`](crate::csrf::CsrfGuard) happens in [`finish`], and no token
//! material is accepted without it.

use {
    base64::{
        Engine,
        engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    },
    secrecy::Secret,
    url::Url,
};

use flowlab_storage::now_ms;

#[cfg(feature = "metrics")]
use flowlab_metrics::{counter, oauth as oauth_metrics};

use crate::{
    Error, Result,
    csrf::CsrfGuard,
    types::{ResponseMode, TokenSet},
};

/// Raw fields lifted from a callback, before state validation.
#[derive(Debug, Clone, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    fn from_pairs<'a>(pairs: impl Iterator<Item = (std::borrow::Cow<'a, str>, std::borrow::Cow<'a, str>)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let value = value.into_owned();
            match key.as_ref() {
                "code" => params.code = Some(value),
                "access_token" => params.access_token = Some(value),
                "id_token" => params.id_token = Some(value),
                "token_type" => params.token_type = Some(value),
                "expires_in" => params.expires_in = value.parse().ok(),
                "scope" => params.scope = Some(value),
                "state" => params.state = Some(value),
                "error" => params.error = Some(value),
                "error_description" => params.error_description = Some(value),
                _ => {},
            }
        }
        params
    }
}

/// Outcome of a parsed and state-validated callback.
#[derive(Debug)]
pub enum AuthorizationResult {
    /// Authorization code, to be handed to the token exchanger.
    Code { code: String },
    /// Tokens delivered directly in the fragment (implicit).
    Tokens(TokenSet),
    /// Hybrid: a code plus fragment tokens.
    CodeAndTokens { code: String, tokens: TokenSet },
    /// The provider reported an error; surfaced verbatim for display.
    ProviderError {
        error: String,
        description: Option<String>,
    },
}

/// Extract callback fields from a redirect URL for the given response mode.
///
/// `form_post` deliveries have no redirect URL to inspect; use
/// [`parse_form_post`] with the posted body instead.
pub fn parse_callback_url(callback_url: &str, mode: ResponseMode) -> Result<CallbackParams> {
    let url = Url::parse(callback_url)
        .map_err(|source| Error::external("invalid callback URL", source))?;

    match mode {
        ResponseMode::Query => Ok(CallbackParams::from_pairs(url.query_pairs())),
        ResponseMode::Fragment => {
            let fragment = url.fragment().unwrap_or_default();
            Ok(CallbackParams::from_pairs(
                url::form_urlencoded::parse(fragment.as_bytes()),
            ))
        },
        ResponseMode::FormPost => Err(Error::message(
            "form_post responses arrive in the request body, use parse_form_post",
        )),
        ResponseMode::PiFlow => Err(Error::message(
            "pi.flow responses are delivered as JSON flow objects, not redirects",
        )),
    }
}

/// Extract callback fields from a posted `application/x-www-form-urlencoded`
/// body (form_post response mode).
#[must_use]
pub fn parse_form_post(body: &str) -> CallbackParams {
    CallbackParams::from_pairs(url::form_urlencoded::parse(body.as_bytes()))
}

/// Validate the echoed state and classify the callback.
///
/// A provider error short-circuits without touching the guard. Otherwise a
/// missing or unrecognized `state` is a fatal CSRF failure: the flow aborts
/// and no code or token from the callback is usable.
pub fn finish(params: CallbackParams, guard: &CsrfGuard) -> Result<AuthorizationResult> {
    if let Some(error) = params.error {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::CALLBACKS_TOTAL, "outcome" => "provider_error").increment(1);
        return Ok(AuthorizationResult::ProviderError {
            error,
            description: params.error_description,
        });
    }

    let state = params
        .state
        .as_deref()
        .ok_or_else(|| Error::CsrfValidation("callback carried no state".into()))?;
    if !guard.validate(state) {
        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::CSRF_REJECTIONS_TOTAL).increment(1);
        return Err(Error::CsrfValidation(
            "state is unknown, expired, or already used".into(),
        ));
    }

    let tokens = if params.access_token.is_some() || params.id_token.is_some() {
        Some(TokenSet {
            access_token: params.access_token.map(Secret::new),
            id_token: params.id_token.map(Secret::new),
            refresh_token: None,
            token_type: params.token_type,
            expires_in: params.expires_in,
            scope: params.scope,
            issued_at_ms: Some(now_ms()),
        })
    } else {
        None
    };

    #[cfg(feature = "metrics")]
    counter!(oauth_metrics::CALLBACKS_TOTAL, "outcome" => "ok").increment(1);

    match (params.code, tokens) {
        (Some(code), Some(tokens)) => Ok(AuthorizationResult::CodeAndTokens { code, tokens }),
        (Some(code), None) => Ok(AuthorizationResult::Code { code }),
        (None, Some(tokens)) => Ok(AuthorizationResult::Tokens(tokens)),
        (None, None) => Err(Error::message(
            "callback carried neither a code nor tokens",
        )),
    }
}

/// Read the `nonce` claim from an ID token payload.
///
/// No signature verification happens here; the claim is only compared
/// against the locally stored nonce to tie the token to this attempt.
#[must_use]
pub fn id_token_nonce(token: &str) -> Option<String> {
    let claims = parse_jwt_claims(token)?;
    claims
        .get("nonce")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
}

fn parse_jwt_claims(token: &str) -> Option<serde_json::Value> {
    let payload_b64 = token.split('.').nth(1)?;
    let payload = URL_SAFE_NO_PAD.decode(payload_b64).or_else(|_| {
        let padded = match payload_b64.len() % 4 {
            2 => format!("{payload_b64}=="),
            3 => format!("{payload_b64}="),
            _ => payload_b64.to_string(),
        };
        STANDARD.decode(padded)
    });
    let payload = payload.ok()?;
    serde_json::from_slice(&payload).ok()
}
