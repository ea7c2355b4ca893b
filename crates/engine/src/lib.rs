//! Client-side OAuth 2.0 / OpenID Connect authorization flow engine.
//!
//! Builds authorization requests (state, nonce, PKCE), resolves provider
//! endpoints through discovery with retry and fallback, parses callbacks
//! delivered by query, fragment, or posted form, exchanges authorization
//! codes for tokens, and tracks token lifecycle. Storage is injected via
//! [`flowlab_storage::KeyValueStore`], so the engine runs the same against
//! an in-memory map in tests and a file on disk in an application.

pub mod callback;
mod config_dir;
pub mod csrf;
pub mod defaults;
pub mod discovery;
pub mod error;
pub mod flow;
pub mod pkce;
pub mod tokens;
pub mod types;

pub use {
    callback::{
        AuthorizationResult, CallbackParams, id_token_nonce, parse_callback_url, parse_form_post,
    },
    csrf::{CsrfGuard, CsrfStats},
    defaults::{issuer_for_environment, load_client_config},
    discovery::{DiscoveryClient, DiscoveryDocument, RetryPolicy, build_well_known_url},
    flow::{AuthFlow, AuthorizationRequest, RequestContext},
    tokens::{TokenManager, TokenStats},
    types::{
        ClientConfig, FlowVariant, Freshness, PkceChallenge, PkceMethod, ResponseMode, TokenSet,
        serialize_option_secret, serialize_secret,
    },
};

pub use error::{Error, Result};
