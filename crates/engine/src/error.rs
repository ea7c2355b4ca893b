use std::error::Error as StdError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Provider metadata could not be fetched or failed validation.
    /// Recoverable: callers may substitute a synthesized fallback document.
    #[error("discovery failed for {issuer}: {reason}")]
    Discovery { issuer: String, reason: String },
    /// Missing, expired, or mismatched state/nonce. Fatal for the flow.
    #[error("state validation failed: {0}")]
    CsrfValidation(String),
    #[error("PKCE failure: {0}")]
    Pkce(String),
    /// The token endpoint rejected the request. Codes are single-use, so
    /// the flow must be restarted rather than retried.
    #[error("token exchange rejected: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TokenExchange {
        error: String,
        description: Option<String>,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Storage(#[from] flowlab_storage::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("{0}")]
    Message(String),
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn discovery(issuer: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Discovery {
            issuer: issuer.into(),
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn token_exchange(error: impl Into<String>, description: Option<String>) -> Self {
        Self::TokenExchange {
            error: error.into(),
            description,
        }
    }

    #[must_use]
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
