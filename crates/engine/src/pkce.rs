//! PKCE (RFC 7636) and random-token primitives.
//!
//! All random values are 32 bytes (256 bits) base64url-encoded without
//! padding, which yields 43 URL-safe characters and sits inside the RFC's
//! 43-128 character verifier window.

use {
    base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD},
    rand::RngCore,
    sha2::{Digest, Sha256},
};

use crate::{
    Error, Result,
    discovery::DiscoveryDocument,
    types::{PkceChallenge, PkceMethod},
};

fn random_b64(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a single-use `state` value.
#[must_use]
pub fn generate_state() -> String {
    random_b64(32)
}

/// Generate a `nonce` for flows that return an ID token.
#[must_use]
pub fn generate_nonce() -> String {
    random_b64(32)
}

/// Derive the challenge for a verifier. Recomputing this from a stored
/// verifier must reproduce the original challenge bit-for-bit; the token
/// endpoint performs the same derivation at exchange time.
#[must_use]
pub fn derive_challenge(verifier: &str, method: PkceMethod) -> String {
    match method {
        PkceMethod::S256 => {
            let mut hasher = Sha256::new();
            hasher.update(verifier.as_bytes());
            URL_SAFE_NO_PAD.encode(hasher.finalize())
        },
        PkceMethod::Plain => verifier.to_string(),
    }
}

/// Generate a PKCE pair with the S256 method.
#[must_use]
pub fn generate_pkce() -> PkceChallenge {
    generate_pkce_with_method(PkceMethod::S256)
}

/// Generate a PKCE pair with an explicit method.
#[must_use]
pub fn generate_pkce_with_method(method: PkceMethod) -> PkceChallenge {
    let verifier = random_b64(32);
    let challenge = derive_challenge(&verifier, method);
    PkceChallenge {
        verifier,
        challenge,
        method,
    }
}

/// Pick a challenge method the provider supports.
///
/// S256 is preferred whenever advertised (or when the document advertises
/// nothing, since S256 support is near-universal); `plain` is only allowed
/// when the discovery document explicitly lists it.
pub fn select_method(requested: PkceMethod, doc: &DiscoveryDocument) -> Result<PkceMethod> {
    let supported = &doc.code_challenge_methods_supported;
    match requested {
        PkceMethod::S256 if supported.is_empty() || supported.iter().any(|m| m == "S256") => {
            Ok(PkceMethod::S256)
        },
        PkceMethod::Plain if supported.iter().any(|m| m == "plain") => Ok(PkceMethod::Plain),
        PkceMethod::Plain => Err(Error::Pkce(
            "provider does not advertise the plain challenge method".into(),
        )),
        PkceMethod::S256 => Err(Error::Pkce(
            "provider does not advertise the S256 challenge method".into(),
        )),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_and_challenge_are_43_chars() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 43);
        assert_eq!(pkce.challenge.len(), 43);
        assert_ne!(pkce.verifier, pkce.challenge);
        assert_eq!(pkce.method, PkceMethod::S256);
    }

    #[test]
    fn challenge_rederivation_is_stable() {
        let pkce = generate_pkce();
        assert_eq!(derive_challenge(&pkce.verifier, PkceMethod::S256), pkce.challenge);
        assert_eq!(derive_challenge(&pkce.verifier, PkceMethod::S256), pkce.challenge);
    }

    #[test]
    fn plain_challenge_equals_verifier() {
        let pkce = generate_pkce_with_method(PkceMethod::Plain);
        assert_eq!(pkce.verifier, pkce.challenge);
    }

    #[test]
    fn verifier_is_url_safe() {
        let pkce = generate_pkce();
        assert!(
            pkce.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn state_and_nonce_are_unique() {
        assert_ne!(generate_state(), generate_state());
        assert_ne!(generate_nonce(), generate_nonce());
    }

    #[test]
    fn select_method_rejects_unadvertised_plain() {
        let doc = DiscoveryDocument::synthesized(&url::Url::parse("https://auth.example.com").unwrap());
        // Synthesized documents only advertise S256.
        assert!(select_method(PkceMethod::S256, &doc).is_ok());
        assert!(select_method(PkceMethod::Plain, &doc).is_err());
    }
}
