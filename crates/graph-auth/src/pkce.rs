//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the
//! authorization flow. The verifier stays server-side in the pending
//! transaction and is sent during code exchange; the challenge goes into the
//! authorization URL so the identity platform can tie the two together.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::settings::OAuthSettings;

/// Random bytes behind each verifier. 32 bytes encode to 43 characters,
/// the RFC 7636 minimum length.
pub const VERIFIER_BYTES: usize = 32;

/// Random bytes behind each `state` value.
pub const STATE_BYTES: usize = 32;

pub const CHALLENGE_METHOD: &str = "S256";

/// Maximum age of a pending transaction before it is treated as absent.
pub const PKCE_EXPIRY: Duration = Duration::from_secs(600);

/// Verifier/challenge pair for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: Secret<String>,
    pub challenge: String,
    pub challenge_method: &'static str,
}

/// An in-flight login: the PKCE pair plus the `state` sent to the provider.
#[derive(Debug, Clone)]
pub struct PkceTransaction {
    pub pkce: PkcePair,
    pub state: Option<String>,
    pub created_at: Instant,
}

impl PkceTransaction {
    pub fn new(pkce: PkcePair, state: Option<String>) -> Self {
        Self {
            pkce,
            state,
            created_at: Instant::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.created_at.elapsed() >= PKCE_EXPIRY
    }
}

/// Generate a fresh verifier/challenge pair.
pub fn generate() -> PkcePair {
    let verifier = generate_verifier();
    let challenge = compute_challenge(&verifier);
    PkcePair {
        verifier: Secret::new(verifier),
        challenge,
        challenge_method: CHALLENGE_METHOD,
    }
}

/// Cryptographically random verifier, URL-safe base64 without padding.
pub fn generate_verifier() -> String {
    random_token::<VERIFIER_BYTES>()
}

/// Opaque CSRF correlation value for the `state` parameter.
pub fn generate_state() -> String {
    random_token::<STATE_BYTES>()
}

fn random_token<const N: usize>() -> String {
    let mut bytes = [0u8; N];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// `challenge = BASE64URL(SHA256(ASCII(verifier)))`
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Compose the authorize URL for a pending transaction.
///
/// `redirect_uri` always comes from settings, never from the inbound request.
pub fn authorization_url(settings: &OAuthSettings, transaction: &PkceTransaction) -> Result<String> {
    let scope = settings.scope();
    let mut params = vec![
        ("client_id", settings.client_id.as_str()),
        ("response_type", "code"),
        ("redirect_uri", settings.redirect_uri.as_str()),
        ("scope", scope.as_str()),
    ];
    if let Some(state) = transaction.state.as_deref() {
        params.push(("state", state));
    }
    params.extend([
        ("code_challenge", transaction.pkce.challenge.as_str()),
        ("code_challenge_method", transaction.pkce.challenge_method),
        ("response_mode", "query"),
    ]);

    let url = reqwest::Url::parse_with_params(&settings.authorize_endpoint(), &params)
        .map_err(|e| Error::Configuration(format!("invalid authorize endpoint: {e}")))?;
    Ok(url.to_string())
}
