//! Login flow: authorization redirect and code exchange
//!
//! The two halves of the Authorization-Code + PKCE handshake. The first
//! leaves a pending transaction in the store under the sentinel key; the
//! second consumes it, exchanges the code, resolves the user's profile, and
//! files the resulting record under the provider-issued id.
//!
//! Only one login can be pending at a time. A second login started before
//! the first completes replaces the first transaction, and the first
//! callback then fails validation (or, in permissive mode, fails at the
//! token endpoint with a verifier mismatch).
//!
//! The pending transaction is cleared once the code is redeemed. If the
//! token or profile call fails in transport, the transaction is put back so
//! a retried callback can still complete.

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::pkce::{self, PkceTransaction};
use crate::profile;
use crate::settings::{OAuthSettings, PENDING_TRANSACTION_KEY, StateValidation};
use crate::store::{TokenRecord, TokenStore, now_millis};
use crate::token;

/// Start a login: validate settings, file a fresh PKCE transaction, and
/// return the provider authorize URL.
pub async fn build_authorization_url(settings: &OAuthSettings, store: &TokenStore) -> Result<String> {
    settings.validate()?;

    let transaction = PkceTransaction::new(pkce::generate(), Some(pkce::generate_state()));
    let url = pkce::authorization_url(settings, &transaction)?;
    store.set_pkce(PENDING_TRANSACTION_KEY, transaction).await;

    info!(
        validation = settings.state_validation.label(),
        "issued authorization url"
    );
    Ok(url)
}

/// Complete a login from the callback's `code` and `state`.
///
/// On success exactly one record is stored, keyed by the profile id. If the
/// profile cannot be resolved nothing is stored.
pub async fn exchange(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    store: &TokenStore,
    code: &str,
    state: Option<&str>,
) -> Result<TokenRecord> {
    settings.validate()?;

    let Checked {
        transaction,
        from_store,
    } = checked_transaction(settings, store, state).await?;

    let completed = complete(client, settings, store, &transaction, code).await;
    if let Err(e) = &completed {
        if e.is_transport() && from_store {
            warn!(error = %e, "login interrupted in transport, keeping pending authorization");
            store.restore_pkce(PENDING_TRANSACTION_KEY, transaction).await;
        }
    }
    completed
}

async fn complete(
    client: &reqwest::Client,
    settings: &OAuthSettings,
    store: &TokenStore,
    transaction: &PkceTransaction,
    code: &str,
) -> Result<TokenRecord> {
    let response = token::exchange_code(
        client,
        settings,
        code,
        Some(transaction.pkce.verifier.expose().as_str()),
    )
    .await?;
    let received_at = now_millis();

    let profile = profile::fetch_profile(client, settings, &response.access_token).await?;
    let identity_id = profile.id.clone();
    let record = TokenRecord::from_response(response, profile, received_at);
    store.set_token(&identity_id, record.clone()).await;

    info!(identity_id = %identity_id, "login completed");
    Ok(record)
}

/// Transaction a callback is completed with. `from_store` is false for the
/// verifier synthesized in permissive mode.
struct Checked {
    transaction: PkceTransaction,
    from_store: bool,
}

impl Checked {
    fn stored(transaction: PkceTransaction) -> Self {
        Self {
            transaction,
            from_store: true,
        }
    }
}

/// Take the pending transaction and check it against the callback.
///
/// Strict mode rejects a missing transaction or a state that does not match.
/// A rejected transaction goes back into the store so the genuine callback
/// can still complete. Permissive mode logs the problem and carries on.
async fn checked_transaction(
    settings: &OAuthSettings,
    store: &TokenStore,
    state: Option<&str>,
) -> Result<Checked> {
    let strict = settings.state_validation == StateValidation::Strict;

    let Some(transaction) = store.take_pkce(PENDING_TRANSACTION_KEY).await else {
        if strict {
            warn!("callback without a pending authorization, rejecting");
            return Err(Error::MissingTransaction);
        }
        warn!("callback without a pending authorization, continuing with a fresh verifier");
        return Ok(Checked {
            transaction: PkceTransaction::new(pkce::generate(), None),
            from_store: false,
        });
    };

    let Some(expected) = transaction.state.as_deref() else {
        return Ok(Checked::stored(transaction));
    };

    let matches = state == Some(expected);
    if matches {
        return Ok(Checked::stored(transaction));
    }

    if strict {
        warn!(
            state_present = state.is_some(),
            "callback state does not match pending authorization, rejecting"
        );
        store.set_pkce(PENDING_TRANSACTION_KEY, transaction).await;
        return Err(Error::StateMismatch);
    }

    if state.is_some() {
        warn!("callback state does not match pending authorization, continuing");
    }
    Ok(Checked::stored(transaction))
}
