//! Process-wide session and token store
//!
//! Maps an identity id to its token record, and a transaction key to an
//! in-flight PKCE transaction. This is the single source of truth for "is
//! this identity authenticated". One instance is built at startup and shared
//! through an `Arc`; nothing else holds token records long-term, callers get
//! clones.
//!
//! Locks are only held for map operations, never across network I/O. Records
//! are replaced whole, so concurrent writers for the same identity leave one
//! complete record behind (last writer wins).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pkce::PkceTransaction;
use crate::profile::UserProfile;
use crate::settings::PENDING_TRANSACTION_KEY;
use crate::token::TokenResponse;

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Unix ms at which a token issued at `received_at` with a lifetime of
/// `expires_in` seconds expires. Saturates instead of wrapping.
pub fn expiry_millis(received_at: u64, expires_in: u64) -> u64 {
    received_at.saturating_add(expires_in.saturating_mul(1000))
}

/// Credential material for one authenticated identity.
///
/// `expires_at` and `received_at` are unix timestamps in milliseconds.
#[derive(Debug, Clone)]
pub struct TokenRecord {
    pub identity_id: String,
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: u64,
    pub received_at: u64,
    pub scope: Option<String>,
    pub profile: UserProfile,
}

impl TokenRecord {
    /// Build a record from a token endpoint response and the resolved profile.
    pub fn from_response(response: TokenResponse, profile: UserProfile, received_at: u64) -> Self {
        Self {
            identity_id: profile.id.clone(),
            access_token: Secret::new(response.access_token),
            refresh_token: response.refresh_token.map(Secret::new),
            expires_at: expiry_millis(received_at, response.expires_in),
            received_at,
            scope: response.scope,
            profile,
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_blank()
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.as_ref().is_some_and(|rt| !rt.is_blank())
    }

    pub fn is_expired(&self, now_millis: u64) -> bool {
        self.expires_at <= now_millis
    }
}

/// Where an identity sits in the login lifecycle, as far as the store can tell.
///
/// Transitions:
/// - NoSession → PkcePending (authorization URL issued)
/// - PkcePending → Authenticated (code exchanged, record stored)
/// - Authenticated → Refreshing → Authenticated | Expired
/// - Expired without a refresh token is terminal; a new login starts over
/// - any → NoSession (logout, clear, sweep)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    NoSession,
    PkcePending,
    Authenticated,
    Refreshing,
    Expired,
}

impl SessionPhase {
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::NoSession => "no_session",
            SessionPhase::PkcePending => "pkce_pending",
            SessionPhase::Authenticated => "authenticated",
            SessionPhase::Refreshing => "refreshing",
            SessionPhase::Expired => "expired",
        }
    }
}

/// Counts from one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub transactions_removed: usize,
    pub tokens_removed: usize,
}

/// State held under an identity's refresh guard.
#[derive(Debug, Default)]
pub struct RefreshState {
    refused_for: Option<Secret<String>>,
}

impl RefreshState {
    /// Remember that the provider refused to refresh after `access_token`
    /// was rejected.
    pub fn refuse(&mut self, access_token: &str) {
        self.refused_for = Some(Secret::from(access_token));
    }

    /// Whether a refresh was already refused for this rejected access token.
    pub fn refused(&self, access_token: &str) -> bool {
        self.refused_for
            .as_ref()
            .is_some_and(|t| t.expose() == access_token)
    }
}

/// Shared token and PKCE state.
#[derive(Default)]
pub struct TokenStore {
    tokens: RwLock<HashMap<String, TokenRecord>>,
    pending: Mutex<HashMap<String, PkceTransaction>>,
    refresh_guards: Mutex<HashMap<String, Arc<Mutex<RefreshState>>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for an identity.
    pub async fn set_token(&self, identity_id: &str, record: TokenRecord) {
        self.tokens
            .write()
            .await
            .insert(identity_id.to_string(), record);
        debug!(identity_id, "stored token record");
    }

    pub async fn get_token(&self, identity_id: &str) -> Option<TokenRecord> {
        self.tokens.read().await.get(identity_id).cloned()
    }

    /// A record exists and carries a non-empty access token.
    pub async fn has_token(&self, identity_id: &str) -> bool {
        self.tokens
            .read()
            .await
            .get(identity_id)
            .is_some_and(TokenRecord::has_access_token)
    }

    /// Remove an identity's record, any pending transaction filed under the
    /// same key, and its refresh guard.
    pub async fn clear_token(&self, identity_id: &str) {
        let removed = self.tokens.write().await.remove(identity_id).is_some();
        self.pending.lock().await.remove(identity_id);
        self.refresh_guards.lock().await.remove(identity_id);
        if removed {
            info!(identity_id, "cleared token record");
        }
    }

    /// Replace the tokens of an existing record after a refresh.
    ///
    /// The refresh token is kept when the provider did not rotate it. Fails
    /// with `NotFound` if the record was cleared in the meantime (logout
    /// racing a refresh), so a refresh never resurrects a session.
    pub async fn update_tokens(
        &self,
        identity_id: &str,
        access_token: String,
        refresh_token: Option<String>,
        expires_at: u64,
        scope: Option<String>,
    ) -> Result<()> {
        let mut tokens = self.tokens.write().await;
        let record = tokens
            .get_mut(identity_id)
            .ok_or_else(|| Error::NotFound(format!("no token record for {identity_id}")))?;
        record.access_token = Secret::new(access_token);
        if let Some(refresh) = refresh_token {
            record.refresh_token = Some(Secret::new(refresh));
        }
        record.expires_at = expires_at;
        if scope.is_some() {
            record.scope = scope;
        }
        debug!(identity_id, "updated tokens after refresh");
        Ok(())
    }

    pub async fn set_pkce(&self, key: &str, transaction: PkceTransaction) {
        self.pending
            .lock()
            .await
            .insert(key.to_string(), transaction);
    }

    /// Pending transaction for `key`. Expired transactions read as absent.
    pub async fn get_pkce(&self, key: &str) -> Option<PkceTransaction> {
        let pending = self.pending.lock().await;
        pending.get(key).filter(|tx| !tx.is_expired()).cloned()
    }

    pub async fn clear_pkce(&self, key: &str) {
        self.pending.lock().await.remove(key);
    }

    /// Remove and return the pending transaction in one step.
    pub async fn take_pkce(&self, key: &str) -> Option<PkceTransaction> {
        self.pending
            .lock()
            .await
            .remove(key)
            .filter(|tx| !tx.is_expired())
    }

    /// Put a taken transaction back unless another login has filed one since.
    pub async fn restore_pkce(&self, key: &str, transaction: PkceTransaction) {
        self.pending
            .lock()
            .await
            .entry(key.to_string())
            .or_insert(transaction);
    }

    /// Wipe every record, transaction, and refresh guard.
    pub async fn clear_all(&self) {
        let tokens = {
            let mut tokens = self.tokens.write().await;
            let n = tokens.len();
            tokens.clear();
            n
        };
        self.pending.lock().await.clear();
        self.refresh_guards.lock().await.clear();
        info!(tokens, "cleared all sessions");
    }

    /// Per-identity lock that serializes refreshes. Concurrent requests that
    /// hit a 401 queue here instead of each spending the refresh token.
    pub async fn refresh_guard(&self, identity_id: &str) -> Arc<Mutex<RefreshState>> {
        self.refresh_guards
            .lock()
            .await
            .entry(identity_id.to_string())
            .or_default()
            .clone()
    }

    /// Derive the lifecycle phase for an identity.
    ///
    /// Pending transactions are not tied to an identity, so `PkcePending` is
    /// reported for any identity without a record while a login is in flight.
    pub async fn phase(&self, identity_id: Option<&str>) -> SessionPhase {
        if let Some(id) = identity_id {
            let record = self.get_token(id).await;
            if let Some(record) = record {
                let refreshing = self
                    .refresh_guards
                    .lock()
                    .await
                    .get(id)
                    .is_some_and(|guard| guard.try_lock().is_err());
                if refreshing {
                    return SessionPhase::Refreshing;
                }
                if !record.has_access_token()
                    || (record.is_expired(now_millis()) && !record.has_refresh_token())
                {
                    return SessionPhase::Expired;
                }
                return SessionPhase::Authenticated;
            }
        }
        if self.get_pkce(PENDING_TRANSACTION_KEY).await.is_some() {
            SessionPhase::PkcePending
        } else {
            SessionPhase::NoSession
        }
    }

    /// Evict expired transactions and dead sessions.
    ///
    /// A record is dead once it is older than `max_session_age`, or once its
    /// access token has expired with no refresh token to renew it.
    pub async fn sweep(&self, now_millis: u64, max_session_age: Duration) -> SweepReport {
        let transactions_removed = {
            let mut pending = self.pending.lock().await;
            let before = pending.len();
            pending.retain(|_, tx| !tx.is_expired());
            before - pending.len()
        };

        let max_age_millis = max_session_age.as_millis() as u64;
        let evicted: Vec<String> = {
            let mut tokens = self.tokens.write().await;
            let evicted: Vec<String> = tokens
                .iter()
                .filter(|(_, record)| {
                    let too_old = now_millis.saturating_sub(record.received_at) >= max_age_millis;
                    let dead = record.is_expired(now_millis) && !record.has_refresh_token();
                    too_old || dead
                })
                .map(|(id, _)| id.clone())
                .collect();
            for id in &evicted {
                tokens.remove(id);
            }
            evicted
        };

        if !evicted.is_empty() {
            let mut guards = self.refresh_guards.lock().await;
            for id in &evicted {
                guards.remove(id);
            }
        }

        SweepReport {
            transactions_removed,
            tokens_removed: evicted.len(),
        }
    }

    /// Number of stored token records.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
