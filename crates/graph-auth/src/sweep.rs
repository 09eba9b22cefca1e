//! Periodic eviction of expired logins and dead sessions
//!
//! Nothing else removes a record whose refresh token is gone, or a login the
//! user abandoned halfway, so without this the store only grows.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::store::{TokenStore, now_millis};

/// Spawn a background task that sweeps the store every `interval`.
///
/// Records older than `max_session_age` are evicted regardless of token
/// state; the session cookie has expired by then anyway.
pub fn spawn_sweep_task(
    store: Arc<TokenStore>,
    interval: Duration,
    max_session_age: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately and the store is empty at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let report = store.sweep(now_millis(), max_session_age).await;
            if report.transactions_removed > 0 || report.tokens_removed > 0 {
                info!(
                    transactions_removed = report.transactions_removed,
                    tokens_removed = report.tokens_removed,
                    "store sweep evicted entries"
                );
            } else {
                debug!("store sweep found nothing to evict");
            }
        }
    })
}
