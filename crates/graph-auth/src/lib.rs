//! Microsoft identity platform OAuth client and session store
//!
//! Authorization Code + PKCE for a public client, the refresh-token grant,
//! and the process-wide store that maps identities to their tokens. This
//! crate has no dependency on the gateway binary and can be tested on its
//! own.
//!
//! Login flow:
//! 1. Gateway calls `flow::build_authorization_url()`, which files a
//!    `PkceTransaction` in the `TokenStore`
//! 2. User authorizes at the provider and is sent back with `code` + `state`
//! 3. Gateway calls `flow::exchange()`, which validates the transaction,
//!    exchanges the code, fetches `/me`, and stores a `TokenRecord`
//! 4. Later requests resolve the session cookie via `session::resolve_identity()`
//! 5. On 401 the request executor calls `token::refresh_token()` and
//!    `TokenStore::update_tokens()`
//! 6. `sweep::spawn_sweep_task()` evicts abandoned logins and dead sessions

pub mod error;
pub mod flow;
pub mod pkce;
pub mod profile;
pub mod session;
pub mod settings;
pub mod store;
pub mod sweep;
pub mod token;

pub use error::{Error, Result};
pub use flow::{build_authorization_url, exchange};
pub use pkce::{PkcePair, PkceTransaction};
pub use profile::UserProfile;
pub use session::resolve_identity;
pub use settings::{OAuthSettings, PENDING_TRANSACTION_KEY, StateValidation};
pub use store::{RefreshState, SessionPhase, SweepReport, TokenRecord, TokenStore, expiry_millis, now_millis};
pub use sweep::spawn_sweep_task;
pub use token::{TokenResponse, exchange_code, refresh_token};
