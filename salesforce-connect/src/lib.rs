//! Verified Salesforce API sessions.
//!
//! This crate logs in to Salesforce with either username/password (plus
//! security token) or the OAuth2 client-credentials grant, confirms the
//! resulting token with a probe query, and retries once at an older API
//! version when the login endpoint rejects the requested one.
//!
//! # Examples
//!
//! ```no_run
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Reads SALESFORCE_USERNAME, SALESFORCE_PASSWORD, SALESFORCE_TOKEN, ...
//! let session = salesforce_connect::establish(None).await?;
//!
//! let users = session
//!     .query::<serde_json::Value>("SELECT Id, Name FROM User LIMIT 5")
//!     .await?;
//! println!("{} users", users.total_size);
//! # Ok(())
//! # }
//! ```

use client::{ConnectionConfig, Error};
use session::Session;

/// Default Salesforce API version (Winter '24 - API version 59.0).
pub const DEFAULT_API_VERSION: &str = "59.0";

/// API version used for the single retry after a version mismatch.
pub const FALLBACK_API_VERSION: &str = "58.0";

/// Default connection timeout for login and probe requests (15 seconds).
pub const DEFAULT_AUTH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default request timeout for login and probe requests (30 seconds).
pub const DEFAULT_AUTH_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Session establishment, flow selection and version fallback.
pub mod client;

/// Configuration sources and credential resolution.
pub mod config;

/// Password and client-credentials handshakes.
pub mod flow;

/// Authenticated session handle and queries.
pub mod session;

/// Establishes a session using the process environment.
///
/// `config` overrides the flow and login URL; everything else comes from
/// `SALESFORCE_*` environment variables. See [`client::Builder`] for injected
/// sources, config files, custom API versions and timeouts.
///
/// # Errors
///
/// See [`client::Client::establish`].
pub async fn establish(config: Option<ConnectionConfig>) -> Result<Session, Error> {
    let mut builder = client::Builder::new();
    if let Some(config) = config {
        builder = builder.config(config);
    }
    builder.build()?.establish().await
}
