//! Credential handshakes against the Salesforce login endpoints.
//!
//! - [`oauth`]: OAuth2 client-credentials grant against `/services/oauth2/token`
//! - [`password`]: partner SOAP `login` call with username and password plus security token
//!
//! Both return a `Grant`: the raw result of a handshake that has not been
//! probed yet. Handshakes are crate-private, so only
//! [`crate::client::Client`] turns a grant into a [`crate::session::Session`].
//!
//! ```compile_fail
//! use salesforce_connect::flow::{password, Grant};
//! ```

use crate::client::{AuthFlow, Error};
use oauth2::AccessToken;
use std::time::Duration;

pub mod oauth;
pub mod password;

/// Unverified result of a successful handshake.
#[derive(Debug, Clone)]
pub(crate) struct Grant {
    /// Flow that produced the token.
    pub flow: AuthFlow,
    /// Base URL of the org instance (scheme and host).
    pub instance_url: String,
    /// Bearer token for REST calls.
    pub access_token: AccessToken,
    /// API version the handshake was made with.
    pub api_version: String,
    /// Authenticated user id, when reported.
    pub user_id: Option<String>,
    /// Organization id, when reported.
    pub organization_id: Option<String>,
}

/// Builds the HTTP client used for a single establish attempt.
pub(crate) fn http_client(
    connect_timeout: Duration,
    request_timeout: Duration,
) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(connect_timeout)
        .timeout(request_timeout)
        .build()
        .map_err(|source| Error::HttpClient { source })
}

/// Trimmed body text, or the canonical status reason if the body is blank.
pub(crate) fn body_or_reason(status: reqwest::StatusCode, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("no response body")
            .to_string()
    } else {
        body.to_string()
    }
}
