//! OAuth2 client-credentials grant.

use super::{body_or_reason, Grant};
use crate::client::{AuthFlow, Error};
use crate::config::ClientCredentials;
use oauth2::{AccessToken, TokenUrl};
use serde::Deserialize;

/// OAuth2 token endpoint path, relative to the login URL.
pub const TOKEN_PATH: &str = "/services/oauth2/token";

/// Successful token endpoint response.
///
/// Salesforce adds `instance_url` and the `id` identity URL to the standard fields.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
    #[serde(default)]
    id: Option<String>,
}

/// Token endpoint error body, as defined by RFC 6749 section 5.2.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Exchanges client credentials for an access token.
///
/// Issues a single form-urlencoded POST to `{login_url}/services/oauth2/token`.
///
/// # Errors
///
/// - [`Error::ParseUrl`] if the token URL is malformed
/// - [`Error::Request`] on transport failure
/// - [`Error::TokenExchange`] on any non-200 response
/// - [`Error::ParseTokenResponse`] if a 200 response body is not a token response
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub(crate) async fn exchange_client_credentials(
    http_client: &reqwest::Client,
    login_url: &str,
    credentials: &ClientCredentials,
    api_version: &str,
) -> Result<Grant, Error> {
    let token_url = TokenUrl::new(format!("{login_url}{TOKEN_PATH}"))
        .map_err(|source| Error::ParseUrl { source })?;

    tracing::debug!(token_url = token_url.as_str(), "requesting client credentials token");

    // Posted directly rather than through `oauth2::BasicClient`: the 405
    // fallback needs the raw status and body, and `instance_url` is not a
    // standard token response field.
    let response = http_client
        .post(token_url.as_str())
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.secret().as_str()),
        ])
        .send()
        .await
        .map_err(|source| Error::Request { source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| Error::Request { source })?;

    if status != reqwest::StatusCode::OK {
        return Err(token_error(status, &body));
    }

    let token: TokenResponse =
        serde_json::from_str(&body).map_err(|source| Error::ParseTokenResponse { source })?;

    let (organization_id, user_id) = token
        .id
        .as_deref()
        .and_then(parse_identity_url)
        .unzip();

    Ok(Grant {
        flow: AuthFlow::ClientCredentials,
        instance_url: token.instance_url.trim_end_matches('/').to_string(),
        access_token: AccessToken::new(token.access_token),
        api_version: api_version.to_string(),
        user_id,
        organization_id,
    })
}

fn token_error(status: reqwest::StatusCode, body: &str) -> Error {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(error) => Error::TokenExchange {
            status: status.as_u16(),
            error: error.error,
            description: error.error_description,
        },
        Err(_) => Error::TokenExchange {
            status: status.as_u16(),
            error: body_or_reason(status, body),
            description: None,
        },
    }
}

/// Splits an identity URL (`https://login.salesforce.com/id/<org>/<user>`)
/// into organization and user ids.
fn parse_identity_url(id: &str) -> Option<(String, String)> {
    let url = url::Url::parse(id).ok()?;
    let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
    match (segments.next(), segments.next(), segments.next()) {
        (Some("id"), Some(org), Some(user)) => Some((org.to_string(), user.to_string())),
        _ => None,
    }
}
