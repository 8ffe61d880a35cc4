//! Authenticated session handle.

use crate::client::{AuthFlow, Error};
use crate::flow::{body_or_reason, Grant};
use oauth2::AccessToken;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;

/// Read-only query used to confirm a freshly issued token is usable.
pub const PROBE_QUERY: &str = "SELECT Id FROM User LIMIT 1";

/// Result page of a SOQL query.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    /// Total number of records matching the query.
    pub total_size: u64,
    /// Whether this page holds the last records.
    pub done: bool,
    /// Records in this page.
    pub records: Vec<T>,
    /// Relative URL of the next page, if any.
    #[serde(default)]
    pub next_records_url: Option<String>,
}

/// Error element of a Salesforce REST error response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiError {
    message: String,
    #[serde(default)]
    error_code: Option<String>,
}

/// An authenticated connection to a Salesforce org.
///
/// A `Session` is only handed out by [`crate::client::Client::establish`]
/// after the probe query succeeded.
#[derive(Clone)]
pub struct Session {
    flow: AuthFlow,
    instance_url: String,
    access_token: AccessToken,
    api_version: String,
    user_id: Option<String>,
    organization_id: Option<String>,
    http_client: reqwest::Client,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("flow", &self.flow)
            .field("instance_url", &self.instance_url)
            .field("access_token", &self.access_token)
            .field("api_version", &self.api_version)
            .field("user_id", &self.user_id)
            .field("organization_id", &self.organization_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(grant: Grant, http_client: reqwest::Client) -> Self {
        Self {
            flow: grant.flow,
            instance_url: grant.instance_url,
            access_token: grant.access_token,
            api_version: grant.api_version,
            user_id: grant.user_id,
            organization_id: grant.organization_id,
            http_client,
        }
    }

    /// Flow that authenticated this session.
    pub fn flow(&self) -> AuthFlow {
        self.flow
    }

    /// Base URL of the org instance, e.g. `https://acme.my.salesforce.com`.
    pub fn instance_url(&self) -> &str {
        &self.instance_url
    }

    /// Bearer token for API calls.
    pub fn access_token(&self) -> &AccessToken {
        &self.access_token
    }

    /// API version this session was established with.
    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    /// Id of the authenticated user, when the server reported one.
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Id of the org, when the server reported one.
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref()
    }

    /// REST base URL for this session's API version.
    pub fn base_url(&self) -> String {
        format!("{}/services/data/v{}", self.instance_url, self.api_version)
    }

    /// Runs a SOQL query and returns the first result page.
    ///
    /// # Errors
    ///
    /// - [`Error::Request`] on transport failure
    /// - [`Error::Query`] if the server rejects the query or the token
    /// - [`Error::ParseQueryResponse`] if the body is not a query result
    ///
    /// # Example
    ///
    /// ```no_run
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let session = salesforce_connect::establish(None).await?;
    ///
    /// let accounts = session
    ///     .query::<serde_json::Value>("SELECT Id, Name FROM Account LIMIT 10")
    ///     .await?;
    /// println!("{} accounts", accounts.total_size);
    /// # Ok(())
    /// # }
    /// ```
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn query<T: DeserializeOwned>(&self, soql: &str) -> Result<QueryResult<T>, Error> {
        let response = self
            .http_client
            .get(format!("{}/query", self.base_url()))
            .bearer_auth(self.access_token.secret())
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("q", soql)])
            .send()
            .await
            .map_err(|source| Error::Request { source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| Error::Request { source })?;

        if !status.is_success() {
            let (code, message) = match serde_json::from_str::<Vec<ApiError>>(&body) {
                Ok(errors) if !errors.is_empty() => {
                    let first = &errors[0];
                    (first.error_code.clone(), first.message.clone())
                }
                _ => (None, body_or_reason(status, &body)),
            };
            return Err(Error::Query {
                status: status.as_u16(),
                code,
                message,
            });
        }

        serde_json::from_str(&body).map_err(|source| Error::ParseQueryResponse { source })
    }

    /// Confirms the session works with [`PROBE_QUERY`].
    pub(crate) async fn probe(&self) -> Result<(), Error> {
        tracing::debug!(instance_url = %self.instance_url, "probing session");
        self.query::<serde_json::Value>(PROBE_QUERY).await?;
        Ok(())
    }
}
