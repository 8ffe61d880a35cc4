use crate::config::{
    self, ClientCredentials, ConfigSource, PasswordCredentials, ProcessEnv, CONNECTION_TYPE_VAR,
    DEFAULT_LOGIN_URL, INSTANCE_URL_VAR,
};
use crate::flow::{self, oauth, password, Grant};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Required configuration is missing or invalid. Never retried.
    Config,
    /// The server rejected the handshake or the probe, or could not be reached.
    Auth,
}

/// Errors that can occur while establishing a session.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Failed to read the connection config file from disk.
    #[error("Failed to read connection config at {path}: {source}")]
    ReadConfig {
        /// Path to the config file that failed to read.
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Failed to parse the connection config JSON.
    #[error("Failed to parse connection config JSON: {source}")]
    ParseConfig {
        #[source]
        source: serde_json::Error,
    },
    /// Invalid URL format in configuration or in a server response.
    #[error("Invalid URL format: {source}")]
    ParseUrl {
        #[source]
        source: url::ParseError,
    },
    /// Unrecognized value for the connection type option.
    #[error("Unknown connection type: {0}")]
    InvalidConnectionType(String),
    /// Empty or otherwise unusable API version.
    #[error("Invalid API version: {0:?}")]
    InvalidApiVersion(String),
    /// Required credentials for the selected flow are missing.
    #[error("Invalid credentials for {flow}: {message}")]
    InvalidCredentials {
        /// The authentication flow that failed validation.
        flow: AuthFlow,
        /// Description of what's missing.
        message: String,
    },
    /// Failed to construct the HTTP client.
    #[error("Failed to build HTTP client: {source}")]
    HttpClient {
        #[source]
        source: reqwest::Error,
    },
    /// Transport-level failure talking to Salesforce.
    #[error("HTTP request failed: {source}")]
    Request {
        #[source]
        source: reqwest::Error,
    },
    /// The token endpoint answered with a non-200 status.
    #[error("OAuth2 token request failed with HTTP {status}: {error}{}", describe(.description))]
    TokenExchange {
        /// HTTP status code.
        status: u16,
        /// OAuth2 `error` code, or the raw body when the server sent something else.
        error: String,
        /// OAuth2 `error_description`, if any.
        description: Option<String>,
    },
    /// The token endpoint answered 200 with a body that is not a token response.
    #[error("Failed to parse token response: {source}")]
    ParseTokenResponse {
        #[source]
        source: serde_json::Error,
    },
    /// The SOAP login was rejected.
    #[error("Login failed with HTTP {status}: {message}")]
    Login {
        /// HTTP status code.
        status: u16,
        /// SOAP fault code such as `sf:INVALID_LOGIN`.
        code: Option<String>,
        /// Fault string or raw response body.
        message: String,
    },
    /// The SOAP login response could not be understood.
    #[error("Failed to parse login response: {0}")]
    ParseLoginResponse(String),
    /// A REST query, including the probe, was rejected.
    #[error("Query failed with HTTP {status}: {message}")]
    Query {
        /// HTTP status code.
        status: u16,
        /// Salesforce `errorCode`, e.g. `INVALID_SESSION_ID`.
        code: Option<String>,
        /// Error message or raw response body.
        message: String,
    },
    /// A REST query response could not be parsed.
    #[error("Failed to parse query response: {source}")]
    ParseQueryResponse {
        #[source]
        source: serde_json::Error,
    },
}

fn describe(description: &Option<String>) -> String {
    description
        .as_deref()
        .map(|d| format!(" ({d})"))
        .unwrap_or_default()
}

impl Error {
    /// Returns whether this is a configuration or an authentication failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ReadConfig { .. }
            | Error::ParseConfig { .. }
            | Error::ParseUrl { .. }
            | Error::InvalidConnectionType(_)
            | Error::InvalidApiVersion(_)
            | Error::InvalidCredentials { .. } => ErrorKind::Config,
            Error::HttpClient { .. }
            | Error::Request { .. }
            | Error::TokenExchange { .. }
            | Error::ParseTokenResponse { .. }
            | Error::Login { .. }
            | Error::ParseLoginResponse(_)
            | Error::Query { .. }
            | Error::ParseQueryResponse { .. } => ErrorKind::Auth,
        }
    }

    /// Returns true if the error looks like the endpoint rejecting the
    /// requested API version (`405` together with `Only POST allowed`).
    ///
    /// Salesforce exposes no structured code for this case, so the check
    /// matches on the rendered message.
    pub fn is_api_version_mismatch(&self) -> bool {
        let message = self.to_string();
        message.contains("405") && message.contains("Only POST allowed")
    }
}

/// Authentication flow used to obtain a session.
///
/// ## Username-Password
///
/// Logs in as a specific user with a password and, unless the caller's IP is
/// trusted by the org, the user's security token appended to it.
///
/// **Required options:** `SALESFORCE_USERNAME`, `SALESFORCE_PASSWORD`
/// (`SALESFORCE_TOKEN` optional). This is the default flow.
///
/// ## Client Credentials
///
/// Server-to-server OAuth2 grant for a Connected App with a run-as user.
///
/// **Required options:** `SALESFORCE_CLIENT_ID`, `SALESFORCE_CLIENT_SECRET`
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    /// Username and password (plus security token) login.
    #[default]
    #[serde(alias = "User_Password")]
    UsernamePassword,
    /// OAuth2 Client Credentials flow for server-to-server authentication.
    #[serde(alias = "OAuth_2.0_Client_Credentials")]
    ClientCredentials,
}

impl fmt::Display for AuthFlow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFlow::UsernamePassword => f.write_str("User_Password"),
            AuthFlow::ClientCredentials => f.write_str("OAuth_2.0_Client_Credentials"),
        }
    }
}

impl FromStr for AuthFlow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user_password" | "username_password" => Ok(AuthFlow::UsernamePassword),
            "oauth_2.0_client_credentials" | "client_credentials" => {
                Ok(AuthFlow::ClientCredentials)
            }
            _ => Err(Error::InvalidConnectionType(s.to_string())),
        }
    }
}

/// Caller-supplied overrides. Unset fields fall back to the config source,
/// then to defaults.
///
/// ```
/// use salesforce_connect::client::{AuthFlow, ConnectionConfig};
///
/// let config: ConnectionConfig = serde_json::from_str(
///     r#"{"type": "client_credentials", "loginUrl": "https://test.salesforce.com"}"#,
/// )
/// .unwrap();
/// assert_eq!(config.auth_flow, Some(AuthFlow::ClientCredentials));
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Authentication flow to use.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub auth_flow: Option<AuthFlow>,
    /// Login endpoint, e.g. `https://test.salesforce.com` for sandboxes.
    #[serde(alias = "loginUrl", default, skip_serializing_if = "Option::is_none")]
    pub login_url: Option<String>,
}

/// Source for loading the connection config.
#[derive(Debug, Clone)]
pub enum ConfigFrom {
    /// Load the config from a JSON file.
    Path(PathBuf),
    /// Use a config provided directly.
    Value(ConnectionConfig),
}

/// Establishes verified Salesforce sessions.
///
/// Use [`Builder`] to construct one. Each call to [`establish`](Self::establish)
/// is independent; the client keeps no state between calls.
///
/// # Examples
///
/// ## From the process environment
///
/// ```no_run
/// use salesforce_connect::client;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let session = client::Builder::new().build()?.establish().await?;
/// println!("connected to {}", session.instance_url());
/// # Ok(())
/// # }
/// ```
///
/// ## With an injected config source
///
/// ```no_run
/// use salesforce_connect::client::{self, AuthFlow, ConnectionConfig};
/// use std::collections::HashMap;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let source = HashMap::from([
///     ("SALESFORCE_CLIENT_ID".to_string(), "your_client_id".to_string()),
///     ("SALESFORCE_CLIENT_SECRET".to_string(), "your_client_secret".to_string()),
/// ]);
///
/// let session = client::Builder::new()
///     .config(ConnectionConfig {
///         auth_flow: Some(AuthFlow::ClientCredentials),
///         login_url: Some("https://your-domain.my.salesforce.com".to_string()),
///     })
///     .source(source)
///     .build()?
///     .establish()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    /// Source of the connection config (file path or direct value).
    config_from: ConfigFrom,
    /// Lookup for credentials and option fallbacks.
    source: Arc<dyn ConfigSource>,
    /// API version for the primary attempt.
    api_version: String,
    /// API version for the 405 fallback attempt.
    fallback_api_version: String,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl Client {
    /// Establishes a session and verifies it with a probe query.
    ///
    /// If any step fails with an API version mismatch (HTTP 405,
    /// `Only POST allowed`), retries once with username/password login at the
    /// fallback API version, re-reading credentials from the config source.
    /// The retry's error is returned if it fails too.
    ///
    /// # Errors
    ///
    /// Returns an error of kind [`ErrorKind::Config`] if configuration is
    /// missing or invalid, and of kind [`ErrorKind::Auth`] if the handshake
    /// or the probe fails.
    #[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
    pub async fn establish(&self) -> Result<Session, Error> {
        let result = match self.resolve() {
            Ok((flow, login_url)) => match self.connect(flow, &login_url).await {
                Err(error) if error.is_api_version_mismatch() => {
                    tracing::warn!(
                        %error,
                        fallback_api_version = %self.fallback_api_version,
                        "API version mismatch, retrying with username/password login"
                    );
                    self.connect_fallback(&login_url).await
                }
                result => result,
            },
            Err(error) => Err(error),
        };

        result
            .inspect(|session| {
                tracing::info!(
                    flow = %session.flow(),
                    instance_url = session.instance_url(),
                    api_version = session.api_version(),
                    "Salesforce session established"
                );
            })
            .inspect_err(|error| {
                tracing::error!(%error, kind = ?error.kind(), "failed to establish Salesforce session");
            })
    }

    /// Loads the connection config and selects flow and login URL.
    fn resolve(&self) -> Result<(AuthFlow, String), Error> {
        let config = self.load_config()?;
        let flow = self.resolve_flow(&config)?;
        let login_url = self.resolve_login_url(&config)?;
        Ok((flow, login_url))
    }

    fn load_config(&self) -> Result<ConnectionConfig, Error> {
        match &self.config_from {
            ConfigFrom::Value(config) => Ok(config.clone()),
            ConfigFrom::Path(path) => {
                let config_string = fs::read_to_string(path).map_err(|e| Error::ReadConfig {
                    path: path.clone(),
                    source: e,
                })?;
                serde_json::from_str(&config_string).map_err(|e| Error::ParseConfig { source: e })
            }
        }
    }

    fn resolve_flow(&self, config: &ConnectionConfig) -> Result<AuthFlow, Error> {
        if let Some(flow) = config.auth_flow {
            return Ok(flow);
        }
        match config::lookup(&*self.source, CONNECTION_TYPE_VAR) {
            Some(value) => value.parse(),
            None => Ok(AuthFlow::default()),
        }
    }

    fn resolve_login_url(&self, config: &ConnectionConfig) -> Result<String, Error> {
        let login_url = config
            .login_url
            .clone()
            .filter(|url| !url.trim().is_empty())
            .or_else(|| config::lookup(&*self.source, INSTANCE_URL_VAR))
            .unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string());
        let login_url = login_url.trim().trim_end_matches('/').to_string();

        url::Url::parse(&login_url).map_err(|source| Error::ParseUrl { source })?;
        Ok(login_url)
    }

    /// Primary attempt with the selected flow at the configured API version.
    async fn connect(&self, flow: AuthFlow, login_url: &str) -> Result<Session, Error> {
        tracing::debug!(
            %flow,
            login_url,
            api_version = %self.api_version,
            "connecting to Salesforce"
        );

        // Credentials are resolved before any request goes out.
        let (grant, http_client) = match flow {
            AuthFlow::ClientCredentials => {
                let credentials = ClientCredentials::from_source(&*self.source)?;
                let http_client = self.http_client()?;
                let grant = oauth::exchange_client_credentials(
                    &http_client,
                    login_url,
                    &credentials,
                    &self.api_version,
                )
                .await?;
                (grant, http_client)
            }
            AuthFlow::UsernamePassword => {
                let credentials = PasswordCredentials::from_source(&*self.source)?;
                let http_client = self.http_client()?;
                let grant =
                    password::login(&http_client, login_url, &credentials, &self.api_version)
                        .await?;
                (grant, http_client)
            }
        };

        self.verify(grant, http_client).await
    }

    /// Username/password retry at the fallback API version.
    async fn connect_fallback(&self, login_url: &str) -> Result<Session, Error> {
        let credentials = PasswordCredentials::from_source(&*self.source)?;
        let http_client = self.http_client()?;
        let grant = password::login(
            &http_client,
            login_url,
            &credentials,
            &self.fallback_api_version,
        )
        .await?;

        self.verify(grant, http_client).await
    }

    /// Wraps the grant in a session and probes it; only probed sessions escape.
    async fn verify(&self, grant: Grant, http_client: reqwest::Client) -> Result<Session, Error> {
        let session = Session::new(grant, http_client);
        session.probe().await?;
        Ok(session)
    }

    fn http_client(&self) -> Result<reqwest::Client, Error> {
        flow::http_client(self.connect_timeout, self.request_timeout)
    }
}

/// Builder for constructing a [`Client`].
///
/// Everything is optional: by default the client reads the process
/// environment, uses API version [`crate::DEFAULT_API_VERSION`] and falls back
/// to [`crate::FALLBACK_API_VERSION`].
#[derive(Default)]
pub struct Builder {
    config_from: Option<ConfigFrom>,
    source: Option<Arc<dyn ConfigSource>>,
    api_version: Option<String>,
    fallback_api_version: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the connection config directly.
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config_from = Some(ConfigFrom::Value(config));
        self
    }

    /// Sets the connection config to load from a JSON file when establishing.
    ///
    /// ```json
    /// {
    ///   "type": "client_credentials",
    ///   "login_url": "https://test.salesforce.com"
    /// }
    /// ```
    pub fn config_path(mut self, path: PathBuf) -> Self {
        self.config_from = Some(ConfigFrom::Path(path));
        self
    }

    /// Sets where credentials and option fallbacks are read from.
    ///
    /// Defaults to [`ProcessEnv`].
    pub fn source<S: ConfigSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Sets the API version for the primary attempt.
    pub fn api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = Some(api_version.into());
        self
    }

    /// Sets the API version used when the primary attempt hits a version mismatch.
    pub fn fallback_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.fallback_api_version = Some(api_version.into());
        self
    }

    /// Sets the TCP connect timeout for login and probe requests.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the total timeout of each login and probe request.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidApiVersion`] if an API version is blank.
    pub fn build(self) -> Result<Client, Error> {
        let api_version = validate_api_version(
            self.api_version
                .unwrap_or_else(|| crate::DEFAULT_API_VERSION.to_string()),
        )?;
        let fallback_api_version = validate_api_version(
            self.fallback_api_version
                .unwrap_or_else(|| crate::FALLBACK_API_VERSION.to_string()),
        )?;

        Ok(Client {
            config_from: self
                .config_from
                .unwrap_or_else(|| ConfigFrom::Value(ConnectionConfig::default())),
            source: self.source.unwrap_or_else(|| Arc::new(ProcessEnv)),
            api_version,
            fallback_api_version,
            connect_timeout: self.connect_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_AUTH_CONNECT_TIMEOUT_SECS,
            )),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(
                crate::DEFAULT_AUTH_REQUEST_TIMEOUT_SECS,
            )),
        })
    }
}

fn validate_api_version(api_version: String) -> Result<String, Error> {
    let trimmed = api_version.trim().trim_start_matches('v');
    if trimmed.is_empty() {
        return Err(Error::InvalidApiVersion(api_version));
    }
    Ok(trimmed.to_string())
}
