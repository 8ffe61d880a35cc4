//! Configuration sources and credential resolution.
//!
//! Every option the establisher reads goes through a [`ConfigSource`], so the
//! process environment can be swapped for an in-memory map in tests or when
//! credentials come from somewhere other than env vars.

use crate::client::{AuthFlow, Error};
use oauth2::{ClientId, ClientSecret, ResourceOwnerPassword, ResourceOwnerUsername};
use std::collections::HashMap;
use std::fmt::Debug;

/// Selects the authentication flow (`User_Password` or `OAuth_2.0_Client_Credentials`).
pub const CONNECTION_TYPE_VAR: &str = "SALESFORCE_CONNECTION_TYPE";

/// Login URL override, e.g. `https://test.salesforce.com` for sandboxes.
pub const INSTANCE_URL_VAR: &str = "SALESFORCE_INSTANCE_URL";

/// Connected App consumer key.
pub const CLIENT_ID_VAR: &str = "SALESFORCE_CLIENT_ID";

/// Connected App consumer secret.
pub const CLIENT_SECRET_VAR: &str = "SALESFORCE_CLIENT_SECRET";

/// Username for password login.
pub const USERNAME_VAR: &str = "SALESFORCE_USERNAME";

/// Password for password login.
pub const PASSWORD_VAR: &str = "SALESFORCE_PASSWORD";

/// Security token appended to the password.
pub const TOKEN_VAR: &str = "SALESFORCE_TOKEN";

/// Default login endpoint for production orgs.
pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";

/// A named string option lookup.
///
/// Implementations return `None` for unset options. Empty values are treated
/// as unset by the resolution helpers in this module.
pub trait ConfigSource: Debug + Send + Sync {
    /// Returns the value of the named option, if set.
    fn var(&self, name: &str) -> Option<String>;
}

/// Reads options from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<String> {
        self.get(name).cloned()
    }
}

/// Looks up an option and drops empty or whitespace-only values.
pub(crate) fn lookup(source: &dyn ConfigSource, name: &str) -> Option<String> {
    source.var(name).filter(|value| !value.trim().is_empty())
}

/// Credentials for the OAuth2 client-credentials grant.
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    /// Connected App consumer key.
    pub client_id: ClientId,
    /// Connected App consumer secret.
    pub client_secret: ClientSecret,
}

impl ClientCredentials {
    /// Reads `SALESFORCE_CLIENT_ID` and `SALESFORCE_CLIENT_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] if either option is missing.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, Error> {
        let client_id = require(source, CLIENT_ID_VAR, AuthFlow::ClientCredentials)?;
        let client_secret = require(source, CLIENT_SECRET_VAR, AuthFlow::ClientCredentials)?;

        Ok(Self {
            client_id: ClientId::new(client_id),
            client_secret: ClientSecret::new(client_secret),
        })
    }
}

/// Credentials for the username/password login.
#[derive(Debug, Clone)]
pub struct PasswordCredentials {
    /// Login username (usually an email address).
    pub username: ResourceOwnerUsername,
    /// Password with the security token already appended.
    pub password: ResourceOwnerPassword,
}

impl PasswordCredentials {
    /// Reads `SALESFORCE_USERNAME`, `SALESFORCE_PASSWORD` and the optional
    /// `SALESFORCE_TOKEN`, which is appended to the password.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCredentials`] if the username or password is missing.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, Error> {
        let username = require(source, USERNAME_VAR, AuthFlow::UsernamePassword)?;
        let password = require(source, PASSWORD_VAR, AuthFlow::UsernamePassword)?;
        let token = lookup(source, TOKEN_VAR).unwrap_or_default();

        Ok(Self {
            username: ResourceOwnerUsername::new(username),
            password: ResourceOwnerPassword::new(format!("{password}{token}")),
        })
    }
}

fn require(source: &dyn ConfigSource, name: &str, flow: AuthFlow) -> Result<String, Error> {
    lookup(source, name).ok_or_else(|| Error::InvalidCredentials {
        flow,
        message: format!("{name} is required"),
    })
}
