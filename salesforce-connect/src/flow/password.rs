//! Username/password login through the partner SOAP API.
//!
//! Salesforce accepts `password + security token` as the combined secret on
//! `POST /services/Soap/u/{version}` and answers with the server URL of the
//! org instance and a session id that doubles as a REST bearer token.

use super::{body_or_reason, Grant};
use crate::client::{AuthFlow, Error};
use crate::config::PasswordCredentials;
use oauth2::AccessToken;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Partner SOAP endpoint path prefix, followed by the API version.
pub const SOAP_LOGIN_PATH: &str = "/services/Soap/u";

/// Fields picked out of a SOAP login response or fault.
#[derive(Debug, Default, PartialEq, Eq)]
struct LoginResponse {
    server_url: Option<String>,
    session_id: Option<String>,
    user_id: Option<String>,
    organization_id: Option<String>,
    fault_code: Option<String>,
    fault_string: Option<String>,
}

/// Logs in with username and password at the given API version.
///
/// # Errors
///
/// - [`Error::ParseUrl`] if the login URL is malformed
/// - [`Error::Request`] on transport failure
/// - [`Error::Login`] if the server rejects the login
/// - [`Error::ParseLoginResponse`] if a 200 response lacks the session fields
///   or carries a malformed server URL
#[cfg_attr(feature = "trace", tracing::instrument(skip_all))]
pub(crate) async fn login(
    http_client: &reqwest::Client,
    login_url: &str,
    credentials: &PasswordCredentials,
    api_version: &str,
) -> Result<Grant, Error> {
    let endpoint = url::Url::parse(&format!("{login_url}{SOAP_LOGIN_PATH}/{api_version}"))
        .map_err(|source| Error::ParseUrl { source })?;

    tracing::debug!(
        endpoint = endpoint.as_str(),
        username = credentials.username.as_str(),
        "requesting SOAP login"
    );

    let response = http_client
        .post(endpoint)
        .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=UTF-8")
        .header("SOAPAction", "login")
        .body(envelope(credentials))
        .send()
        .await
        .map_err(|source| Error::Request { source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| Error::Request { source })?;

    if !status.is_success() {
        // Non-XML failure bodies (proxies, version mismatches) carry the message as plain text.
        let parsed = parse_response(&body).unwrap_or_default();
        return Err(Error::Login {
            status: status.as_u16(),
            code: parsed.fault_code,
            message: parsed
                .fault_string
                .unwrap_or_else(|| body_or_reason(status, &body)),
        });
    }

    let parsed = parse_response(&body)?;
    if let Some(message) = parsed.fault_string {
        return Err(Error::Login {
            status: status.as_u16(),
            code: parsed.fault_code,
            message,
        });
    }

    let server_url = parsed
        .server_url
        .ok_or_else(|| Error::ParseLoginResponse("missing serverUrl".to_string()))?;
    let session_id = parsed
        .session_id
        .ok_or_else(|| Error::ParseLoginResponse("missing sessionId".to_string()))?;
    let instance_url = url::Url::parse(&server_url)
        .map_err(|source| Error::ParseLoginResponse(format!("invalid serverUrl: {source}")))?
        .origin()
        .ascii_serialization();

    Ok(Grant {
        flow: AuthFlow::UsernamePassword,
        instance_url,
        access_token: AccessToken::new(session_id),
        api_version: api_version.to_string(),
        user_id: parsed.user_id,
        organization_id: parsed.organization_id,
    })
}

fn envelope(credentials: &PasswordCredentials) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<env:Envelope xmlns:env="http://schemas.xmlsoap.org/soap/envelope/">"#,
            r#"<env:Body><n1:login xmlns:n1="urn:partner.soap.sforce.com">"#,
            "<n1:username>{}</n1:username><n1:password>{}</n1:password>",
            "</n1:login></env:Body></env:Envelope>"
        ),
        escape(credentials.username.as_str()),
        escape(credentials.password.secret().as_str()),
    )
}

/// Collects the first occurrence of each field of interest, matching on
/// local names so namespace prefixes do not matter.
fn parse_response(xml: &str) -> Result<LoginResponse, Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut parsed = LoginResponse::default();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => {
                current = Some(String::from_utf8_lossy(start.local_name().as_ref()).into_owned());
            }
            Ok(Event::Text(text)) => {
                let Some(name) = current.as_deref() else {
                    continue;
                };
                let slot = match name {
                    "serverUrl" => &mut parsed.server_url,
                    "sessionId" => &mut parsed.session_id,
                    "userId" => &mut parsed.user_id,
                    "organizationId" => &mut parsed.organization_id,
                    "faultcode" => &mut parsed.fault_code,
                    "faultstring" => &mut parsed.fault_string,
                    _ => continue,
                };
                if slot.is_none() {
                    let value = text
                        .unescape()
                        .map_err(|e| Error::ParseLoginResponse(e.to_string()))?;
                    *slot = Some(value.into_owned());
                }
            }
            Ok(Event::End(_)) => current = None,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(Error::ParseLoginResponse(e.to_string())),
        }
    }

    Ok(parsed)
}
