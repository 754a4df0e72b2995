//! DTOs for interacting with OAuth2 token endpoints

use oadr3_clock::DurationSecs;
use serde::{Deserialize, Serialize};

use crate::{AudienceRef, ClientCredentialsConfig, ClientIdRef, ClientSecretRef};

/// The grant type sent for every request
pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

/// The body of a client credentials token request
#[derive(Debug, Serialize)]
pub struct ClientCredentialsRequest<'a> {
    grant_type: &'static str,
    client_id: &'a ClientIdRef,
    client_secret: &'a ClientSecretRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audience: Option<&'a AudienceRef>,
}

impl<'a> From<&'a ClientCredentialsConfig> for ClientCredentialsRequest<'a> {
    fn from(config: &'a ClientCredentialsConfig) -> Self {
        Self {
            grant_type: CLIENT_CREDENTIALS_GRANT,
            client_id: config.client_id(),
            client_secret: config.client_secret(),
            scope: config.joined_scopes(),
            audience: config.audience(),
        }
    }
}

/// A successful token response
///
/// Every field is optional on the wire so that a response missing the access
/// token can be reported as such rather than as a generic decoding failure.
#[derive(Debug, Deserialize)]
pub(super) struct TokenResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<serde_json::Value>,
}

impl TokenResponse {
    /// The reported lifetime, falling back to `default` when absent or not a
    /// non-negative number
    pub fn lifetime_or(&self, default: DurationSecs) -> DurationSecs {
        use serde_json::Value;

        match &self.expires_in {
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.).map(|f| f as u64))
                .map(DurationSecs)
                .unwrap_or(default),
            Some(Value::String(s)) => s.trim().parse().map(DurationSecs).unwrap_or(default),
            _ => default,
        }
    }
}

/// An RFC 6749 §5.2 error response
#[derive(Debug, Deserialize)]
pub(super) struct ErrorResponse {
    pub error: String,
    #[serde(default)]
    pub error_description: Option<String>,
    #[serde(default)]
    pub error_uri: Option<String>,
}
