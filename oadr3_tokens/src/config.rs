//! Static client credentials configuration

use serde::Deserialize;
use url::Url;

use crate::{Audience, AudienceRef, ClientId, ClientIdRef, ClientSecret, ClientSecretRef, Scope};

/// The static configuration of an OAuth2 client credentials client
///
/// Created once by the host application and handed to the token source that
/// performs the exchange. Nothing in this crate mutates it afterwards.
///
/// The configuration can be deserialized from any `serde` format:
///
/// ```
/// # use oadr3_tokens::ClientCredentialsConfig;
/// let config: ClientCredentialsConfig = serde_json::from_str(r#"{
///     "client_id": "ven-1",
///     "client_secret": "shhh",
///     "token_url": "https://auth.example.com/oauth/token",
///     "scopes": ["read_all", "write_reports"]
/// }"#).unwrap();
///
/// assert_eq!(config.joined_scopes().as_deref(), Some("read_all write_reports"));
/// assert!(config.audience().is_none());
/// ```
#[derive(Clone, Debug, Deserialize)]
pub struct ClientCredentialsConfig {
    client_id: ClientId,
    client_secret: ClientSecret,
    token_url: Url,
    #[serde(default)]
    scopes: Option<Vec<Scope>>,
    #[serde(default)]
    audience: Option<Audience>,
}

impl ClientCredentialsConfig {
    /// Constructs a configuration without scopes or audience
    pub fn new(client_id: ClientId, client_secret: ClientSecret, token_url: Url) -> Self {
        Self {
            client_id,
            client_secret,
            token_url,
            scopes: None,
            audience: None,
        }
    }

    /// Requests the given scopes with every token
    pub fn with_scopes<I>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = Scope>,
    {
        self.scopes = Some(scopes.into_iter().collect());
        self
    }

    /// Requests tokens for the given audience
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = Some(audience);
        self
    }

    /// The client ID
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The client secret
    #[inline]
    pub fn client_secret(&self) -> &ClientSecretRef {
        &self.client_secret
    }

    /// The token endpoint
    #[inline]
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// The configured scopes, if any
    #[inline]
    pub fn scopes(&self) -> Option<&[Scope]> {
        self.scopes.as_deref()
    }

    /// The configured audience, if any
    #[inline]
    pub fn audience(&self) -> Option<&AudienceRef> {
        self.audience.as_deref()
    }

    /// The scopes joined into the space-delimited form sent to the authority
    ///
    /// An empty scope list is treated the same as no scopes at all.
    pub fn joined_scopes(&self) -> Option<String> {
        let scopes = self.scopes.as_deref().filter(|s| !s.is_empty())?;
        Some(
            scopes
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        )
    }
}
