//! The MQTT notifier binding advertised by a VTN

use std::fmt;

use oadr3_tokens::ClientIdRef;
use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// The username placeholder that stands for the OAuth2 client ID
pub const CLIENT_ID_USERNAME: &str = "{clientID}";

const DEFAULT_PORT: u16 = 1883;
const DEFAULT_TLS_PORT: u16 = 8883;

/// How notifications are encoded on the wire
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotifierSerialization {
    /// JSON payloads
    #[default]
    Json,
}

/// How a client authenticates to the MQTT broker
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MqttAuthentication {
    /// No credentials
    Anonymous,
    /// An OAuth2 access token sent as the CONNECT password
    #[serde(rename = "OAUTH2_BEARER_TOKEN")]
    OAuth2BearerToken {
        /// Either [`CLIENT_ID_USERNAME`] or a literal username
        username: String,
    },
    /// Mutual TLS
    ///
    /// The broker certificate is always verified against `ca_cert`.
    Certificate {
        /// PEM encoded certificate authority
        ca_cert: String,
        /// PEM encoded client certificate
        client_cert: String,
        /// PEM encoded client private key
        client_key: String,
    },
}

impl fmt::Debug for MqttAuthentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => f.write_str("Anonymous"),
            Self::OAuth2BearerToken { username } => f
                .debug_struct("OAuth2BearerToken")
                .field("username", username)
                .finish(),
            Self::Certificate { .. } => f
                .debug_struct("Certificate")
                .field("ca_cert", &"…")
                .field("client_cert", &"…")
                .field("client_key", &"***")
                .finish(),
        }
    }
}

impl MqttAuthentication {
    /// The username to present alongside an access token
    ///
    /// Returns `None` unless this is bearer token authentication.
    pub fn bearer_username(&self, client_id: &ClientIdRef) -> Option<String> {
        match self {
            Self::OAuth2BearerToken { username } if username == CLIENT_ID_USERNAME => {
                Some(client_id.as_str().to_owned())
            }
            Self::OAuth2BearerToken { username } => Some(username.clone()),
            _ => None,
        }
    }
}

/// Connection details for a VTN's MQTT notifier
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MqttNotifierBinding {
    /// Broker URIs, in order of preference
    #[serde(rename = "URIS")]
    pub uris: Vec<Url>,
    /// Payload encoding
    #[serde(default)]
    pub serialization: NotifierSerialization,
    /// How to authenticate to the broker
    pub authentication: MqttAuthentication,
}

/// An error turning a binding into connection options
#[derive(Debug, Error)]
pub enum BindingError {
    /// The binding lists no broker
    #[error("notifier binding contains no broker URI")]
    NoUris,
    /// The broker URI uses a scheme other than `mqtt` or `mqtts`
    #[error("unsupported broker URI scheme `{0}`")]
    UnsupportedScheme(String),
    /// The broker URI has no host
    #[error("broker URI has no host: {0}")]
    MissingHost(Url),
}

impl MqttNotifierBinding {
    /// Builds connection options for the first broker URI
    ///
    /// `mqtt_client_id` is the MQTT session identifier, not the OAuth2 client
    /// ID. Credentials for bearer token authentication are not set here.
    pub fn mqtt_options(&self, mqtt_client_id: &str) -> Result<MqttOptions, BindingError> {
        let uri = self.uris.first().ok_or(BindingError::NoUris)?;

        let tls = match uri.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            other => return Err(BindingError::UnsupportedScheme(other.to_owned())),
        };
        let host = uri
            .host_str()
            .ok_or_else(|| BindingError::MissingHost(uri.clone()))?;
        let port = uri
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        let mut options = MqttOptions::new(mqtt_client_id, host, port);

        match &self.authentication {
            MqttAuthentication::Certificate {
                ca_cert,
                client_cert,
                client_key,
            } => {
                options.set_transport(Transport::tls_with_config(TlsConfiguration::Simple {
                    ca: ca_cert.clone().into_bytes(),
                    alpn: None,
                    client_auth: Some((
                        client_cert.clone().into_bytes(),
                        client_key.clone().into_bytes(),
                    )),
                }));
            }
            _ if tls => {
                options.set_transport(Transport::tls_with_default_config());
            }
            _ => {}
        }

        tracing::debug!(
            host,
            port,
            tls = tls || matches!(self.authentication, MqttAuthentication::Certificate { .. }),
            "prepared broker connection options"
        );
        Ok(options)
    }
}
