//! A token source that uses an OAuth2 server as an authority

use std::{fmt, marker::PhantomData};

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use super::AsyncTokenSource;
use crate::{AccessToken, ClientCredentialsConfig, IssuedToken, DEFAULT_TOKEN_LIFETIME};

pub mod dto;

/// A token source performing the client credentials flow
#[derive(Debug)]
pub struct ClientCredentialsTokenSource<T = FormBody> {
    client: reqwest::Client,
    config: ClientCredentialsConfig,
    content_type: PhantomData<fn() -> T>,
}

impl ClientCredentialsTokenSource<FormBody> {
    /// Constructs a new client credentials source
    ///
    /// Credentials are sent as URL-encoded form data, as required by RFC 6749.
    /// Any timeout configured on `client` applies to the token exchange.
    pub fn new(client: reqwest::Client, config: ClientCredentialsConfig) -> Self {
        Self {
            client,
            config,
            content_type: PhantomData,
        }
    }

    /// Configures the token source to send credentials to
    /// the authority as a JSON body
    pub fn using_json_body(self) -> ClientCredentialsTokenSource<JsonBody> {
        ClientCredentialsTokenSource {
            client: self.client,
            config: self.config,
            content_type: PhantomData,
        }
    }
}

impl<T> ClientCredentialsTokenSource<T> {
    /// The configuration used for each exchange
    pub fn config(&self) -> &ClientCredentialsConfig {
        &self.config
    }
}

#[async_trait]
impl<T: RequestType> AsyncTokenSource for ClientCredentialsTokenSource<T> {
    type Error = TokenRequestError;

    async fn request_token(&mut self) -> Result<IssuedToken, Self::Error> {
        request_token::<T>(&self.client, &self.config).await
    }
}

/// The broad category of a failed token request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The authority could not be reached, or failed in a way that may be
    /// transient
    Connectivity,
    /// The authority refused the credentials, scopes, or audience
    Authentication,
    /// The authority answered with a body that does not honor the token
    /// endpoint contract
    Contract,
}

/// An error while attempting to request a new token from the authority
#[derive(Debug, Error)]
pub enum TokenRequestError {
    /// Unable to send a token request to the authority or read its response
    #[error("error communicating with authority")]
    Connectivity(#[source] reqwest::Error),
    /// The authority rejected the request with an OAuth2 error body
    #[error(
        "authority rejected token request with `{code}`: {}",
        .description.as_deref().unwrap_or("no description given")
    )]
    Rejected {
        /// The HTTP status returned
        status: StatusCode,
        /// The OAuth2 error code, such as `invalid_client`
        code: String,
        /// The human readable description, if provided
        description: Option<String>,
        /// A link to more information, if provided
        uri: Option<String>,
    },
    /// The authority returned an error status without an OAuth2 error body
    #[error("error requesting token from authority ({status}): {body}")]
    ErrorWithBody {
        /// The HTTP status returned
        status: StatusCode,
        /// The body of the error
        body: String,
    },
    /// Unable to deserialize the token body
    #[error("error deserializing token body from authority")]
    TokenBody(#[from] serde_json::Error),
    /// The token body did not contain an access token
    #[error("access token not present in response")]
    MissingAccessToken,
}

impl TokenRequestError {
    /// Classifies the error
    ///
    /// Only [`ErrorKind::Connectivity`] errors have a chance of succeeding if
    /// the same request is repeated.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connectivity(_) => ErrorKind::Connectivity,
            Self::Rejected { .. } => ErrorKind::Authentication,
            Self::ErrorWithBody { status, .. } if status.is_server_error() => {
                ErrorKind::Connectivity
            }
            Self::ErrorWithBody { .. } => ErrorKind::Authentication,
            Self::TokenBody(_) | Self::MissingAccessToken => ErrorKind::Contract,
        }
    }
}

fn maybe_value<'a, T: tracing::Value + 'a>(v: &'a Option<T>) -> &'a dyn tracing::Value {
    if let Some(v) = v {
        v
    } else {
        &tracing::field::Empty
    }
}

#[tracing::instrument(
    err,
    skip(client, config),
    fields(
        token_url = %config.token_url(),
        credentials.grant_type = dto::CLIENT_CREDENTIALS_GRANT,
        credentials.client_id = %config.client_id(),
        credentials.audience = maybe_value(&config.audience().map(|a| a.as_str())),
    ),
)]
async fn request_token<T: RequestType>(
    client: &reqwest::Client,
    config: &ClientCredentialsConfig,
) -> Result<IssuedToken, TokenRequestError> {
    tracing::trace!("requesting token from authority");

    let payload = dto::ClientCredentialsRequest::from(config);
    let req = T::attach_payload(client.post(config.token_url().clone()), &payload);
    let resp = req.send().await.map_err(TokenRequestError::Connectivity)?;

    let status = resp.status();
    tracing::debug!(
        response.status = status.as_u16(),
        "received token response from issuing authority"
    );

    let body = resp
        .bytes()
        .await
        .map_err(TokenRequestError::Connectivity)?;

    if !status.is_success() {
        return Err(match serde_json::from_slice::<dto::ErrorResponse>(&body) {
            Ok(err) => TokenRequestError::Rejected {
                status,
                code: err.error,
                description: err.error_description,
                uri: err.error_uri,
            },
            Err(_) => TokenRequestError::ErrorWithBody {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            },
        });
    }

    let resp: dto::TokenResponse = serde_json::from_slice(&body)?;
    let lifetime = resp.lifetime_or(DEFAULT_TOKEN_LIFETIME);

    let access_token = match resp.access_token {
        Some(t) if !t.is_empty() => AccessToken::new(t),
        _ => {
            tracing::error!("access token not present in token response");
            return Err(TokenRequestError::MissingAccessToken);
        }
    };

    let token_type = resp.token_type.as_deref();
    tracing::info!(
        token_type = maybe_value(&token_type),
        lifetime = lifetime.0,
        "received new access token"
    );

    Ok(IssuedToken::new(access_token, lifetime))
}

/// A manner of attaching a serializable payload to a request
pub trait RequestType: fmt::Debug {
    /// Attaches the serializable payload to the request body
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder;
}

/// Attaches credentials to the request body as JSON
#[derive(Debug)]
pub struct JsonBody;

/// Attaches credentials to the request body as URL-encoded form data
#[derive(Debug)]
pub struct FormBody;

impl RequestType for JsonBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.json(payload)
    }
}

impl RequestType for FormBody {
    fn attach_payload<S: serde::Serialize>(
        request: reqwest::RequestBuilder,
        payload: &S,
    ) -> reqwest::RequestBuilder {
        request.form(payload)
    }
}
