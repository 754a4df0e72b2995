use std::error;

use oadr3_tokens::{AccessTokenProvider, ClientIdRef};
use thiserror::Error;
use tokio::sync::watch;

use crate::{MqttAuthentication, MqttSession, ReasonCode};

/// The state of a broker connection as seen by the reconnector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Connected and accepted by the broker
    Connected,
    /// Obtaining a token and reconnecting after an unexpected disconnect
    Reconnecting,
}

/// An error while restoring broker credentials or the connection
#[derive(Debug, Error)]
pub enum ReconnectError {
    /// Bearer token authentication was requested without a token provider
    #[error("bearer token authentication requires a token provider")]
    MissingProvider,
    /// No access token could be obtained
    #[error("unable to obtain access token for broker")]
    Token(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The broker could not be reached or refused the new connection
    #[error("unable to reconnect to broker")]
    Reconnect(#[source] Box<dyn error::Error + Send + Sync + 'static>),
}

/// What [`StreamReconnector::handle_disconnect`] did
#[derive(Debug)]
pub enum ReconnectOutcome {
    /// The disconnect was requested by the client; nothing was done
    Clean,
    /// The connection does not use bearer tokens; nothing was done
    NotApplicable,
    /// A fresh token was presented and the broker accepted the connection
    Reconnected,
    /// The single recovery attempt failed; the connection stays down
    Failed(ReconnectError),
}

#[derive(Debug)]
struct Bearer<P> {
    provider: P,
    username: String,
}

/// Restores a bearer-authenticated broker connection after an unexpected
/// disconnect
///
/// On a disconnect with a non-zero reason code, the reconnector asks its
/// provider for a token, presents it as the CONNECT password, and attempts
/// exactly one reconnect. Failures are logged and reported, never retried.
/// A reason code signalling rejected credentials first invalidates the
/// provider's cached token so that a fresh one is requested.
///
/// The current [`ConnectionState`] is published on a watch channel.
#[derive(Debug)]
pub struct StreamReconnector<P> {
    bearer: Option<Bearer<P>>,
    state: watch::Sender<ConnectionState>,
}

impl<P> StreamReconnector<P> {
    /// A reconnector presenting tokens from `provider` as `username`
    pub fn bearer(provider: P, username: impl Into<String>) -> Self {
        Self::with_bearer(Some(Bearer {
            provider,
            username: username.into(),
        }))
    }

    /// A reconnector for connections that do not use tokens
    ///
    /// It only tracks connection state.
    pub fn passive() -> Self {
        Self::with_bearer(None)
    }

    /// A reconnector matching a notifier binding's authentication method
    ///
    /// `client_id` resolves the `{clientID}` username placeholder.
    pub fn for_authentication(
        authentication: &MqttAuthentication,
        client_id: &ClientIdRef,
        provider: Option<P>,
    ) -> Result<Self, ReconnectError> {
        match authentication.bearer_username(client_id) {
            Some(username) => {
                let provider = provider.ok_or(ReconnectError::MissingProvider)?;
                Ok(Self::bearer(provider, username))
            }
            None => Ok(Self::passive()),
        }
    }

    fn with_bearer(bearer: Option<Bearer<P>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self { bearer, state }
    }

    /// The current connection state
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Observes connection state changes
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Records that the broker accepted a connection
    pub fn mark_connected(&self) {
        self.set_state(ConnectionState::Connected);
    }

    /// Whether tokens are presented to the broker
    pub fn uses_bearer_token(&self) -> bool {
        self.bearer.is_some()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!(?previous, current = ?state, "connection state changed");
        }
    }
}

impl<P: AccessTokenProvider> StreamReconnector<P> {
    /// Sets the initial CONNECT credentials on `session`
    ///
    /// Does nothing for connections that do not use tokens.
    pub async fn prepare<S: MqttSession>(&self, session: &mut S) -> Result<(), ReconnectError> {
        if let Some(bearer) = &self.bearer {
            let token = bearer
                .provider
                .access_token()
                .await
                .map_err(|e| ReconnectError::Token(Box::new(e)))?;
            session.set_credentials(&bearer.username, &token);
        }
        Ok(())
    }

    /// Reacts to the end of a connection
    #[tracing::instrument(level = "debug", skip_all, fields(reason = %reason))]
    pub async fn handle_disconnect<S: MqttSession>(
        &self,
        reason: ReasonCode,
        session: &mut S,
    ) -> ReconnectOutcome {
        self.set_state(ConnectionState::Disconnected);

        if reason.is_normal() {
            tracing::debug!("clean disconnect, not reconnecting");
            return ReconnectOutcome::Clean;
        }

        let Some(bearer) = &self.bearer else {
            tracing::info!("unexpected disconnect, no token credentials to refresh");
            return ReconnectOutcome::NotApplicable;
        };

        tracing::debug!("unexpected disconnect, refreshing token and reconnecting");
        self.set_state(ConnectionState::Reconnecting);

        if reason.rejects_credentials() {
            bearer.provider.invalidate().await;
        }

        let token = match bearer.provider.access_token().await {
            Ok(token) => token,
            Err(e) => {
                return self.fail(ReconnectError::Token(Box::new(e)));
            }
        };
        session.set_credentials(&bearer.username, &token);

        match session.reconnect().await {
            Ok(()) => {
                tracing::info!("reconnected to broker with refreshed access token");
                self.set_state(ConnectionState::Connected);
                ReconnectOutcome::Reconnected
            }
            Err(e) => self.fail(ReconnectError::Reconnect(Box::new(e))),
        }
    }

    fn fail(&self, error: ReconnectError) -> ReconnectOutcome {
        tracing::warn!(
            error = (&error as &dyn error::Error),
            "failed to restore broker connection, giving up"
        );
        self.set_state(ConnectionState::Disconnected);
        ReconnectOutcome::Failed(error)
    }
}
