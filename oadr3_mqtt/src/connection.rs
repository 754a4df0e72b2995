use std::fmt;

use oadr3_tokens::{AccessTokenProvider, ClientIdRef};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, Outgoing};
use thiserror::Error;

use crate::{
    hooks::{ConnectFailed, Connected, Disconnected, Published, Subscribed, Unsubscribed},
    BindingError, LifecycleHooks, MqttNotifierBinding, ReasonCode, ReconnectError,
    ReconnectOutcome, StreamReconnector,
};

const REQUEST_CAPACITY: usize = 16;

/// An error that ends a notifier connection
#[derive(Debug, Error)]
pub enum NotifierError {
    /// The binding could not be turned into connection options
    #[error("invalid notifier binding")]
    Binding(#[from] BindingError),
    /// The broker could not be reached or refused the connection
    #[error("unable to connect to broker")]
    Connect(#[source] ConnectionError),
    /// Credentials or the connection could not be restored
    #[error(transparent)]
    Reconnect(#[from] ReconnectError),
}

/// Drives the network loop of a notifier connection
///
/// Lifecycle events are dispatched to the [`LifecycleHooks`], and
/// unexpected disconnects are handed to the [`StreamReconnector`].
pub struct NotifierConnection<P> {
    eventloop: EventLoop,
    reconnector: StreamReconnector<P>,
    hooks: LifecycleHooks,
}

impl<P: fmt::Debug> fmt::Debug for NotifierConnection<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierConnection")
            .field("broker", &self.eventloop.mqtt_options.broker_address())
            .field("reconnector", &self.reconnector)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl<P: AccessTokenProvider> NotifierConnection<P> {
    /// Prepares a connection to the broker advertised in `binding`
    ///
    /// For bearer token authentication, an access token is obtained from
    /// `provider` before this returns, and `client_id` resolves the
    /// `{clientID}` username placeholder. The returned client is used to
    /// subscribe and publish; nothing is sent until [`run`](Self::run) is
    /// polled.
    pub async fn connect(
        binding: &MqttNotifierBinding,
        mqtt_client_id: &str,
        client_id: &ClientIdRef,
        provider: Option<P>,
        hooks: LifecycleHooks,
    ) -> Result<(AsyncClient, Self), NotifierError> {
        let options = binding.mqtt_options(mqtt_client_id)?;
        let reconnector =
            StreamReconnector::for_authentication(&binding.authentication, client_id, provider)?;

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        reconnector.prepare(&mut eventloop).await?;

        Ok((client, Self::new(eventloop, reconnector, hooks)))
    }
}

impl<P> NotifierConnection<P> {
    /// Wraps an existing event loop
    ///
    /// The event loop should already carry the initial credentials, see
    /// [`StreamReconnector::prepare`].
    pub fn new(
        eventloop: EventLoop,
        reconnector: StreamReconnector<P>,
        hooks: LifecycleHooks,
    ) -> Self {
        Self {
            eventloop,
            reconnector,
            hooks,
        }
    }

    /// The reconnector, for observing connection state
    pub fn reconnector(&self) -> &StreamReconnector<P> {
        &self.reconnector
    }
}

impl<P: AccessTokenProvider> NotifierConnection<P> {
    /// Polls the connection until it ends
    ///
    /// Returns `Ok(())` after a disconnect requested through the client.
    /// A failed first connect, or a failed recovery after an unexpected
    /// disconnect, ends the loop with an error.
    pub async fn run(mut self) -> Result<(), NotifierError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(ack))) => {
                    self.reconnector.mark_connected();
                    self.hooks.on_connect.dispatch(&Connected {
                        code: ack.code.into(),
                    });
                }
                Ok(Event::Incoming(Incoming::SubAck(ack))) => {
                    self.hooks.on_subscribe.dispatch(&Subscribed {
                        pkid: ack.pkid,
                        granted: ack.return_codes,
                    });
                }
                Ok(Event::Incoming(Incoming::UnsubAck(ack))) => {
                    self.hooks
                        .on_unsubscribe
                        .dispatch(&Unsubscribed { pkid: ack.pkid });
                }
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => {
                    self.hooks.on_publish.dispatch(&Published { pkid });
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    self.hooks.on_disconnect.dispatch(&Disconnected {
                        reason: ReasonCode::NORMAL,
                    });
                    self.reconnector
                        .handle_disconnect(ReasonCode::NORMAL, &mut self.eventloop)
                        .await;
                    return Ok(());
                }
                Ok(_) => {}
                Err(err) => {
                    let reason = ReasonCode::from(&err);

                    if self.reconnector.state() != crate::ConnectionState::Connected {
                        self.hooks.on_connect_fail.dispatch(&ConnectFailed { reason });
                        return Err(NotifierError::Connect(err));
                    }

                    self.hooks.on_disconnect.dispatch(&Disconnected { reason });
                    match self
                        .reconnector
                        .handle_disconnect(reason, &mut self.eventloop)
                        .await
                    {
                        ReconnectOutcome::Clean => return Ok(()),
                        ReconnectOutcome::Reconnected => {
                            self.hooks.on_connect.dispatch(&Connected {
                                code: ReasonCode::NORMAL,
                            });
                        }
                        ReconnectOutcome::NotApplicable => {}
                        ReconnectOutcome::Failed(err) => return Err(err.into()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        net::TcpListener,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use oadr3_tokens::{AccessToken, ClientId};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::{self, TcpStream},
        time,
    };
    use url::Url;

    use super::*;
    use crate::{ConnectionState, MqttAuthentication, NotifierSerialization};

    #[derive(Debug, Error)]
    #[error("authority unavailable")]
    struct Unavailable;

    #[derive(Debug)]
    struct FailingProvider;

    #[async_trait]
    impl AccessTokenProvider for FailingProvider {
        type Error = Unavailable;

        async fn access_token(&self) -> Result<AccessToken, Self::Error> {
            Err(Unavailable)
        }
    }

    /// Hands out `tok-0`, `tok-1`, … on successive calls
    #[derive(Debug, Default)]
    struct SequenceProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccessTokenProvider for SequenceProvider {
        type Error = Unavailable;

        async fn access_token(&self) -> Result<AccessToken, Self::Error> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken::new(format!("tok-{n}")))
        }
    }

    fn closed_broker(authentication: MqttAuthentication) -> MqttNotifierBinding {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        broker_at(port, authentication)
    }

    fn broker_at(port: u16, authentication: MqttAuthentication) -> MqttNotifierBinding {
        MqttNotifierBinding {
            uris: vec![Url::parse(&format!("mqtt://127.0.0.1:{port}")).unwrap()],
            serialization: NotifierSerialization::Json,
            authentication,
        }
    }

    #[tokio::test]
    async fn unreachable_broker_runs_connect_fail_hooks() {
        let failures = Arc::new(AtomicUsize::new(0));
        let mut hooks = LifecycleHooks::with_logging();
        {
            let failures = failures.clone();
            hooks.on_connect_fail.push(move |_| {
                failures.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (_client, connection) = NotifierConnection::<FailingProvider>::connect(
            &closed_broker(MqttAuthentication::Anonymous),
            "ven-test",
            &ClientId::from_static("ven"),
            None,
            hooks,
        )
        .await
        .unwrap();

        let err = connection.run().await.unwrap_err();

        assert!(matches!(err, NotifierError::Connect(_)));
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn bearer_binding_needs_a_token_before_connecting() {
        let result = NotifierConnection::connect(
            &closed_broker(MqttAuthentication::OAuth2BearerToken {
                username: crate::CLIENT_ID_USERNAME.to_owned(),
            }),
            "ven-test",
            &ClientId::from_static("ven"),
            Some(FailingProvider),
            LifecycleHooks::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(NotifierError::Reconnect(ReconnectError::Token(_)))
        ));
    }

    #[tokio::test]
    async fn bearer_binding_without_provider_is_rejected() {
        let result = NotifierConnection::<FailingProvider>::connect(
            &closed_broker(MqttAuthentication::OAuth2BearerToken {
                username: "notifier".to_owned(),
            }),
            "ven-test",
            &ClientId::from_static("ven"),
            None,
            LifecycleHooks::default(),
        )
        .await;

        assert!(matches!(
            result,
            Err(NotifierError::Reconnect(ReconnectError::MissingProvider))
        ));
    }

    const CONNACK_ACCEPTED: [u8; 4] = [0x20, 0x02, 0x00, 0x00];

    fn length_prefixed(body: &[u8], at: usize) -> (&[u8], usize) {
        let len = usize::from(u16::from_be_bytes([body[at], body[at + 1]]));
        (&body[at + 2..at + 2 + len], at + 2 + len)
    }

    /// Reads an MQTT 3.1.1 CONNECT packet and returns its password
    async fn read_connect_password(stream: &mut TcpStream) -> Option<String> {
        let packet_type = stream.read_u8().await.ok()?;
        assert_eq!(packet_type >> 4, 1, "expected CONNECT");

        let mut remaining = 0usize;
        let mut shift = 0;
        loop {
            let byte = stream.read_u8().await.ok()?;
            remaining |= usize::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
        }
        let mut body = vec![0; remaining];
        stream.read_exact(&mut body).await.ok()?;

        let (_protocol, at) = length_prefixed(&body, 0);
        let flags = body[at + 1];
        let (_client_id, mut at) = length_prefixed(&body, at + 4);
        if flags & 0x04 != 0 {
            at = length_prefixed(&body, at).1;
            at = length_prefixed(&body, at).1;
        }
        if flags & 0x80 != 0 {
            at = length_prefixed(&body, at).1;
        }
        if flags & 0x40 == 0 {
            return None;
        }
        let (password, _) = length_prefixed(&body, at);
        Some(String::from_utf8_lossy(password).into_owned())
    }

    /// Accepts one connection and drops it, then serves a second one until
    /// the client leaves
    async fn flaky_broker(listener: net::TcpListener) -> Vec<String> {
        let mut passwords = Vec::new();

        let (mut first, _) = listener.accept().await.unwrap();
        passwords.extend(read_connect_password(&mut first).await);
        first.write_all(&CONNACK_ACCEPTED).await.unwrap();
        drop(first);

        let (mut second, _) = listener.accept().await.unwrap();
        passwords.extend(read_connect_password(&mut second).await);
        second.write_all(&CONNACK_ACCEPTED).await.unwrap();

        let mut buf = [0; 64];
        while matches!(second.read(&mut buf).await, Ok(n) if n > 0) {}

        passwords
    }

    #[tokio::test]
    async fn dropped_connection_is_restored_with_a_fresh_token() {
        let listener = net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = tokio::spawn(flaky_broker(listener));

        let connects = Arc::new(AtomicUsize::new(0));
        let reasons = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = LifecycleHooks::default();
        {
            let connects = connects.clone();
            hooks.on_connect.push(move |_| {
                connects.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let reasons = reasons.clone();
            hooks
                .on_disconnect
                .push(move |event: &Disconnected| reasons.lock().unwrap().push(event.reason));
        }

        let provider = Arc::new(SequenceProvider::default());
        let (client, connection) = NotifierConnection::connect(
            &broker_at(
                port,
                MqttAuthentication::OAuth2BearerToken {
                    username: crate::CLIENT_ID_USERNAME.to_owned(),
                },
            ),
            "ven-test",
            &ClientId::from_static("ven"),
            Some(provider.clone()),
            hooks,
        )
        .await
        .unwrap();

        let mut state = connection.reconnector().subscribe();
        let run = tokio::spawn(connection.run());

        time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| {
                *s == ConnectionState::Connected && provider.calls.load(Ordering::SeqCst) == 2
            }),
        )
        .await
        .unwrap()
        .unwrap();

        client.disconnect().await.unwrap();
        time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(broker.await.unwrap(), ["tok-0", "tok-1"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
        assert_eq!(connects.load(Ordering::SeqCst), 2);
        assert_eq!(
            *reasons.lock().unwrap(),
            [ReasonCode::UNSPECIFIED, ReasonCode::NORMAL]
        );
    }
}
