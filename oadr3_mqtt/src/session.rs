use std::error;

use async_trait::async_trait;
use oadr3_tokens::AccessTokenRef;
use rumqttc::{ConnectionError, Event, EventLoop, Packet};

/// The parts of an MQTT client the reconnector drives
#[async_trait]
pub trait MqttSession: Send {
    /// The error returned when a reconnect fails
    type Error: error::Error + Send + Sync + 'static;

    /// Sets the credentials presented on the next CONNECT
    fn set_credentials(&mut self, username: &str, password: &AccessTokenRef);

    /// Opens a new connection to the broker and waits until it is accepted
    async fn reconnect(&mut self) -> Result<(), Self::Error>;
}

#[async_trait]
impl MqttSession for EventLoop {
    type Error = ConnectionError;

    fn set_credentials(&mut self, username: &str, password: &AccessTokenRef) {
        self.mqtt_options
            .set_credentials(username, password.as_str());
    }

    async fn reconnect(&mut self) -> Result<(), Self::Error> {
        loop {
            match self.poll().await? {
                Event::Incoming(Packet::ConnAck(_)) => return Ok(()),
                event => tracing::trace!(?event, "event while waiting for CONNACK"),
            }
        }
    }
}
