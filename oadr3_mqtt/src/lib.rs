//! MQTT notifier connections that keep their bearer credentials fresh
//!
//! A VTN advertises its MQTT notifier through a [`MqttNotifierBinding`]. When
//! the binding asks for `OAUTH2_BEARER_TOKEN` authentication, the access
//! token is presented as the CONNECT password. Tokens expire, and brokers
//! drop connections whose credentials are no longer accepted, so a
//! [`StreamReconnector`] watches for unexpected disconnects, obtains a
//! current token from an
//! [`AccessTokenProvider`](oadr3_tokens::AccessTokenProvider), and attempts a
//! single reconnect with it.
//!
//! [`NotifierConnection`] wires this to a `rumqttc` event loop and dispatches
//! connection lifecycle events to [`LifecycleHooks`].
//!
//! ```no_run
//! use oadr3_mqtt::{LifecycleHooks, MqttNotifierBinding, NotifierConnection};
//! use oadr3_tokens::{sources::ConstTokenSource, ClientId, CredentialManager};
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let binding: MqttNotifierBinding = serde_json::from_str(r#"{
//!     "URIS": ["mqtts://broker.example.com"],
//!     "authentication": { "method": "OAUTH2_BEARER_TOKEN", "username": "{clientID}" }
//! }"#)?;
//!
//! let manager = Arc::new(CredentialManager::new(ConstTokenSource::new("token")));
//!
//! let (client, connection) = NotifierConnection::connect(
//!     &binding,
//!     "ven-1-notifications",
//!     &ClientId::from_static("ven-1"),
//!     Some(manager),
//!     LifecycleHooks::with_logging(),
//! )
//! .await?;
//!
//! client
//!     .subscribe("OpenADR/3.0.1/programs", rumqttc::QoS::AtLeastOnce)
//!     .await?;
//! connection.run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod binding;
mod connection;
pub mod hooks;
mod reason;
mod reconnector;
mod session;

pub use binding::{
    BindingError, MqttAuthentication, MqttNotifierBinding, NotifierSerialization,
    CLIENT_ID_USERNAME,
};
pub use connection::{NotifierConnection, NotifierError};
pub use hooks::{HandlerChain, LifecycleHooks};
pub use reason::ReasonCode;
pub use reconnector::{ConnectionState, ReconnectError, ReconnectOutcome, StreamReconnector};
pub use session::MqttSession;
