//! Lifecycle hooks for a notifier connection
//!
//! Each hook is a [`HandlerChain`]. Installing a handler never replaces what
//! is already there: the new handler runs after the existing ones.

use std::fmt;

use rumqttc::SubscribeReasonCode;

use crate::ReasonCode;

type Handler<E> = Box<dyn Fn(&E) + Send + Sync>;

/// An ordered list of handlers for one kind of event
pub struct HandlerChain<E> {
    handlers: Vec<Handler<E>>,
}

impl<E> Default for HandlerChain<E> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<E> fmt::Debug for HandlerChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl<E> HandlerChain<E> {
    /// Appends a handler to run after all existing ones
    pub fn push<F>(&mut self, handler: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.handlers.push(Box::new(handler));
    }

    /// Runs every handler in installation order
    pub fn dispatch(&self, event: &E) {
        for handler in &self.handlers {
            handler(event);
        }
    }

    /// The number of installed handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is installed
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// The broker accepted a connection
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Connected {
    /// The broker's CONNACK code
    pub code: ReasonCode,
}

/// A connection attempt failed before the broker accepted it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectFailed {
    /// Why the attempt failed
    pub reason: ReasonCode,
}

/// A publish packet was sent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Published {
    /// The packet identifier, zero for QoS 0
    pub pkid: u16,
}

/// An established connection ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Disconnected {
    /// Why the connection ended
    pub reason: ReasonCode,
}

/// The broker acknowledged a subscription
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscribed {
    /// The packet identifier of the SUBSCRIBE
    pub pkid: u16,
    /// The per-topic result granted by the broker
    pub granted: Vec<SubscribeReasonCode>,
}

/// The broker acknowledged an unsubscription
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Unsubscribed {
    /// The packet identifier of the UNSUBSCRIBE
    pub pkid: u16,
}

/// The hook slots of a notifier connection
#[derive(Debug, Default)]
pub struct LifecycleHooks {
    /// Runs when the broker accepts a connection
    pub on_connect: HandlerChain<Connected>,
    /// Runs when a connection attempt fails
    pub on_connect_fail: HandlerChain<ConnectFailed>,
    /// Runs when a publish is sent
    pub on_publish: HandlerChain<Published>,
    /// Runs when an established connection ends
    pub on_disconnect: HandlerChain<Disconnected>,
    /// Runs when a subscription is acknowledged
    pub on_subscribe: HandlerChain<Subscribed>,
    /// Runs when an unsubscription is acknowledged
    pub on_unsubscribe: HandlerChain<Unsubscribed>,
}

impl LifecycleHooks {
    /// Hooks with a logging handler installed in every slot
    pub fn with_logging() -> Self {
        let mut hooks = Self::default();
        hooks.on_connect.push(|e: &Connected| {
            tracing::info!(code = %e.code, "connected to broker");
        });
        hooks.on_connect_fail.push(|e: &ConnectFailed| {
            tracing::warn!(reason = %e.reason, "failed to connect to broker");
        });
        hooks.on_publish.push(|e: &Published| {
            tracing::debug!(pkid = e.pkid, "published message");
        });
        hooks.on_disconnect.push(|e: &Disconnected| {
            tracing::info!(reason = %e.reason, "disconnected from broker");
        });
        hooks.on_subscribe.push(|e: &Subscribed| {
            tracing::debug!(pkid = e.pkid, granted = ?e.granted, "subscribed to topic");
        });
        hooks.on_unsubscribe.push(|e: &Unsubscribed| {
            tracing::debug!(pkid = e.pkid, "unsubscribed from topic");
        });
        hooks
    }
}
