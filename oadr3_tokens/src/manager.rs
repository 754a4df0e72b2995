use std::{error, sync::Arc};

use async_trait::async_trait;
use oadr3_clock::{Clock, System};
use tokio::sync::Mutex;

use crate::{sources::AsyncTokenSource, AccessToken, CachedToken};

/// Anything that can hand out a currently valid access token
///
/// This is the only contract the HTTP and MQTT transports depend on.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// The error returned when no valid token can be obtained
    type Error: error::Error + Send + Sync + 'static;

    /// Gets an access token that is valid right now
    async fn access_token(&self) -> Result<AccessToken, Self::Error>;

    /// Drops any cached token so that the next request performs a fresh
    /// exchange
    ///
    /// Used when a server rejects a token that the cache still considers
    /// valid.
    async fn invalidate(&self) {}
}

#[async_trait]
impl<P: AccessTokenProvider + ?Sized> AccessTokenProvider for Arc<P> {
    type Error = P::Error;

    async fn access_token(&self) -> Result<AccessToken, Self::Error> {
        (**self).access_token().await
    }

    async fn invalidate(&self) {
        (**self).invalidate().await
    }
}

#[derive(Debug)]
struct TokenSlot<S> {
    source: S,
    cached: Option<CachedToken>,
}

/// Obtains, caches, and transparently refreshes access tokens
///
/// The manager holds at most one token. A single lock is held across the
/// whole check-and-refresh sequence, so concurrent callers are serialized: at
/// most one exchange with the authority is in flight, and callers that queue
/// up behind a refresh reuse the token it produced.
///
/// ```
/// use oadr3_tokens::{sources::ConstTokenSource, CredentialManager};
///
/// # #[tokio::main(flavor = "current_thread")] async fn main() {
/// let manager = CredentialManager::new(ConstTokenSource::new("pre-provisioned"));
///
/// let token = manager.access_token().await.unwrap();
/// assert_eq!(token.as_str(), "pre-provisioned");
/// # }
/// ```
#[derive(Debug)]
pub struct CredentialManager<S, C = System> {
    slot: Mutex<TokenSlot<S>>,
    clock: C,
}

impl<S> CredentialManager<S, System> {
    /// Constructs a manager with an empty cache around `source`
    pub fn new(source: S) -> Self {
        Self {
            slot: Mutex::new(TokenSlot {
                source,
                cached: None,
            }),
            clock: System,
        }
    }
}

impl<S, C> CredentialManager<S, C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> CredentialManager<S, D> {
        CredentialManager {
            slot: self.slot,
            clock,
        }
    }

    /// Drops the cached token, if any
    pub async fn invalidate(&self) {
        let mut slot = self.slot.lock().await;
        if slot.cached.take().is_some() {
            tracing::debug!("cached access token invalidated");
        }
    }
}

impl<S, C> CredentialManager<S, C>
where
    S: AsyncTokenSource,
    C: Clock,
{
    /// Gets a valid access token, performing an exchange only if the cached
    /// token is missing or expired
    ///
    /// Errors from the exchange are returned unchanged and leave the cache
    /// empty, so the next call starts over with a fresh exchange. No retries
    /// are attempted.
    pub async fn access_token(&self) -> Result<AccessToken, S::Error> {
        let mut guard = self.slot.lock().await;
        let slot = &mut *guard;

        if let Some(cached) = &slot.cached {
            let now = self.clock.now();
            if cached.is_valid_at(now) {
                tracing::trace!(
                    expiry = cached.expiry().0,
                    until_expired = cached.until_expired_at(now).0,
                    "returning cached access token"
                );
                return Ok(cached.access_token().to_owned());
            }

            tracing::debug!(
                expiry = cached.expiry().0,
                "cached access token expired, discarding"
            );
            slot.cached = None;
        }

        tracing::debug!("no usable access token cached, requesting a new one");
        let issued = slot.source.request_token().await?;

        let cached = CachedToken::from_issued(issued, self.clock.now());
        tracing::debug!(
            issued = cached.issued().0,
            expiry = cached.expiry().0,
            "caching new access token"
        );

        let token = cached.access_token().to_owned();
        slot.cached = Some(cached);
        Ok(token)
    }
}

#[async_trait]
impl<S, C> AccessTokenProvider for CredentialManager<S, C>
where
    S: AsyncTokenSource,
    C: Clock + Send + Sync,
{
    type Error = S::Error;

    async fn access_token(&self) -> Result<AccessToken, Self::Error> {
        CredentialManager::access_token(self).await
    }

    async fn invalidate(&self) {
        CredentialManager::invalidate(self).await
    }
}
