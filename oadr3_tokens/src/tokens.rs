use oadr3_clock::{DurationSecs, UnixTime};

use super::{AccessToken, AccessTokenRef};

/// The lifetime assumed when the authority does not report one
pub const DEFAULT_TOKEN_LIFETIME: DurationSecs = DurationSecs(3600);

/// A token as returned by the authority
///
/// This is consumed once to populate a [`CachedToken`] and is never persisted.
#[derive(Debug)]
pub struct IssuedToken {
    access_token: AccessToken,
    lifetime: DurationSecs,
}

impl IssuedToken {
    /// Constructs a new issued token
    pub fn new(access_token: AccessToken, lifetime: DurationSecs) -> Self {
        Self {
            access_token,
            lifetime,
        }
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the lifetime reported by the authority
    #[inline]
    pub fn lifetime(&self) -> DurationSecs {
        self.lifetime
    }
}

/// A token held by the credential cache
///
/// The cache only considers a token usable for the first half of its reported
/// lifetime.
#[derive(Clone, Debug)]
pub struct CachedToken {
    access_token: AccessToken,
    issued: UnixTime,
    expiry: UnixTime,
}

impl CachedToken {
    /// Caches a freshly issued token as of `now`
    pub fn from_issued(token: IssuedToken, now: UnixTime) -> Self {
        Self {
            access_token: token.access_token,
            issued: now,
            expiry: now + token.lifetime / 2,
        }
    }

    /// Gets the access token
    #[inline]
    pub fn access_token(&self) -> &AccessTokenRef {
        &self.access_token
    }

    /// Gets the time that the token was cached
    #[inline]
    pub fn issued(&self) -> UnixTime {
        self.issued
    }

    /// Gets the time after which the cache will no longer hand out the token
    #[inline]
    pub fn expiry(&self) -> UnixTime {
        self.expiry
    }

    /// Whether the token may still be handed out at `time`
    #[inline]
    pub fn is_valid_at(&self, time: UnixTime) -> bool {
        time < self.expiry
    }

    /// Gets a duration for how much longer the token would be handed out as
    /// of the provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        self.expiry - time
    }
}
