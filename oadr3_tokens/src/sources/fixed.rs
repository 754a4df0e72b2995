//! A token source that always hands out the same token

use std::convert::Infallible;

use async_trait::async_trait;
use oadr3_clock::DurationSecs;

use super::AsyncTokenSource;
use crate::{AccessToken, IssuedToken, DEFAULT_TOKEN_LIFETIME};

/// A token source that hands out a pre-provisioned token
///
/// Useful when a token has been obtained out of band, and in tests.
#[derive(Clone, Debug)]
pub struct ConstTokenSource {
    access_token: AccessToken,
    lifetime: DurationSecs,
}

impl ConstTokenSource {
    /// Constructs a source that reports the default token lifetime
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: AccessToken::new(access_token.into()),
            lifetime: DEFAULT_TOKEN_LIFETIME,
        }
    }

    /// Overrides the lifetime reported with the token
    pub fn with_lifetime(mut self, lifetime: DurationSecs) -> Self {
        self.lifetime = lifetime;
        self
    }
}

#[async_trait]
impl AsyncTokenSource for ConstTokenSource {
    type Error = Infallible;

    async fn request_token(&mut self) -> Result<IssuedToken, Self::Error> {
        Ok(IssuedToken::new(self.access_token.clone(), self.lifetime))
    }
}
