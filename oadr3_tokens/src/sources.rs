//! Token sources

use crate::IssuedToken;
use async_trait::async_trait;
use std::{error, fmt};

mod fixed;
#[cfg(feature = "oauth2")]
pub mod oauth2;

pub use fixed::ConstTokenSource;

/// An asynchronous source for tokens
///
/// Sources perform the actual exchange with an authority and hold no state
/// beyond their static configuration. Caching is the responsibility of the
/// [`CredentialManager`][crate::CredentialManager] that owns the source.
///
/// Sources must be `Debug` so that a manager holding a boxed source can be
/// debugged as well.
#[async_trait]
pub trait AsyncTokenSource: fmt::Debug + Send + Sync {
    /// The error type returned in the event that retrieving a token fails
    type Error: error::Error + Send + Sync + 'static;

    /// Requests a token from an asynchronous source
    async fn request_token(&mut self) -> Result<IssuedToken, Self::Error>;
}

#[async_trait]
impl<S: AsyncTokenSource + ?Sized> AsyncTokenSource for Box<S> {
    type Error = S::Error;

    async fn request_token(&mut self) -> Result<IssuedToken, Self::Error> {
        (**self).request_token().await
    }
}
