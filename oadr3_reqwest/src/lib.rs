//! Middleware to authenticate outgoing requests to an OpenADR 3 VTN
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`BearerAuthMiddleware`] in the middleware stack to attach a
//! current access token, obtained from an
//! [`AccessTokenProvider`](oadr3_tokens::AccessTokenProvider), to each
//! outbound request.
//!
//! Any `Authorization` header already present on the request is replaced. A
//! request whose URL does not use the `https` scheme is refused before a token
//! is even requested, so credentials never travel in the clear.
//!
//! ```
//! use oadr3_reqwest::BearerAuthMiddleware;
//! use oadr3_tokens::{sources::ConstTokenSource, CredentialManager};
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let manager = Arc::new(CredentialManager::new(ConstTokenSource::new("token")));
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(BearerAuthMiddleware::new(manager))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! Most applications will not assemble the stack by hand but use a
//! [`SessionBuilder`] to obtain an [`AuthenticatedSession`] rooted at the VTN's
//! base URL.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::{error, fmt};

use bytes::{BufMut, BytesMut};
use oadr3_tokens::AccessTokenProvider;
use predicates::{prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{Middleware, Next};
use thiserror::Error;
use url::Url;

mod discovery;
mod guard;
mod session;
mod tls;

pub use discovery::{discover_token_url, AuthServerInfo};
pub use guard::{CreationGuard, GuardError, GuardState};
pub use session::{AuthenticatedSession, SessionBuilder, SessionCredentialManager, SessionError};
pub use tls::{https_client_builder, TlsError, TlsVerification};

/// A middleware that injects an access token into outgoing requests
#[derive(Clone, Debug)]
pub struct BearerAuthMiddleware<P> {
    provider: P,
}

impl<P> BearerAuthMiddleware<P> {
    /// Construct a new middleware from an access token provider
    ///
    /// The provider is consulted before every request. Providers such as
    /// [`CredentialManager`](oadr3_tokens::CredentialManager) cache tokens, so
    /// this is cheap after the first request.
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

/// An error raised by the middleware before a request is sent
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request would not have been sent over TLS
    #[error("refusing to send request over `{scheme}`, only https is allowed: {url}")]
    InsecureScheme {
        /// The scheme of the rejected request
        scheme: String,
        /// The URL of the rejected request
        url: Url,
    },
    /// No access token could be obtained for the request
    #[error("unable to obtain access token")]
    Token(#[source] Box<dyn error::Error + Send + Sync + 'static>),
    /// The access token cannot be represented as a header value
    #[error("access token contains bytes not allowed in an HTTP header")]
    InvalidToken,
}

impl<P: AccessTokenProvider> BearerAuthMiddleware<P> {
    async fn authorization_header(&self) -> Result<header::HeaderValue, TransportError> {
        let token = self
            .provider
            .access_token()
            .await
            .map_err(|e| TransportError::Token(Box::new(e)))?;

        tracing::trace!("obtained access token");

        let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
        header_value.put_slice(b"Bearer ");
        header_value.put_slice(token.as_str().as_bytes());
        let mut value = header::HeaderValue::from_maybe_shared(header_value.freeze())
            .map_err(|_| TransportError::InvalidToken)?;
        value.set_sensitive(true);
        Ok(value)
    }
}

#[async_trait::async_trait]
impl<P> Middleware for BearerAuthMiddleware<P>
where
    P: AccessTokenProvider + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        if !HttpsOnly.eval(&req) {
            tracing::warn!(url = %req.url(), "refusing to send request without TLS");
            return Err(reqwest_middleware::Error::middleware(
                TransportError::InsecureScheme {
                    scheme: req.url().scheme().to_owned(),
                    url: req.url().clone(),
                },
            ));
        }

        let value = self
            .authorization_header()
            .await
            .map_err(reqwest_middleware::Error::middleware)?;
        req.headers_mut().insert(header::AUTHORIZATION, value);

        next.run(req, extensions).await
    }
}

/// Matches requests that are being sent over HTTPS
#[derive(Clone, Copy, Debug)]
pub struct HttpsOnly;

impl Predicate<Request> for HttpsOnly {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        req.url().scheme() == "https"
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "scheme",
                    req.url().scheme().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for HttpsOnly {}
impl fmt::Display for HttpsOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("scheme is https")
    }
}
