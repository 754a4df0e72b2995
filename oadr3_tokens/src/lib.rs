//! Facilities for obtaining and caching OAuth2 access tokens
//!
//! This library manages the bearer tokens used by an OpenADR 3 client, be it a
//! business logic actor or a virtual end node, when talking to a VTN. Callers
//! depend on a single operation, "give me a valid access token now", and never
//! reason about token lifetimes themselves.
//!
//! A [`CredentialManager`] wraps a token source with a single-slot cache. A
//! cached token is handed out for the first half of the lifetime reported by
//! the authority, after which it is discarded and a new one is requested. The
//! check and the refresh happen under one lock, so at most one exchange with
//! the authority is ever in flight per manager.
//!
//! # General Flow (Client Credentials)
//!
//! ```
//! use oadr3_tokens::{
//!     sources::oauth2::ClientCredentialsTokenSource, ClientCredentialsConfig, ClientId,
//!     ClientSecret, CredentialManager, Scope,
//! };
//!
//! # struct Opts {
//! #     client_id: ClientId,
//! #     client_secret: ClientSecret,
//! #     token_url: url::Url,
//! # }
//! #
//! # let opts = Opts {
//! #     client_id: ClientId::from_static("test"),
//! #     client_secret: ClientSecret::from_static("test"),
//! #     token_url: url::Url::parse("https://example.com/oauth/token").unwrap(),
//! # };
//! #
//! let config = ClientCredentialsConfig::new(opts.client_id, opts.client_secret, opts.token_url)
//!     .with_scopes([Scope::from_static("read_all")]);
//!
//! let manager = CredentialManager::new(ClientCredentialsTokenSource::new(
//!     reqwest::Client::new(),
//!     config,
//! ));
//! # ;/* Commented out due to this trying to interact with the world.
//! let token = manager.access_token().await?;
//!
//! tracing::info!(token = format_args!("{:#?}", token), "access token");
//! # */
//! ```
//!
//! The `oadr3_reqwest` and `oadr3_mqtt` crates consume a manager through the
//! [`AccessTokenProvider`] trait to authenticate HTTP requests and MQTT
//! connections.
//!
//! # Features
//!
//! * `oauth2` (default): Provides the token source implementing the _client
//!   credentials_ flow against an OAuth2 token endpoint.

#![cfg_attr(docsrs, feature(doc_cfg))]
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

mod braids;
mod config;
mod manager;
pub mod sources;
mod tokens;

pub use braids::*;
pub use config::ClientCredentialsConfig;
pub use manager::{AccessTokenProvider, CredentialManager};
pub use tokens::{CachedToken, IssuedToken, DEFAULT_TOKEN_LIFETIME};
