use std::{sync::Arc, time::Duration};

use oadr3_tokens::{
    sources::{
        oauth2::{ClientCredentialsTokenSource, TokenRequestError},
        AsyncTokenSource,
    },
    AccessTokenProvider, Audience, ClientCredentialsConfig, ClientId, ClientSecret,
    CredentialManager, Scope,
};
use reqwest::Method;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
    discover_token_url, https_client_builder, BearerAuthMiddleware, CreationGuard, GuardError,
    TlsError, TlsVerification,
};

/// The credential manager created by a [`SessionBuilder`]
pub type SessionCredentialManager =
    CredentialManager<Box<dyn AsyncTokenSource<Error = TokenRequestError>>>;

/// An error while setting up an [`AuthenticatedSession`]
#[derive(Debug, Error)]
pub enum SessionError {
    /// The VTN base URL does not use `https`
    #[error("VTN base URL must use https: {0}")]
    InsecureBaseUrl(Url),
    /// The TLS policy could not be applied
    #[error("unable to configure TLS")]
    Tls(#[from] TlsError),
    /// The HTTP client could not be built
    #[error("unable to build HTTP client")]
    Client(#[source] reqwest::Error),
    /// The token endpoint could not be discovered from the VTN
    #[error("unable to discover token endpoint")]
    Discovery(#[source] reqwest::Error),
}

pub(crate) fn join(base: &Url, path: &str) -> String {
    let base = base.as_str();
    let base = base.strip_suffix('/').unwrap_or(base);
    format!("{base}/{}", path.trim_start_matches('/'))
}

/// An HTTP session rooted at a VTN base URL
///
/// Every request made through the session passes through the bearer
/// middleware, so it carries a current access token and is refused locally if
/// it would leave the session over plain `http`.
#[derive(Clone, Debug)]
pub struct AuthenticatedSession {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl AuthenticatedSession {
    /// Wraps a client that already carries the authentication middleware
    pub fn new(client: ClientWithMiddleware, base_url: Url) -> Result<Self, SessionError> {
        if base_url.scheme() != "https" {
            return Err(SessionError::InsecureBaseUrl(base_url));
        }
        Ok(Self { client, base_url })
    }

    /// Builds a session that authenticates with `provider`
    pub fn with_provider<P>(
        client: reqwest::Client,
        provider: P,
        base_url: Url,
    ) -> Result<Self, SessionError>
    where
        P: AccessTokenProvider + 'static,
    {
        let client = ClientBuilder::new(client)
            .with(BearerAuthMiddleware::new(provider))
            .build();
        Self::new(client, base_url)
    }

    /// The base URL all paths are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` below the base URL
    ///
    /// The base URL's own path is always kept, whether or not it ends in a
    /// slash and whether or not `path` starts with one.
    pub fn url(&self, path: &str) -> Result<Url, url::ParseError> {
        Url::parse(&join(&self.base_url, path))
    }

    /// Starts a request to `path` below the base URL
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, join(&self.base_url, path))
    }

    /// Starts a `GET` request
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    /// Starts a `POST` request
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Starts a `PUT` request
    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    /// Starts a `DELETE` request
    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Posts `body` to `path` unless `guard` has already seen a successful
    /// creation
    ///
    /// Error statuses count as a failed creation and leave the guard unused.
    pub async fn create_once<B>(
        &self,
        guard: &CreationGuard,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, GuardError<reqwest_middleware::Error>>
    where
        B: Serialize + ?Sized,
    {
        guard
            .run(|| async {
                self.post(path)
                    .json(body)
                    .send()
                    .await?
                    .error_for_status()
                    .map_err(reqwest_middleware::Error::from)
            })
            .await
    }
}

/// Assembles an [`AuthenticatedSession`] from client credentials
///
/// When no token URL is configured, it is discovered from the VTN's
/// `auth/server` document.
#[derive(Clone, Debug)]
pub struct SessionBuilder {
    base_url: Url,
    client_id: ClientId,
    client_secret: ClientSecret,
    token_url: Option<Url>,
    scopes: Vec<Scope>,
    audience: Option<Audience>,
    tls: TlsVerification,
    timeout: Option<Duration>,
    json_body: bool,
}

impl SessionBuilder {
    /// Starts a builder for the VTN at `base_url`
    pub fn new(base_url: Url, client_id: ClientId, client_secret: ClientSecret) -> Self {
        Self {
            base_url,
            client_id,
            client_secret,
            token_url: None,
            scopes: Vec::new(),
            audience: None,
            tls: TlsVerification::default(),
            timeout: None,
            json_body: false,
        }
    }

    /// Uses `token_url` instead of discovering it
    pub fn with_token_url(mut self, token_url: Url) -> Self {
        self.token_url = Some(token_url);
        self
    }

    /// Requests the given scopes with every token
    pub fn with_scopes<I>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = Scope>,
    {
        self.scopes = scopes.into_iter().collect();
        self
    }

    /// Requests tokens for the given audience
    pub fn with_audience(mut self, audience: Audience) -> Self {
        self.audience = Some(audience);
        self
    }

    /// Sets how server certificates are verified
    pub fn with_tls(mut self, tls: TlsVerification) -> Self {
        self.tls = tls;
        self
    }

    /// Sets a timeout applied to every request, token exchanges included
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends credentials to the authority as JSON rather than a form
    pub fn using_json_body(mut self) -> Self {
        self.json_body = true;
        self
    }

    /// Builds the session
    ///
    /// The credential manager is returned as well so that other transports,
    /// such as an MQTT connection, can share its token cache.
    #[tracing::instrument(level = "debug", skip(self), fields(base_url = %self.base_url))]
    pub async fn build(
        self,
    ) -> Result<(AuthenticatedSession, Arc<SessionCredentialManager>), SessionError> {
        if self.base_url.scheme() != "https" {
            return Err(SessionError::InsecureBaseUrl(self.base_url));
        }

        let mut builder = https_client_builder(&self.tls)?;
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(SessionError::Client)?;

        let token_url = match self.token_url {
            Some(token_url) => token_url,
            None => discover_token_url(&client, &self.base_url)
                .await
                .map_err(SessionError::Discovery)?,
        };

        let mut config = ClientCredentialsConfig::new(self.client_id, self.client_secret, token_url);
        if !self.scopes.is_empty() {
            config = config.with_scopes(self.scopes);
        }
        if let Some(audience) = self.audience {
            config = config.with_audience(audience);
        }

        let source = ClientCredentialsTokenSource::new(client.clone(), config);
        let source: Box<dyn AsyncTokenSource<Error = TokenRequestError>> = if self.json_body {
            Box::new(source.using_json_body())
        } else {
            Box::new(source)
        };

        let manager = Arc::new(CredentialManager::new(source));
        let session = AuthenticatedSession::with_provider(client, manager.clone(), self.base_url)?;

        Ok((session, manager))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use oadr3_tokens::sources::ConstTokenSource;
    use reqwest::{Request, Response};
    use reqwest_middleware::{Middleware, Next};

    use super::*;

    /// Answers every request with a fixed status, recording what it saw
    struct Terminal {
        status: u16,
        requests: AtomicUsize,
        last_url: std::sync::Mutex<Option<String>>,
    }

    impl Terminal {
        fn new(status: u16) -> Arc<Self> {
            Arc::new(Self {
                status,
                requests: AtomicUsize::new(0),
                last_url: std::sync::Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl Middleware for Terminal {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> reqwest_middleware::Result<Response> {
            self.requests.fetch_add(1, Ordering::SeqCst);
            *self.last_url.lock().unwrap() = Some(req.url().to_string());
            Ok(http::Response::builder()
                .status(self.status)
                .body("")
                .unwrap()
                .into())
        }
    }

    fn session_with(terminal: Arc<Terminal>, base: &str) -> AuthenticatedSession {
        let manager = Arc::new(CredentialManager::new(ConstTokenSource::new("token")));
        let client = ClientBuilder::new(reqwest::Client::default())
            .with(BearerAuthMiddleware::new(manager))
            .with_arc(terminal)
            .build();
        AuthenticatedSession::new(client, Url::parse(base).unwrap()).unwrap()
    }

    mod resolving_paths {
        use super::*;

        #[test]
        fn base_path_is_kept_with_or_without_slashes() {
            let bare = Url::parse("https://vtn.example.com/openadr3/3.0.1").unwrap();
            let slashed = Url::parse("https://vtn.example.com/openadr3/3.0.1/").unwrap();

            for base in [&bare, &slashed] {
                assert_eq!(
                    join(base, "events"),
                    "https://vtn.example.com/openadr3/3.0.1/events"
                );
                assert_eq!(
                    join(base, "/events"),
                    "https://vtn.example.com/openadr3/3.0.1/events"
                );
            }
        }

        #[test]
        fn root_base_url() {
            let base = Url::parse("https://vtn.example.com").unwrap();
            assert_eq!(join(&base, "auth/server"), "https://vtn.example.com/auth/server");
        }

        #[tokio::test]
        async fn requests_go_below_the_base_url() {
            let terminal = Terminal::new(200);
            let session = session_with(terminal.clone(), "https://vtn.example.com/api/");

            session.get("/programs").send().await.unwrap();

            assert_eq!(
                terminal.last_url.lock().unwrap().as_deref(),
                Some("https://vtn.example.com/api/programs")
            );
            assert_eq!(
                session.url("programs").unwrap().as_str(),
                "https://vtn.example.com/api/programs"
            );
        }
    }

    mod when_base_url_is_plain_http {
        use super::*;

        #[test]
        fn session_is_refused() {
            let client = ClientBuilder::new(reqwest::Client::default()).build();
            let err =
                AuthenticatedSession::new(client, Url::parse("http://vtn.example.com").unwrap())
                    .unwrap_err();
            assert!(matches!(err, SessionError::InsecureBaseUrl(_)));
        }

        #[tokio::test]
        async fn builder_is_refused_before_any_network_activity() {
            let err = SessionBuilder::new(
                Url::parse("http://vtn.example.com").unwrap(),
                ClientId::from_static("ven"),
                ClientSecret::from_static("secret"),
            )
            .build()
            .await
            .unwrap_err();
            assert!(matches!(err, SessionError::InsecureBaseUrl(_)));
        }
    }

    #[tokio::test]
    async fn builder_with_token_url_skips_discovery() {
        let (session, manager) = SessionBuilder::new(
            Url::parse("https://vtn.example.com/openadr3/3.0.1").unwrap(),
            ClientId::from_static("ven"),
            ClientSecret::from_static("secret"),
        )
        .with_token_url(Url::parse("https://auth.example.com/token").unwrap())
        .with_scopes([Scope::from_static("read_all")])
        .with_timeout(Duration::from_secs(5))
        .using_json_body()
        .build()
        .await
        .unwrap();

        assert_eq!(
            session.base_url().as_str(),
            "https://vtn.example.com/openadr3/3.0.1"
        );

        let rendered = format!("{manager:?}");
        assert!(rendered.contains("ClientCredentialsTokenSource"));
        assert!(!rendered.contains("\"secret\""));
    }

    mod create_once {
        use super::*;

        #[derive(Serialize)]
        struct Event<'a> {
            #[serde(rename = "eventName")]
            event_name: &'a str,
        }

        #[tokio::test]
        async fn second_creation_sends_nothing() {
            let terminal = Terminal::new(201);
            let session = session_with(terminal.clone(), "https://vtn.example.com");
            let guard = CreationGuard::new();
            let event = Event { event_name: "peak" };

            session.create_once(&guard, "events", &event).await.unwrap();
            let second = session.create_once(&guard, "events", &event).await;

            assert!(matches!(second, Err(GuardError::AlreadyUsed)));
            assert_eq!(terminal.requests.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn error_status_leaves_guard_unused() {
            let terminal = Terminal::new(500);
            let session = session_with(terminal.clone(), "https://vtn.example.com");
            let guard = CreationGuard::new();
            let event = Event { event_name: "peak" };

            let result = session.create_once(&guard, "events", &event).await;

            assert!(matches!(result, Err(GuardError::Action(_))));
            assert_eq!(guard.state(), crate::GuardState::Unused);
        }
    }
}
