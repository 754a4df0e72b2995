use serde::Deserialize;
use url::Url;

/// The part of a VTN's `auth/server` document needed to request tokens
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct AuthServerInfo {
    /// Where client credentials are exchanged for access tokens
    #[serde(rename = "tokenURL")]
    pub token_url: Url,
}

/// Asks the VTN at `base_url` where its token authority lives
///
/// The lookup is unauthenticated. Only the status and the `tokenURL` member
/// are inspected.
#[tracing::instrument(level = "debug", skip(client), fields(base_url = %base_url))]
pub async fn discover_token_url(
    client: &reqwest::Client,
    base_url: &Url,
) -> Result<Url, reqwest::Error> {
    let url = crate::session::join(base_url, "auth/server");
    let info: AuthServerInfo = client
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;

    tracing::debug!(token_url = %info.token_url, "discovered token endpoint");
    Ok(info.token_url)
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[tokio::test]
    async fn reads_token_url_from_auth_server_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/openadr3/3.0.1/auth/server"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tokenURL": "https://auth.example.com/oauth2/token",
                "grant_types": ["client_credentials"],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let base = Url::parse(&format!("{}/openadr3/3.0.1", server.uri())).unwrap();
        let token_url = discover_token_url(&reqwest::Client::new(), &base)
            .await
            .unwrap();

        assert_eq!(token_url.as_str(), "https://auth.example.com/oauth2/token");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/server"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let base = Url::parse(&server.uri()).unwrap();
        let err = discover_token_url(&reqwest::Client::new(), &base)
            .await
            .unwrap_err();

        assert_eq!(err.status(), Some(reqwest::StatusCode::NOT_FOUND));
    }
}
