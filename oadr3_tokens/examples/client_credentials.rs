use std::time::Duration;

use clap::Parser;
use oadr3_tokens::{
    sources::oauth2::ClientCredentialsTokenSource, Audience, ClientCredentialsConfig, ClientId,
    ClientSecret, CredentialManager, Scope,
};
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// The issuing authority's token request URL
    #[arg(short, long, env = "OAUTH_TOKEN_ENDPOINT")]
    token_url: reqwest::Url,

    /// The client ID of the client
    #[arg(short, long, env = "OAUTH_CLIENT_ID")]
    client_id: String,

    /// The client secret used to identify the client to the issuing authority
    #[arg(short = 's', long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Scopes to request, separated by spaces
    #[arg(long, env = "OAUTH_SCOPES", value_delimiter = ' ')]
    scopes: Vec<String>,

    /// The audience to request a token for
    #[arg(short, long, env = "OAUTH_AUDIENCE")]
    audience: Option<String>,

    /// How often to ask the manager for a token
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let client = reqwest::Client::builder()
        .https_only(true)
        .timeout(Duration::from_secs(10))
        .build()?;

    let mut config = ClientCredentialsConfig::new(
        ClientId::new(opts.client_id),
        ClientSecret::new(opts.client_secret),
        opts.token_url,
    );
    if !opts.scopes.is_empty() {
        config = config.with_scopes(opts.scopes.into_iter().map(Scope::new));
    }
    if let Some(audience) = opts.audience {
        config = config.with_audience(Audience::new(audience));
    }

    let manager = CredentialManager::new(ClientCredentialsTokenSource::new(client, config));

    let mut interval = time::interval(Duration::from_secs(opts.interval_secs));
    loop {
        interval.tick().await;

        match manager.access_token().await {
            Ok(token) => {
                tracing::info!(token = format_args!("{:#?}", token), "pulled token")
            }
            Err(error) => {
                tracing::error!(
                    error = (&error as &dyn std::error::Error),
                    kind = ?error.kind(),
                    "unable to obtain token"
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUIRED: [&str; 5] = [
        "client_credentials",
        "--token-url",
        "https://auth.example.com/token",
        "--client-id=ven",
        "--client-secret=secret",
    ];

    #[test]
    fn zero_interval_is_rejected() {
        let args = REQUIRED.into_iter().chain(["--interval-secs", "0"]);
        assert!(Opts::try_parse_from(args).is_err());
    }

    #[test]
    fn interval_defaults_to_five_seconds() {
        let opts = Opts::try_parse_from(REQUIRED).unwrap();
        assert_eq!(opts.interval_secs, 5);
    }
}
