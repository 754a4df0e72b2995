use std::time::Duration;

use clap::Parser;
use oadr3_mqtt::{LifecycleHooks, MqttNotifierBinding, NotifierConnection};
use oadr3_reqwest::{SessionBuilder, TlsVerification};
use oadr3_tokens::{ClientId, ClientSecret, Scope};
use serde::Deserialize;

#[derive(Debug, Parser)]
struct Opts {
    /// The VTN base URL, such as `https://vtn.example.com/openadr3/3.0.1`
    #[arg(short, long, env = "VTN_BASE_URL")]
    vtn_url: reqwest::Url,

    /// The issuing authority's token request URL, discovered from the VTN if
    /// omitted
    #[arg(short, long, env = "OAUTH_TOKEN_ENDPOINT")]
    token_url: Option<reqwest::Url>,

    /// The client ID of the client
    #[arg(short, long, env = "OAUTH_CLIENT_ID")]
    client_id: String,

    /// The client secret used to identify the client to the issuing authority
    #[arg(short = 's', long, env = "OAUTH_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Scopes to request, separated by spaces
    #[arg(long, env = "OAUTH_SCOPES", value_delimiter = ' ')]
    scopes: Vec<String>,

    /// A PEM bundle to verify the VTN against instead of the system roots
    #[arg(long, env = "VTN_CA_BUNDLE")]
    ca_bundle: Option<std::path::PathBuf>,

    /// Topics to subscribe to
    #[arg(long, default_value = "OpenADR/3.0.1/programs")]
    topic: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NotifierDetails {
    #[serde(rename = "MQTT")]
    mqtt: Option<MqttNotifierBinding>,
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
    let client_id = ClientId::new(opts.client_id);

    let mut builder = SessionBuilder::new(
        opts.vtn_url,
        client_id.clone(),
        ClientSecret::new(opts.client_secret),
    )
    .with_timeout(Duration::from_secs(10));
    if let Some(token_url) = opts.token_url {
        builder = builder.with_token_url(token_url);
    }
    if !opts.scopes.is_empty() {
        builder = builder.with_scopes(opts.scopes.into_iter().map(Scope::new));
    }
    if let Some(ca_bundle) = opts.ca_bundle {
        builder = builder.with_tls(TlsVerification::CustomCa(ca_bundle));
    }

    let (session, manager) = builder.build().await?;

    let details: NotifierDetails = session
        .get("notifiers")
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let binding = details
        .mqtt
        .ok_or_else(|| color_eyre::eyre::eyre!("VTN does not offer an MQTT notifier"))?;

    let mut hooks = LifecycleHooks::with_logging();
    hooks.on_disconnect.push(|e| {
        if !e.reason.is_normal() {
            tracing::warn!(reason = %e.reason, "notifier connection lost");
        }
    });

    let (client, connection) = NotifierConnection::connect(
        &binding,
        &format!("{}-notifier", client_id),
        &client_id,
        Some(manager),
        hooks,
    )
    .await?;

    let mut states = connection.reconnector().subscribe();
    tokio::spawn(async move {
        while states.changed().await.is_ok() {
            let state = *states.borrow_and_update();
            tracing::info!(?state, "notifier connection state");
        }
    });

    for topic in &opts.topic {
        client
            .subscribe(topic, rumqttc::QoS::AtLeastOnce)
            .await?;
    }

    connection.run().await?;
    Ok(())
}
