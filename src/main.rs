mod bridge;
mod config;
mod identity;
mod slack;
mod sms;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::bridge::{Bridge, BridgeOptions};
use crate::config::{Config, Credentials};
use crate::slack::rtm::{ReconnectPolicy, RtmSession};
use crate::slack::web_api::WebApiClient;
use crate::sms::TwilioClient;

/// Forward new Slack messages to phones as text messages
#[derive(Debug, Parser)]
#[command(name = "slack-texts", version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(default_value = "config.toml")]
    config: PathBuf,

    /// Team name included in every text
    #[arg(long)]
    team_name: Option<String>,

    /// Skip the startup summary
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,slack_texts=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // API keys may come from a local .env file
    if let Ok(path) = dotenvy::dotenv() {
        info!("Loaded environment from {}", path.display());
    }

    let cli = Cli::parse();

    info!("Loading configuration from: {}", cli.config.display());
    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;
    config.apply_cli_overrides(cli.team_name, cli.quiet);

    let credentials = Credentials::from_env();
    let request_timeout = config.slack.request_timeout();

    let api = Arc::new(WebApiClient::new(
        &config.slack.api_base_url,
        &credentials.slack.token,
        request_timeout,
    )?);
    let gateway = Arc::new(TwilioClient::new(
        &config.twilio.api_base_url,
        &credentials.twilio,
        request_timeout,
    )?);

    let bridge = Arc::new(Bridge::new(
        BridgeOptions::from_config(&config),
        &credentials,
        api.clone(),
        gateway,
    )?);

    let session = RtmSession::new(
        api,
        config.slack.connect_timeout(),
        ReconnectPolicy::from(&config.reconnect),
    );

    bridge.start(session).await?;

    info!("slack-texts stopped");
    Ok(())
}
