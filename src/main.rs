//! Slack bot server entry point.

use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use slackbot::assistant::Assistant;
use slackbot::cli::Cli;
use slackbot::config::BotConfig;
use slackbot::error::BotError;
use slackbot::slack::{router, AppState, SlackClient};

fn setup_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry().with(filter);
    if json {
        subscriber.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        subscriber.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

async fn run(cli: Cli) -> Result<(), BotError> {
    let mut config = BotConfig::from_env()?;
    cli.apply(&mut config);
    info!(config = ?config, "configuration loaded");

    let assistant = Assistant::from_config(&config)?;
    let slack = SlackClient::new(config.slack_bot_token()?);
    let bot_user_id = match slack.auth_test().await {
        Ok(id) => {
            info!(bot_user_id = %id, "authenticated with Slack");
            Some(id)
        }
        Err(e) => {
            warn!(error = %e, "auth.test failed; mention stripping falls back to the leading token");
            None
        }
    };

    let state = AppState::new(
        assistant,
        slack,
        config.slack_signing_secret()?,
        bot_user_id,
        config.response_mode,
    );

    let listener = TcpListener::bind(&cli.bind).await?;
    info!(bind = %cli.bind, mode = %config.response_mode, "listening for Slack events");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}
