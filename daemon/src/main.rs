//! Warden daemon, the entry point for running the CAPTCHA membership gate.

mod cli;
mod config;
mod shutdown;

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;

use warden_captcha::ImageCaptcha;
use warden_verification::VerificationEngine;
use warden_websocket::{BridgeGateway, BridgeServer};

use crate::cli::{Cli, Command};
use crate::config::WardenConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let file_config = match &cli.config {
        Some(path) => WardenConfig::from_toml_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => WardenConfig::default(),
    };
    let config = cli.apply(file_config);
    config.validate().context("invalid configuration")?;

    match cli.command {
        Command::PrintConfig => {
            print!("{}", config.to_toml_string()?);
        }
        Command::Run => {
            warden_utils::init_logging(config.log_format, &config.log_level);
            if let Some(path) = &cli.config {
                tracing::info!("Loaded config from {}", path.display());
            }
            run(config).await?;
            tracing::info!("Warden daemon exited cleanly");
        }
    }

    Ok(())
}

async fn run(config: WardenConfig) -> anyhow::Result<()> {
    tracing::info!(
        port = config.port,
        role = %config.role_name,
        timeout_secs = config.captcha.captcha_timeout_secs,
        cooldown_secs = config.captcha.rate_limit_window_secs,
        retry_limit = config.captcha.captcha_retry_limit,
        "starting Warden"
    );

    let gateway = Arc::new(BridgeGateway::new(
        config.role_name.clone(),
        config.reply_timeout(),
    ));
    let engine = VerificationEngine::new(
        config.captcha.clone(),
        Arc::new(ImageCaptcha::new()),
        gateway.clone(),
    )?;
    let server = BridgeServer::new(config.port, engine, gateway.clone());

    server
        .start(async {
            let signal = shutdown::stop_signal().await;
            tracing::info!(?signal, "stop signal received, shutting down");
        })
        .await?;

    let unanswered = shutdown::drain(&gateway, config.reply_timeout()).await;
    tracing::info!(unanswered, "bridge stopped, adapter detached");
    Ok(())
}
