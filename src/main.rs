mod app;
mod cli;

use anyhow::Context;
use clap::Parser;
use qianfan_chat::config::Config;
use qianfan_chat::paths;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();

    let config_path = paths::config_path()?;
    let cfg = Config::load_optional(&config_path)?
        .unwrap_or_default()
        .apply_env();
    tracing::debug!(?config_path, model = ?cfg.model, provider = ?cfg.provider, "resolved config");

    let http = reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let client = app::build_client(&http, &cfg, &args)?;

    match args.cmd {
        Some(cli::Command::Repl { ref system }) => app::cmd_repl(&client, system.clone()).await,
        None => app::cmd_chat(&client, &args).await,
    }
}
