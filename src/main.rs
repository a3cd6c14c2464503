mod cli;
mod commands;
mod ui;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::Cli;
use commands::App;
use genpipe::GenpipeError;
use genpipe::config::GenpipeConfig;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "genpipe=debug,tower_http=debug"
    } else {
        "genpipe=info,tower_http=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        let code = e.downcast_ref::<GenpipeError>().map_or(1, GenpipeError::exit_code);
        std::process::exit(code);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = GenpipeConfig::load()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    tracing::debug!(?config, "Configuration loaded");

    App::new(config)?.run(cli.command).await
}
