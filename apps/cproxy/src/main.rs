use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

mod cli;
mod data_dir;

use cproxy_common::{GlobalConfig, GlobalConfigPatch};
use cproxy_core::{
    CopilotClient, PollTiming, SessionRefresher, SessionStore, TokenFile, UpstreamClientConfig,
    poll_access_token,
};
use cproxy_router::{GatewayState, gateway_router};

use crate::cli::{Cli, Command};
use crate::data_dir::resolve_data_dir;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(err) = run().await {
        eprintln!("cproxy failed: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match &cli.command {
        Command::Start(args) => start(load_config(&cli, args.to_patch())?).await,
        Command::Login(args) => login(load_config(&cli, args.to_patch())?).await,
        Command::Logout => logout(&load_config(&cli, GlobalConfigPatch::default())?),
        Command::Version => {
            println!("cproxy {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Defaults, then the config file, then flags and env vars.
fn load_config(cli: &Cli, flags: GlobalConfigPatch) -> anyhow::Result<GlobalConfig> {
    let mut patch = match &cli.config {
        Some(path) => GlobalConfigPatch::from_json_file(path)?,
        None => GlobalConfigPatch::default(),
    };
    patch.overlay(flags);
    if let Some(dir) = resolve_data_dir(&cli.data_dir) {
        patch.data_dir = Some(dir);
    }
    Ok(patch.into_config()?)
}

fn upstream_client(config: &GlobalConfig) -> anyhow::Result<CopilotClient> {
    CopilotClient::new(UpstreamClientConfig::from_global(config))
        .context("build upstream http client")
}

async fn start(config: GlobalConfig) -> anyhow::Result<()> {
    let token_file = TokenFile::in_dir(&config.data_dir);
    let access_token = token_file
        .read()
        .context("no access token, run `cproxy login` first")?;

    let client = upstream_client(&config)?;
    let credential = client
        .session_token(&access_token)
        .await
        .context("exchange access token for a Copilot session token")?;
    info!(event = "session_ready", expires_at = credential.expires_at);

    let session = Arc::new(SessionStore::new(credential));
    let refresher =
        SessionRefresher::new(client.clone(), access_token, session.clone(), config.refresh)
            .spawn();

    let state = GatewayState {
        client,
        session,
        defaults: Arc::new(config.completion.clone()),
    };
    let app = gateway_router(state, &config.cors);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        addr = %addr,
        model = %config.completion.model,
        refresh_interval_secs = config.refresh.interval_secs,
        refresh_failure = %config.refresh.failure,
        "listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    refresher.abort();
    Ok(())
}

async fn login(config: GlobalConfig) -> anyhow::Result<()> {
    let token_file = TokenFile::in_dir(&config.data_dir);
    token_file.ensure_absent()?;

    let client = upstream_client(&config)?;
    let device = client.login().await.context("request device code")?;
    println!(
        "Please open {} and enter the code: {}",
        device.verification_uri, device.user_code
    );

    let access_token = poll_access_token(&client, &device, PollTiming::default()).await?;
    token_file.write(&access_token)?;
    println!("Logged in, token saved to {}", token_file.path().display());
    Ok(())
}

fn logout(config: &GlobalConfig) -> anyhow::Result<()> {
    let token_file = TokenFile::in_dir(&config.data_dir);
    token_file.remove()?;
    println!("Logged out, removed {}", token_file.path().display());
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("cproxy=info,cproxy_core=info,cproxy_router=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
