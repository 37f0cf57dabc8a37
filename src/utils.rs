//! Process plumbing: logging, the bind address and shutdown signals

use std::net::SocketAddr;

use anyhow::Context as _;
use clap_verbosity_flag::InfoLevel;
use clap_verbosity_flag::Verbosity;

use crate::Config;

/// Address vidsrv binds to when nothing else is configured
const DEFAULT_ADDRESS: &str = "127.0.0.1:8080";

/// Setup tracing based on the verbosity flags, `RUST_LOG` still takes precedence
///
/// Log targets are only shown in debug builds.
pub fn setup_tracing(verbosity: Verbosity<InfoLevel>) {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::fmt::SubscriberBuilder;

    let filter = EnvFilter::builder()
        .with_default_directive(verbosity.tracing_level_filter().into())
        .from_env_lossy();

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(cfg!(debug_assertions))
        .try_init()
        .expect("Setting default subscriber failed");
}

/// Non-empty value of an environment variable
fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Combine flags with `ADDRESS` and `PORT` from `env`, flags win
fn resolve_address(
    config: &Config,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<SocketAddr> {
    let address = config
        .address
        .clone()
        .or_else(|| env("ADDRESS"))
        .unwrap_or_else(|| String::from(DEFAULT_ADDRESS));

    let mut address = address
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid address {address:?}"))?;

    let port = match (config.port, env("PORT")) {
        (Some(port), _) => Some(port),
        (None, Some(port)) => Some(
            port.parse::<u16>()
                .with_context(|| format!("Invalid port {port:?}"))?,
        ),
        (None, None) => None,
    };

    if let Some(port) = port {
        address.set_port(port);
    }

    Ok(address)
}

/// The address vidsrv will bind to
pub fn setup_address(config: &Config) -> anyhow::Result<SocketAddr> {
    resolve_address(config, non_empty_env)
}

/// Resolves once SIGINT (or SIGTERM on unix) arrives
pub async fn graceful_shutdown() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("Could not listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }

            Err(err) => {
                tracing::error!("Could not listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, finishing open requests");
}
