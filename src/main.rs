#![forbid(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![doc = include_str!("../README.md")]

use std::process::exit;

use tokio::net::TcpListener;

use crate::app::ServerState;
use crate::app::app;
use crate::config::Config;
use crate::utils::graceful_shutdown;
use crate::utils::setup_address;

mod app;
mod catalog;
mod config;
mod error;
mod listing;
mod range;
mod storage;
mod stream;
mod upload;
mod utils;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("Could not handle arguments: {err}");
            exit(1);
        }
    };

    let address = match setup_address(&config) {
        Ok(address) => address,
        Err(err) => {
            tracing::error!("Could not process address: {err}");
            exit(1);
        }
    };

    let state = match ServerState::from_config(config, address).await {
        Ok(state) => state,
        Err(err) => {
            tracing::error!("Could not open storage: {err}");
            exit(1);
        }
    };

    let listener = match TcpListener::bind(address).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!("Could not listen on address {address}: {err}");
            exit(1);
        }
    };

    tracing::info!("vidsrv is starting");
    tracing::info!(
        "Serving videos from {:?} on http://{address}, playback URLs start with {}",
        state.storage.root(),
        state.public_url
    );
    tracing::info!(
        "Accepting uploads smaller than {} bytes, cross-origin requests from {}",
        state.config.max_upload_size,
        state.config.cors_origin
    );

    axum::serve(listener, app(state).into_make_service())
        .with_graceful_shutdown(graceful_shutdown())
        .await?;

    Ok(())
}
