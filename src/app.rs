use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::Method;
use axum::http::Request;
use axum::http::header::RANGE;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use humantime::format_duration;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::timeout::RequestBodyTimeoutLayer;
use tower_http::timeout::ResponseBodyTimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::Span;

use crate::config::Config;
use crate::error::AppError;
use crate::listing::list_videos;
use crate::storage::Storage;
use crate::storage::StorageError;
use crate::stream::serve_video;
use crate::upload::upload_video;

/// Everything a request needs, built once at startup and never changed afterwards
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub storage: Storage,
    pub public_url: String,
}

impl ServerState {
    /// Build the state, creating the storage directory when needed
    pub async fn from_config(config: Config, address: SocketAddr) -> Result<Self, StorageError> {
        let storage = Storage::open_root(&config.storage_dir).await?;

        let public_url = config
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{address}"));

        Ok(Self {
            config: Arc::new(config),
            storage,
            public_url,
        })
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    // validated when the config was read
    match HeaderValue::from_str(&config.cors_origin) {
        Ok(origin) => cors.allow_origin(origin),
        Err(err) => {
            tracing::warn!("Invalid CORS origin, no cross-origin requests allowed: {err}");
            cors
        }
    }
}

pub fn app(state: ServerState) -> Router {
    let cors = cors_layer(&state.config);
    let timeout = state.config.timeout;

    let router = Router::new()
        .route(
            "/upload",
            // the size limit is enforced while streaming the upload to disk
            post(upload_video).layer(DefaultBodyLimit::disable()),
        )
        .route("/videos", get(list_videos))
        .route("/videos/{filename}", get(stream_video))
        .with_state(state)
        .layer(cors)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "req",
                        status = tracing::field::Empty,
                        method = %request.method(),
                        path = &tracing::field::display(request.uri()),
                        latency = tracing::field::Empty,
                    )
                })
                .on_request(|_request: &Request<_>, _span: &Span| {
                    tracing::debug!("Incoming request");
                })
                .on_response(|response: &Response, latency: Duration, span: &Span| {
                    span.record("status", tracing::field::display(response.status()));
                    span.record("latency", format_duration(latency).to_string());

                    tracing::info!("Finished request");
                }),
        );

    match timeout {
        Some(timeout) => {
            tracing::debug!("Body timeout of {}", format_duration(timeout));

            router
                .layer(RequestBodyTimeoutLayer::new(timeout))
                .layer(ResponseBodyTimeoutLayer::new(timeout))
        }

        None => router,
    }
}

/// `GET /videos/{filename}`, with optional `Range` header
async fn stream_video(
    State(state): State<ServerState>,
    Path(filename): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let stored = state.storage.open(&filename).await?;

    serve_video(stored, headers.get(RANGE)).await
}
