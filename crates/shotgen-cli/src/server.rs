//! HTTP surface: the generation endpoint, a liveness route and static files.

use std::sync::Arc;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use shotgen_contracts::api::{GenerateResponse, ServiceInfo};
use shotgen_contracts::storage::STATIC_MOUNT;
use shotgen_engine::pipeline::ensure_image_content_type;
use shotgen_engine::{ProductShotPipeline, UploadedImage};
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::errors::{Error, Result};

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub max_upload_bytes: usize,
}

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<ProductShotPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<ProductShotPipeline>) -> Self {
        Self { pipeline }
    }
}

#[derive(Debug, Default, Deserialize)]
struct GenerateQuery {
    aspect_ratio: Option<String>,
}

/// Fields collected from the multipart body of `POST /api/generate`.
#[derive(Default)]
struct GenerateForm {
    image: Option<UploadedImage>,
    prompt: Option<String>,
    aspect_ratio: Option<String>,
}

pub fn build_router(state: AppState, options: &ServerOptions) -> anyhow::Result<Router> {
    let static_files = ServeDir::new(state.pipeline.layout().root());
    Ok(Router::new()
        .route("/", get(read_root))
        .route("/api/generate", post(generate_product_shot))
        .nest_service(STATIC_MOUNT, static_files)
        .layer(DefaultBodyLimit::max(options.max_upload_bytes))
        .layer(create_cors_layer(&options.cors_origins)?)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

pub async fn serve(pipeline: Arc<ProductShotPipeline>, options: ServerOptions) -> anyhow::Result<()> {
    let router = build_router(AppState::new(pipeline), &options)?;
    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(%addr, "product shot API listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated unexpectedly")
}

fn create_cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    let mut allowed = Vec::new();
    for origin in origins {
        let value = origin
            .trim()
            .parse::<HeaderValue>()
            .with_context(|| format!("invalid CORS origin {origin:?}"))?;
        allowed.push(value);
    }
    Ok(CorsLayer::new()
        .allow_origin(allowed)
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

async fn read_root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

async fn generate_product_shot(
    State(state): State<AppState>,
    Query(query): Query<GenerateQuery>,
    multipart: Multipart,
) -> Result<Json<GenerateResponse>> {
    let form = read_generate_form(multipart).await?;
    let upload = form
        .image
        .ok_or_else(|| Error::bad_request("Missing form field: image"))?;
    let prompt = form
        .prompt
        .ok_or_else(|| Error::bad_request("Missing form field: prompt"))?;
    let size_param = form.aspect_ratio.or(query.aspect_ratio);

    let pipeline = Arc::clone(&state.pipeline);
    let shot = tokio::task::spawn_blocking(move || {
        pipeline.handle(upload, &prompt, size_param.as_deref())
    })
    .await
    .map_err(|err| Error::Internal {
        message: format!("generation worker failed: {err}"),
    })??;

    Ok(Json(GenerateResponse::ok(shot.image_url)))
}

async fn read_generate_form(mut multipart: Multipart) -> Result<GenerateForm> {
    let mut form = GenerateForm::default();
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().unwrap_or_default().to_string();
        match field_name.as_str() {
            "image" => {
                let content_type = field.content_type().map(str::to_string);
                // Reject before buffering the body.
                ensure_image_content_type(content_type.as_deref())?;
                let file_name = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                form.image = Some(UploadedImage {
                    bytes: bytes.to_vec(),
                    content_type,
                    file_name,
                });
            }
            "prompt" => form.prompt = Some(field.text().await?),
            "aspect_ratio" => form.aspect_ratio = Some(field.text().await?),
            other => tracing::debug!(field = other, "ignoring unknown form field"),
        }
    }
    Ok(form)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
