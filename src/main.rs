mod api;
mod config;
mod error;
mod models;
mod services;
mod state;

use crate::config::Config;
use crate::services::auth::AuthService;
use crate::services::{MetadataStore, ObjectStore, ObjectStoreLoader, Orchestrator, TtsClient};
use crate::state::AppState;
use axum::{
    http::{header, Method},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,audiobook_stream=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    tracing::info!("configuration loaded");

    let store = ObjectStore::from_config(&config).await;
    tracing::info!(bucket = %config.s3_bucket, "object store configured");

    let auth_service = AuthService::new(&config);
    let tts = Arc::new(TtsClient::new(&config));
    let metadata = Arc::new(MetadataStore::new(store.clone()));
    let story_loader = Arc::new(ObjectStoreLoader::new(store.clone()));

    let orchestrator = Orchestrator::new(
        config.clone(),
        store.clone(),
        tts.clone(),
        metadata.clone(),
        story_loader.clone(),
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        auth_service,
        store,
        tts,
        metadata,
        story_loader,
        orchestrator,
    });

    let cors_origins = config.cors_origins.clone();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            cors_origins
                .iter()
                .filter_map(|origin| origin.parse().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let app = Router::new()
        .nest("/api/v1", api::audio_routes())
        .with_state(app_state)
        .layer(CompressionLayer::new())
        .layer(cors);

    let addr = format!("{}:{}", config.server_host, config.server_port);
    tracing::info!(%addr, "starting server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
