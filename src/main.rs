use std::sync::Arc;

use anyhow::Context;
use tokio::signal;

use viib_ingest::{
    api::{create_router, AppState},
    config::Config,
    db::{create_pool, PgStore},
    logging::init_tracing,
    services::{
        catalog::TmdbClient,
        dispatch::HttpDispatcher,
        video_search::{VideoSearch, YoutubeClient},
        Pipeline,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing();

    let pool = create_pool(&config.database_url, config.db_max_connections)
        .await
        .context("failed to connect to database")?;
    let store = PgStore::new(pool);
    store.migrate().await.context("failed to run migrations")?;

    let http_client = reqwest::Client::new();
    let catalog = TmdbClient::new(
        http_client.clone(),
        config.tmdb_api_key.clone(),
        config.tmdb_api_url.clone(),
    );
    let video_search = config.youtube_api_key.clone().map(|key| {
        Arc::new(YoutubeClient::new(
            http_client.clone(),
            key,
            config.youtube_api_url.clone(),
        )) as Arc<dyn VideoSearch>
    });
    if video_search.is_none() {
        tracing::warn!("No YouTube key configured, trailers come from the catalog only");
    }
    let dispatcher = HttpDispatcher::new(
        http_client,
        config.functions_base_url.clone(),
        config.service_role_key.clone(),
    );

    let pipeline = Pipeline::new(
        Arc::new(store),
        Arc::new(catalog),
        video_search,
        Arc::new(dispatcher),
    );
    let app = create_router(AppState::new(pipeline));

    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("failed to bind {}", bind_address))?;
    tracing::info!(%bind_address, "Ingestion service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for ctrl-c");
    }
    tracing::info!("Shutting down");
}
