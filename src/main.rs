use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mentor::cache::QueryCache;
use mentor::config::AppConfig;
use mentor::{routes, upstream, AppState};

const CACHE_SWEEP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::new()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let advisor_client = upstream::advisor_client(&config);

    let state = Arc::new(AppState {
        pool,
        http_client: reqwest::Client::new(),
        advisor_client,
        cache: QueryCache::new(),
        config,
    });

    // Periodic cleanup sweep; duplicate sweeps are harmless.
    let sweep_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            sweep_state.cache.clear_expired().await;
        }
    });

    info!("Starting advising gateway on 0.0.0.0:8080");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(state.clone()))
            .service(routes::chat::chat)
            .service(routes::rag::rag_query)
            .service(routes::cache::cache_service)
            .service(
                web::scope("/conversations")
                    .service(routes::chat::autorename_conversation)
                    .service(routes::chat::update_conversation)
                    .service(routes::chat::delete_conversation)
                    .service(routes::chat::list_messages),
            )
    })
    .bind(("0.0.0.0", 8080))?
    .run()
    .await?;

    Ok(())
}
