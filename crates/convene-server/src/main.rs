mod config;

use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use convene_api::geocode::Geocoder;
use convene_api::identity::Identity;
use convene_api::uploads::ImageStore;
use convene_api::{AppState, AppStateInner, build_router};
use convene_db::Store;
use convene_types::ADMIN_USERNAME;

use crate::config::ServerConfig;

const DEV_USERS: &[&str] = &[ADMIN_USERNAME, "Mitsu", "Zine", "Kat"];
const DEV_PASSWORD: &str = "123";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "convene=debug,convene_api=debug,convene_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = ServerConfig::from_env()?;

    // The PostgreSQL client blocks, so it is opened off the runtime threads.
    let target = config.database.clone();
    let store = tokio::task::spawn_blocking(move || convene_db::open_store(&target))
        .await?
        .context("failed to open the database")?;

    if config.seed_dev_users {
        let seed_store = Arc::clone(&store);
        tokio::task::spawn_blocking(move || seed_dev_users(seed_store.as_ref())).await?;
    }

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("failed to create {}", config.upload_dir.display()))?;

    let state: AppState = Arc::new(AppStateInner {
        store,
        geocoder: Geocoder::new(config.geocoder_url.clone())?,
        images: ImageStore::new(config.upload_dir.clone(), config.public_url.clone()),
    });

    let app = build_router(Arc::clone(&state))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .nest_service("/uploads", ServeDir::new(&config.upload_dir))
        .layer(cors_layer(&config.allowed_origins)?)
        .layer(TraceLayer::new_for_http());

    let addr = config.bind_addr()?;
    info!("Convene server listening on {}", addr);
    info!("Public URL: {}", config.public_url);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release the last store handle where blocking is allowed.
    tokio::task::spawn_blocking(move || drop(state)).await?;
    info!("Shutdown complete");

    Ok(())
}

fn seed_dev_users(store: &dyn Store) {
    let identity = Identity::new(store);
    for username in DEV_USERS {
        match identity.seed_user(username, DEV_PASSWORD) {
            Ok(()) => info!("Seeded dev user {}", username),
            Err(e) => warn!("Failed to seed dev user {}: {}", username, e),
        }
    }
}

/// An empty allow-list accepts any origin.
fn cors_layer(origins: &[String]) -> anyhow::Result<CorsLayer> {
    if origins.is_empty() {
        return Ok(CorsLayer::permissive());
    }

    let origins = origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o).with_context(|| format!("invalid CORS origin: {o}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    info!("CORS restricted to {} origin(s)", origins.len());

    // Credentialed requests cannot use wildcard methods or headers.
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
