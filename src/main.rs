//! Odd One Out Back binary entrypoint wiring REST, WebSocket, the phase scheduler and storage.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use odd_one_out_back::{
    config::AppConfig,
    content::QuestionCatalog,
    dao::room_store::{InMemoryRoomStore, RoomStore},
    routes,
    services::scheduler::PhaseScheduler,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let catalog = QuestionCatalog::load(&config.questions_path);
    let store = build_store().await?;

    let app_state = AppState::new(config, catalog, store);

    let scheduler = PhaseScheduler::new(app_state.clone()).spawn();
    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    scheduler.abort();
    Ok(())
}

/// Pick the storage backend: MongoDB when compiled in and `MONGO_URI` is set, memory otherwise.
#[cfg(feature = "mongo-store")]
async fn build_store() -> anyhow::Result<Arc<dyn RoomStore>> {
    use odd_one_out_back::dao::room_store::mongodb::{MongoConfig, MongoRoomStore};

    let Ok(uri) = env::var("MONGO_URI") else {
        info!("MONGO_URI not set; using in-memory room store");
        return Ok(Arc::new(InMemoryRoomStore::new()));
    };
    let db_name = env::var("MONGO_DB").ok();

    let config = MongoConfig::from_uri(&uri, db_name.as_deref())
        .await
        .context("parsing MongoDB configuration")?;
    let store = MongoRoomStore::connect(config)
        .await
        .context("connecting to MongoDB")?;
    info!("connected to MongoDB room store");
    Ok(Arc::new(store))
}

#[cfg(not(feature = "mongo-store"))]
async fn build_store() -> anyhow::Result<Arc<dyn RoomStore>> {
    if env::var_os("MONGO_URI").is_some() {
        warn!("MONGO_URI is set but the `mongo-store` feature is disabled; using in-memory room store");
    }
    Ok(Arc::new(InMemoryRoomStore::new()))
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
