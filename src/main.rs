//! Trial scoring backend entrypoint wiring the REST, SSE and trial store layers.

use std::{env, net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trial_scoring_back::{
    config::AppConfig,
    dao::trial_store::{TrialStore, memory::MemoryTrialStore},
    routes,
    services::storage_supervisor,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let app_state = AppState::new(config);

    spawn_supervisor(app_state.clone())?;
    let app = build_router(app_state.clone());

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

    app_state.sync().stop(&app_state).await;
    app_state.tasks().shutdown().await;
    info!("background work drained; bye");

    Ok(())
}

/// Start the storage supervisor for the backend named by `TRIAL_STORE`.
fn spawn_supervisor(state: SharedState) -> anyhow::Result<()> {
    let backend = env::var("TRIAL_STORE").unwrap_or_else(|_| "postgrest".into());

    match backend.trim().to_ascii_lowercase().as_str() {
        "memory" => {
            warn!("using the in-memory trial store; nothing will be persisted");
            let store = MemoryTrialStore::new();
            tokio::spawn(storage_supervisor::run(state, move || {
                let store = store.clone();
                async move { Ok(Arc::new(store) as Arc<dyn TrialStore>) }
            }));
        }
        #[cfg(feature = "postgrest-store")]
        "postgrest" => {
            use trial_scoring_back::dao::{
                storage::StorageError,
                trial_store::postgrest::{PostgrestConfig, PostgrestTrialStore},
            };

            let store_config = PostgrestConfig::from_env()
                .context("reading PostgREST settings")?
                .with_poll_interval(state.config().sync_poll_interval);
            tokio::spawn(storage_supervisor::run(state, move || {
                let store_config = store_config.clone();
                async move {
                    PostgrestTrialStore::connect(store_config)
                        .await
                        .map(|store| Arc::new(store) as Arc<dyn TrialStore>)
                        .map_err(StorageError::from)
                }
            }));
        }
        other => anyhow::bail!("unsupported TRIAL_STORE `{other}`"),
    }

    Ok(())
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

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
