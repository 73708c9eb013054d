//! RuntimeScope collector entry point: reads environment configuration,
//! wires the registry, stores, ingest server, session manager, and HTTP
//! facade together, and drains everything on a single shutdown signal.
//!
//! Grounded on the teacher's `services/realtime_communication/src/main.rs`
//! shape (tracing init, `env::var(..).unwrap_or_else(..)` reads, component
//! construction, `HttpServer::bind`), extended with the ingest TCP accept
//! loop and a shared cancellation token per the concurrency model.

use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use rts_api::{routes, AppState};
use rts_core::CollectorConfig;
use rts_ingest::IngestServer;
use rts_session::SessionManager;
use rts_store::{MemoryStore, Registry};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DURABLE_LOG_FLUSH_TICK: Duration = Duration::from_millis(100);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting RuntimeScope collector");

    let config = CollectorConfig::from_env();
    let shutdown = CancellationToken::new();

    let registry = Arc::new(Registry::new(Registry::default_root()));
    registry.ensure_global_dir().await.map_err(to_io_error)?;

    let memory = Arc::new(MemoryStore::new(config.buffer_size));
    let ingest = Arc::new(IngestServer::new(registry.clone(), memory.clone()));
    let sessions = Arc::new(SessionManager::new(memory.clone()));

    spawn_flush_timer(ingest.clone(), shutdown.clone());

    let ingest_task = {
        let ingest = ingest.clone();
        let shutdown = shutdown.clone();
        let port = config.ingest_port;
        tokio::spawn(async move {
            if let Err(e) = ingest.run(port, shutdown).await {
                tracing::error!(error = %e, "ingest server exited with an error");
            }
        })
    };

    let app_state = web::Data::new(AppState::new(registry, memory, ingest, sessions));
    let http_port = config.http_port;

    info!(port = config.ingest_port, "ingest server listening");
    info!(port = http_port, "http facade listening");

    let server = HttpServer::new(move || {
        let cors = Cors::default().allow_any_origin().allow_any_method().allow_any_header().max_age(3600);

        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .configure(routes::configure)
    })
    .bind(("127.0.0.1", http_port))?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }

    server_handle.stop(true).await;
    let _ = server_task.await;
    tokio::time::timeout(SHUTDOWN_GRACE, ingest_task).await.ok();

    Ok(())
}

/// Periodically flushes every durable log the ingest server has opened so
/// a batch that never reaches its size threshold still lands on disk
/// within one tick.
fn spawn_flush_timer(ingest: Arc<IngestServer>, shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(DURABLE_LOG_FLUSH_TICK);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    for entry in ingest.durable_logs.iter() {
                        entry.value().flush_tick().await;
                    }
                    break;
                }
                _ = interval.tick() => {
                    for entry in ingest.durable_logs.iter() {
                        entry.value().flush_tick().await;
                    }
                }
            }
        }
    });
}

fn to_io_error(error: rts_core::CollectorError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, error.to_string())
}
