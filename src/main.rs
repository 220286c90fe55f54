use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use paperquery::service::QaService;
use paperquery::{api, config, logging};
use tokio::net::TcpListener;

/// Document question-answering backend.
#[derive(Debug, Parser)]
#[command(name = "paperquery", version, about)]
struct Cli {
    /// Port to bind, overriding SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
    /// Environment file to load instead of ./.env.
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match &cli.env_file {
        Some(path) => {
            dotenvy::from_path(path).unwrap_or_else(|err| {
                panic!("Failed to load env file {}: {err}", path.display());
            });
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }
    config::init_config();
    logging::init_tracing();

    let config = config::get_config();
    tracing::info!(
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        embedding_model = %config.embedding_model,
        embedding_dimension = config.embedding_dimension,
        llm_model = %config.llm_model,
        database_path = %config.database_path.display(),
        "Starting Paperquery"
    );

    let service = Arc::new(QaService::from_config(config).expect("Failed to initialize services"));

    let collection = service.settings().collection.clone();
    let dimension = service.settings().embedding_dimension as u64;
    if let Err(err) = service.qdrant().ensure_collection(&collection, dimension).await {
        tracing::warn!(error = %err, "Vector store not ready at startup; continuing");
    }
    match service.reconcile_upload_dir() {
        Ok(0) => {}
        Ok(dropped) => tracing::info!(dropped, "Dropped file rows with missing bytes"),
        Err(err) => tracing::warn!(error = %err, "Upload directory reconciliation failed"),
    }

    let app = api::create_router(service);

    let (listener, port) = bind_listener(cli.port).await.expect("Failed to bind listener");
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

/// Bind the requested port, or walk forward from it until a free one is found.
async fn bind_listener(override_port: Option<u16>) -> Result<(TcpListener, u16), std::io::Error> {
    let config = config::get_config();
    let base = override_port.or(config.server_port).unwrap_or(8000);
    let end = base.saturating_add(99);

    for port in base..=end {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                if port != base {
                    tracing::debug!(port, "Preferred port busy; bound fallback");
                }
                return Ok((listener, port));
            }
            Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
                tracing::debug!(port, "Port already in use; trying next");
                continue;
            }
            Err(err) => return Err(err),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AddrNotAvailable,
        format!("No available port found in range {base}-{end}"),
    ))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "Failed to listen for shutdown signal"),
    }
}
