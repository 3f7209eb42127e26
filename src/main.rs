use anyhow::{Context, Result};
use docrelay::{
    api, config,
    embedding::{self, EmbeddingClient},
    ingestion::{IngestionService, PopplerExtractor},
    logging,
    qdrant::QdrantStore,
};
use std::sync::Arc;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();

    let embedder: Arc<dyn EmbeddingClient> = Arc::from(
        embedding::build_embedding_client(config).context("failed to build embedding client")?,
    );
    let store = Arc::new(
        QdrantStore::from_config(config, embedder).context("failed to configure Qdrant client")?,
    );
    store
        .ensure_collection()
        .await
        .context("failed to ensure Qdrant collection exists")?;

    let settings = config.ingestion_settings();
    let extractor = Arc::new(PopplerExtractor::new(&settings));
    let service = IngestionService::new(settings, extractor, store.clone())
        .context("invalid ingestion settings")?
        .with_retriever(store)
        .with_search_limits(config.search_default_limit, config.search_max_limit);

    let app = api::create_router(Arc::new(service), config.max_upload_bytes);

    let (listener, port) = bind_listener().await.context("failed to bind listener")?;
    tracing::info!("Listening on http://0.0.0.0:{}", port);
    axum::serve(listener, app).await.context("HTTP server stopped")?;
    Ok(())
}

async fn bind_listener() -> Result<(TcpListener, u16), std::io::Error> {
    use std::net::Ipv4Addr;

    let config = config::get_config();
    if let Some(port) = config.server_port {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))
            .await
            .map(|listener| (listener, port));
    }

    const PORT_RANGE: std::ops::RangeInclusive<u16> = 4100..=4199;
    for port in PORT_RANGE {
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => {
                tracing::debug!(port, "Bound server port");
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
        "No available port found in range 4100-4199",
    ))
}
