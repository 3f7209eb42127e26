//! Command-line ingestion and retrieval against the configured Qdrant collection.
//!
//! Shares configuration (`.env` / environment) with the HTTP server. Progress events are printed
//! as they arrive; Ctrl-C cancels the document currently being ingested.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use docrelay::{
    config::{self, Config},
    embedding::{self, EmbeddingClient},
    ingestion::{
        IngestionService, PopplerExtractor, ProcessingStatus, SearchRequest, StatusKind,
        UploadOutcome, UploadRequest, sanitize::file_stem, storage::copy_with_timestamp,
    },
    logging,
    qdrant::{QdrantStore, SearchFilterArgs},
};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(
    name = "docrelay-cli",
    about = "Ingest PDFs into the docrelay vector store and query it"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a single PDF in place.
    Upload {
        #[arg(long, short)]
        file: PathBuf,
        /// Title stored with every chunk; defaults to the file name.
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        /// Drop and recreate the collection first.
        #[arg(long, short)]
        reinit: bool,
    },
    /// Copy every PDF in a directory into the upload dir and ingest it.
    BatchUpload {
        #[arg(long, short)]
        directory: PathBuf,
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        #[arg(long, short)]
        reinit: bool,
        /// Descend into subdirectories.
        #[arg(long)]
        recursive: bool,
    },
    /// Print the chunks closest to a query.
    Search {
        query: String,
        #[arg(long, short)]
        limit: Option<usize>,
        #[arg(long = "tag", short = 't')]
        tags: Vec<String>,
        #[arg(long)]
        title: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    config::init_config();
    logging::init_tracing();
    let config = config::get_config();
    let (service, store) = build_service(config)?;

    match cli.command {
        Command::Upload {
            file,
            title,
            source,
            tags,
            reinit,
        } => {
            prepare_collection(&store, reinit).await?;
            let request = UploadRequest {
                title: title.unwrap_or_else(|| file_stem(&file)),
                source,
                tags,
            };
            let outcome = ingest_with_progress(&service, &file, request).await?;
            println!(
                "Uploaded {}: {} chunks from {} pages ({} skipped)",
                file.display(),
                outcome.persisted_chunks,
                outcome.summary.total_pages,
                outcome.summary.skipped_pages
            );
        }
        Command::BatchUpload {
            directory,
            tags,
            reinit,
            recursive,
        } => {
            prepare_collection(&store, reinit).await?;
            batch_upload(&service, &directory, &config.upload_dir, tags, recursive).await?;
        }
        Command::Search {
            query,
            limit,
            tags,
            title,
        } => {
            let hits = service
                .search(SearchRequest {
                    query,
                    limit,
                    filter: SearchFilterArgs { tags, title },
                })
                .await?;
            if hits.is_empty() {
                println!("No matching chunks.");
            }
            for hit in hits {
                println!(
                    "{:.3}  {} (page {}/{})",
                    hit.score, hit.payload.title, hit.payload.page_num, hit.payload.total_pages
                );
                println!("    {}", hit.payload.content.replace('\n', " "));
            }
        }
    }

    Ok(())
}

fn build_service(config: &Config) -> Result<(IngestionService, Arc<QdrantStore>)> {
    let embedder: Arc<dyn EmbeddingClient> = Arc::from(
        embedding::build_embedding_client(config).context("failed to build embedding client")?,
    );
    let store = Arc::new(
        QdrantStore::from_config(config, embedder).context("failed to configure Qdrant client")?,
    );
    let settings = config.ingestion_settings();
    let extractor = Arc::new(PopplerExtractor::new(&settings));
    let service = IngestionService::new(settings, extractor, store.clone())
        .context("invalid ingestion settings")?
        .with_retriever(store.clone())
        .with_search_limits(config.search_default_limit, config.search_max_limit);
    Ok((service, store))
}

async fn prepare_collection(store: &QdrantStore, reinit: bool) -> Result<()> {
    if reinit {
        store
            .recreate_collection()
            .await
            .context("failed to reinitialize collection")?;
        println!("Recreated collection {}", store.collection().name());
    } else {
        store
            .ensure_collection()
            .await
            .context("failed to ensure collection exists")?;
    }
    Ok(())
}

async fn batch_upload(
    service: &IngestionService,
    directory: &Path,
    upload_dir: &Path,
    tags: Vec<String>,
    recursive: bool,
) -> Result<()> {
    let max_depth = if recursive { usize::MAX } else { 1 };
    let files: Vec<PathBuf> = WalkDir::new(directory)
        .max_depth(max_depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(err) => {
                eprintln!("Skipping unreadable entry: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();

    if files.is_empty() {
        bail!("no PDF files found in {}", directory.display());
    }

    let mut failures = 0usize;
    for source in &files {
        let timestamp = OffsetDateTime::now_utc().unix_timestamp();
        let stored = match copy_with_timestamp(source, upload_dir, timestamp).await {
            Ok(path) => path,
            Err(err) => {
                eprintln!("Failed to copy {}: {err}", source.display());
                failures += 1;
                continue;
            }
        };

        let request = UploadRequest {
            title: file_stem(source),
            source: Some(source.display().to_string()),
            tags: tags.clone(),
        };
        match ingest_with_progress(service, &stored, request).await {
            Ok(outcome) => println!(
                "Uploaded {}: {} chunks",
                source.display(),
                outcome.persisted_chunks
            ),
            Err(err) => {
                eprintln!("Failed to upload {}: {err:#}", source.display());
                failures += 1;
            }
        }
    }

    println!(
        "Batch finished: {} uploaded, {} failed",
        files.len() - failures,
        failures
    );
    if failures > 0 {
        bail!("{failures} of {} documents failed", files.len());
    }
    Ok(())
}

async fn ingest_with_progress(
    service: &IngestionService,
    path: &Path,
    request: UploadRequest,
) -> Result<UploadOutcome> {
    let (tx, mut rx) = mpsc::channel::<ProcessingStatus>(32);
    let printer = tokio::spawn(async move {
        while let Some(status) = rx.recv().await {
            print_status(&status);
        }
    });

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let result = service.ingest_file(path, request, &tx, cancel).await;
    ctrl_c.abort();
    drop(tx);
    let _ = printer.await;

    result.with_context(|| format!("failed to ingest {}", path.display()))
}

fn print_status(status: &ProcessingStatus) {
    let label = match status.status {
        StatusKind::Processing => "processing",
        StatusKind::Completed => "completed",
        StatusKind::Failed => "failed",
    };
    println!(
        "[{:>3.0}%] {label:<10} {}",
        status.progress * 100.0,
        status.message
    );
}
