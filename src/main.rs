mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use sibyl_gateway::{Gateway, HttpTransport, KeyPool};
use sibyl_memory::{
    DocumentId, InMemoryVectorIndex, QdrantVectorIndex, SearchFilters, SqliteStore, VectorIndex,
};
use sibyl_retrieval::{
    DocumentIndexer, HybridRetriever, IndexInput, QueryRewriter, SearchRequest,
};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "sibyl", about = "Hybrid retrieval engine with a multi-key LLM gateway")]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "sibyl.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index text files into a collection.
    Index {
        files: Vec<PathBuf>,
        #[arg(long, default_value = "default")]
        collection: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        author: Option<String>,
    },
    /// Hybrid search across collections.
    Search {
        query: Vec<String>,
        #[arg(long = "collection", default_value = "default")]
        collections: Vec<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        author: Option<String>,
        /// Unix-seconds floor on document age.
        #[arg(long)]
        after: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
        /// Rewrite the query into a standalone form first.
        #[arg(long)]
        rewrite: bool,
    },
    /// List recent documents matching filters, no relevance ranking.
    Browse {
        #[arg(long, default_value = "default")]
        collection: String,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        author: Option<String>,
        #[arg(long)]
        after: Option<i64>,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Remove a document from both stores.
    Delete {
        id: String,
        #[arg(long, default_value = "default")]
        collection: String,
    },
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;

    if config.gateway.api_keys.is_empty() {
        bail!("no API keys configured; set SIBYL_API_KEYS or [gateway] api_keys");
    }

    let store = SqliteStore::new(&config.storage.sqlite_path)
        .await
        .context("failed to open SQLite store")?;
    let vectors: Arc<dyn VectorIndex> = match config.storage.qdrant_url {
        Some(ref url) => {
            Arc::new(QdrantVectorIndex::new(url).context("failed to connect to Qdrant")?)
        }
        None => {
            tracing::warn!("no qdrant_url configured, vectors are in-memory only");
            Arc::new(InMemoryVectorIndex::new())
        }
    };

    let pool = KeyPool::new(config.gateway.api_keys.clone(), config.pool_config())?;
    let transport = HttpTransport::new(config.gateway.base_url.clone());
    let gateway = Arc::new(Gateway::new(transport, pool, config.gateway_config()));

    match cli.command {
        Command::Index {
            files,
            collection,
            category,
            author,
        } => {
            let indexer = Arc::new(DocumentIndexer::new(
                store,
                vectors,
                gateway,
                config.indexer_config(),
            ));
            let mut inputs = Vec::with_capacity(files.len());
            for path in files {
                let body = std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let title = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string());
                inputs.push(IndexInput {
                    id: None,
                    collection: collection.clone(),
                    title,
                    category: category.clone(),
                    author: author.clone(),
                    created_at: file_mtime(&path),
                    metadata: serde_json::json!({ "path": path.display().to_string() }),
                    body,
                });
            }
            let report = indexer.index_documents(inputs).await;
            println!(
                "indexed {} documents ({} chunks), skipped {}, {} failed",
                report.documents_indexed,
                report.chunks_written,
                report.documents_skipped,
                report.errors.len()
            );
            for (title, err) in &report.errors {
                eprintln!("  {title}: {err}");
            }
        }
        Command::Search {
            query,
            collections,
            category,
            author,
            after,
            limit,
            rewrite,
        } => {
            let mut query = query.join(" ");
            if rewrite {
                let rewriter = QueryRewriter::new(Arc::clone(&gateway), config.rewrite_config());
                query = rewriter.rewrite(&query, "operator", &[]).await;
                tracing::info!(%query, "rewritten query");
            }
            let retriever = Arc::new(HybridRetriever::new(
                store,
                vectors,
                gateway,
                config.search_config(),
            ));
            let request = SearchRequest {
                query,
                collections,
                filters: SearchFilters {
                    category,
                    author,
                    created_after: after,
                },
                limit,
            };
            for passage in retriever.search(&request).await {
                println!(
                    "[{:.4}] {} ({}, {})",
                    passage.score, passage.title, passage.collection, passage.parent_id
                );
                println!("{}\n", passage.content);
            }
        }
        Command::Browse {
            collection,
            category,
            author,
            after,
            limit,
        } => {
            let filters = SearchFilters {
                category,
                author,
                created_after: after,
            };
            for doc in store.browse(&collection, &filters, limit).await? {
                println!("{}  {}  {}", doc.id, doc.created_at, doc.title);
            }
        }
        Command::Delete { id, collection } => {
            let id = DocumentId::parse(&id).context("invalid document id")?;
            let indexer = Arc::new(DocumentIndexer::new(
                store,
                vectors,
                gateway,
                config.indexer_config(),
            ));
            if indexer.delete_document(&collection, id).await? {
                println!("deleted {id}");
            } else {
                println!("not found: {id}");
            }
        }
    }

    Ok(())
}

fn file_mtime(path: &std::path::Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .and_then(|d| i64::try_from(d.as_secs()).ok())
        .unwrap_or_default()
}
