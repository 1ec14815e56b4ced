//! Retrieve CLI - Command-line interface for the hybrid retrieval engine.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use retrieval_core::{ChunkInput, Metadata, RerankProvider, RetrievalConfig, RetrievalError};
use retrieval_embed::{HashingEmbedder, LexicalSparseEmbedder};
use retrieval_query::{RerankOptions, RetrievalOrchestrator, SearchOptions, SearchResult};
use retrieval_store::SqliteStore;

type Engine = RetrievalOrchestrator<SqliteStore, HashingEmbedder>;
type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Fragments longer than this start a new chunk.
const MAX_CHUNK_CHARS: usize = 800;

/// Retrieve - hybrid dense + sparse retrieval over a local vector store
#[derive(Parser)]
#[command(name = "retrieve")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (default: user config dir, then ./retrieval.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Collection name (overrides the config)
    #[arg(long, global = true)]
    collection: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and collection
    Init,

    /// Index a text or markdown file, or a directory of them
    Ingest {
        /// Path to file or directory
        path: PathBuf,

        /// Recursively process directories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Search the collection
    Search {
        /// Search query
        query: String,

        /// Maximum number of results
        #[arg(short = 'k', long)]
        limit: Option<usize>,

        /// Minimum score of returned results
        #[arg(long)]
        min_score: Option<f32>,

        /// Rerank the results
        #[arg(long)]
        rerank: bool,

        /// Reranking provider (cross_encoder, http_endpoint, llm_judge)
        #[arg(long)]
        provider: Option<RerankProvider>,

        /// Number of reranked results
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Check the collection schema and migrate it to hybrid if needed
    Migrate,

    /// Manage indexed documents
    Documents {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Inspect or rebuild the collection
    Collection {
        #[command(subcommand)]
        action: CollectionAction,
    },

    /// Show statistics
    Stats,
}

#[derive(Subcommand)]
enum CollectionAction {
    /// Show schema, point count and estimated size
    Info,

    /// Drop the collection and create it again, empty
    Recreate {
        /// Confirm dropping every point
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum DocumentAction {
    /// List documents
    List {
        #[arg(long, default_value = "1")]
        page: usize,

        #[arg(long, default_value = "20")]
        page_size: usize,
    },

    /// Show every chunk of the document a point belongs to
    Chunks {
        /// Point id
        id: String,
    },

    /// Delete a point
    Delete {
        /// Point id
        id: String,
    },

    /// Delete every document
    Clear {
        /// Confirm deleting every document
        #[arg(long)]
        yes: bool,
    },

    /// Write every point's payload as JSON
    Backup {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> CliResult<RetrievalConfig> {
    let mut config = match &cli.config {
        Some(path) => RetrievalConfig::load(path)?,
        None => RetrievalConfig::load_default()?,
    };
    if let Some(path) = &cli.database {
        config.store.path = path.clone();
    }
    if let Some(collection) = &cli.collection {
        config.store.collection_name = collection.clone();
    }
    Ok(config)
}

fn build_engine(config: RetrievalConfig) -> CliResult<Engine> {
    let store = SqliteStore::open(&config.store.path)?;
    let embedder = HashingEmbedder::with_dimension(config.embedding.dimension)?;

    Ok(
        RetrievalOrchestrator::builder(Arc::new(store), Arc::new(embedder), config)
            .sparse_embedder(Arc::new(LexicalSparseEmbedder::new()))
            .build(),
    )
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        match e.downcast_ref::<RetrievalError>() {
            Some(err) => eprintln!("Error [{}]: {}", err.error_code(), err),
            None => eprintln!("Error: {}", e),
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut config = load_config(&cli)?;
    if let Commands::Search { rerank: true, .. } = &cli.command {
        config.reranking.enabled = true;
    }
    let engine = build_engine(config)?;
    execute(&engine, cli.command, cli.json).await
}

fn confirm(yes: bool, action: &str) -> CliResult<()> {
    if yes {
        Ok(())
    } else {
        Err(RetrievalError::invalid_argument(format!("{action} needs --yes")).into())
    }
}

async fn execute(engine: &Engine, command: Commands, as_json: bool) -> CliResult<()> {
    match command {
        Commands::Init => {
            engine.initialize().await?;
            println!(
                "Initialized collection '{}' at: {}",
                engine.config().store.collection_name,
                engine.config().store.path.display()
            );
        }
        Commands::Ingest { path, recursive } => {
            engine.initialize().await?;
            ingest(engine, &path, recursive).await?;
        }
        Commands::Search {
            query,
            limit,
            min_score,
            rerank,
            provider,
            top_k,
        } => {
            let mut results = engine.search(&query, SearchOptions { limit, min_score }).await;
            if rerank {
                let options = RerankOptions {
                    top_k,
                    min_score: None,
                    provider,
                };
                results = engine.rerank(&query, results, &options).await;
            }
            print_results(&results, as_json)?;
        }
        Commands::Migrate => {
            let hybrid = engine.ensure_hybrid_compatible().await;
            println!(
                "Collection '{}': hybrid search {} ({} migration(s) performed)",
                engine.config().store.collection_name,
                if hybrid { "enabled" } else { "disabled" },
                engine.migration_count()
            );
        }
        Commands::Documents { action } => match action {
            DocumentAction::List { page, page_size } => {
                let listing = engine.list_documents(page, page_size).await?;
                if as_json {
                    println!("{}", serde_json::to_string_pretty(&listing)?);
                } else {
                    for doc in &listing.documents {
                        println!(
                            "{}  {} ({}, {} bytes, {} chunks)",
                            doc.id, doc.filename, doc.file_type, doc.file_size, doc.chunk_count
                        );
                    }
                    println!(
                        "\nPage {} - {} points total{}",
                        listing.page,
                        listing.total_count,
                        if listing.has_next { ", more available" } else { "" }
                    );
                }
            }
            DocumentAction::Chunks { id } => {
                let chunks = engine.get_document_chunks(&id).await?;
                if as_json {
                    println!("{}", serde_json::to_string_pretty(&chunks)?);
                } else if chunks.is_empty() {
                    println!("No chunks found for: {}", id);
                } else {
                    for chunk in &chunks {
                        let index = chunk.metadata.get("chunk_index").cloned().unwrap_or(json!(0));
                        println!("--- chunk {} ---\n{}\n", index, chunk.content);
                    }
                }
            }
            DocumentAction::Delete { id } => {
                engine.delete_document(&id).await?;
                println!("Deleted: {}", id);
            }
            DocumentAction::Clear { yes } => {
                confirm(yes, "Deleting every document")?;
                if engine.delete_all_documents().await? {
                    println!(
                        "Deleted all documents from '{}'",
                        engine.config().store.collection_name
                    );
                } else {
                    return Err("some documents could not be deleted".into());
                }
            }
            DocumentAction::Backup { output } => {
                let backup = engine.backup_metadata().await?;
                let body = serde_json::to_string_pretty(&backup)?;
                match output {
                    Some(path) => {
                        fs::write(&path, body)?;
                        println!("Backed up {} points to: {}", backup.len(), path.display());
                    }
                    None => println!("{}", body),
                }
            }
        },
        Commands::Collection { action } => match action {
            CollectionAction::Info => {
                let details = engine.collection_info().await?;
                if as_json {
                    println!("{}", serde_json::to_string_pretty(&details)?);
                } else {
                    println!("Collection:        {}", details.name);
                    println!("State:             {:?}", details.state);
                    println!(
                        "Dense vectors:     {} dims, {}",
                        details.dense_size, details.distance
                    );
                    println!(
                        "Sparse vectors:    {}",
                        details.sparse_vector.as_deref().unwrap_or("none")
                    );
                    println!("Points:            {}", details.points_count);
                    println!("Estimated size:    {:.2} MB", details.size_mb);
                }
            }
            CollectionAction::Recreate { yes } => {
                confirm(yes, "Recreating the collection")?;
                engine.recreate_collection().await?;
                println!(
                    "Recreated collection '{}'",
                    engine.config().store.collection_name
                );
            }
        },
        Commands::Stats => {
            let stats = engine.stats().await;
            if as_json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Collection:        {}", stats.collection_name);
                println!("Points:            {}", stats.points_count);
                println!("Hybrid search:     {}", stats.hybrid_search_enabled);
                println!(
                    "Fusion weights:    dense {} / sparse {}",
                    stats.dense_weight, stats.sparse_weight
                );
                println!("Reranking:         {}", stats.reranking_enabled);
                println!("Rerankers:         {}", stats.available_rerankers.join(", "));
            }
        }
    }

    Ok(())
}

fn print_results(results: &[SearchResult], as_json: bool) -> CliResult<()> {
    if as_json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (rank, result) in results.iter().enumerate() {
        let source = result
            .metadata
            .get("source_file")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        println!("{}. [{:.4}] {} ({})", rank + 1, result.score, result.id, source);
        println!("   {}\n", preview(&result.content, 200));
    }
    Ok(())
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((end, _)) => format!("{}...", &flat[..end]),
        None => flat,
    }
}

async fn ingest(engine: &Engine, path: &Path, recursive: bool) -> CliResult<()> {
    let files = collect_files(path, recursive)?;

    if files.is_empty() {
        println!("No supported files found at: {}", path.display());
        return Ok(());
    }

    println!("Ingesting {} file(s)...", files.len());

    let mut success_count = 0;
    let mut error_count = 0;

    for file_path in files {
        let bytes = match fs::read(&file_path) {
            Ok(b) => b,
            Err(e) => {
                eprintln!("  Error reading {}: {}", file_path.display(), e);
                error_count += 1;
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        let chunks = file_chunks(&file_path, &bytes, &text);
        if chunks.is_empty() {
            println!("  {} - empty, skipped", file_path.display());
            continue;
        }

        let result = match engine.embed_chunks(chunks).await {
            Ok(embedded) => engine.add_documents(embedded).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(count) => {
                println!("  {} - {} chunks", file_path.display(), count);
                success_count += 1;
            }
            Err(e) => {
                eprintln!("  {} - Error: {}", file_path.display(), e);
                error_count += 1;
            }
        }
    }

    println!(
        "\nComplete: {} succeeded, {} failed",
        success_count, error_count
    );

    Ok(())
}

fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = Vec::new();

    if path.is_file() {
        if is_supported_file(path) {
            files.push(path.to_path_buf());
        }
    } else if path.is_dir() {
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();

            if entry_path.is_file() && is_supported_file(&entry_path) {
                files.push(entry_path);
            } else if entry_path.is_dir() && recursive {
                files.extend(collect_files(&entry_path, recursive)?);
            }
        }
    }

    files.sort();
    Ok(files)
}

fn is_supported_file(path: &Path) -> bool {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    matches!(ext, "txt" | "md" | "markdown" | "text")
}

/// Build chunk inputs with the document metadata the listing reads.
fn file_chunks(path: &Path, bytes: &[u8], text: &str) -> Vec<ChunkInput> {
    let fragments = split_paragraphs(text, MAX_CHUNK_CHARS);
    let total = fragments.len();
    let file_hash = blake3::hash(bytes).to_hex().to_string();
    let loaded_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);

    let mut base = Metadata::new();
    base.insert(
        "source_file".into(),
        json!(path.file_name().and_then(|n| n.to_str()).unwrap_or("unknown")),
    );
    base.insert(
        "file_type".into(),
        json!(path.extension().and_then(|e| e.to_str()).unwrap_or("txt")),
    );
    base.insert("file_size".into(), json!(bytes.len()));
    base.insert("file_hash".into(), json!(file_hash));
    base.insert("load_timestamp".into(), json!(loaded_at));
    base.insert("total_chunks".into(), json!(total));

    fragments
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let mut metadata = base.clone();
            metadata.insert("chunk_index".into(), json!(index));
            ChunkInput { content, metadata }
        })
        .collect()
}

/// Split on blank lines, packing consecutive paragraphs up to `max_chars`.
fn split_paragraphs(text: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    let paragraphs = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty());

    for paragraph in paragraphs {
        let needed = current.chars().count() + paragraph.chars().count() + 2;
        if !current.is_empty() && needed > max_chars {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(paragraph);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_paragraphs_packs_short_paragraphs() {
        let text = "first\n\nsecond\n\n\n\nthird";
        assert_eq!(split_paragraphs(text, 100), vec!["first\n\nsecond\n\nthird"]);
        assert_eq!(split_paragraphs(text, 10), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_split_paragraphs_keeps_long_paragraph_whole() {
        let long = "가".repeat(50);
        let chunks = split_paragraphs(&format!("{long}\n\nshort"), 20);
        assert_eq!(chunks, vec![long, "short".to_string()]);
    }

    #[test]
    fn test_file_chunks_metadata() {
        let chunks = file_chunks(Path::new("/tmp/lease.md"), b"a\n\nb", "a\n\nb");
        assert_eq!(chunks.len(), 1);
        let metadata = &chunks[0].metadata;
        assert_eq!(metadata["source_file"], "lease.md");
        assert_eq!(metadata["file_type"], "md");
        assert_eq!(metadata["total_chunks"], 1);
        assert_eq!(metadata["chunk_index"], 0);
        assert_eq!(metadata["file_hash"], blake3::hash(b"a\n\nb").to_hex().to_string());
    }

    #[test]
    fn test_collect_files_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), "x").unwrap();
        fs::write(dir.path().join("b.bin"), "x").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.md"), "x").unwrap();

        assert_eq!(collect_files(dir.path(), false).unwrap().len(), 1);
        assert_eq!(collect_files(dir.path(), true).unwrap().len(), 2);
    }

    async fn temp_engine(dir: &Path) -> Engine {
        let mut config = RetrievalConfig::default();
        config.store.path = dir.join("vectors.db");
        let engine = build_engine(config).unwrap();
        engine.initialize().await.unwrap();
        engine
    }

    fn command(args: &[&str]) -> Commands {
        let argv = std::iter::once("retrieve").chain(args.iter().copied());
        Cli::try_parse_from(argv).unwrap().command
    }

    #[tokio::test]
    async fn test_documents_clear_requires_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let engine = temp_engine(dir.path()).await;
        fs::write(dir.path().join("lease.txt"), "rent cap\n\ndeposit rules").unwrap();
        ingest(&engine, &dir.path().join("lease.txt"), false).await.unwrap();

        let err = execute(&engine, command(&["documents", "clear"]), false)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<RetrievalError>().is_some());
        assert_eq!(engine.stats().await.points_count, 1);

        execute(&engine, command(&["documents", "clear", "--yes"]), false)
            .await
            .unwrap();
        assert_eq!(engine.stats().await.points_count, 0);
    }

    #[tokio::test]
    async fn test_documents_backup_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let engine = temp_engine(dir.path()).await;
        fs::write(dir.path().join("lease.md"), "rent cap").unwrap();
        ingest(&engine, &dir.path().join("lease.md"), false).await.unwrap();

        let output = dir.path().join("backup.json");
        let output_arg = output.to_str().unwrap();
        execute(&engine, command(&["documents", "backup", "-o", output_arg]), false)
            .await
            .unwrap();

        let backup: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(backup[0]["payload"]["content"], "rent cap");
        assert_eq!(backup[0]["payload"]["metadata"]["source_file"], "lease.md");
    }

    #[tokio::test]
    async fn test_collection_commands() {
        let dir = tempfile::tempdir().unwrap();
        let engine = temp_engine(dir.path()).await;

        execute(&engine, command(&["collection", "info"]), true)
            .await
            .unwrap();
        assert!(execute(&engine, command(&["collection", "recreate"]), false)
            .await
            .is_err());
        execute(&engine, command(&["collection", "recreate", "--yes"]), false)
            .await
            .unwrap();

        let details = engine.collection_info().await.unwrap();
        assert_eq!(details.points_count, 0);
        assert!(details.sparse_vector.is_some());
    }

    #[test]
    fn test_preview_truncates_on_char_boundary() {
        assert_eq!(preview("임대료  인상\n한도", 5), "임대료 인...");
        assert_eq!(preview("short", 10), "short");
    }
}
