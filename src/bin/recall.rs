//! `recall` - command line access to the hybrid index.
//!
//! Lexical search and stats work offline; indexing and semantic search
//! embed through the OpenAI API and need `OPENAI_API_KEY`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use recall_rocks::embeddings::{EmbeddingProvider, LazyEmbedder, OpenAiEmbedder};
use recall_rocks::hybrid::extract_knowledge;
use recall_rocks::types::{DocKind, IndexError, Knowledge};
use recall_rocks::{LexicalIndex, SearchFilter, SemanticIndex};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Get default index path from environment or home directory.
///
/// Resolution order:
/// 1. RECALL_DB_PATH environment variable
/// 2. RECALL_HOME/index environment variable
/// 3. ~/.recall/index (default)
fn default_index_path() -> PathBuf {
    if let Ok(db_path) = std::env::var("RECALL_DB_PATH") {
        return PathBuf::from(shellexpand::tilde(&db_path).to_string());
    }

    if let Ok(home) = std::env::var("RECALL_HOME") {
        let mut path = PathBuf::from(shellexpand::tilde(&home).to_string());
        path.push("index");
        return path;
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    let mut path = PathBuf::from(home);
    path.push(".recall");
    path.push("index");
    path
}

#[derive(Parser)]
#[command(name = "recall", about = "Hybrid search over assistant session memory")]
struct Cli {
    /// Index directory (defaults to RECALL_DB_PATH, RECALL_HOME/index, or ~/.recall/index)
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Index a knowledge entry from a JSON file (single entry or array)
    IndexKnowledge {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Search the index
    Search {
        query: String,

        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,

        /// Restrict to a document kind (session, milestone, knowledge)
        #[arg(long)]
        kind: Option<String>,

        /// Use semantic similarity instead of keyword match
        #[arg(long)]
        semantic: bool,
    },

    /// Print index statistics
    Stats,
}

/// Build the lazy embedder from environment configuration.
///
/// `RECALL_EMBED_URL` points at any OpenAI-compatible server and requires
/// `RECALL_EMBED_DIMENSIONS`; without it the hosted OpenAI API is used and
/// `OPENAI_API_KEY` must be set. `RECALL_EMBED_MODEL` applies to both.
fn embedder() -> Arc<LazyEmbedder> {
    Arc::new(LazyEmbedder::new(|| {
        let model = std::env::var("RECALL_EMBED_MODEL")
            .unwrap_or_else(|_| "text-embedding-3-small".to_string());

        let provider = match std::env::var("RECALL_EMBED_URL") {
            Ok(base_url) => {
                let dimensions = std::env::var("RECALL_EMBED_DIMENSIONS")
                    .ok()
                    .and_then(|d| d.parse().ok())
                    .ok_or_else(|| {
                        IndexError::Embedding(
                            "RECALL_EMBED_DIMENSIONS must be set alongside RECALL_EMBED_URL"
                                .to_string(),
                        )
                    })?;
                let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
                OpenAiEmbedder::with_endpoint(base_url, api_key, model, dimensions)
            }
            Err(_) => {
                let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                    IndexError::Embedding("OPENAI_API_KEY is not set".to_string())
                })?;
                OpenAiEmbedder::new(api_key, model)
            }
        };

        Ok(Arc::new(provider) as Arc<dyn EmbeddingProvider>)
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let dir = cli.path.unwrap_or_else(default_index_path);

    let lexical = Arc::new(
        LexicalIndex::open(&dir.join("lexical")).context("failed to open lexical index")?,
    );
    let semantic = SemanticIndex::new(
        &dir.join("semantic"),
        embedder(),
        Some(Arc::clone(&lexical)),
    );

    match cli.command {
        Command::IndexKnowledge { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let entries: Vec<Knowledge> = match serde_json::from_str::<Knowledge>(&raw) {
                Ok(single) => vec![single],
                Err(_) => serde_json::from_str(&raw).context("not a knowledge entry or array")?,
            };

            let mut total = 0;
            for entry in &entries {
                // Replace any prior rows for this entry before re-adding.
                semantic.delete_knowledge(&entry.id).await?;
                total += semantic.add_vectors(extract_knowledge(entry)).await?;
            }
            println!("indexed {} items from {} entries", total, entries.len());
        }

        Command::Search {
            query,
            limit,
            kind,
            semantic: use_semantic,
        } => {
            let kind = kind
                .as_deref()
                .map(|k| {
                    DocKind::parse(k)
                        .ok_or_else(|| anyhow::anyhow!("unknown kind: {} (expected session, milestone, or knowledge)", k))
                })
                .transpose()?;

            if use_semantic {
                let filter = SearchFilter {
                    kind,
                    ..SearchFilter::default()
                };
                for hit in semantic.search(&query, limit, &filter).await? {
                    println!("{:.4}  {}  {}", hit.score, hit.id, hit.text);
                }
            } else {
                for hit in lexical.search(&query, limit, kind)? {
                    println!("{:.4}  {}", hit.score, hit.id);
                }
            }
        }

        Command::Stats => {
            let lex = lexical.stats()?;
            println!(
                "lexical: {} docs, {} terms, avg length {:.1}",
                lex.doc_count, lex.term_count, lex.avg_doc_length
            );
            let by_kind = semantic.stats_by_kind().await?;
            let total: usize = by_kind.values().sum();
            println!("semantic: {} rows", total);
            let mut kinds: Vec<_> = by_kind.into_iter().collect();
            kinds.sort();
            for (kind, count) in kinds {
                println!("  {}: {}", kind, count);
            }
        }
    }

    Ok(())
}
