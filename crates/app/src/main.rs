use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use doc_rag_core::{
    load_text_document, DistanceMetric, Embedder, HashEmbedder, HttpEmbedder, IndexBuilder,
    MemoryVectorIndex, OpenAiChatGenerator, PipelineOptions, Retriever,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Maximum chunk size in characters.
    #[arg(long, default_value = "1000")]
    chunk_size: usize,

    /// Overlap between consecutive chunks in characters.
    #[arg(long, default_value = "200")]
    chunk_overlap: usize,

    /// Distance metric: euclidean or cosine.
    #[arg(long, default_value = "euclidean")]
    metric: String,

    /// OpenAI-compatible embeddings endpoint. Falls back to the local
    /// hashing embedder when unset.
    #[arg(long, env = "EMBED_ENDPOINT")]
    embed_endpoint: Option<String>,

    /// Embedding model name.
    #[arg(long, default_value = "text-embedding-3-small")]
    embed_model: String,

    /// Vector width expected from the embeddings endpoint.
    #[arg(long, default_value = "1536")]
    embed_dimensions: usize,

    /// API key for the embeddings endpoint.
    #[arg(long, env = "EMBED_API_KEY", hide_env_values = true)]
    embed_api_key: Option<String>,

    /// Timeout for external calls, in seconds.
    #[arg(long, default_value = "30")]
    request_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Chunk and embed a document, then save the index snapshot.
    Index {
        /// Plain-text document; form feed characters separate pages.
        #[arg(long)]
        input: PathBuf,
        /// Where to write the index snapshot.
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Retrieve the chunks nearest to a query.
    Query {
        /// Index snapshot written by `index`.
        #[arg(long)]
        snapshot: PathBuf,
        /// Query text.
        #[arg(long)]
        query: String,
        /// Number of chunks to return.
        #[arg(long, default_value = "4")]
        top_k: usize,
        /// Print distances next to each hit.
        #[arg(long, default_value_t = false)]
        show_scores: bool,
    },
    /// Retrieve context and generate a grounded answer.
    Ask {
        /// Index snapshot written by `index`.
        #[arg(long)]
        snapshot: PathBuf,
        /// Question to answer.
        #[arg(long)]
        question: String,
        /// Number of context chunks to retrieve.
        #[arg(long, default_value = "4")]
        top_k: usize,
        /// OpenAI-compatible chat completions endpoint.
        #[arg(long, env = "ANSWER_ENDPOINT")]
        answer_endpoint: String,
        /// Generation model name.
        #[arg(long, default_value = "gpt-4o-mini")]
        answer_model: String,
        /// API key for the answer endpoint.
        #[arg(long, env = "ANSWER_API_KEY", hide_env_values = true)]
        answer_api_key: Option<String>,
    },
}

fn pipeline_options(cli: &Cli) -> anyhow::Result<PipelineOptions> {
    let metric: DistanceMetric = cli.metric.parse()?;
    let options = PipelineOptions {
        chunk_size: cli.chunk_size,
        chunk_overlap: cli.chunk_overlap,
        metric,
        request_timeout: Duration::from_secs(cli.request_timeout_secs),
        ..PipelineOptions::default()
    };
    options.validate()?;
    Ok(options)
}

fn build_embedder(cli: &Cli, options: &PipelineOptions) -> anyhow::Result<Arc<dyn Embedder>> {
    match &cli.embed_endpoint {
        Some(endpoint) => {
            let embedder = HttpEmbedder::new(
                endpoint,
                cli.embed_model.as_str(),
                cli.embed_api_key.clone(),
                cli.embed_dimensions,
                options.request_timeout,
                options.max_retries,
            )?;
            info!(endpoint = %endpoint, model = %cli.embed_model, "using remote embedder");
            Ok(Arc::new(embedder))
        }
        None => {
            info!("no embeddings endpoint configured, using local hashing embedder");
            Ok(Arc::new(HashEmbedder::default()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let options = pipeline_options(&cli)?;
    let embedder = build_embedder(&cli, &options)?;

    match cli.command {
        Command::Index { input, snapshot } => {
            let document = load_text_document(&input)?;
            info!(
                document_id = %document.document_id,
                pages = document.pages.len(),
                "loaded document"
            );

            let builder = IndexBuilder::new(Arc::clone(&embedder), options.clone())?;
            let index = MemoryVectorIndex::new(options.metric);
            let report = builder.build_into(&document, &index).await?;
            index.save_snapshot(&snapshot).await?;

            println!(
                "{} chunks from {} page(s) indexed at {} (dimensions={})",
                report.chunk_count,
                report.page_count,
                Utc::now().to_rfc3339(),
                report.dimensions
            );
            println!("snapshot written to {}", snapshot.display());
        }
        Command::Query {
            snapshot,
            query,
            top_k,
            show_scores,
        } => {
            let index = MemoryVectorIndex::load_snapshot(&snapshot).await?;
            info!(entries = index.len().await, "loaded snapshot");

            let retriever = Retriever::new(embedder, Arc::new(index), options)?;
            let hits = retriever.retrieve(&query, top_k).await?;

            println!("query: {query}");
            for hit in hits {
                if show_scores {
                    println!(
                        "[{}] page={} distance={:.4}",
                        hit.chunk.sequence_index, hit.chunk.page_index, hit.score
                    );
                } else {
                    println!("[{}] page={}", hit.chunk.sequence_index, hit.chunk.page_index);
                }
                println!("  {}", hit.chunk.text);
            }
        }
        Command::Ask {
            snapshot,
            question,
            top_k,
            answer_endpoint,
            answer_model,
            answer_api_key,
        } => {
            let index = MemoryVectorIndex::load_snapshot(&snapshot).await?;
            info!(entries = index.len().await, "loaded snapshot");

            let generator = OpenAiChatGenerator::new(
                &answer_endpoint,
                answer_model.as_str(),
                answer_api_key,
                options.request_timeout,
            )?;
            let retriever = Retriever::new(embedder, Arc::new(index), options)?;
            let grounded = retriever.answer(&generator, &question, top_k).await?;

            println!("question: {question}");
            println!("answer:\n{}", grounded.answer);
            println!("sources:");
            for hit in grounded.sources {
                println!(
                    "  [{}] page={} distance={:.4}",
                    hit.chunk.sequence_index, hit.chunk.page_index, hit.score
                );
            }
        }
    }

    Ok(())
}
