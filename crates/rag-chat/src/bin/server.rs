//! Chat server binary
//!
//! Run with: cargo run -p rag-chat --bin rag-chat-server -- --config rag-chat.toml

use std::path::PathBuf;

use clap::Parser;
use rag_chat::{config::RagConfig, providers, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rag-chat-server")]
#[command(about = "Question answering over a folder of Word and Excel documents", long_about = None)]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rag_chat=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                         RAG Chat                          ║
║          Questions over Word and Excel documents          ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let mut config = match &args.config {
        Some(path) => RagConfig::from_file(path)?,
        None => RagConfig::default(),
    };
    config.apply_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Documents: {}", config.documents.docs_path.display());
    tracing::info!("  - Chat model: {} ({:?})", config.llm.model, config.llm.backend);
    tracing::info!(
        "  - Embedding model: {} ({:?})",
        config.embeddings.model,
        config.embeddings.backend
    );
    tracing::info!(
        "  - Chunk size: {} (overlap {})",
        config.chunking.chunk_size,
        config.chunking.chunk_overlap
    );

    let providers = providers::build(&config)?;
    match providers.chat.health_check().await {
        Ok(true) => tracing::info!("Chat backend is running"),
        _ => tracing::warn!("Chat backend not available at {}", config.llm.base_url),
    }
    match providers.embedder.health_check().await {
        Ok(true) => tracing::info!("Embedding backend is running"),
        _ => tracing::warn!(
            "Embedding backend not available at {}",
            config.embeddings.base_url
        ),
    }

    let server = RagServer::new(config, providers);

    println!("\nServer starting...");
    println!("  Health: http://{}/health", server.address());
    println!("  Ready:  http://{}/ready", server.address());
    println!("\nEndpoints:");
    println!("  POST /chat            - Ask a question");
    println!("  POST /chat/stream     - Ask a question, answer streamed as SSE");
    println!("  GET  /chat/ws_connect - WebSocket chat session");
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
