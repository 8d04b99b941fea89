use std::sync::Arc;

use clap::Parser;
use regchat_core::config::VectorBackend;
use regchat_core::RegchatConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use regchat_server::http::{self, HttpState};
use regchat_server::subsystems::chat::{self, ChatService, ChatSettings};
use regchat_server::subsystems::memory;
use regchat_server::subsystems::retrieve::{self, Retriever};
use regchat_server::subsystems::sweep::MemorySweeper;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "regchat.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match RegchatConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level)),
        )
        .init();

    // Conversation store (and the pool, when there is a database)
    let (store, pool) = match memory::create_store_from_config(&config).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to initialise conversation store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match store.health().await {
            Ok(v) => println!("✅ Conversation store ({}): {}", store.name(), v),
            Err(e) => {
                println!("❌ Conversation store check failed: {}", e);
                std::process::exit(1);
            }
        }

        if config.vector_index.backend == VectorBackend::Pgvector {
            if let Some(pool) = &pool {
                match regchat_core::db::pgvector_version(pool).await {
                    Ok(Some(v)) => println!("✅ pgvector version: {}", v),
                    Ok(None) => {
                        println!("❌ pgvector extension is not installed");
                        std::process::exit(1);
                    }
                    Err(e) => {
                        println!("❌ pgvector check failed: {}", e);
                        std::process::exit(1);
                    }
                }
            }
        }

        println!("✅ Regchat health check passed");
        return Ok(());
    }

    // External clients
    let embedder = retrieve::create_embedder_from_config(&config)?;
    let index = retrieve::create_index_from_config(&config, pool).await?;
    let generator = chat::create_generator_from_config(&config)?;

    tracing::info!(
        store = store.name(),
        embedder = embedder.name(),
        index = index.name(),
        generator = generator.name(),
        session_policy = ?config.session.policy,
        "Regchat components ready"
    );

    let service = ChatService::new(
        Retriever::new(embedder, index),
        store.clone(),
        generator,
        ChatSettings::from(&config),
    );
    let state = Arc::new(HttpState::new(service, &config));

    // Shutdown signal
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal_token.cancel();
    });

    // Hourly expiry of old chat messages
    let sweeper = if config.memory.sweep_enabled {
        Some(MemorySweeper::from_config(store, &config.memory).start())
    } else {
        tracing::info!("Memory sweeper disabled");
        None
    };

    let served = http::start_http_server(state, &config.http, shutdown.clone()).await;
    shutdown.cancel();

    if let Some(sweeper) = sweeper {
        sweeper.stop().await;
    }

    served
}
