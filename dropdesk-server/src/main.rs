use std::sync::Arc;

use clap::Parser;
use dropdesk_core::llm::ChatOptions;
use dropdesk_core::seed::seed_agents;
use dropdesk_core::{AgentRegistry, AgentService, DropdeskConfig, MemorySessionStore, SessionStore};
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use dropdesk_server::http::{self, HttpState};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "dropdesk.toml")]
    config: String,

    /// Check the database connection and exit
    #[arg(long)]
    health: bool,

    /// Create the schema, seed one session per agent type and exit
    #[arg(long)]
    seed: bool,

    /// Run against an in-memory store (no database)
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience; production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = if args.memory {
        DropdeskConfig::in_memory()
    } else {
        match DropdeskConfig::load(&args.config) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {}", args.config, e);
                std::process::exit(1);
            }
        }
    };

    // Init logging
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(config.service.level().into()))
        .init();

    if args.health {
        let pool = match dropdesk_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to connect to database: {}", e);
                std::process::exit(1);
            }
        };
        match dropdesk_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ PostgreSQL connected: {}", v),
            Err(e) => {
                println!("❌ PostgreSQL connection failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Dropdesk DB health check passed");
        return Ok(());
    }

    let store: Arc<dyn SessionStore> = if args.memory {
        tracing::warn!("Using in-memory session store; state is lost on exit");
        Arc::new(MemorySessionStore::new())
    } else {
        match dropdesk_core::db::open_store(&config.database).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                eprintln!("Failed to open session store: {}", e);
                std::process::exit(1);
            }
        }
    };

    let registry = AgentRegistry::with_defaults();

    if args.seed || config.database.seed_on_start {
        let report = seed_agents(store.as_ref(), &registry).await?;
        if args.seed {
            println!(
                "✅ Seeded agents: {} created, {} updated",
                report.created, report.updated
            );
            return Ok(());
        }
    }

    let llm = dropdesk_core::create_client(&config.llm);
    tracing::info!(llm = llm.name(), model = %config.llm.model, "Completion client ready");

    let chat_defaults = ChatOptions {
        temperature: config.llm.temperature,
        max_tokens: config.llm.max_tokens,
    };
    let service = Arc::new(AgentService::new(
        store,
        Arc::from(llm),
        registry,
        chat_defaults,
    ));

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    // Stale session reaper
    tokio::spawn(dropdesk_server::subsystems::reaper::run_reaper_loop(
        service.clone(),
        config.sessions.clone(),
        tx.subscribe(),
    ));

    let state = Arc::new(HttpState {
        service,
        config,
    });
    http::start_http_server(state, tx.subscribe()).await?;

    Ok(())
}
