use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::prelude::*;

use nexus_node::routes::build_router;
use nexus_node::{AppState, Config};
use nexus_store::Store;

#[derive(Parser, Debug)]
#[command(name = "nexus-node", about = "NexusPay wallet-infrastructure control plane")]
struct Args {
    /// Apply schema migrations (create all tables and indexes) and exit.
    #[arg(long)]
    migrate: bool,

    /// Override NEXUS_BIND_ADDR.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    std::panic::set_hook(Box::new(|info| {
        let msg = match info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };
        let location = match info.location() {
            Some(l) => format!("at {}:{}:{}", l.file(), l.line(), l.column()),
            None => "unknown location".to_string(),
        };
        eprintln!("CRASH: {} {}", msg, location);
    }));

    let _guard = init_tracing();

    let mut config = Config::from_env()?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    if let Some(parent) = config.database_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Arc::new(Store::open(&config.database_path)?);

    if args.migrate {
        store.migrate()?;
        info!("migrations applied at {}", config.database_path.display());
        return Ok(());
    }

    info!(environment = %config.environment, "starting nexus-node");
    let bind_addr = config.bind_addr.clone();
    let state = AppState::build(config, store)?;

    nexus_node::jobs::recover_pending(&state).await;
    let _workers = nexus_node::jobs::spawn_all(state.clone());

    let app = build_router(state);
    let listener = TcpListener::bind(&bind_addr).await?;
    info!("listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    Ok(())
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let _ = std::fs::create_dir_all("logs");
    let file_appender = tracing_appender::rolling::daily("logs", "nexus-node.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false);
    let stdout_layer = tracing_subscriber::fmt::layer().with_filter(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info,nexus_node=debug".into()),
    );

    tracing_subscriber::registry().with(file_layer).with(stdout_layer).init();
    guard
}
