use anyhow::{Context, Result};
use std::fs;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cafeboard::auth::AuthState;
use cafeboard::backup;
use cafeboard::cli::{parse_args, print_help};
use cafeboard::config::Config;
use cafeboard::model::ShopConfig;
use cafeboard::scheduler::run_status_watcher;
use cafeboard::server::{self, AppState, ServerMetrics};
use cafeboard::status::StatusResolver;
use cafeboard::store::{JsonFileStore, ShopStore, StoreRecord};
use cafeboard::time_window::TimeWindow;

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();

    if args.help {
        print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cafeboard=info".parse()?),
        )
        .init();

    info!("Cafeboard v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  Shop name: {}", config.shop_name);
    info!("  Data file: {}", config.data_file.display());
    info!("  Listen address: {}", config.socket_addr());

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }
    config.validate()?;

    let store: Arc<dyn ShopStore> = Arc::new(JsonFileStore::open(&config.data_file, || {
        StoreRecord::new(
            ShopConfig::with_name(&config.shop_name),
            AuthState::from_password(&config.admin_password),
        )
    })?);

    if let Some(path) = args.export {
        let text = backup::export(&store.record()?)?;
        fs::write(&path, text).with_context(|| format!("failed to write {}", path))?;
        info!("Backup written to {}", path);
        return Ok(());
    }

    if let Some(path) = args.import {
        let text = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path))?;
        let imported = backup::parse_import(&text)?;
        let password_updated = imported.auth.is_some();
        store.restore(imported.data, imported.auth)?;
        info!("Backup imported from {} (password updated: {})", path, password_updated);
        return Ok(());
    }

    let resolver = StatusResolver::new(TimeWindow::system());

    // Handle --once mode
    if args.once {
        let state = AppState {
            store: store.clone(),
            resolver,
            metrics: Arc::new(ServerMetrics::new()),
            max_body_bytes: config.max_body_bytes,
        };
        let board = state.board(&store.read()?);
        println!("{}", serde_json::to_string_pretty(&board)?);
        return Ok(());
    }

    let metrics = Arc::new(ServerMetrics::new());
    let cancel_token = CancellationToken::new();

    let watcher = tokio::spawn(run_status_watcher(
        store.clone(),
        resolver.clone(),
        metrics.clone(),
        cancel_token.clone(),
    ));

    let shutdown = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            return;
        }
        info!("Shutdown requested");
        shutdown.cancel();
    });

    let state = Arc::new(AppState {
        store,
        resolver,
        metrics,
        max_body_bytes: config.max_body_bytes,
    });
    let result = server::serve(config.socket_addr(), state, cancel_token.clone()).await;

    cancel_token.cancel();
    let _ = watcher.await;

    result.with_context(|| format!("failed to serve on {}", config.socket_addr()))
}
