use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use opt_console::backend::HttpBackend;
use opt_console::config::Config;
use opt_console::tasks::registry::TaskRegistry;
use opt_console::tasks::ws::task_routes;
use opt_console::tasks::run_notify_loop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env();

    eprintln!("⚙️  Opt Console v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Backend: {}", config.backend_url);
    eprintln!("   Data dir: {}", config.data_dir.display());
    eprintln!("   WS: ws://0.0.0.0:{}/ws", config.ws_port);
    eprintln!("   API: http://0.0.0.0:{}/api/tasks\n", config.ws_port);

    tokio::fs::create_dir_all(&config.data_dir).await?;

    let backend = Arc::new(HttpBackend::new(config.backend_url.clone()));
    let registry = TaskRegistry::new(&config, backend.clone());

    // Status-event channel: the backend webhook feeds it, the loop drains it.
    let (event_tx, event_rx) = mpsc::channel(config.event_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let notify_handle = tokio::spawn(run_notify_loop(
        Arc::clone(&registry),
        backend,
        event_rx,
        shutdown_rx,
        config.download_timeout,
    ));

    // Spawn Axum WS/REST server
    let app = task_routes(Arc::clone(&registry), event_tx);
    let ws_port = config.ws_port;
    tokio::spawn(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", ws_port))
            .await
            .expect("Failed to bind console server port");
        tracing::info!(port = ws_port, "Task WebSocket server started");
        axum::serve(listener, app).await.ok();
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");

    // Stop the loop and wait for in-flight completion handlers.
    let _ = shutdown_tx.send(true);
    notify_handle.await?;

    Ok(())
}
