use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{net::TcpListener, sync::oneshot};
use tracing::{info, warn};

use leaderboard_ranking::{
    config::{Cli, ServerType},
    dispatcher, http,
    loader::{JsonLinesSource, SourceOfRecord, StaticSource},
    store::MemoryStore,
};

fn init_tracing(server_type: ServerType) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = match server_type {
        ServerType::Production => fmt().json().with_env_filter(filter).try_init(),
        ServerType::Development => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.server_type);
    info!(server_type = ?cli.server_type, "starting ranking server");

    let source: Arc<dyn SourceOfRecord> = match &cli.source {
        Some(path) => Arc::new(JsonLinesSource::new(path)),
        None => {
            warn!("no source of record configured; event rankings start empty");
            Arc::new(StaticSource::empty())
        }
    };

    let (handle, dispatcher_task) =
        dispatcher::spawn(Arc::new(MemoryStore::new()), source, cli.engine_config());

    let report = handle
        .rebuild()
        .await
        .context("loading rankings from the system of record")?;
    info!(?report, "rankings ready");

    let listener = TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!("ranking server listening on {}", listener.local_addr()?);

    // Stop serving as soon as the dispatcher stops, e.g. after a failed re-load.
    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    let supervisor = tokio::spawn(async move {
        let outcome = dispatcher_task.await;
        let _ = stopped_tx.send(());
        outcome
    });

    let app = http::router(handle.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(err) = signal {
                        warn!(error = ?err, "failed to install ctrl-c handler");
                    }
                }
                _ = stopped_rx => warn!("ranking dispatcher stopped; shutting down http server"),
            }
        })
        .await
        .context("http server")?;

    let _ = handle.shutdown();
    supervisor
        .await
        .context("dispatcher supervisor panicked")?
        .context("ranking dispatcher panicked")?
        .context("ranking dispatcher stopped with an error")?;
    Ok(())
}
