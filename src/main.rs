use std::sync::Arc;

use tracing::{info, warn};

use reserva::compactor::run_compactor;
use reserva::config::Config;
use reserva::notify::NotifyHub;
use reserva::Ledger;

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            r = ctrl_c => r?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    reserva::observability::init(config.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&config.data_dir)?;

    let journal_path = config.journal_path();
    let notify = Arc::new(NotifyHub::new());
    let ledger = {
        let path = journal_path.clone();
        tokio::task::spawn_blocking(move || Ledger::open(&path, notify)).await??
    };
    let ledger = Arc::new(ledger);

    info!("reserva ledger ready");
    info!("  journal: {}", journal_path.display());
    info!("  resources: {}", ledger.resource_count());
    info!(
        "  compaction: every {:?} past {} appends",
        config.compact_interval, config.compact_threshold
    );
    info!(
        "  metrics: {}",
        config
            .metrics_port
            .map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics"))
    );
    for resource in ledger.list_resources() {
        info!(
            resource = %resource.id,
            name = resource.name.as_deref().unwrap_or("-"),
            policy = reserva::observability::policy_label(&resource.policy),
            active = resource.active,
            "loaded resource"
        );
    }

    let compactor = tokio::spawn(run_compactor(
        ledger.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    shutdown_signal().await?;
    info!("shutdown signal received");
    compactor.abort();

    // Leave a compact journal behind so the next start replays quickly.
    let final_ledger = ledger.clone();
    match tokio::task::spawn_blocking(move || final_ledger.compact()).await? {
        Ok(()) => info!("final compaction done"),
        Err(e) => warn!(error = %e, "final compaction failed"),
    }

    info!("reserva stopped");
    Ok(())
}
