use std::sync::Arc;
use std::time::Duration;

use storage_file::FileBackend;
use storetail_reconciler::OrphanReconciler;
use storetail_tailer::{EventTailer, LogNotifier};

use super::{shutdown_token, Outcome};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::producer::Producer;

/// Период reconciler'а в `run`, если `interval_secs` не задан.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(config_path: &str) -> Result<Outcome, ServerError> {
    let config = ServerConfig::load(config_path)?;
    let backend = FileBackend::open(&config.storage)?;
    let token = shutdown_token();

    // --- Producer ---
    let mut producer = Producer::new(backend.records.clone(), backend.bytes.clone(), config.producer.clone());
    let producer_token = token.clone();
    let producer_handle = tokio::spawn(async move {
        producer.run(producer_token, None).await;
    });

    // --- Reconciler ---
    let rc = config.reconciler.clone();
    let reconciler = OrphanReconciler::new(backend.records.clone(), backend.bytes.clone(), rc.concurrency);
    let reconciler_token = token.clone();
    let reconciler_handle = tokio::spawn(async move {
        let interval = rc.interval().unwrap_or(DEFAULT_SWEEP_INTERVAL);
        reconciler.run_periodic(reconciler_token, interval, rc.retention(), rc.max_batch).await;
    });

    tracing::info!(data_dir = %config.storage.data_dir, "producer, tailer and reconciler running");

    // --- Tailer (в текущей задаче) ---
    let tailer = EventTailer::new(
        backend.log.clone(),
        backend.checkpoints.clone(),
        Arc::new(LogNotifier),
        config.tailer.clone(),
    );
    let result = tailer.run(token.clone()).await;

    // Фатальная ошибка tailer'а тоже останавливает остальных.
    token.cancel();
    let _ = producer_handle.await;
    let _ = reconciler_handle.await;

    match result {
        Err(e) if e.is_cancelled() => {
            tracing::info!("shutdown complete");
            Ok(Outcome::Done)
        }
        Err(e) => Err(e.into()),
        Ok(()) => Ok(Outcome::Done),
    }
}
