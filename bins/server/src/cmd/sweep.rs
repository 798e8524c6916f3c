use storage_file::FileBackend;
use storetail_api::now_ms;
use storetail_reconciler::{OrphanReconciler, SweepStatus};

use super::{shutdown_token, Outcome};
use crate::config::{ServerConfig, SweepArgs};
use crate::error::ServerError;

pub async fn run(config_path: &str, args: SweepArgs) -> Result<Outcome, ServerError> {
    let mut config = ServerConfig::load(config_path)?;
    if let Some(secs) = args.retention_secs {
        config.reconciler.retention_secs = secs;
        config.reconciler.validate()?;
    }
    let cfg = &config.reconciler;
    let backend = FileBackend::open(&config.storage)?;
    let reconciler = OrphanReconciler::new(backend.records.clone(), backend.bytes.clone(), cfg.concurrency);

    match cfg.interval() {
        Some(interval) if !args.once => {
            reconciler
                .run_periodic(shutdown_token(), interval, cfg.retention(), cfg.max_batch)
                .await;
            Ok(Outcome::Done)
        }
        _ => {
            let report = reconciler.sweep(now_ms(), cfg.retention(), cfg.max_batch).await?;
            for failure in &report.failures {
                tracing::error!(error = %failure, "purge failed");
            }
            match report.status() {
                SweepStatus::Clean => Ok(Outcome::Done),
                SweepStatus::Partial => Ok(Outcome::Partial),
            }
        }
    }
}
