use std::sync::Arc;

use storage_file::FileBackend;
use storetail_tailer::{EventTailer, LogNotifier, StartPolicy};

use super::{shutdown_token, Outcome};
use crate::config::{ServerConfig, TailArgs};
use crate::error::ServerError;

pub async fn run(config_path: &str, args: TailArgs) -> Result<Outcome, ServerError> {
    let mut config = ServerConfig::load(config_path)?;
    if args.earliest {
        config.tailer.start = StartPolicy::Earliest;
    }
    let backend = FileBackend::open(&config.storage)?;
    tracing::info!(
        oplog = %backend.layout.oplog_path().display(),
        checkpoint = %backend.layout.checkpoint_path().display(),
        start = ?config.tailer.start,
        "tailer starting"
    );

    let tailer = EventTailer::new(
        backend.log.clone(),
        backend.checkpoints.clone(),
        Arc::new(LogNotifier),
        config.tailer.clone(),
    );
    let token = shutdown_token();
    match tailer.run(token).await {
        Err(e) if e.is_cancelled() => {
            let stats = tailer.stats();
            tracing::info!(
                processed = stats.events_processed(),
                skipped = stats.events_skipped(),
                resubscriptions = stats.resubscriptions(),
                "tailer stopped"
            );
            Ok(Outcome::Done)
        }
        Err(e) => Err(e.into()),
        Ok(()) => Ok(Outcome::Done),
    }
}
