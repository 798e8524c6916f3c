use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use storetail_api::{now_ms, ByteStore, DeleteOutcome, RecordId, RecordStore, StoreError};

use crate::{DeleteStage, ReconcileError, SweepReport};

/// Чем закончилась очистка одного кандидата.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// Байты и метаданные удалены (или уже отсутствовали).
    Purged,
    /// Запись успела стать полной; не тронута.
    Completed,
}

// ═══════════════════════════════════════════════════════════════
//  OrphanReconciler
// ═══════════════════════════════════════════════════════════════

/// Удаляет записи, которые так и не стали полными за `retention`.
///
/// Порядок для кандидата: свежий `get` (уже полная → пропуск),
/// удаление байт, затем compare-and-delete метаданных. Метаданные
/// никогда не удаляются раньше байт, поэтому crash между шагами
/// оставляет запись-кандидата, и следующий sweep её доочистит.
pub struct OrphanReconciler {
    records: Arc<dyn RecordStore>,
    bytes: Arc<dyn ByteStore>,
    concurrency: usize,
}

impl OrphanReconciler {
    pub fn new(records: Arc<dyn RecordStore>, bytes: Arc<dyn ByteStore>, concurrency: usize) -> Self {
        Self { records, bytes, concurrency: concurrency.max(1) }
    }

    /// Один проход: найти кандидатов старше `now_ms - retention` и
    /// удалить их. Ошибкой считается только провал scan'а.
    pub async fn sweep(
        &self,
        now_ms: i64,
        retention: Duration,
        max_batch: usize,
    ) -> Result<SweepReport, ReconcileError> {
        let started = Instant::now();
        let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
        let threshold_ms = now_ms.saturating_sub(retention_ms);

        let candidates = self
            .records
            .find_incomplete_older_than(threshold_ms, max_batch)
            .await
            .map_err(ReconcileError::ScanFailed)?;

        tracing::info!(
            candidates = candidates.len(),
            threshold_ms,
            max_batch,
            concurrency = self.concurrency,
            "sweep started"
        );

        let mut report = SweepReport { candidates: candidates.len(), ..SweepReport::default() };
        let results: Vec<(RecordId, Result<PurgeOutcome, ReconcileError>)> =
            futures::stream::iter(candidates)
                .map(|record| async move { (record.id, self.purge(record.id).await) })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        for (id, result) in results {
            match result {
                Ok(PurgeOutcome::Purged) => report.purged.push(id),
                Ok(PurgeOutcome::Completed) => report.skipped_completed.push(id),
                Err(e) => {
                    tracing::warn!(record_id = %id, error = %e, "candidate purge failed");
                    report.failures.push(e);
                }
            }
        }

        tracing::info!(
            candidates = report.candidates,
            purged = report.purged.len(),
            skipped_completed = report.skipped_completed.len(),
            errors_count = report.failures.len(),
            duration_secs = started.elapsed().as_secs_f64(),
            "sweep completed"
        );
        Ok(report)
    }

    /// Очистить одну запись. Идемпотентно: повторный вызов после
    /// частичного успеха доводит дело до конца.
    ///
    /// Завершение записи между свежим `get` и удалением байт
    /// возвращается как `DeleteFailed { stage: Bytes }` с kind `Conflict`.
    pub async fn purge(&self, id: RecordId) -> Result<PurgeOutcome, ReconcileError> {
        let fail = |stage: DeleteStage| move |source: StoreError| ReconcileError::DeleteFailed { id, stage, source };

        let current = self.records.get(id).await.map_err(fail(DeleteStage::Lookup))?;
        if current.as_ref().is_some_and(|r| r.is_complete()) {
            tracing::info!(record_id = %id, "record completed before purge, skipping");
            return Ok(PurgeOutcome::Completed);
        }

        self.bytes.delete_all(id).await.map_err(fail(DeleteStage::Bytes))?;

        match self.records.delete_if_incomplete(id).await.map_err(fail(DeleteStage::Metadata))? {
            DeleteOutcome::Deleted => {
                tracing::debug!(record_id = %id, "orphan purged");
                Ok(PurgeOutcome::Purged)
            }
            DeleteOutcome::Absent => {
                tracing::debug!(record_id = %id, "metadata already gone");
                Ok(PurgeOutcome::Purged)
            }
            // Запись завершилась уже после удаления байт: метаданные
            // целы, но ссылаются на пустоту. Это ошибка, а не пропуск.
            DeleteOutcome::Completed => {
                tracing::error!(record_id = %id, "record completed after its bytes were purged");
                Err(fail(DeleteStage::Bytes)(StoreError::conflict(
                    "record completed after its bytes were purged",
                )))
            }
        }
    }

    /// Sweep каждые `interval` до отмены. Провал scan'а логируется,
    /// цикл продолжается.
    pub async fn run_periodic(
        &self,
        token: CancellationToken,
        interval: Duration,
        retention: Duration,
        max_batch: usize,
    ) {
        tracing::info!(interval_secs = interval.as_secs(), "periodic reconciler started");
        loop {
            let sweep = self.sweep(now_ms(), retention, max_batch);
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                result = sweep => result,
            };
            if let Err(e) = result {
                tracing::error!(error = %e, "sweep failed");
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        tracing::info!("periodic reconciler stopped");
    }
}
