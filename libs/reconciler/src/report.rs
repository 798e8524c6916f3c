use storetail_api::RecordId;

use crate::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    /// Все кандидаты обработаны без ошибок.
    Clean,
    /// Хотя бы один кандидат не удалился (останется на следующий sweep)
    /// или завершился, когда его байты уже были удалены.
    Partial,
}

/// Итог одного sweep'а. Ошибки по отдельным кандидатам собираются
/// здесь и не прерывают остальных.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Сколько кандидатов вернул scan.
    pub candidates: usize,
    pub purged: Vec<RecordId>,
    /// Записи, ставшие полными между scan'ом и удалением.
    pub skipped_completed: Vec<RecordId>,
    pub failures: Vec<ReconcileError>,
}

impl SweepReport {
    pub fn status(&self) -> SweepStatus {
        if self.failures.is_empty() {
            SweepStatus::Clean
        } else {
            SweepStatus::Partial
        }
    }

    pub fn first_error(&self) -> Option<&ReconcileError> {
        self.failures.first()
    }
}
